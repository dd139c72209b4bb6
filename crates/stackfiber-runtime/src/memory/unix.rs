//! Unix stack implementation using mmap

use super::{round_to_page, Stack};
use nix::sys::mman::{mmap_anonymous, mprotect, munmap, MapFlags, ProtFlags};
use stackfiber_core::constants::FALLBACK_PAGE_SIZE;
use stackfiber_core::error::MemoryError;
use stackfiber_core::kerror;
use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::sync::OnceLock;

static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// System page size (cached)
pub fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 && (size as usize).is_power_of_two() {
            size as usize
        } else {
            FALLBACK_PAGE_SIZE
        }
    })
}

impl Stack {
    /// Map a stack with at least `size` usable bytes and `guard_pages` guard pages
    pub fn allocate(size: usize, guard_pages: usize) -> Result<Stack, MemoryError> {
        let page = page_size();
        let usable = round_to_page(size, page).ok_or(MemoryError::SizeOverflow)?;
        let guard_size = guard_pages
            .max(1)
            .checked_mul(page)
            .ok_or(MemoryError::SizeOverflow)?;
        let total_size = usable
            .checked_add(guard_size)
            .ok_or(MemoryError::SizeOverflow)?;
        let length = NonZeroUsize::new(usable)
            .and(NonZeroUsize::new(total_size))
            .ok_or(MemoryError::AllocationFailed)?;

        let base = unsafe {
            mmap_anonymous(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
            )
        }
        .map_err(|_| MemoryError::AllocationFailed)?;

        // Guard pages sit at the low end; stacks grow down into them
        if unsafe { mprotect(base, guard_size, ProtFlags::PROT_NONE) }.is_err() {
            let _ = unsafe { munmap(base, total_size) };
            return Err(MemoryError::ProtectionFailed);
        }

        Ok(Stack {
            base: base.cast::<u8>(),
            total_size,
            guard_size,
        })
    }

    fn release(&mut self) -> Result<(), MemoryError> {
        let base: NonNull<libc::c_void> = self.base.cast();
        unsafe { munmap(base, self.total_size) }.map_err(|_| MemoryError::ReleaseFailed)
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            kerror!("failed to unmap fiber stack at {:p}: {}", self.base, e);
        }
    }
}
