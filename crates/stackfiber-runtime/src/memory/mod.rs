//! Fiber stack memory
//!
//! Each child fiber owns one [`Stack`]: an anonymous mapping whose lowest
//! pages are a PROT_NONE guard, so running off the end of a fiber stack
//! faults instead of scribbling over a neighbour. The mapping is created
//! once, survives any number of fiber resets, and is unmapped exactly
//! once when the `Stack` drops.
//!
//! ```text
//! base            bottom                                   top
//!  | guard pages   | usable stack (grows down from top)     |
//! ```

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::page_size;
    } else {
        compile_error!("stackfiber stacks are only implemented for unix targets");
    }
}

use std::ptr::NonNull;

/// Exclusively owned fiber stack
pub struct Stack {
    /// Start of the mapping (first guard page)
    base: NonNull<u8>,

    /// Whole mapping, guard included
    total_size: usize,

    /// Guard bytes at the low end
    guard_size: usize,
}

impl Stack {
    /// Lowest usable address
    #[inline]
    pub fn bottom(&self) -> *mut u8 {
        // SAFETY: guard_size < total_size, both inside the mapping
        unsafe { self.base.as_ptr().add(self.guard_size) }
    }

    /// One past the highest usable address; initial stack pointer
    #[inline]
    pub fn top(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(self.total_size) }
    }

    /// Usable bytes (guard excluded)
    #[inline]
    pub fn size(&self) -> usize {
        self.total_size - self.guard_size
    }

    #[inline]
    pub fn guard_size(&self) -> usize {
        self.guard_size
    }

    /// Whether `addr` lies in the usable part of this stack
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.bottom() as usize && addr <= self.top() as usize
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("bottom", &self.bottom())
            .field("size", &self.size())
            .field("guard", &self.guard_size)
            .finish()
    }
}

/// Round `size` up to a multiple of `page`
#[inline]
pub(crate) fn round_to_page(size: usize, page: usize) -> Option<usize> {
    debug_assert!(page.is_power_of_two());
    size.checked_add(page - 1).map(|s| s & !(page - 1))
}
