//! aarch64 (AAPCS64) context switching
//!
//! Saved state: sp, lr (resume address), x19-x28, fp (x29) and the low
//! halves of v8-v15 (d8-d15).

use super::EntryFn;
use stackfiber_core::constants::STACK_ALIGN;
use std::arch::naked_asm;

/// Saved callee-saved state of a suspended context
///
/// Layout (offsets are used by the assembly below):
/// ```text
/// 0x00: sp    0x08: lr    0x10-0x58: x19-x28    0x60: fp
/// 0x68-0xA0: d8-d15
/// ```
#[repr(C)]
#[derive(Debug, Default)]
pub struct SavedContext {
    pub sp: u64,
    pub lr: u64,
    pub x19_x28: [u64; 10],
    pub fp: u64,
    pub d8_d15: [u64; 8],
}

impl SavedContext {
    #[inline]
    pub fn stack_pointer(&self) -> usize {
        self.sp as usize
    }

    #[inline]
    pub fn is_captured(&self) -> bool {
        self.sp != 0 && self.lr != 0
    }
}

/// Prepare `ctx` so that switching to it runs `entry` on the stack ending at `stack_top`
///
/// # Safety
///
/// `ctx` must be valid for writes; `stack_top` must be the top of a
/// mapped stack that outlives every switch into `ctx`.
#[inline]
pub unsafe fn init_context(ctx: *mut SavedContext, stack_top: *mut u8, entry: EntryFn) {
    let sp = (stack_top as usize) & !(STACK_ALIGN - 1);

    let mut x19_x28 = [0u64; 10];
    x19_x28[0] = entry as usize as u64;

    *ctx = SavedContext {
        sp: sp as u64,
        lr: fiber_trampoline as usize as u64,
        x19_x28,
        ..SavedContext::default()
    };
}

/// First code a fresh context executes; entry is in x19, fp is 0
#[unsafe(naked)]
unsafe extern "C" fn fiber_trampoline() {
    naked_asm!(
        "blr x19",
        "brk #0x1",
    );
}

/// Save the running context into `old` and resume `new`
///
/// # Safety
///
/// Same contract as the x86_64 version.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_old: *mut SavedContext, _new: *const SavedContext) {
    naked_asm!(
        // Save into old (x0)
        "mov x9, sp",
        "str x9, [x0, #0x00]",
        "str x30, [x0, #0x08]",
        "stp x19, x20, [x0, #0x10]",
        "stp x21, x22, [x0, #0x20]",
        "stp x23, x24, [x0, #0x30]",
        "stp x25, x26, [x0, #0x40]",
        "stp x27, x28, [x0, #0x50]",
        "str x29, [x0, #0x60]",
        "stp d8, d9, [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        // Load from new (x1)
        "ldr x9, [x1, #0x00]",
        "mov sp, x9",
        "ldr x30, [x1, #0x08]",
        "ldp x19, x20, [x1, #0x10]",
        "ldp x21, x22, [x1, #0x20]",
        "ldp x23, x24, [x1, #0x30]",
        "ldp x25, x26, [x1, #0x40]",
        "ldp x27, x28, [x1, #0x50]",
        "ldr x29, [x1, #0x60]",
        "ldp d8, d9, [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        // lr is the saved resume point (or the trampoline for a fresh context)
        "ret",
    );
}
