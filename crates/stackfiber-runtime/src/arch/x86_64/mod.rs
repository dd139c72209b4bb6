//! x86_64 (System V) context switching
//!
//! Saved state per the SysV AMD64 ABI: rsp, resume rip, rbx, rbp,
//! r12-r15, plus the MXCSR and x87 control words.

use super::EntryFn;
use stackfiber_core::constants::STACK_ALIGN;
use std::arch::naked_asm;

/// Saved callee-saved state of a suspended context
///
/// Layout (offsets are used by the assembly below):
/// ```text
/// 0x00: rsp     0x08: rip     0x10: rbx     0x18: rbp
/// 0x20: r12     0x28: r13     0x30: r14     0x38: r15
/// 0x40: mxcsr (u32)           0x44: x87 control word (u16)
/// ```
#[repr(C)]
#[derive(Debug, Default)]
pub struct SavedContext {
    pub rsp: u64,
    pub rip: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub mxcsr: u32,
    pub fpucw: u16,
    _pad: u16,
}

/// MXCSR power-on value: all exceptions masked, round to nearest
const MXCSR_DEFAULT: u32 = 0x1F80;

/// x87 control word power-on value
const FPUCW_DEFAULT: u16 = 0x037F;

impl SavedContext {
    /// Stack pointer the context resumes with
    #[inline]
    pub fn stack_pointer(&self) -> usize {
        self.rsp as usize
    }

    /// Whether the context was ever initialized or captured
    #[inline]
    pub fn is_captured(&self) -> bool {
        self.rsp != 0 && self.rip != 0
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
    // rsp is 16-byte aligned at the trampoline's `call`, so `entry`
    // starts with rsp % 16 == 8 like any other callee.
    let sp = (stack_top as usize) & !(STACK_ALIGN - 1);

    let ctx = &mut *ctx;
    *ctx = SavedContext {
        rsp: sp as u64,
        rip: fiber_trampoline as usize as u64,
        r12: entry as usize as u64,
        mxcsr: MXCSR_DEFAULT,
        fpucw: FPUCW_DEFAULT,
        ..SavedContext::default()
    };
}

/// First code a fresh context executes; rbp is 0 to end frame-pointer walks
#[unsafe(naked)]
unsafe extern "C" fn fiber_trampoline() {
    naked_asm!(
        "call r12",
        "ud2",
    );
}

/// Save the running context into `old` and resume `new`
///
/// Returns when some later switch resumes `old`.
///
/// # Safety
///
/// `old` must be valid for writes, `new` must hold a context produced by
/// `init_context` or a previous switch, and its stack must still be mapped.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_old: *mut SavedContext, _new: *const SavedContext) {
    naked_asm!(
        // Save into old (rdi)
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 2f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "stmxcsr dword ptr [rdi + 0x40]",
        "fnstcw word ptr [rdi + 0x44]",
        // Load from new (rsi)
        "mov rsp, [rsi + 0x00]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "ldmxcsr dword ptr [rsi + 0x40]",
        "fldcw word ptr [rsi + 0x44]",
        "jmp qword ptr [rsi + 0x08]",
        // Resumed: rsp points at our caller's return address again
        "2:",
        "ret",
    );
}
