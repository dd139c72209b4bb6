//! Architecture-specific context switching
//!
//! Each architecture provides the same three items:
//!
//! - `SavedContext` - callee-saved registers, stack pointer and resume address
//! - `init_context` - prepare a context that enters the fiber trampoline
//! - `context_switch` - save the current context, load another one
//!
//! Only callee-saved state is kept: a switch is an ordinary `extern "C"`
//! call from the compiler's point of view, so everything else is already
//! spilled by the caller.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use self::x86_64::{context_switch, init_context, SavedContext};
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use self::aarch64::{context_switch, init_context, SavedContext};
    } else {
        compile_error!("stackfiber supports x86_64 and aarch64 only");
    }
}

/// Entry point a fresh context calls on its own stack; must never return
pub type EntryFn = extern "C" fn() -> !;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Stack;
    use std::cell::Cell;

    thread_local! {
        static MAIN_CTX: Cell<*mut SavedContext> = const { Cell::new(std::ptr::null_mut()) };
        static CHILD_CTX: Cell<*mut SavedContext> = const { Cell::new(std::ptr::null_mut()) };
        static HITS: Cell<u32> = const { Cell::new(0) };
    }

    extern "C" fn bounce() -> ! {
        let main = MAIN_CTX.with(Cell::get);
        let child = CHILD_CTX.with(Cell::get);
        loop {
            HITS.with(|h| h.set(h.get() + 1));
            unsafe { context_switch(child, main) };
        }
    }

    #[test]
    fn test_raw_switch_round_trip() {
        let stack = Stack::allocate(64 * 1024, 1).unwrap();
        let main: *mut SavedContext = Box::into_raw(Box::default());
        let child: *mut SavedContext = Box::into_raw(Box::default());

        unsafe {
            assert!(!(*child).is_captured());
            init_context(child, stack.top(), bounce);
            assert!((*child).is_captured());
            assert!(stack.contains((*child).stack_pointer()));
        }

        MAIN_CTX.with(|c| c.set(main));
        CHILD_CTX.with(|c| c.set(child));

        let before = 0x5EED_u64;
        for round in 1..=3 {
            unsafe { context_switch(main, child) };
            assert_eq!(HITS.with(Cell::get), round);
        }
        // Locals on the caller's stack survive the trips
        assert_eq!(before, 0x5EED);

        unsafe {
            assert!(stack.contains((*child).stack_pointer()));
            drop(Box::from_raw(main));
            drop(Box::from_raw(child));
        }
    }
}
