//! # stackfiber-core
//!
//! Core types for the stackfiber runtime.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Context switching, stacks and the per-thread registry live in
//! `stackfiber-runtime`.
//!
//! ## Modules
//!
//! - `id` - Fiber identifier type
//! - `state` - Fiber state machine
//! - `error` - Error types and the fatal/recoverable split
//! - `semaphore` - Counting semaphore for OS threads
//! - `kprint` - Kernel-style debug printing macros
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod error;
pub mod semaphore;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::FiberId;
pub use state::FiberState;
pub use error::{FiberError, FiberResult, MemoryError, SemaphoreError};
pub use semaphore::{Semaphore, SemaphorePermit};
pub use env::{env_get, env_get_bool, env_get_opt, env_is_set};

/// Constants for stack layout
pub mod constants {
    /// Smallest stack a fiber may be created with
    pub const MIN_STACK_SIZE: usize = 16 * 1024;

    /// Fallback page size when the OS cannot be asked
    pub const FALLBACK_PAGE_SIZE: usize = 4096;

    cfg_if::cfg_if! {
        if #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))] {
            /// Stack pointer alignment required by the C ABI
            pub const STACK_ALIGN: usize = 16;
        } else {
            /// Stack pointer alignment required by the C ABI
            pub const STACK_ALIGN: usize = 8;
        }
    }

    /// No fiber sentinel value
    pub const FIBER_NONE: u64 = u64::MAX;
}
