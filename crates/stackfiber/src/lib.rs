//! # stackfiber - cooperative stackful fibers
//!
//! Many independently stacked execution contexts inside one OS thread,
//! with explicit hand-off of control and no kernel involvement.
//!
//! ## Features
//!
//! - **Stackful**: every fiber owns an mmap'd stack with a guard page and
//!   can suspend from any call depth
//! - **Fast switch**: hand-written assembly saves only callee-saved state
//! - **Reusable**: a terminated fiber can be reset with a new task on the
//!   same stack
//! - **Per-thread**: handles are `!Send`; each thread has its own registry
//!   of running, main and scheduler fibers
//! - **Semaphore**: a counting semaphore for OS threads working around fibers
//!
//! ## Quick Start
//!
//! ```ignore
//! use stackfiber::{create_fiber, yield_now, FiberState};
//!
//! fn main() {
//!     let fiber = create_fiber(|| {
//!         println!("step 1");
//!         yield_now();
//!         println!("step 2");
//!     })
//!     .unwrap();
//!
//!     while fiber.state() != FiberState::Term {
//!         fiber.resume();
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │       create_fiber(), resume(), yield_now(), reset()        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Per-thread Registry                         │
//! │            running / main / scheduler slots                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┴───────────────────┐
//!          ▼                                       ▼
//!    ┌──────────────────┐                ┌──────────────────┐
//!    │  Context switch  │                │   Fiber stacks   │
//!    │  x86_64/aarch64  │                │  mmap + guard    │
//!    └──────────────────┘                └──────────────────┘
//! ```
//!
//! Scheduling policy is left to the caller: resume fibers from `main`, or
//! install a dedicated scheduler fiber with [`set_scheduler_fiber`].

// Re-export core types
pub use stackfiber_core::{
    FiberId,
    FiberState,
    FiberError,
    FiberResult,
    MemoryError,
    Semaphore,
    SemaphoreError,
    SemaphorePermit,
};

// Re-export kprint macros for debug logging
pub use stackfiber_core::{kprint, kprintln, kerror, kwarn, kinfo, kdebug, ktrace};
pub use stackfiber_core::kprint::{LogLevel, init as init_logging, set_log_level, set_flush_enabled};

// Re-export env utilities
pub use stackfiber_core::{env_get, env_get_bool, env_get_opt, env_is_set};

// Re-export runtime types
pub use stackfiber_runtime::{
    Fiber,
    FiberBuilder,
    FiberConfig,
    ConfigError,
    configure_thread,
    thread_config,
    live_fibers,
};

use stackfiber_runtime::{fiber, registry};

/// Create a fiber with the default stack that yields to the scheduler fiber
///
/// The fiber starts Ready; call [`Fiber::resume`] to run it.
///
/// # Example
///
/// ```ignore
/// use stackfiber::create_fiber;
///
/// let fiber = create_fiber(|| println!("hello"))?;
/// fiber.resume();
/// ```
pub fn create_fiber<F>(task: F) -> FiberResult<Fiber>
where
    F: FnOnce() + 'static,
{
    FiberBuilder::new().spawn(task)
}

/// Yield the running fiber back to its scheduler or main fiber
///
/// Aborts the process when called outside a child fiber.
#[inline]
pub fn yield_now() {
    fiber::yield_now()
}

/// Handle to the fiber currently running on this thread
///
/// Outside any child fiber this is the thread's main fiber.
#[inline]
pub fn current() -> Fiber {
    registry::running()
}

/// Id of the fiber currently running on this thread
#[inline]
pub fn current_id() -> FiberId {
    registry::current_id()
}

/// Check if currently executing inside a child fiber
#[inline]
pub fn is_in_fiber() -> bool {
    !registry::running().is_main()
}

/// This thread's main fiber
#[inline]
pub fn main_fiber() -> Fiber {
    registry::main_fiber()
}

/// The fiber `run_in_scheduler` fibers yield to on this thread
#[inline]
pub fn scheduler_fiber() -> Fiber {
    registry::scheduler()
}

/// Install a dedicated scheduler fiber for this thread
///
/// Pass [`main_fiber()`] to restore the default.
pub fn set_scheduler_fiber(fiber: Fiber) {
    registry::set_scheduler(fiber)
}
