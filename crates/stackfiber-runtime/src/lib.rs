//! # stackfiber-runtime
//!
//! Platform-specific runtime for stackfiber.
//!
//! This crate provides:
//! - Stack memory (mmap with a guard page)
//! - Context switching (architecture-specific assembly)
//! - The `Fiber` handle and its state machine
//! - The per-thread registry of running, main and scheduler fibers
//! - Configuration (build-time defaults + environment overrides)

pub mod config;
pub mod memory;
pub mod arch;
pub mod fiber;
pub mod registry;
pub mod fatal;

// Re-exports
pub use config::{ConfigError, FiberConfig};
pub use fatal::fatal;
pub use fiber::{yield_now, Fiber, FiberBuilder, Task};
pub use memory::Stack;
pub use registry::{
    configure_thread, create_fiber, current_id, live_fibers, main_fiber, running, scheduler,
    set_main, set_running, set_scheduler, thread_config,
};
