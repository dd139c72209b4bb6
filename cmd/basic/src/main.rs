//! Basic stackfiber example
//!
//! A first-come first-served scheduler on the main fiber: 20 fibers are
//! queued and resumed in order, each running to completion.
//!
//! # Environment Variables
//!
//! - `SF_FLUSH_EPRINT=1` - Flush debug output immediately (useful for crash debugging)
//! - `SF_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `SF_DEBUG=1` - Log fiber create/resume/yield/drop events

use stackfiber::{Fiber, FiberBuilder, FiberResult};
use stackfiber::{env_get_bool, init_logging, kinfo, live_fibers, thread_config};

/// Runs queued fibers in arrival order
#[derive(Default)]
struct Scheduler {
    tasks: Vec<Fiber>,
}

impl Scheduler {
    fn schedule(&mut self, fiber: Fiber) {
        self.tasks.push(fiber);
    }

    /// Resume every queued fiber once; each returns to main when it finishes
    fn run(&mut self) {
        kinfo!("running {} fibers", self.tasks.len());
        for task in self.tasks.drain(..) {
            task.resume();
            debug_assert!(task.state().is_terminated());
        }
    }
}

// SF_LOG_LEVEL=debug SF_DEBUG=1 cargo run -p stackfiber-basic
fn main() -> FiberResult<()> {
    init_logging();
    println!("=== stackfiber Basic Example ===\n");
    if env_get_bool("SF_DEBUG", false) {
        thread_config().print();
    }

    let mut sc = Scheduler::default();
    for i in 0..20 {
        let fiber = FiberBuilder::new()
            .run_in_scheduler(false)
            .spawn(move || println!("hello world {}", i))?;
        sc.schedule(fiber);
    }
    kinfo!("{} live fibers before run", live_fibers());

    sc.run();

    kinfo!("{} live fibers after run", live_fibers());
    println!("\n=== Example Complete ===");
    Ok(())
}
