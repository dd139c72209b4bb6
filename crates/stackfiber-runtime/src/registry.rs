//! Per-thread fiber registry
//!
//! Every OS thread that touches fibers gets one [`Registry`] in
//! thread-local storage. It records three roles:
//!
//! - `running` - the fiber executing right now
//! - `main` - the thread's original stack, wrapped as a fiber
//! - `scheduler` - where `run_in_scheduler` fibers yield to (defaults to `main`)
//!
//! The main fiber is built lazily the first time any slot is read, and
//! all three slots start out pointing at it. The slots are only touched
//! from their own thread, so the switch path takes no locks.

use crate::config::FiberConfig;
use crate::fatal::fatal;
use crate::fiber::{Fiber, Task};
use stackfiber_core::error::{FiberError, FiberResult};
use stackfiber_core::id::FiberId;
use stackfiber_core::{kdebug, kprint, kwarn};
use std::cell::{Cell, RefCell};

pub(crate) struct Registry {
    running: RefCell<Option<Fiber>>,
    main: RefCell<Option<Fiber>>,
    scheduler: RefCell<Option<Fiber>>,

    /// Live fibers on this thread, main included once it exists
    live: Cell<usize>,

    /// Next id to hand out; main always gets 0
    next_id: Cell<u64>,

    /// Set while the main fiber is being built
    initializing: Cell<bool>,

    /// Loaded from the environment on first use unless installed earlier
    config: RefCell<Option<FiberConfig>>,
}

thread_local! {
    static REGISTRY: Registry = const { Registry::new() };
}

type SlotFn = fn(&Registry) -> &RefCell<Option<Fiber>>;

impl Registry {
    const fn new() -> Self {
        Self {
            running: RefCell::new(None),
            main: RefCell::new(None),
            scheduler: RefCell::new(None),
            live: Cell::new(0),
            next_id: Cell::new(0),
            initializing: Cell::new(false),
            config: RefCell::new(None),
        }
    }

    fn alloc_id(&self) -> FiberId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        FiberId::new(id)
    }

    fn with_config<R>(&self, f: impl FnOnce(&FiberConfig) -> R) -> R {
        let mut slot = self.config.borrow_mut();
        f(slot.get_or_insert_with(|| checked_config(FiberConfig::from_env())))
    }

    /// Build the main fiber and point every slot at it
    ///
    /// The fiber is fully constructed before any slot refers to it.
    fn init_main(&self) {
        if self.initializing.replace(true) {
            fatal(FiberError::RegistryReentered);
        }

        let main = Fiber::new_main(self.alloc_id());
        self.live.set(self.live.get() + 1);

        *self.running.borrow_mut() = Some(main.clone());
        *self.scheduler.borrow_mut() = Some(main.clone());
        *self.main.borrow_mut() = Some(main);

        self.initializing.set(false);
    }

    fn ensure_main(&self) {
        if self.main.borrow().is_some() {
            return;
        }
        self.init_main();
        kprint::set_fiber_id(FiberId::MAIN.as_u64());
        if self.with_config(|c| c.debug_logging) {
            kdebug!("main fiber created");
        }
    }

    fn debug_logging(&self) -> bool {
        match self.config.try_borrow() {
            Ok(config) => config.as_ref().is_some_and(|c| c.debug_logging),
            Err(_) => false,
        }
    }
}

/// Fall back to compiled defaults when `config` does not validate
fn checked_config(config: FiberConfig) -> FiberConfig {
    match config.validate() {
        Ok(()) => config,
        Err(e) => {
            kwarn!("{}; using compiled defaults", e);
            FiberConfig::new()
        }
    }
}

fn get_slot(pick: SlotFn) -> Fiber {
    REGISTRY.with(|reg| {
        if let Some(fiber) = pick(reg).borrow().as_ref() {
            return fiber.clone();
        }
        reg.ensure_main();
        match pick(reg).borrow().as_ref() {
            Some(fiber) => fiber.clone(),
            // ensure_main fills every slot
            None => fatal(FiberError::RegistryReentered),
        }
    })
}

fn set_slot(pick: SlotFn, fiber: Fiber) {
    let old = REGISTRY.with(|reg| {
        reg.ensure_main();
        pick(reg).replace(Some(fiber))
    });
    // Dropping the old handle may run a fiber destructor, which reads the registry
    drop(old);
}

/// Fiber currently executing on this thread
pub fn running() -> Fiber {
    get_slot(|r| &r.running)
}

/// This thread's main fiber
pub fn main_fiber() -> Fiber {
    get_slot(|r| &r.main)
}

/// Fiber that `run_in_scheduler` fibers yield to
pub fn scheduler() -> Fiber {
    get_slot(|r| &r.scheduler)
}

/// Record `fiber` as running; done before every switch so the target sees itself
pub fn set_running(fiber: Fiber) {
    kprint::set_fiber_id(fiber.id().as_u64());
    set_slot(|r| &r.running, fiber);
}

pub fn set_main(fiber: Fiber) {
    set_slot(|r| &r.main, fiber);
}

/// Install a dedicated scheduler fiber for this thread
pub fn set_scheduler(fiber: Fiber) {
    set_slot(|r| &r.scheduler, fiber);
}

/// Id of the fiber currently executing on this thread
pub fn current_id() -> FiberId {
    running().id()
}

/// Live fibers on this thread, main included once created
pub fn live_fibers() -> usize {
    REGISTRY.with(|reg| reg.live.get())
}

/// Create a child fiber on this thread
///
/// A `stack_size` of 0 uses the thread's configured default.
pub fn create_fiber(task: Task, stack_size: usize, run_in_scheduler: bool) -> FiberResult<Fiber> {
    REGISTRY.with(|reg| {
        reg.ensure_main();

        let (size, guard_pages, debug) = reg.with_config(|c| {
            (c.effective_stack_size(stack_size), c.guard_pages, c.debug_logging)
        });

        let id = reg.alloc_id();
        let fiber = Fiber::new_child(id, task, size, guard_pages, run_in_scheduler)?;
        reg.live.set(reg.live.get() + 1);

        if debug {
            kdebug!(
                "created fiber {} (stack {} bytes, run_in_scheduler={})",
                id,
                fiber.stack_size(),
                run_in_scheduler
            );
        }
        Ok(fiber)
    })
}

/// Replace this thread's config; affects fibers created afterwards
pub fn configure_thread(config: FiberConfig) -> FiberResult<()> {
    config.validate()?;
    REGISTRY.with(|reg| *reg.config.borrow_mut() = Some(config));
    Ok(())
}

/// Copy of this thread's config
pub fn thread_config() -> FiberConfig {
    REGISTRY.with(|reg| reg.with_config(FiberConfig::clone))
}

/// Whether fiber lifecycle debug logging is on for this thread
pub(crate) fn debug_enabled() -> bool {
    REGISTRY.try_with(Registry::debug_logging).unwrap_or(false)
}

/// Bookkeeping for a fiber destructor; tolerates thread teardown
pub(crate) fn fiber_dropped(id: FiberId) {
    let _ = REGISTRY.try_with(|reg| {
        reg.live.set(reg.live.get().saturating_sub(1));
        if reg.debug_logging() {
            kdebug!("fiber {} destroyed ({} live)", id, reg.live.get());
        }
    });
}
