//! Stackful fibers
//!
//! A [`Fiber`] is a shared handle to one execution context: a saved
//! register set, an owned [`Stack`] and a one-shot task. Handles are
//! `!Send`; a fiber is created, resumed and dropped on one thread.
//!
//! # State machine
//!
//! ```text
//! Ready --resume--> Running --task returns--> Term --reset--> Ready
//!                   Running --yield---------> Ready
//! ```
//!
//! Anything else aborts the process.
//!
//! # Lifetime across switches
//!
//! Code that switches away never keeps a handle clone on the stack it
//! leaves. A suspended fiber is kept alive by whoever called `resume()`
//! on it (its handle is borrowed for the whole call), so a fiber can
//! never free its own stack while executing on it.

use crate::arch::{self, SavedContext};
use crate::fatal::{fatal, or_fatal};
use crate::memory::Stack;
use crate::registry;
use stackfiber_core::error::{FiberError, FiberResult};
use stackfiber_core::id::FiberId;
use stackfiber_core::state::FiberState;
use stackfiber_core::{kdebug, kerror, kwarn};
use std::cell::{Cell, RefCell, UnsafeCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

/// Work a fiber runs once per start or reset
pub type Task = Box<dyn FnOnce() + 'static>;

struct FiberInner {
    id: FiberId,
    context: UnsafeCell<SavedContext>,
    /// `None` for the main fiber
    stack: Option<Stack>,
    task: RefCell<Option<Task>>,
    state: Cell<FiberState>,
    run_in_scheduler: bool,
}

/// Handle to a fiber
///
/// Cloning is cheap and every clone refers to the same fiber. The stack
/// is released when the last handle drops.
#[derive(Clone)]
pub struct Fiber {
    inner: Rc<FiberInner>,
}

impl Fiber {
    /// Wrap the calling thread's own stack; only the registry calls this
    pub(crate) fn new_main(id: FiberId) -> Fiber {
        Fiber {
            inner: Rc::new(FiberInner {
                id,
                context: UnsafeCell::new(SavedContext::default()),
                stack: None,
                task: RefCell::new(None),
                state: Cell::new(FiberState::Running),
                run_in_scheduler: false,
            }),
        }
    }

    /// Build a Ready child fiber; only the registry calls this
    pub(crate) fn new_child(
        id: FiberId,
        task: Task,
        stack_size: usize,
        guard_pages: usize,
        run_in_scheduler: bool,
    ) -> FiberResult<Fiber> {
        let stack = Stack::allocate(stack_size, guard_pages).map_err(FiberError::MemoryError)?;
        let top = stack.top();

        let inner = FiberInner {
            id,
            context: UnsafeCell::new(SavedContext::default()),
            stack: Some(stack),
            task: RefCell::new(Some(task)),
            state: Cell::new(FiberState::Ready),
            run_in_scheduler,
        };
        // SAFETY: the context is not shared yet and `top` is the top of
        // the stack this fiber owns for its whole life.
        unsafe { arch::init_context(inner.context.get(), top, fiber_entry) };

        Ok(Fiber { inner: Rc::new(inner) })
    }

    #[inline]
    pub fn id(&self) -> FiberId {
        self.inner.id
    }

    #[inline]
    pub fn state(&self) -> FiberState {
        self.inner.state.get()
    }

    /// Whether this fiber yields to the scheduler fiber rather than main
    #[inline]
    pub fn run_in_scheduler(&self) -> bool {
        self.inner.run_in_scheduler
    }

    #[inline]
    pub fn is_main(&self) -> bool {
        self.inner.stack.is_none()
    }

    /// Usable stack bytes; 0 for the main fiber
    pub fn stack_size(&self) -> usize {
        self.inner.stack.as_ref().map_or(0, Stack::size)
    }

    /// Lowest usable stack address; `None` for the main fiber
    pub fn stack_bottom(&self) -> Option<*const u8> {
        self.inner.stack.as_ref().map(|s| s.bottom() as *const u8)
    }

    /// Whether both handles refer to the same fiber
    #[inline]
    pub fn ptr_eq(&self, other: &Fiber) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Switch into this fiber
    ///
    /// The current context is saved into the scheduler fiber when this
    /// fiber runs in the scheduler, otherwise into the main fiber.
    /// Returns once something switches back there.
    ///
    /// Aborts unless the fiber is a Ready child.
    pub fn resume(&self) {
        let inner = &*self.inner;
        let state = inner.state.get();
        if !state.can_resume() || self.is_main() {
            fatal(FiberError::IllegalStateTransition { id: inner.id, op: "resume", state });
        }

        let from = if inner.run_in_scheduler {
            registry::scheduler()
        } else {
            registry::main_fiber()
        };
        if from.ptr_eq(self) {
            fatal(FiberError::ContextTransferFailure {
                id: inner.id,
                reason: "fiber is its own switch target",
            });
        }
        or_fatal(inner.check_transfer());

        if registry::debug_enabled() {
            kdebug!("resume fiber {} from fiber {}", inner.id, from.id());
        }

        let from_ctx = from.inner.context.get();
        // The registry slot keeps `from` alive until the switch has saved into it
        drop(from);

        registry::set_running(self.clone());
        inner.state.set(FiberState::Running);

        // SAFETY: `from_ctx` belongs to a fiber held by a registry slot and
        // the target context was checked above. `self` outlives the call.
        unsafe { arch::context_switch(from_ctx, inner.context.get()) };
    }

    /// Switch from this fiber back to its scheduler or main fiber
    ///
    /// Running becomes Ready; Term stays Term. Aborts unless this is the
    /// running child fiber.
    pub fn yield_now(&self) {
        self.inner.suspend();
    }

    /// Reuse a terminated fiber's stack for a new task
    ///
    /// Aborts unless the fiber is Term and owns a stack.
    pub fn reset<F>(&self, task: F)
    where
        F: FnOnce() + 'static,
    {
        let inner = &*self.inner;
        let state = inner.state.get();
        let stack = match inner.stack.as_ref() {
            Some(stack) if state.can_reset() => stack,
            _ => fatal(FiberError::IllegalStateTransition { id: inner.id, op: "reset", state }),
        };

        // SAFETY: a Term fiber is not executing and nothing else holds
        // a pointer into its context.
        unsafe { arch::init_context(inner.context.get(), stack.top(), fiber_entry) };
        *inner.task.borrow_mut() = Some(Box::new(task));
        inner.state.set(FiberState::Ready);

        if registry::debug_enabled() {
            kdebug!("reset fiber {}", inner.id);
        }
    }
}

impl FiberInner {
    fn check_transfer(&self) -> FiberResult<()> {
        // SAFETY: only read while the owner is suspended
        let ctx = unsafe { &*self.context.get() };
        // The saved stack pointer may belong to any stack: resuming a
        // run_in_scheduler fiber from main saves main's context into the
        // scheduler fiber.
        if !ctx.is_captured() {
            return Err(FiberError::ContextTransferFailure {
                id: self.id,
                reason: "target context was never captured",
            });
        }
        Ok(())
    }

    /// Switch away from this (running) fiber
    fn suspend(&self) {
        let state = self.state.get();
        if !state.can_yield() || self.stack.is_none() {
            fatal(FiberError::IllegalStateTransition { id: self.id, op: "yield", state });
        }

        let running = registry::running();
        let is_running = std::ptr::eq(Rc::as_ptr(&running.inner), self);
        drop(running);
        if !is_running {
            fatal(FiberError::ContextTransferFailure {
                id: self.id,
                reason: "yielding fiber is not the running fiber",
            });
        }

        let target = if self.run_in_scheduler {
            registry::scheduler()
        } else {
            registry::main_fiber()
        };
        if std::ptr::eq(Rc::as_ptr(&target.inner), self) {
            fatal(FiberError::ContextTransferFailure {
                id: self.id,
                reason: "fiber is its own switch target",
            });
        }
        or_fatal(target.inner.check_transfer());

        if registry::debug_enabled() {
            kdebug!("yield fiber {} to fiber {} ({})", self.id, target.id(), state.after_yield());
        }

        self.state.set(state.after_yield());
        let target_ctx = target.inner.context.get();
        // The slot now owns the target; no clone stays on this stack
        registry::set_running(target);

        // SAFETY: `self` is kept alive by its resumer, the target by the
        // running slot.
        unsafe { arch::context_switch(self.context.get(), target_ctx) };
    }
}

impl Drop for FiberInner {
    fn drop(&mut self) {
        if self.stack.is_some() {
            match self.state.get() {
                FiberState::Ready if self.task.get_mut().is_none() => {
                    kwarn!("fiber {} dropped while suspended; its frames are discarded", self.id);
                }
                FiberState::Running => {
                    kerror!("fiber {} dropped while running", self.id);
                }
                _ => {}
            }
        }
        registry::fiber_dropped(self.id);
        // `stack` is unmapped when the fields drop
    }
}

impl std::fmt::Debug for Fiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("run_in_scheduler", &self.run_in_scheduler())
            .field("stack_size", &self.stack_size())
            .finish()
    }
}

/// Yield the running fiber
///
/// Aborts when called outside a child fiber.
pub fn yield_now() {
    let current = registry::running();
    let inner = Rc::as_ptr(&current.inner);
    drop(current);
    // SAFETY: the running fiber is kept alive by its resumer
    unsafe { (*inner).suspend() };
}

/// Trampoline every child context starts in
extern "C" fn fiber_entry() -> ! {
    let current = registry::running();
    let id = current.id();
    let task = current.inner.task.borrow_mut().take();
    let inner = Rc::as_ptr(&current.inner);
    drop(current);

    if let Some(task) = task {
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            fatal(FiberError::TaskPanicked { id });
        }
    }

    // SAFETY: the fiber is kept alive by its resumer until this yield
    // has switched away.
    unsafe {
        (*inner).state.set(FiberState::Term);
        (*inner).suspend();
    }

    // resume() refuses Term fibers, so nothing switches back here
    fatal(FiberError::ContextTransferFailure {
        id,
        reason: "terminated fiber resumed without reset",
    })
}

/// Configures and creates a fiber
///
/// ```ignore
/// let fiber = FiberBuilder::new()
///     .stack_size(64 * 1024)
///     .run_in_scheduler(false)
///     .spawn(|| println!("hi"))?;
/// fiber.resume();
/// ```
#[derive(Debug, Clone)]
pub struct FiberBuilder {
    stack_size: usize,
    run_in_scheduler: bool,
}

impl FiberBuilder {
    pub fn new() -> Self {
        Self {
            stack_size: 0,
            run_in_scheduler: true,
        }
    }

    /// Stack size in bytes (0 = configured default)
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn run_in_scheduler(mut self, enable: bool) -> Self {
        self.run_in_scheduler = enable;
        self
    }

    /// Create the fiber in state Ready on the calling thread
    pub fn spawn<F>(self, task: F) -> FiberResult<Fiber>
    where
        F: FnOnce() + 'static,
    {
        registry::create_fiber(Box::new(task), self.stack_size, self.run_in_scheduler)
    }
}

impl Default for FiberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::{Command, Stdio};

    fn spawn_fiber(run_in_scheduler: bool, task: impl FnOnce() + 'static) -> Fiber {
        FiberBuilder::new()
            .run_in_scheduler(run_in_scheduler)
            .spawn(task)
            .unwrap()
    }

    #[test]
    fn test_runs_once_and_terminates() {
        let out = Rc::new(RefCell::new(Vec::new()));
        let sink = out.clone();
        let fiber = spawn_fiber(false, move || sink.borrow_mut().push("A"));

        assert_eq!(fiber.state(), FiberState::Ready);
        fiber.resume();

        assert_eq!(*out.borrow(), vec!["A"]);
        assert_eq!(fiber.state(), FiberState::Term);
        assert!(registry::running().is_main());
    }

    #[test]
    fn test_yield_and_resume_keep_locals() {
        let trace = Rc::new(RefCell::new(Vec::new()));
        let t = trace.clone();
        let fiber = spawn_fiber(false, move || {
            let mut local = 10u64;
            for step in 0..3 {
                t.borrow_mut().push(format!("fiber {step} {local}"));
                local += 1;
                yield_now();
            }
        });

        let caller_local = [7u8; 32];
        let mut rounds = 0;
        while fiber.state() != FiberState::Term {
            fiber.resume();
            trace.borrow_mut().push(format!("main {rounds}"));
            rounds += 1;
        }

        assert_eq!(rounds, 4);
        assert_eq!(caller_local, [7u8; 32]);
        assert_eq!(
            *trace.borrow(),
            [
                "fiber 0 10", "main 0",
                "fiber 1 11", "main 1",
                "fiber 2 12", "main 2",
                "main 3",
            ]
        );
    }

    #[test]
    fn test_task_runs_on_creating_thread() {
        let seen = Rc::new(Cell::new(None));
        let s = seen.clone();
        let fiber = spawn_fiber(true, move || s.set(Some(std::thread::current().id())));
        fiber.resume();
        assert_eq!(seen.get(), Some(std::thread::current().id()));
    }

    #[test]
    fn test_running_slot_inside_fiber() {
        let inside = Rc::new(Cell::new(FiberId::NONE));
        let i = inside.clone();
        let fiber = spawn_fiber(true, move || i.set(registry::current_id()));
        fiber.resume();
        assert_eq!(inside.get(), fiber.id());
        assert_eq!(registry::current_id(), FiberId::MAIN);
    }

    #[test]
    fn test_reset_reuses_stack() {
        let counter = Rc::new(Cell::new(0));
        let c = counter.clone();
        let fiber = spawn_fiber(true, move || c.set(c.get() + 1));
        let bottom = fiber.stack_bottom();

        fiber.resume();
        assert_eq!(counter.get(), 1);

        for cycle in 2..=5 {
            let c = counter.clone();
            fiber.reset(move || c.set(c.get() + 1));
            assert_eq!(fiber.state(), FiberState::Ready);
            fiber.resume();
            assert_eq!(fiber.state(), FiberState::Term);
            assert_eq!(counter.get(), cycle);
            assert_eq!(fiber.stack_bottom(), bottom);
        }
    }

    #[test]
    fn test_live_counter_after_drop() {
        let _ = registry::main_fiber();
        let before = registry::live_fibers();

        let fibers: Vec<Fiber> = (0..8).map(|_| spawn_fiber(true, || yield_now())).collect();
        assert_eq!(registry::live_fibers(), before + 8);
        for f in &fibers {
            f.resume();
            f.resume();
            assert_eq!(f.state(), FiberState::Term);
        }
        drop(fibers);

        assert_eq!(registry::live_fibers(), before);
    }

    #[test]
    fn test_drop_suspended_fiber() {
        let _ = registry::main_fiber();
        let before = registry::live_fibers();

        let fiber = spawn_fiber(true, || loop {
            yield_now();
        });
        fiber.resume();
        assert_eq!(fiber.state(), FiberState::Ready);
        drop(fiber);

        assert_eq!(registry::live_fibers(), before);
    }

    #[test]
    fn test_resume_from_main_with_idle_scheduler() {
        // The scheduler is installed but never runs; main's context is
        // saved into it and the worker yields back to main through it.
        let idle = spawn_fiber(false, || {});
        registry::set_scheduler(idle.clone());

        let steps = Rc::new(Cell::new(0));
        let s = steps.clone();
        let worker = spawn_fiber(true, move || {
            s.set(1);
            yield_now();
            s.set(2);
        });

        worker.resume();
        assert_eq!(worker.state(), FiberState::Ready);
        assert_eq!(steps.get(), 1);
        assert!(registry::running().ptr_eq(&idle));

        worker.resume();
        assert_eq!(worker.state(), FiberState::Term);
        assert_eq!(steps.get(), 2);

        assert_eq!(idle.state(), FiberState::Ready);
        registry::set_scheduler(registry::main_fiber());
        registry::set_running(registry::main_fiber());
    }

    #[test]
    fn test_scheduler_fiber_drives_workers() {
        let log = Rc::new(RefCell::new(Vec::new()));

        let workers: Vec<Fiber> = (0..3)
            .map(|i| {
                let log = log.clone();
                spawn_fiber(true, move || {
                    log.borrow_mut().push(format!("w{i} start"));
                    yield_now();
                    log.borrow_mut().push(format!("w{i} end"));
                })
            })
            .collect();

        let queue = workers.clone();
        let sched_log = log.clone();
        let sched = spawn_fiber(false, move || {
            // Round robin until every worker is done
            while queue.iter().any(|w| w.state() != FiberState::Term) {
                for w in queue.iter().filter(|w| w.state() == FiberState::Ready) {
                    w.resume();
                }
            }
            sched_log.borrow_mut().push("sched done".to_string());
        });
        registry::set_scheduler(sched.clone());

        sched.resume();

        assert_eq!(sched.state(), FiberState::Term);
        assert!(workers.iter().all(|w| w.state() == FiberState::Term));
        assert_eq!(
            *log.borrow(),
            ["w0 start", "w1 start", "w2 start", "w0 end", "w1 end", "w2 end", "sched done"]
        );
        assert!(registry::running().is_main());

        registry::set_scheduler(registry::main_fiber());
    }

    #[test]
    fn test_tiny_stack_raised_to_minimum() {
        let fiber = FiberBuilder::new().stack_size(1).spawn(|| {}).unwrap();
        assert!(fiber.stack_size() >= registry::thread_config().min_stack_size);
        assert!(!fiber.is_main());
        assert!(fiber.run_in_scheduler());
    }

    #[test]
    fn test_deep_recursion_on_fiber_stack() {
        fn depth(n: u32) -> u32 {
            let pad = std::hint::black_box([0u8; 64]);
            if n == 0 {
                pad[0] as u32
            } else {
                1 + depth(n - 1)
            }
        }
        let result = Rc::new(Cell::new(0));
        let r = result.clone();
        let fiber = FiberBuilder::new()
            .stack_size(256 * 1024)
            .spawn(move || r.set(depth(200)))
            .unwrap();
        fiber.resume();
        assert_eq!(result.get(), 200);
    }

    #[test]
    fn test_debug_format() {
        let main = registry::main_fiber();
        let text = format!("{:?}", main);
        assert!(text.contains("Fiber"));
        assert!(text.contains("RUNNING") || text.contains("Running"));
    }

    // Fatal paths abort, so each runs in a child copy of this test binary

    const CHILD_ENV: &str = "SF_FATAL_CHILD";

    fn expect_abort(test_name: &str, scenario: fn()) {
        if std::env::var_os(CHILD_ENV).is_some() {
            scenario();
            std::process::exit(0);
        }

        let path = module_path!()
            .split_once("::")
            .map_or(module_path!(), |(_, rest)| rest);
        let exe = std::env::current_exe().unwrap();
        let status = Command::new(exe)
            .args(["--exact", &format!("{path}::{test_name}"), "--test-threads=1"])
            .env(CHILD_ENV, "1")
            .env("SF_LOG_LEVEL", "off")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert_eq!(status.signal(), Some(libc::SIGABRT), "{test_name}: {status:?}");
    }

    #[test]
    fn test_resume_running_aborts() {
        expect_abort("test_resume_running_aborts", || {
            let fiber = spawn_fiber(true, || registry::running().resume());
            fiber.resume();
        });
    }

    #[test]
    fn test_resume_after_term_aborts() {
        expect_abort("test_resume_after_term_aborts", || {
            let fiber = spawn_fiber(true, || {});
            fiber.resume();
            fiber.resume();
        });
    }

    #[test]
    fn test_resume_main_aborts() {
        expect_abort("test_resume_main_aborts", || registry::main_fiber().resume());
    }

    #[test]
    fn test_reset_ready_aborts() {
        expect_abort("test_reset_ready_aborts", || {
            let fiber = spawn_fiber(true, || {});
            fiber.reset(|| {});
        });
    }

    #[test]
    fn test_yield_outside_fiber_aborts() {
        expect_abort("test_yield_outside_fiber_aborts", yield_now);
    }

    #[test]
    fn test_yield_not_running_aborts() {
        expect_abort("test_yield_not_running_aborts", || {
            let other = spawn_fiber(true, || {});
            let fiber = spawn_fiber(true, move || {
                // Force a Running state on a fiber that is not running
                other.inner.state.set(FiberState::Running);
                other.yield_now();
            });
            fiber.resume();
        });
    }

    #[test]
    fn test_task_panic_aborts() {
        expect_abort("test_task_panic_aborts", || {
            let fiber = spawn_fiber(true, || panic!("boom"));
            fiber.resume();
        });
    }
}
