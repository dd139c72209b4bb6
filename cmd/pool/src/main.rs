//! Worker pool example
//!
//! OS worker threads pull jobs from a shared lock-free queue. A
//! `Semaphore` bounds how many workers process a batch at once. Inside a
//! worker every job is a fiber, interleaved by a dedicated scheduler fiber
//! that resumes jobs round robin until the batch is done.
//!
//! # Environment Variables
//!
//! - `POOL_WORKERS` - Worker threads (default 6)
//! - `POOL_PERMITS` - Workers allowed to run a batch at once (default 3)
//! - `POOL_JOBS` - Total jobs (default 200)
//! - `SF_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)

use crossbeam_queue::ArrayQueue;
use stackfiber::{env_get, init_logging, kdebug, kinfo, kwarn};
use stackfiber::{yield_now, Fiber, FiberBuilder, FiberResult, FiberState, Semaphore};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Jobs a worker takes per permit
const BATCH: usize = 8;

/// Steps each job yields between
const STEPS: u64 = 4;

struct Shared {
    jobs: ArrayQueue<u64>,
    permits: Semaphore,
    active: AtomicUsize,
    peak: AtomicUsize,
    done: AtomicUsize,
    checksum: AtomicUsize,
}

/// Run one batch of jobs as fibers on this thread
fn run_batch(shared: &Arc<Shared>, batch: Vec<u64>) -> FiberResult<()> {
    let jobs: Rc<RefCell<Vec<Fiber>>> = Rc::new(RefCell::new(Vec::with_capacity(batch.len())));

    for n in batch {
        let shared = shared.clone();
        let fiber = FiberBuilder::new()
            .stack_size(32 * 1024)
            .spawn(move || {
                let mut acc = 0;
                for step in 0..STEPS {
                    acc += n * step;
                    yield_now();
                }
                shared.checksum.fetch_add(acc as usize, Ordering::Relaxed);
                shared.done.fetch_add(1, Ordering::Relaxed);
            })?;
        jobs.borrow_mut().push(fiber);
    }

    let queue = jobs.clone();
    let scheduler = FiberBuilder::new().run_in_scheduler(false).spawn(move || {
        let queue = queue.borrow();
        let mut rounds = 0;
        while !queue.iter().all(|f| f.state().is_terminated()) {
            for f in queue.iter().filter(|f| f.state() == FiberState::Ready) {
                f.resume();
            }
            rounds += 1;
        }
        kdebug!("batch of {} finished in {} rounds", queue.len(), rounds);
    })?;

    stackfiber::set_scheduler_fiber(scheduler.clone());
    scheduler.resume();
    stackfiber::set_scheduler_fiber(stackfiber::main_fiber());

    if !scheduler.state().is_terminated() {
        kwarn!("scheduler fiber {} did not finish", scheduler.id());
    }
    Ok(())
}

fn worker(index: usize, shared: Arc<Shared>) -> FiberResult<usize> {
    let mut batches = 0;
    loop {
        let permit = shared.permits.acquire();

        let now = shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        shared.peak.fetch_max(now, Ordering::SeqCst);

        let batch: Vec<u64> = std::iter::from_fn(|| shared.jobs.pop()).take(BATCH).collect();
        let empty = batch.is_empty();
        if !empty {
            run_batch(&shared, batch)?;
            batches += 1;
        }

        shared.active.fetch_sub(1, Ordering::SeqCst);
        drop(permit);

        if empty {
            break;
        }
    }
    kdebug!("worker {} ran {} batches, {} fibers live", index, batches, stackfiber::live_fibers());
    Ok(batches)
}

fn main() {
    init_logging();
    println!("=== stackfiber Pool Example ===\n");

    let workers: usize = env_get("POOL_WORKERS", 6);
    let permits: usize = env_get("POOL_PERMITS", 3);
    let total: usize = env_get("POOL_JOBS", 200);

    let shared = Arc::new(Shared {
        jobs: ArrayQueue::new(total.max(1)),
        permits: Semaphore::new(permits),
        active: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        done: AtomicUsize::new(0),
        checksum: AtomicUsize::new(0),
    });
    for n in 0..total as u64 {
        let _ = shared.jobs.push(n);
    }

    let start = Instant::now();
    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let shared = shared.clone();
            thread::Builder::new()
                .name(format!("pool-{}", i))
                .spawn(move || worker(i, shared))
        })
        .collect();

    let mut batches = 0;
    for handle in handles {
        match handle.map(|h| h.join()) {
            Ok(Ok(Ok(n))) => batches += n,
            Ok(Ok(Err(e))) => kwarn!("worker failed: {}", e),
            Ok(Err(_)) => kwarn!("worker panicked"),
            Err(e) => kwarn!("failed to spawn worker: {}", e),
        }
    }
    let elapsed = start.elapsed();

    let expected: u64 = (0..total as u64).map(|n| n * (0..STEPS).sum::<u64>()).sum();
    let checksum = shared.checksum.load(Ordering::SeqCst) as u64;
    let peak = shared.peak.load(Ordering::SeqCst);

    kinfo!("{} batches on {} workers, peak concurrency {} (limit {})", batches, workers, peak, permits);
    println!("jobs done:  {}/{}", shared.done.load(Ordering::SeqCst), total);
    println!("checksum:   {} (expected {})", checksum, expected);
    println!("peak:       {} of {} permits", peak, permits);
    println!("elapsed:    {:?}", elapsed);

    assert!(peak <= permits, "semaphore admitted {} workers", peak);
    assert_eq!(checksum, expected);
    println!("\n=== Example Complete ===");
}
