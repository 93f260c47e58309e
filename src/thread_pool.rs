//! Fixed-size worker pool.
//!
//! Workers pull boxed jobs from one shared queue. Dropping the pool raises
//! the completion flag, wakes every worker and joins them; jobs still queued
//! at that point are run first.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Queue {
    jobs: VecDeque<Job>,
    /// Jobs popped but not yet finished.
    running: usize,
    complete: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    /// Signalled when a job is pushed or the pool shuts down.
    work_available: Condvar,
    /// Signalled when the pool becomes idle.
    idle: Condvar,
}

/// A pool of worker threads executing queued jobs.
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use render_driver::ThreadPool;
///
/// let pool = ThreadPool::new(4);
/// let counter = Arc::new(AtomicUsize::new(0));
/// for _ in 0..16 {
///     let counter = counter.clone();
///     pool.execute(move || {
///         counter.fetch_add(1, Ordering::SeqCst);
///     });
/// }
/// pool.wait();
/// assert_eq!(counter.load(Ordering::SeqCst), 16);
/// ```
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Creates a pool with the given number of worker threads (at least one).
    pub fn new(num_threads: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                running: 0,
                complete: false,
            }),
            work_available: Condvar::new(),
            idle: Condvar::new(),
        });

        let workers = (0..num_threads.max(1))
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || worker_loop(&shared))
            })
            .collect();

        Self { shared, workers }
    }

    /// Creates a pool sized to the number of available CPU cores.
    pub fn default_threads() -> Self {
        Self::new(std::thread::available_parallelism().map_or(1, |n| n.get()))
    }

    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job for execution on some worker.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.queue.lock().jobs.push_back(Box::new(job));
        self.shared.work_available.notify_one();
    }

    /// Block until the queue is empty and no job is running.
    pub fn wait(&self) {
        let mut queue = self.shared.queue.lock();
        while !queue.jobs.is_empty() || queue.running > 0 {
            self.shared.idle.wait(&mut queue);
        }
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::default_threads()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.queue.lock().complete = true;
        self.shared.work_available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    queue.running += 1;
                    break job;
                }
                if queue.complete {
                    return;
                }
                shared.work_available.wait(&mut queue);
            }
        };

        // A panicking job must not take the worker down with it.
        let _ = catch_unwind(AssertUnwindSafe(job));

        let mut queue = shared.queue.lock();
        queue.running -= 1;
        if queue.jobs.is_empty() && queue.running == 0 {
            shared.idle.notify_all();
        }
    }
}
