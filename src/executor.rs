use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{Result, ServerError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A thread pool that gives every submitted job its own worker.
///
/// The pool never queues a job behind another one:
/// - an idle worker is woken if there is one
/// - otherwise a new worker thread is spawned, without an upper bound
/// - workers exit after waiting `keep_alive` with nothing to do
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

/// Internal state shared between the executor and its worker threads
struct Inner {
    /// Duration a worker thread will wait for new jobs before shutting down
    keep_alive: Duration,
    /// Shared state protected by a mutex
    shared: Mutex<Shared>,
    /// Condition variable for worker thread synchronization
    condvar: Condvar,
}

/// Shared state for the thread pool
struct Shared {
    /// Jobs handed to a notified worker but not yet picked up
    queue: VecDeque<Job>,
    /// Current number of worker threads
    workers: usize,
    /// Number of idle worker threads
    idle: usize,
    /// Number of workers that have been notified of new work
    notified: usize,
}

impl Executor {
    /// Creates a new executor whose idle workers live for `keep_alive`.
    pub fn new(keep_alive: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    queue: VecDeque::new(),
                    workers: 0,
                    idle: 0,
                    notified: 0,
                }),
                condvar: Condvar::new(),
                keep_alive,
            }),
        }
    }

    /// Runs `job` on an idle worker, or on a new one if none is idle.
    ///
    /// # Errors
    /// Returns an error if a worker thread cannot be spawned or the pool's
    /// lock is poisoned. The job is dropped in both cases.
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut shared = self
            .inner
            .shared
            .lock()
            .map_err(|_| ServerError::LockPoisoned)?;

        shared.queue.push_back(Box::new(job));

        if shared.idle > 0 {
            shared.idle -= 1;
            shared.notified += 1;
            self.inner.condvar.notify_one();
            return Ok(());
        }

        shared.workers += 1;
        if let Err(err) = self.spawn_worker() {
            shared.workers -= 1;
            shared.queue.pop_back();
            return Err(err);
        }
        Ok(())
    }

    /// Number of live worker threads.
    #[cfg(test)]
    fn workers(&self) -> usize {
        self.inner
            .shared
            .lock()
            .map(|shared| shared.workers)
            .unwrap_or_default()
    }

    fn spawn_worker(&self) -> Result<()> {
        let inner = self.inner.clone();
        std::thread::Builder::new()
            .name("trellis-worker".to_owned())
            .spawn(move || {
                if let Err(e) = inner.run() {
                    log::error!("Worker thread error: {}", e);
                }
            })
            .map_err(ServerError::ThreadSpawn)?;
        Ok(())
    }
}

impl Inner {
    /// Main worker thread loop.
    ///
    /// The worker will:
    /// 1. Run every job in the queue
    /// 2. Wait for a notification using the condition variable
    /// 3. Exit if nothing arrives within the keep-alive duration
    fn run(&self) -> Result<()> {
        let mut shared = self.shared.lock().map_err(|_| ServerError::LockPoisoned)?;

        'alive: loop {
            while let Some(job) = shared.queue.pop_front() {
                drop(shared);
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    log::error!("connection job panicked");
                }
                shared = self.shared.lock().map_err(|_| ServerError::LockPoisoned)?;
            }

            shared.idle += 1;

            loop {
                let result = self
                    .condvar
                    .wait_timeout(shared, self.keep_alive)
                    .map_err(|_| ServerError::LockPoisoned)?;

                shared = result.0;
                let timeout = result.1;

                if shared.notified != 0 {
                    shared.notified -= 1;
                    continue 'alive;
                }

                if timeout.timed_out() {
                    break 'alive;
                }
            }
        }

        shared.workers -= 1;
        shared.idle -= 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Barrier};
    use std::time::Instant;

    #[test]
    fn test_job_execution() {
        let executor = Executor::new(Duration::from_secs(1));
        let (tx, rx) = mpsc::channel();

        executor.execute(move || tx.send(42).unwrap()).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    /// Blocked jobs must not delay later ones: every job gets a worker.
    #[test]
    fn test_jobs_run_concurrently() {
        let executor = Executor::new(Duration::from_secs(1));
        let jobs = 8;
        let barrier = Arc::new(Barrier::new(jobs + 1));

        for _ in 0..jobs {
            let barrier = barrier.clone();
            executor.execute(move || {
                barrier.wait();
            })
            .unwrap();
        }

        // Would deadlock if any job were queued behind another.
        barrier.wait();
        assert!(executor.workers() >= jobs);
    }

    #[test]
    fn test_idle_worker_is_reused() {
        let executor = Executor::new(Duration::from_secs(5));
        let (tx, rx) = mpsc::channel();

        let first = tx.clone();
        executor.execute(move || first.send(()).unwrap()).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Give the worker time to park as idle.
        let deadline = Instant::now() + Duration::from_secs(5);
        while executor.inner.shared.lock().unwrap().idle == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        executor.execute(move || tx.send(()).unwrap()).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(executor.workers(), 1);
    }

    #[test]
    fn test_panicking_job_keeps_pool_usable() {
        let executor = Executor::new(Duration::from_secs(1));
        let counter = Arc::new(AtomicUsize::new(0));

        executor.execute(|| panic!("boom")).unwrap();

        let (tx, rx) = mpsc::channel();
        let counter_clone = counter.clone();
        executor
            .execute(move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            })
            .unwrap();

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_idle_workers_exit_after_keep_alive() {
        let executor = Executor::new(Duration::from_millis(50));
        let (tx, rx) = mpsc::channel();
        executor.execute(move || tx.send(()).unwrap()).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while executor.workers() != 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(executor.workers(), 0);
    }
}
