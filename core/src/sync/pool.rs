// Worker pool
// Fixed threads draining an unbounded queue, with wait-to-quiescence

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    queue: VecDeque<Job>,
    active: usize,
    shutdown: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    work_ready: Condvar,
    all_idle: Condvar,
}

/// Fixed-size worker pool.
///
/// `wait` returns only when the queue is empty AND every worker is idle, so
/// it doubles as the memory barrier between a fan-out phase and the pass
/// that consumes its results. There is no task cancellation primitive;
/// cancellation is cooperative through caller-owned flags.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Pool sized to the machine's hardware concurrency.
    pub fn new() -> Self {
        Self::with_threads(num_cpus::get().max(1))
    }

    pub fn with_threads(threads: usize) -> Self {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                active: 0,
                shutdown: false,
            }),
            work_ready: Condvar::new(),
            all_idle: Condvar::new(),
        });
        let workers = (0..threads.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || worker_loop(&shared))
            })
            .collect();
        Self { shared, workers }
    }

    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock();
            state.queue.push_back(Box::new(job));
        }
        self.shared.work_ready.notify_one();
    }

    /// Block until the queue is drained and all workers are idle.
    pub fn wait(&self) {
        let mut state = self.shared.state.lock();
        while !(state.queue.is_empty() && state.active == 0) {
            self.shared.all_idle.wait(&mut state);
        }
    }
}

fn worker_loop(shared: &PoolShared) {
    let mut state = shared.state.lock();
    loop {
        if let Some(job) = state.queue.pop_front() {
            state.active += 1;
            drop(state);
            job();
            state = shared.state.lock();
            state.active -= 1;
            if state.active == 0 && state.queue.is_empty() {
                shared.all_idle.notify_all();
            }
        } else if state.shutdown {
            return;
        } else {
            shared.work_ready.wait(&mut state);
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.wait();
        {
            self.shared.state.lock().shutdown = true;
        }
        self.shared.work_ready.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn wait_observes_all_completed_tasks() {
        let pool = WorkerPool::with_threads(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..1_000 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        pool.wait();
        assert_eq!(counter.load(Ordering::Relaxed), 1_000);
    }

    #[test]
    fn tasks_may_enqueue_more_tasks() {
        let pool = Arc::new(WorkerPool::with_threads(2));
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let pool2 = Arc::clone(&pool);
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                for _ in 0..10 {
                    let counter = Arc::clone(&counter);
                    pool2.execute(move || {
                        counter.fetch_add(1, Ordering::Relaxed);
                    });
                }
            });
        }
        pool.wait();
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn wait_with_no_tasks_returns_immediately() {
        let pool = WorkerPool::with_threads(1);
        pool.wait();
    }
}
