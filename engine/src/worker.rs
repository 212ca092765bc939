// Search worker
// One long-lived thread evaluates queries; submissions are edge-triggered,
// coalesce while an evaluation runs, and cancel it cooperatively

use crate::search::{evaluate, Query, SearchResults};
use crate::sort::SortIndexes;
use findex_core::sync::WorkerPool;
use findex_core::FileIndex;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// The latches shared between the publisher, the search worker, and
/// readers: `index` is the published-index latch, `sorts` the permutation
/// latch, `results` the published-results latch.
#[derive(Default)]
pub struct SearchContext {
    pub index: RwLock<Arc<FileIndex>>,
    pub sorts: RwLock<SortIndexes>,
    pub results: RwLock<SearchResults>,
}

struct WorkerState {
    query: Option<Query>,
    should_run: bool,
    running: bool,
    shutdown: bool,
    /// Cancel flag of the evaluation currently in flight (or a stale one
    /// when idle; cancelling it then is harmless).
    cancel: Arc<AtomicBool>,
}

struct WorkerSync {
    state: Mutex<WorkerState>,
    wake: Condvar,
    done: Condvar,
}

pub struct SearchWorker {
    sync: Arc<WorkerSync>,
    completed: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl SearchWorker {
    pub fn spawn(ctx: Arc<SearchContext>) -> Self {
        let sync = Arc::new(WorkerSync {
            state: Mutex::new(WorkerState {
                query: None,
                should_run: false,
                running: false,
                shutdown: false,
                cancel: Arc::new(AtomicBool::new(false)),
            }),
            wake: Condvar::new(),
            done: Condvar::new(),
        });
        let completed = Arc::new(AtomicU64::new(0));
        let thread = {
            let sync = Arc::clone(&sync);
            let completed = Arc::clone(&completed);
            std::thread::spawn(move || worker_loop(&ctx, &sync, &completed))
        };
        Self {
            sync,
            completed,
            thread: Some(thread),
        }
    }

    /// Replace the pending query and wake the worker. An evaluation in
    /// flight is cancelled; rapid submissions collapse into a single
    /// follow-up evaluation of the latest query.
    pub fn submit(&self, query: Query) {
        {
            let mut state = self.sync.state.lock();
            state.query = Some(query);
            state.should_run = true;
            state.cancel.store(true, Ordering::Relaxed);
        }
        self.sync.wake.notify_one();
    }

    /// Re-run the last submitted query, if any. Called after an index
    /// publish so readers see results against the fresh index.
    pub fn notify(&self) {
        {
            let mut state = self.sync.state.lock();
            if state.query.is_none() {
                return;
            }
            state.should_run = true;
            state.cancel.store(true, Ordering::Relaxed);
        }
        self.sync.wake.notify_one();
    }

    /// Block until no evaluation is pending or in flight.
    pub fn wait_idle(&self) {
        let mut state = self.sync.state.lock();
        while state.should_run || state.running {
            self.sync.done.wait(&mut state);
        }
    }

    /// Number of evaluations that ran to completion and published.
    pub fn completed_evaluations(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

impl Drop for SearchWorker {
    fn drop(&mut self) {
        {
            let mut state = self.sync.state.lock();
            state.shutdown = true;
            state.cancel.store(true, Ordering::Relaxed);
        }
        self.sync.wake.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn worker_loop(ctx: &SearchContext, sync: &WorkerSync, completed: &AtomicU64) {
    let pool = WorkerPool::new();
    loop {
        let (query, cancel) = {
            let mut state = sync.state.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if state.should_run {
                    if let Some(query) = state.query.clone() {
                        state.should_run = false;
                        let cancel = Arc::new(AtomicBool::new(false));
                        state.cancel = Arc::clone(&cancel);
                        state.running = true;
                        break (query, cancel);
                    }
                    state.should_run = false;
                }
                sync.wake.wait(&mut state);
            }
        };

        run_one(ctx, &pool, &query, &cancel, completed);

        {
            let mut state = sync.state.lock();
            state.running = false;
        }
        sync.done.notify_all();
    }
}

fn run_one(
    ctx: &SearchContext,
    pool: &WorkerPool,
    query: &Query,
    cancel: &Arc<AtomicBool>,
    completed: &AtomicU64,
) {
    // Shared latches are held for the whole evaluation; the publisher's
    // exclusive swap waits for in-flight searches, never the reverse.
    let index_guard = ctx.index.read();
    let index = Arc::clone(&index_guard);
    let sorts_guard = ctx.sorts.read();
    let permutation = sorts_guard.permutation(query.sort);

    let timer = Instant::now();
    let mut working = Vec::new();
    if !evaluate(&index, permutation, query, pool, cancel, &mut working) {
        return;
    }
    let elapsed = timer.elapsed();

    let mut published = ctx.results.write();
    std::mem::swap(&mut published.ids, &mut working);
    published.elapsed = elapsed;
    drop(published);
    completed.fetch_add(1, Ordering::Relaxed);
}
