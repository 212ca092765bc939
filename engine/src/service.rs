// Orchestration service
// Owns the build state machine, the published index, the sort builder,
// the persist task, and the search worker

use crate::codec;
use crate::search::{Query, SearchResults};
use crate::sort::build_sort_indexes;
use crate::walk;
use crate::worker::{SearchContext, SearchWorker};
use findex_core::{FileEntry, FileIndex, FindexError, ProgressGauge};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLockReadGuard};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Which walker a rebuild should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkMode {
    /// MFT when elevated, directory walk otherwise.
    Auto,
    Mft,
    Directory,
}

/// Build state machine: Idle -> Building -> Publishing -> Indexing ->
/// Ready. A failed build falls back to Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    Building,
    Publishing,
    Indexing,
    Ready,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Volume letter the MFT walker opens.
    pub volume: char,
    /// Where `refresh_index` persists the index.
    pub index_path: PathBuf,
    /// Root for the directory walker; defaults to the volume root (or `/`
    /// off Windows).
    pub walk_root: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            volume: 'C',
            index_path: PathBuf::from("findex.idx"),
            walk_root: None,
        }
    }
}

/// The engine facade the presentation layer talks to.
pub struct Engine {
    config: EngineConfig,
    ctx: Arc<SearchContext>,
    worker: Arc<SearchWorker>,
    progress: Arc<ProgressGauge>,
    file_lock: Arc<Mutex<()>>,
    state: Arc<Mutex<BuildState>>,
    last_error: Arc<Mutex<Option<FindexError>>>,
    last_build_time: Arc<Mutex<Option<Duration>>>,
    build_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let ctx = Arc::new(SearchContext::default());
        let worker = Arc::new(SearchWorker::spawn(Arc::clone(&ctx)));
        Self {
            config,
            ctx,
            worker,
            progress: Arc::new(ProgressGauge::new()),
            file_lock: Arc::new(Mutex::new(())),
            state: Arc::new(Mutex::new(BuildState::Idle)),
            last_error: Arc::new(Mutex::new(None)),
            last_build_time: Arc::new(Mutex::new(None)),
            build_thread: Mutex::new(None),
        }
    }

    /// Start a rebuild. Returns `Busy` while one is in flight and
    /// `DeniedPrivileges` when the MFT route is requested without
    /// elevation; the build itself runs on a background thread.
    pub fn refresh_index(&self, mode: WalkMode) -> Result<(), FindexError> {
        let mode = self.resolve_mode(mode)?;
        {
            let mut state = self.state.lock();
            match *state {
                BuildState::Building | BuildState::Publishing | BuildState::Indexing => {
                    return Err(FindexError::Busy);
                }
                BuildState::Idle | BuildState::Ready => *state = BuildState::Building,
            }
        }
        // The previous build thread, if any, has already reached a terminal
        // state; reap it so handles do not pile up.
        if let Some(previous) = self.build_thread.lock().take() {
            let _ = previous.join();
        }

        self.progress.reset();
        let task = BuildTask {
            config: self.config.clone(),
            ctx: Arc::clone(&self.ctx),
            worker: Arc::clone(&self.worker),
            progress: Arc::clone(&self.progress),
            file_lock: Arc::clone(&self.file_lock),
            state: Arc::clone(&self.state),
            last_error: Arc::clone(&self.last_error),
            last_build_time: Arc::clone(&self.last_build_time),
        };
        let handle = std::thread::spawn(move || task.run(mode));
        *self.build_thread.lock() = Some(handle);
        Ok(())
    }

    fn resolve_mode(&self, mode: WalkMode) -> Result<WalkMode, FindexError> {
        match mode {
            WalkMode::Directory => Ok(WalkMode::Directory),
            #[cfg(target_os = "windows")]
            WalkMode::Mft => {
                if crate::volume::is_elevated() {
                    Ok(WalkMode::Mft)
                } else {
                    Err(FindexError::DeniedPrivileges)
                }
            }
            #[cfg(not(target_os = "windows"))]
            WalkMode::Mft => Err(FindexError::Unsupported),
            #[cfg(target_os = "windows")]
            WalkMode::Auto => {
                if crate::volume::is_elevated() {
                    Ok(WalkMode::Mft)
                } else {
                    Ok(WalkMode::Directory)
                }
            }
            #[cfg(not(target_os = "windows"))]
            WalkMode::Auto => Ok(WalkMode::Directory),
        }
    }

    /// Block until a running rebuild reaches a terminal state.
    pub fn wait_for_build(&self) {
        if let Some(handle) = self.build_thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// Synchronously load a persisted index and publish it.
    pub fn load_index(&self, path: &std::path::Path) -> Result<(), FindexError> {
        let index = {
            let _file = self.file_lock.lock();
            codec::load_index(path)?
        };
        info!("Loaded {} entries from {}", index.len(), path.display());
        self.publish(Arc::new(index));
        Ok(())
    }

    /// Synchronously persist the currently published index.
    pub fn save_index(&self, path: &std::path::Path) -> Result<(), FindexError> {
        let index = Arc::clone(&self.ctx.index.read());
        let _file = self.file_lock.lock();
        codec::save_index(path, &index)
    }

    fn publish(&self, index: Arc<FileIndex>) {
        {
            let mut published = self.ctx.index.write();
            *published = Arc::clone(&index);
        }
        let sorts = build_sort_indexes(&index);
        {
            let current = self.ctx.index.read();
            if Arc::ptr_eq(&current, &index) {
                *self.ctx.sorts.write() = sorts;
            } else {
                debug!("Sort indexes discarded: index superseded during build");
            }
        }
        self.worker.notify();
    }

    /// Nonblocking: wakes the search worker with a new query.
    pub fn submit_query(&self, query: Query) {
        self.worker.submit(query);
    }

    /// Borrowed view of the latest completed results.
    pub fn take_results(&self) -> RwLockReadGuard<'_, SearchResults> {
        self.ctx.results.read()
    }

    /// Block until no search is pending or running.
    pub fn wait_for_search(&self) {
        self.worker.wait_idle();
    }

    pub fn entry(&self, id: u32) -> Option<FileEntry> {
        self.ctx.index.read().entry(id)
    }

    pub fn name(&self, id: u32) -> String {
        self.ctx.index.read().name_of(id).to_string()
    }

    pub fn full_path(&self, id: u32) -> String {
        self.ctx.index.read().full_path(id)
    }

    /// Snapshot of the published index.
    pub fn index(&self) -> Arc<FileIndex> {
        Arc::clone(&self.ctx.index.read())
    }

    /// Fraction of records processed by the running build.
    pub fn progress(&self) -> f64 {
        self.progress.fraction()
    }

    pub fn state(&self) -> BuildState {
        *self.state.lock()
    }

    pub fn last_build_time(&self) -> Option<Duration> {
        *self.last_build_time.lock()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().as_ref().map(|e| e.to_string())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.wait_for_build();
    }
}

struct BuildTask {
    config: EngineConfig,
    ctx: Arc<SearchContext>,
    worker: Arc<SearchWorker>,
    progress: Arc<ProgressGauge>,
    file_lock: Arc<Mutex<()>>,
    state: Arc<Mutex<BuildState>>,
    last_error: Arc<Mutex<Option<FindexError>>>,
    last_build_time: Arc<Mutex<Option<Duration>>>,
}

impl BuildTask {
    fn run(self, mode: WalkMode) {
        let timer = Instant::now();
        let built = self.build(mode);

        let index = match built {
            Ok(index) => Arc::new(index),
            Err(e) => {
                error!("Index build failed: {e}");
                *self.last_error.lock() = Some(e);
                *self.state.lock() = BuildState::Idle;
                return;
            }
        };
        let elapsed = timer.elapsed();
        info!("Built {} entries in {:.3} s", index.len(), elapsed.as_secs_f64());

        *self.state.lock() = BuildState::Publishing;
        {
            let mut published = self.ctx.index.write();
            *published = Arc::clone(&index);
        }

        *self.state.lock() = BuildState::Indexing;
        let persister = {
            let index = Arc::clone(&index);
            let file_lock = Arc::clone(&self.file_lock);
            let path = self.config.index_path.clone();
            std::thread::spawn(move || {
                let _file = file_lock.lock();
                if let Err(e) = codec::save_index(&path, &index) {
                    warn!("Failed to persist index to {}: {e}", path.display());
                }
            })
        };

        let sorts = build_sort_indexes(&index);
        {
            let current = self.ctx.index.read();
            if Arc::ptr_eq(&current, &index) {
                *self.ctx.sorts.write() = sorts;
            } else {
                debug!("Sort indexes discarded: index superseded during build");
            }
        }
        let _ = persister.join();

        *self.last_build_time.lock() = Some(elapsed);
        *self.last_error.lock() = None;
        *self.state.lock() = BuildState::Ready;
        self.worker.notify();
    }

    fn build(&self, mode: WalkMode) -> Result<FileIndex, FindexError> {
        match mode {
            #[cfg(target_os = "windows")]
            WalkMode::Mft => crate::ntfs::walker::walk_volume(self.config.volume, &self.progress),
            #[cfg(not(target_os = "windows"))]
            WalkMode::Mft => Err(FindexError::Unsupported),
            WalkMode::Directory => {
                let (root, label) = self.walk_target();
                #[cfg(target_os = "windows")]
                if let Some(used) = crate::volume::used_bytes(self.config.volume) {
                    self.progress.set_total(used);
                }
                walk::walk_directory(&root, &label, Arc::clone(&self.progress))
            }
            WalkMode::Auto => Err(FindexError::Other(
                "Walk mode must be resolved before building".to_string(),
            )),
        }
    }

    fn walk_target(&self) -> (PathBuf, String) {
        if let Some(root) = &self.config.walk_root {
            return (root.clone(), root.display().to_string());
        }
        let letter = self.config.volume.to_ascii_uppercase();
        if cfg!(target_os = "windows") {
            (PathBuf::from(format!("{letter}:\\")), format!("{letter}:"))
        } else {
            (PathBuf::from("/"), "/".to_string())
        }
    }
}
