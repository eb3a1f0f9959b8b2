//! The registry owns every root scope, runs indexing jobs one at a time on a
//! background worker and fans searches out over all registered indexes.

pub mod persist;

use crate::config::EngineConfig;
use crate::document::ResultDocument;
use crate::error::{Conflict, Error, Result, SearchError};
use crate::events::{EventBus, RegistryEvent};
use crate::job::{IndexingJob, JobId};
use crate::paths;
use crate::query::{self, SearchRequest};
use crate::root::{IndexingEnv, RootScope};
use crate::tree::NodeId;
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

#[derive(Default)]
struct RegistryState {
    scopes: Vec<Arc<RootScope>>,
    /// Jobs not yet picked up, in submission order.
    queue: VecDeque<IndexingJob>,
    running: Option<IndexingJob>,
    worker_active: bool,
    worker: Option<JoinHandle<()>>,
    shutting_down: bool,
}

impl RegistryState {
    fn take_next_ready(&mut self) -> Option<IndexingJob> {
        if self.shutting_down {
            return None;
        }
        let pos = self.queue.iter().position(IndexingJob::is_ready)?;
        let job = self.queue.remove(pos)?;
        self.running = Some(job.clone());
        Some(job)
    }

    fn has_ready(&self) -> bool {
        !self.shutting_down && self.queue.iter().any(IndexingJob::is_ready)
    }

    fn running_targets(&self, dir: &Path) -> bool {
        self.running
            .as_ref()
            .is_some_and(|job| job.scope().directory() == dir)
    }
}

struct Shared {
    config: EngineConfig,
    env: IndexingEnv,
    state: Mutex<RegistryState>,
    idle: Condvar,
    events: EventBus,
    save_lock: Mutex<()>,
}

/// Cheap to clone; clones share the same queue and scopes.
#[derive(Clone)]
pub struct Registry {
    shared: Arc<Shared>,
}

impl Registry {
    /// An empty registry. Nothing is read from disk.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let env = IndexingEnv::from_config(&config);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                env,
                state: Mutex::new(RegistryState::default()),
                idle: Condvar::new(),
                events: EventBus::default(),
                save_lock: Mutex::new(()),
            }),
        })
    }

    /// Restore the scopes saved by a previous run. A missing or unreadable
    /// registry file yields an empty registry.
    pub fn load(config: EngineConfig) -> Result<Self> {
        let registry = Self::new(config)?;
        let scopes = persist::load(
            &registry.shared.config.registry_file(),
            &registry.shared.env.base,
        );
        info!("loaded {} scope(s)", scopes.len());
        registry.shared.lock().scopes = scopes.into_iter().map(Arc::new).collect();
        Ok(registry)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn env(&self) -> &IndexingEnv {
        &self.shared.env
    }

    pub fn subscribe(&self) -> Receiver<RegistryEvent> {
        self.shared.events.subscribe()
    }

    /// A fresh scope for `dir` seeded with the engine's default settings.
    /// It is not registered until a job with `add_to_registry` finishes.
    pub fn create_scope(&self, dir: &Path) -> Arc<RootScope> {
        Arc::new(RootScope::new(
            dir,
            &self.shared.env.indexes_dir,
            self.shared.config.scope_defaults(),
        ))
    }

    /// Registered scopes, temporary ones first, then by folder.
    pub fn entries(&self) -> Vec<Arc<RootScope>> {
        self.shared.entries()
    }

    pub fn checked_entries(&self) -> Vec<Arc<RootScope>> {
        self.entries()
            .into_iter()
            .filter(|scope| scope.with_tree(|tree| tree.any_checked_deep(tree.root())))
            .collect()
    }

    pub fn temporary_entries(&self) -> Vec<Arc<RootScope>> {
        self.entries()
            .into_iter()
            .filter(|scope| scope.delete_on_exit())
            .collect()
    }

    pub fn entry_for(&self, dir: &Path) -> Option<Arc<RootScope>> {
        let dir = paths::absolutize(dir);
        self.shared
            .lock()
            .scopes
            .iter()
            .find(|scope| scope.directory() == dir)
            .cloned()
    }

    pub fn contains_index_dir(&self, index_dir: &Path) -> bool {
        let index_dir = paths::absolutize(index_dir);
        self.shared
            .lock()
            .scopes
            .iter()
            .any(|scope| scope.index_dir() == index_dir)
    }

    /// The registered scope containing `dir` and the tree node for `dir`.
    pub fn scope_deep(&self, dir: &Path) -> Option<(Arc<RootScope>, NodeId)> {
        let dir = paths::absolutize(dir);
        self.entries().into_iter().find_map(|scope| {
            let node = scope.with_tree(|tree| tree.find_scope(scope.directory(), &dir))?;
            Some((scope, node))
        })
    }

    /// The HTML pair whose resource folder is `folder`.
    pub fn html_pair_for_folder(&self, folder: &Path) -> Option<(Arc<RootScope>, NodeId)> {
        let folder = paths::absolutize(folder);
        self.entries()
            .into_iter()
            .filter(|scope| paths::contains(scope.directory(), &folder))
            .find_map(|scope| {
                let node =
                    scope.with_tree(|tree| tree.find_pair_by_folder(scope.directory(), &folder))?;
                Some((scope, node))
            })
    }

    /// Queue `job`. A job that registers its scope may not overlap any
    /// registered scope or any job in the queue; other jobs are only checked
    /// against jobs that are still waiting.
    pub fn submit(&self, job: IndexingJob) -> Result<JobId> {
        let id = job.id();
        {
            let mut state = self.shared.lock();
            let dir = job.scope().directory();
            let hits_job = |other: &IndexingJob| paths::intersects(other.scope().directory(), dir);

            if job.add_to_registry() {
                if state
                    .scopes
                    .iter()
                    .any(|scope| paths::intersects(scope.directory(), dir))
                {
                    return Err(intersection(dir, Conflict::RegisteredScope));
                }
                if state.running.iter().chain(state.queue.iter()).any(hits_job) {
                    return Err(intersection(dir, Conflict::QueuedJob));
                }
            } else if state.queue.iter().any(hits_job) {
                return Err(intersection(dir, Conflict::QueuedJob));
            }

            debug!("queued {id} for {}", dir.display());
            state.queue.push_back(job);
        }
        self.shared.events.emit(RegistryEvent::QueueChanged);
        Shared::ensure_worker(&self.shared);
        Ok(id)
    }

    /// Release or hold back a waiting job.
    pub fn set_ready(&self, id: JobId, ready: bool) -> bool {
        let found = {
            let mut state = self.shared.lock();
            match state.queue.iter_mut().find(|job| job.id() == id) {
                Some(job) => {
                    job.set_ready(ready);
                    true
                }
                None => false,
            }
        };
        if found {
            self.shared.events.emit(RegistryEvent::QueueChanged);
            Shared::ensure_worker(&self.shared);
        }
        found
    }

    /// Drop a waiting job, or signal the running one to stop.
    pub fn cancel(&self, id: JobId) -> bool {
        let found = {
            let mut state = self.shared.lock();
            if let Some(pos) = state.queue.iter().position(|job| job.id() == id) {
                state.queue.remove(pos);
                true
            } else if let Some(job) = state.running.as_ref().filter(|job| job.id() == id) {
                job.cancel_token().cancel();
                true
            } else {
                false
            }
        };
        if found {
            self.shared.events.emit(RegistryEvent::QueueChanged);
        }
        found
    }

    /// Empty the queue and stop the running job.
    pub fn cancel_all(&self) {
        {
            let mut state = self.shared.lock();
            state.queue.clear();
            if let Some(job) = &state.running {
                job.cancel_token().cancel();
            }
        }
        self.shared.events.emit(RegistryEvent::QueueChanged);
    }

    /// All queued jobs, the running one first.
    pub fn queue(&self) -> Vec<IndexingJob> {
        let state = self.shared.lock();
        state
            .running
            .iter()
            .chain(state.queue.iter())
            .cloned()
            .collect()
    }

    /// Waiting jobs that are ready to run.
    pub fn submitted_jobs(&self) -> Vec<IndexingJob> {
        self.shared
            .lock()
            .queue
            .iter()
            .filter(|job| job.is_ready())
            .cloned()
            .collect()
    }

    pub fn current_job(&self) -> Option<IndexingJob> {
        self.shared.lock().running.clone()
    }

    /// Block until the worker has retired.
    pub fn wait_until_idle(&self) {
        let mut state = self.shared.lock();
        while state.worker_active {
            state = self
                .shared
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Unregister the scope at `dir` and delete its index. Jobs for it are
    /// dropped; a running one is stopped first.
    pub fn remove(&self, dir: &Path) -> Result<()> {
        let dir = paths::absolutize(dir);
        let scope = {
            let mut state = self.shared.lock();
            let pos = state
                .scopes
                .iter()
                .position(|scope| scope.directory() == dir)
                .ok_or_else(|| Error::NotRegistered(dir.clone()))?;
            let scope = state.scopes.remove(pos);
            state.queue.retain(|job| job.scope().directory() != dir);
            if state.running_targets(&dir) {
                if let Some(job) = &state.running {
                    job.cancel_token().cancel();
                }
            }
            while state.running_targets(&dir) {
                state = self
                    .shared
                    .idle
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            scope
        };

        scope.delete_index()?;
        info!("removed {}", dir.display());
        self.shared.events.emit(RegistryEvent::QueueChanged);
        self.shared.events.emit(RegistryEvent::RootsChanged);
        self.save()
    }

    /// Search every registered index.
    pub fn search(
        &self,
        request: &SearchRequest,
    ) -> std::result::Result<Vec<ResultDocument>, SearchError> {
        let index_dirs: Vec<PathBuf> = self
            .entries()
            .iter()
            .map(|scope| scope.index_dir().to_path_buf())
            .collect();
        query::search(
            &index_dirs,
            request,
            self.shared.config.max_results,
            self.shared.config.use_or_operator,
            &self.shared.env.base,
        )
    }

    pub fn save(&self) -> Result<()> {
        self.shared.save()
    }

    /// Stop indexing, drop temporary scopes and save.
    pub fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.shared.lock();
            state.shutting_down = true;
            state.queue.clear();
            if let Some(job) = &state.running {
                job.cancel_token().cancel();
            }
        }
        self.wait_until_idle();
        let worker = self.shared.lock().worker.take();
        if let Some(handle) = worker {
            if handle.join().is_err() {
                warn!("indexing worker panicked");
            }
        }

        let temporary = {
            let mut state = self.shared.lock();
            let (temporary, kept): (Vec<_>, Vec<_>) = state
                .scopes
                .drain(..)
                .partition(|scope| scope.delete_on_exit());
            state.scopes = kept;
            temporary
        };
        for scope in &temporary {
            if let Err(err) = scope.delete_index() {
                warn!("cannot delete index of {}: {err}", scope.directory().display());
            }
        }
        if !temporary.is_empty() {
            self.shared.events.emit(RegistryEvent::RootsChanged);
        }
        self.save()
    }
}

fn intersection(dir: &Path, conflict: Conflict) -> Error {
    Error::Intersects {
        directory: dir.to_path_buf(),
        conflict,
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entries(&self) -> Vec<Arc<RootScope>> {
        let mut scopes = self.lock().scopes.clone();
        scopes.sort_by(|a, b| {
            b.delete_on_exit()
                .cmp(&a.delete_on_exit())
                .then_with(|| a.directory().cmp(b.directory()))
        });
        scopes
    }

    fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        persist::save(
            &self.config.registry_file(),
            &self.config.manifest_file(),
            &self.entries(),
            &self.env.base,
        )
    }

    fn ensure_worker(shared: &Arc<Shared>) {
        let mut state = shared.lock();
        if state.worker_active || !state.has_ready() {
            return;
        }
        state.worker_active = true;
        let worker = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name("docscope-indexer".into())
            .spawn(move || worker.work());
        match spawned {
            Ok(handle) => state.worker = Some(handle),
            Err(err) => {
                error!("cannot start indexing worker: {err}");
                state.worker_active = false;
            }
        }
    }

    fn work(&self) {
        loop {
            let next = self.lock().take_next_ready();
            if let Some(job) = next {
                self.events.emit(RegistryEvent::QueueChanged);
                self.run_job(&job);
                self.lock().running = None;
                self.idle.notify_all();
                self.events.emit(RegistryEvent::QueueChanged);
                continue;
            }

            if let Err(err) = self.save() {
                warn!("registry checkpoint failed: {err}");
            }
            let mut state = self.lock();
            if state.has_ready() {
                continue;
            }
            state.worker_active = false;
            drop(state);
            self.idle.notify_all();
            debug!("indexing worker idle");
            return;
        }
    }

    fn run_job(&self, job: &IndexingJob) {
        let scope = job.scope();
        let cancel = job.cancel_token();
        info!("starting {} for {}", job.id(), scope.directory().display());

        let outcome = if job.is_rebuild() {
            scope.rebuild(&self.env, cancel)
        } else {
            scope.update_index(&self.env, cancel)
        };

        match outcome {
            Ok(report) if report.cancelled => {
                info!("{} cancelled", job.id());
                if job.add_to_registry() {
                    if let Err(err) = scope.delete_index() {
                        warn!(
                            "cannot delete partial index {}: {err}",
                            scope.index_dir().display()
                        );
                    }
                } else if job.is_rebuild() {
                    self.unregister(scope);
                }
            }
            Ok(_) => {
                if job.add_to_registry() {
                    self.register(scope);
                }
                self.events
                    .emit(RegistryEvent::TreeChanged(scope.directory().to_path_buf()));
            }
            Err(err) => {
                match &err {
                    Error::ScopeMissing(_) => warn!("{} failed: {err}", job.id()),
                    _ => error!("{} failed: {err}", job.id()),
                }
                self.events.emit(RegistryEvent::JobFailed {
                    job: job.id(),
                    directory: scope.directory().to_path_buf(),
                    message: err.to_string(),
                });
            }
        }
    }

    fn register(&self, scope: &Arc<RootScope>) {
        {
            let mut state = self.lock();
            if state
                .scopes
                .iter()
                .any(|existing| existing.directory() == scope.directory())
            {
                return;
            }
            state.scopes.push(Arc::clone(scope));
        }
        info!("registered {}", scope.directory().display());
        self.events.emit(RegistryEvent::RootsChanged);
    }

    fn unregister(&self, scope: &Arc<RootScope>) {
        self.lock()
            .scopes
            .retain(|existing| existing.directory() != scope.directory());
        if let Err(err) = scope.delete_index() {
            warn!("cannot delete index {}: {err}", scope.index_dir().display());
        }
        info!("unregistered {}", scope.directory().display());
        self.events.emit(RegistryEvent::RootsChanged);
    }
}
