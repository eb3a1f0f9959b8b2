use crate::cancel::CancellationToken;
use crate::root::RootScope;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// A request to index one root scope.
///
/// A job that is not ready stays queued until [`crate::Registry::set_ready`]
/// releases it, so callers can adjust the scope's configuration first.
#[derive(Debug, Clone)]
pub struct IndexingJob {
    id: JobId,
    scope: Arc<RootScope>,
    add_to_registry: bool,
    rebuild: bool,
    ready: bool,
    cancel: CancellationToken,
}

impl IndexingJob {
    /// Rebuild jobs start out waiting for confirmation; everything else is
    /// ready immediately.
    pub fn new(scope: Arc<RootScope>, add_to_registry: bool, rebuild: bool) -> Self {
        Self {
            id: JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed)),
            scope,
            add_to_registry,
            rebuild,
            ready: !rebuild,
            cancel: CancellationToken::new(),
        }
    }

    /// Update an already registered scope.
    pub fn update(scope: Arc<RootScope>) -> Self {
        Self::new(scope, false, false)
    }

    /// Index a new folder and register it when done.
    pub fn register(scope: Arc<RootScope>) -> Self {
        Self::new(scope, true, false)
    }

    pub fn with_ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn scope(&self) -> &Arc<RootScope> {
        &self.scope
    }

    pub fn add_to_registry(&self) -> bool {
        self.add_to_registry
    }

    pub fn is_rebuild(&self) -> bool {
        self.rebuild
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Ask the job to stop. Shared by every clone of the job, so a caller
    /// holding a copy can stop it once the worker has picked it up.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Jobs are equal when they target the same folder.
impl PartialEq for IndexingJob {
    fn eq(&self, other: &Self) -> bool {
        self.scope.directory() == other.scope.directory()
    }
}

impl Eq for IndexingJob {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScopeConfig;
    use std::path::Path;

    fn scope(dir: &str) -> Arc<RootScope> {
        Arc::new(RootScope::new(
            Path::new(dir),
            Path::new("/tmp/indexes"),
            ScopeConfig::default(),
        ))
    }

    #[test]
    fn rebuilds_wait_for_confirmation() {
        assert!(!IndexingJob::new(scope("/a"), true, true).is_ready());
        assert!(IndexingJob::register(scope("/a")).is_ready());
        assert!(IndexingJob::new(scope("/a"), false, true)
            .with_ready(true)
            .is_ready());
    }

    #[test]
    fn equality_is_by_folder() {
        let a = IndexingJob::update(scope("/a"));
        let b = IndexingJob::register(scope("/a"));
        assert_eq!(a, b);
        assert_ne!(a.id(), b.id());
        assert_ne!(a, IndexingJob::update(scope("/b")));
    }
}
