//! Keeps registered scopes current by queueing an update whenever something
//! changes below one of their folders.

use crate::error::{Error, Result};
use crate::job::IndexingJob;
use crate::paths;
use crate::registry::Registry;
use log::{debug, warn};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub struct FolderWatcher {
    watcher: RecommendedWatcher,
    registry: Registry,
    watched: BTreeSet<PathBuf>,
}

impl FolderWatcher {
    /// Watch every registered scope. Call [`FolderWatcher::sync`] after
    /// scopes are added or removed.
    pub fn start(registry: &Registry) -> Result<Self> {
        let callback_registry = registry.clone();
        let watcher = recommended_watcher(move |event: notify::Result<Event>| match event {
            Ok(event) => on_event(&callback_registry, event),
            Err(err) => warn!("watch error: {err}"),
        })?;

        let mut folder_watcher = Self {
            watcher,
            registry: registry.clone(),
            watched: BTreeSet::new(),
        };
        folder_watcher.sync()?;
        Ok(folder_watcher)
    }

    /// Align the watched folders with the registry.
    pub fn sync(&mut self) -> Result<()> {
        let wanted: BTreeSet<PathBuf> = self
            .registry
            .entries()
            .iter()
            .map(|scope| scope.directory().to_path_buf())
            .collect();

        for gone in self.watched.difference(&wanted) {
            if let Err(err) = self.watcher.unwatch(gone) {
                debug!("unwatch {}: {err}", gone.display());
            }
        }
        let mut watched = BTreeSet::new();
        for dir in wanted {
            if self.watched.contains(&dir) {
                watched.insert(dir);
                continue;
            }
            match self.watcher.watch(&dir, RecursiveMode::Recursive) {
                Ok(()) => {
                    watched.insert(dir);
                }
                // A scope whose folder is gone is reported by its next update.
                Err(err) if !dir.exists() => debug!("not watching {}: {err}", dir.display()),
                Err(err) => return Err(Error::Watch(err)),
            }
        }
        self.watched = watched;
        Ok(())
    }

    pub fn watched(&self) -> impl Iterator<Item = &Path> {
        self.watched.iter().map(PathBuf::as_path)
    }
}

fn on_event(registry: &Registry, event: Event) {
    if matches!(event.kind, EventKind::Access(_)) {
        return;
    }

    let roots: Vec<PathBuf> = registry
        .entries()
        .iter()
        .map(|scope| scope.directory().to_path_buf())
        .collect();
    let indexes_dir = &registry.env().indexes_dir;

    let mut touched = BTreeSet::new();
    for path in &event.paths {
        if let Some(root) = scope_for_change(&roots, indexes_dir, path) {
            touched.insert(root);
        }
    }

    for root in touched {
        let Some(scope) = registry.entry_for(&root) else {
            continue;
        };
        match registry.submit(IndexingJob::update(scope)) {
            Ok(id) => debug!("{id} queued for change in {}", root.display()),
            // An update for this scope is already waiting.
            Err(Error::Intersects { .. }) => {}
            Err(err) => warn!("cannot queue update for {}: {err}", root.display()),
        }
    }
}

/// The scope folder a change at `changed` belongs to. Changes inside the
/// indexes folder are ignored so writing an index does not trigger another
/// update.
pub(crate) fn scope_for_change(
    roots: &[PathBuf],
    indexes_dir: &Path,
    changed: &Path,
) -> Option<PathBuf> {
    if changed == indexes_dir || paths::contains(indexes_dir, changed) {
        return None;
    }
    roots
        .iter()
        .filter(|root| changed == root.as_path() || paths::contains(root, changed))
        .max_by_key(|root| root.components().count())
        .cloned()
}
