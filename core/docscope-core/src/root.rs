use crate::cancel::CancellationToken;
use crate::config::{EngineConfig, ExclusionSet, ScopeConfig};
use crate::document::IndexedDocument;
use crate::error::{Error, ParseError, Result};
use crate::indexer::{self, IndexSettings, ScopeIndex};
use crate::parse::{self, ParseLimits, ParserKind};
use crate::paths::{self, PathBase};
use crate::scanner::{self, EntryMeta};
use crate::tree::{ChangeDetector, FileEntry, HtmlPairEntry, NodeId, NodeKind, ScopeTree};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Engine-wide inputs every crawl needs.
#[derive(Debug, Clone)]
pub struct IndexingEnv {
    pub base: PathBase,
    pub indexes_dir: PathBuf,
    pub settings: IndexSettings,
    pub limits: ParseLimits,
}

impl IndexingEnv {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            base: PathBase::new(&config.base_dir),
            indexes_dir: paths::absolutize(&config.indexes_dir()),
            settings: IndexSettings::from_config(config),
            limits: ParseLimits {
                max_text_bytes: config.max_text_bytes,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub added: usize,
    pub deleted: usize,
    pub parse_errors: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

/// Mutable half of a root scope. Crawls work on a copy and swap it back in,
/// so readers never wait for a crawl.
#[derive(Debug, Clone)]
pub(crate) struct RootState {
    pub config: ScopeConfig,
    pub tree: ScopeTree,
    pub parse_errors: Vec<ParseError>,
    pub parse_time: Duration,
    pub finished_with_errors: bool,
    pub delete_on_exit: bool,
}

/// A folder bound to its own index.
#[derive(Debug)]
pub struct RootScope {
    id: String,
    directory: PathBuf,
    index_dir: PathBuf,
    state: RwLock<RootState>,
}

impl RootScope {
    /// A new, never indexed scope. The index folder is only created by the
    /// first update.
    pub fn new(directory: &Path, indexes_dir: &Path, config: ScopeConfig) -> Self {
        let directory = paths::absolutize(directory);
        let leaf = match paths::file_name(&directory) {
            name if name.is_empty() => "root".to_string(),
            name => name,
        };
        let (id, index_dir) = loop {
            let id = paths::unique_id();
            let candidate = indexes_dir.join(format!("{leaf}_{id}"));
            if !candidate.exists() {
                break (id, candidate);
            }
        };

        Self::from_parts(
            id,
            directory,
            index_dir,
            RootState {
                config,
                tree: ScopeTree::new(),
                parse_errors: Vec::new(),
                parse_time: Duration::ZERO,
                finished_with_errors: false,
                delete_on_exit: false,
            },
        )
    }

    pub(crate) fn from_parts(
        id: String,
        directory: PathBuf,
        index_dir: PathBuf,
        state: RootState,
    ) -> Self {
        Self {
            id,
            directory,
            index_dir,
            state: RwLock::new(state),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    fn read_state(&self) -> RwLockReadGuard<'_, RootState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RootState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state_snapshot(&self) -> RootState {
        self.read_state().clone()
    }

    pub fn config(&self) -> ScopeConfig {
        self.read_state().config.clone()
    }

    /// Takes effect on the next update.
    pub fn set_config(&self, config: ScopeConfig) {
        self.write_state().config = config;
    }

    pub fn with_tree<R>(&self, f: impl FnOnce(&ScopeTree) -> R) -> R {
        f(&self.read_state().tree)
    }

    pub fn file_count(&self) -> usize {
        self.with_tree(ScopeTree::file_count)
    }

    pub fn is_checked(&self) -> bool {
        self.with_tree(|tree| tree.is_checked(tree.root()))
    }

    pub fn set_checked_deep(&self, checked: bool) {
        let mut state = self.write_state();
        let root = state.tree.root();
        state.tree.set_checked_deep(root, checked);
    }

    /// Toggle one folder below this scope. Returns false when `dir` is not
    /// part of the tree.
    pub fn set_folder_checked(&self, dir: &Path, checked: bool, deep: bool) -> bool {
        let mut state = self.write_state();
        let Some(id) = state.tree.find_scope(&self.directory, dir) else {
            return false;
        };
        if deep {
            state.tree.set_checked_deep(id, checked);
        } else {
            state.tree.set_checked(id, checked);
        }
        true
    }

    pub fn parse_errors(&self) -> Vec<ParseError> {
        self.read_state().parse_errors.clone()
    }

    pub fn parse_time(&self) -> Duration {
        self.read_state().parse_time
    }

    pub fn finished_with_errors(&self) -> bool {
        self.read_state().finished_with_errors
    }

    /// Clearing only sticks when the last run left no parse errors.
    pub fn set_finished_with_errors(&self, value: bool) {
        let mut state = self.write_state();
        state.finished_with_errors = value || !state.parse_errors.is_empty();
    }

    pub fn delete_on_exit(&self) -> bool {
        self.read_state().delete_on_exit
    }

    pub fn set_delete_on_exit(&self, value: bool) {
        self.write_state().delete_on_exit = value;
    }

    /// Bring the index in line with the folder: prune what changed or
    /// vanished, then crawl for anything new.
    pub fn update_index(
        &self,
        env: &IndexingEnv,
        cancel: &CancellationToken,
    ) -> Result<UpdateReport> {
        self.run(env, cancel, false)
    }

    /// Throw away the index and the tree and crawl from scratch.
    pub fn rebuild(&self, env: &IndexingEnv, cancel: &CancellationToken) -> Result<UpdateReport> {
        self.run(env, cancel, true)
    }

    fn run(
        &self,
        env: &IndexingEnv,
        cancel: &CancellationToken,
        rebuild: bool,
    ) -> Result<UpdateReport> {
        if !self.directory.is_dir() {
            self.write_state().finished_with_errors = true;
            return Err(Error::ScopeMissing(self.directory.clone()));
        }

        let started = Instant::now();
        let (config, mut tree) = {
            let state = self.read_state();
            (state.config.clone(), state.tree.clone())
        };
        let exclusions = ExclusionSet::compile(&config.exclusion_filters)?;

        if rebuild {
            self.delete_index()?;
            tree = ScopeTree::new();
            let mut state = self.write_state();
            state.tree = tree.clone();
            state.parse_errors.clear();
            state.finished_with_errors = false;
        }

        info!(
            "{} {}",
            if rebuild { "rebuilding" } else { "updating" },
            self.directory.display()
        );

        let mut crawl = Crawl {
            root_dir: &self.directory,
            env,
            config: &config,
            exclusions,
            cancel,
            errors: Vec::new(),
            added: 0,
        };

        let root = tree.root();
        let mut deletions = HashSet::new();
        if !rebuild {
            crawl.prune(&mut tree, root, &mut deletions);
        }

        let mut index =
            ScopeIndex::open_or_create(&self.index_dir, env.settings, env.base.clone())?;
        let deleted = index.delete_paths(&deletions)?;
        crawl.crawl(&mut tree, &mut index, root)?;
        // partial progress is kept when cancelled
        index.commit()?;

        let report = UpdateReport {
            added: crawl.added,
            deleted,
            parse_errors: crawl.errors.len(),
            cancelled: cancel.is_cancelled(),
            elapsed: started.elapsed(),
        };

        let mut state = self.write_state();
        state.tree = tree;
        state.finished_with_errors = !crawl.errors.is_empty();
        state.parse_errors = crawl.errors;
        state.parse_time = report.elapsed;
        drop(state);

        info!(
            "{}: added={} deleted={} errors={} cancelled={} ({:.2} s)",
            self.directory.display(),
            report.added,
            report.deleted,
            report.parse_errors,
            report.cancelled,
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    /// Remove the index folder and forget what was indexed.
    pub fn delete_index(&self) -> Result<()> {
        if self.index_dir.exists() {
            fs::remove_dir_all(&self.index_dir).map_err(|err| Error::io(&self.index_dir, err))?;
        }
        self.write_state().tree = ScopeTree::new();
        Ok(())
    }

    pub fn list_documents(&self, base: &PathBase) -> Result<Vec<IndexedDocument>> {
        indexer::list_documents(&self.index_dir, base)
    }
}

struct Crawl<'a> {
    root_dir: &'a Path,
    env: &'a IndexingEnv,
    config: &'a ScopeConfig,
    exclusions: ExclusionSet,
    cancel: &'a CancellationToken,
    errors: Vec<ParseError>,
    added: usize,
}

impl Crawl<'_> {
    /// Drop nodes that no longer match the disk and collect their paths.
    fn prune(&self, tree: &mut ScopeTree, scope: NodeId, deletions: &mut HashSet<PathBuf>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let Some(known) = tree.scope(scope).cloned() else {
            return;
        };
        let dir = tree.path(self.root_dir, scope);
        let pairing = self.config.detect_html_pairs;

        let pairs: Vec<(String, NodeId, HtmlPairEntry)> = known
            .html_pairs
            .iter()
            .filter_map(|(name, &id)| match &tree.node(id)?.kind {
                NodeKind::HtmlPair(pair) => Some((name.clone(), id, pair.clone())),
                _ => None,
            })
            .collect();
        let pair_folders: HashSet<&str> =
            pairs.iter().filter_map(|(_, _, pair)| pair.folder_name()).collect();
        let folderless: HashSet<String> = pairs
            .iter()
            .filter(|(_, _, pair)| pair.folder.is_none())
            .map(|(name, _, _)| paths::name_no_ext(Path::new(name)))
            .collect();

        // Unregistered HTML files and resource folders on disk; either side
        // appearing forces a re-pair.
        let mut new_folder_bases = HashSet::new();
        let mut new_html_bases = HashSet::new();
        if pairing {
            for entry in scanner::list_entries(&dir).unwrap_or_default() {
                if entry.is_dir() {
                    if known.scopes.contains_key(&entry.name)
                        || pair_folders.contains(entry.name.as_str())
                    {
                        continue;
                    }
                    if let Some(base) = paths::html_dir_basename(&entry.name) {
                        new_folder_bases.insert(base.to_string());
                    }
                } else if self.config.is_html(&entry.path)
                    && !known.html_pairs.contains_key(&entry.name)
                    && !self.exclusions.is_excluded(&entry.path)
                {
                    new_html_bases.insert(paths::name_no_ext(&entry.path));
                }
            }
        }

        for (name, &id) in &known.files {
            let path = dir.join(name);
            let modified = match tree.node(id).map(|node| &node.kind) {
                Some(NodeKind::File(file)) => file.is_modified(&path, self.config),
                _ => true,
            };
            if modified || self.exclusions.is_excluded(&path) {
                debug!("stale file {}", path.display());
                tree.remove(id);
                deletions.insert(path);
            }
        }

        let mut reclaimed = HashSet::new();
        for (name, &id) in &known.scopes {
            if self.cancel.is_cancelled() {
                return;
            }
            let child_dir = dir.join(name);
            let html_base = paths::html_dir_basename(name).filter(|_| pairing);
            let becomes_folder = html_base
                .is_some_and(|base| new_html_bases.contains(base) || folderless.contains(base));

            if child_dir.is_dir() && !becomes_folder {
                self.prune(tree, id, deletions);
                continue;
            }
            debug!("dropping folder {}", child_dir.display());
            for doc in tree.documents_under(id) {
                deletions.insert(tree.path(self.root_dir, doc));
            }
            tree.remove(id);
            if let Some(base) = html_base.filter(|_| becomes_folder) {
                reclaimed.insert(base.to_string());
            }
        }

        for (name, id, pair) in &pairs {
            let path = dir.join(name);
            let base = paths::name_no_ext(&path);
            let stale = pair.is_modified(&path, self.config)
                || self.exclusions.is_excluded(&path)
                || new_folder_bases.contains(&base)
                || (pair.folder.is_none() && reclaimed.contains(&base))
                || (!pairing && pair.folder.is_some());
            if stale {
                debug!("stale html pair {}", path.display());
                tree.remove(*id);
                deletions.insert(path);
            }
        }
    }

    /// Index everything under `scope` that the tree does not know yet.
    fn crawl(
        &mut self,
        tree: &mut ScopeTree,
        index: &mut ScopeIndex,
        scope: NodeId,
    ) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        let Some(known) = tree.scope(scope).cloned() else {
            return Ok(());
        };
        let dir = tree.path(self.root_dir, scope);
        let entries = match scanner::list_entries(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("cannot list {}: {err}", dir.display());
                return Ok(());
            }
        };

        let pair_folders: HashSet<String> = known
            .html_pairs
            .values()
            .filter_map(|&id| match &tree.node(id)?.kind {
                NodeKind::HtmlPair(pair) => pair.folder_name().map(str::to_string),
                _ => None,
            })
            .collect();

        let mut files = Vec::new();
        let mut html_files = Vec::new();
        let mut dirs = Vec::new();
        for entry in entries {
            if entry.is_dir() {
                if entry.path != self.env.indexes_dir {
                    dirs.push(entry);
                }
                continue;
            }
            match self.config.parser_for(&entry.path) {
                Some(ParserKind::Html) => html_files.push(entry),
                Some(kind) => files.push((entry, kind)),
                None => {}
            }
        }

        let folder_for = self.match_html_folders(
            &known.html_pairs,
            &known.scopes,
            &pair_folders,
            &html_files,
            &dirs,
        );
        let claimed: HashSet<&Path> = folder_for.values().map(PathBuf::as_path).collect();

        for (entry, kind) in &files {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            if known.files.contains_key(&entry.name)
                || is_office_temp(&entry.name)
                || self.exclusions.is_excluded(&entry.path)
            {
                continue;
            }
            if self.index_one(index, entry, *kind, None)? {
                tree.add_file(
                    scope,
                    &entry.name,
                    FileEntry {
                        last_modified: entry.modified_ms,
                        parser: *kind,
                    },
                );
            }
        }

        for entry in &html_files {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            if known.html_pairs.contains_key(&entry.name)
                || self.exclusions.is_excluded(&entry.path)
            {
                continue;
            }
            let folder = folder_for.get(&entry.name).map(PathBuf::as_path);
            if self.index_one(index, entry, ParserKind::Html, folder)? {
                tree.add_html_pair(
                    scope,
                    &entry.name,
                    HtmlPairEntry {
                        last_modified: entry.modified_ms,
                        folder: folder.map(|f| ChangeDetector::snapshot(f, self.config)),
                    },
                );
            }
        }

        for entry in &dirs {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            if claimed.contains(entry.path.as_path()) || pair_folders.contains(&entry.name) {
                continue;
            }
            let child = match known.scopes.get(&entry.name) {
                Some(&id) => id,
                None => tree.add_scope(scope, &entry.name),
            };
            self.crawl(tree, index, child)?;
        }
        Ok(())
    }

    /// Pair each unregistered resource folder with the first unregistered
    /// HTML file of the same base name. Keyed by HTML file name.
    fn match_html_folders(
        &self,
        registered_pairs: &BTreeMap<String, NodeId>,
        registered_scopes: &BTreeMap<String, NodeId>,
        pair_folders: &HashSet<String>,
        html_files: &[EntryMeta],
        dirs: &[EntryMeta],
    ) -> HashMap<String, PathBuf> {
        let mut folder_for = HashMap::new();
        if !self.config.detect_html_pairs {
            return folder_for;
        }
        for dir in dirs {
            if registered_scopes.contains_key(&dir.name) || pair_folders.contains(&dir.name) {
                continue;
            }
            let Some(base) = paths::html_dir_basename(&dir.name) else {
                continue;
            };
            let candidate = html_files.iter().find(|html| {
                !registered_pairs.contains_key(&html.name)
                    && !folder_for.contains_key(&html.name)
                    && !self.exclusions.is_excluded(&html.path)
                    && paths::name_no_ext(&html.path) == base
            });
            if let Some(html) = candidate {
                folder_for.insert(html.name.clone(), dir.path.clone());
            }
        }
        folder_for
    }

    /// Parse and add one file. Parse failures are recorded and reported as
    /// `false`; only index failures are errors.
    fn index_one(
        &mut self,
        index: &mut ScopeIndex,
        entry: &EntryMeta,
        kind: ParserKind,
        folder: Option<&Path>,
    ) -> Result<bool> {
        match parse::parse_file(&entry.path, kind, folder, self.config, self.env.limits) {
            Ok(mut doc) => {
                doc.last_modified = entry.modified_ms;
                index.add(&doc)?;
                self.added += 1;
                debug!("indexed {}", entry.path.display());
                Ok(true)
            }
            Err(err) => {
                warn!("parse error: {err}");
                self.errors.push(err);
                Ok(false)
            }
        }
    }
}

/// Lock files Word leaves next to open documents. No built-in parser claims
/// `.doc`/`.docx`, so this only matters once a scope lists them among its
/// text extensions.
fn is_office_temp(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("~$") && (lower.ends_with(".doc") || lower.ends_with(".docx"))
}
