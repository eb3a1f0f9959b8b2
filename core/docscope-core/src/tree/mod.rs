//! The scope tree: an arena mirroring the indexed part of a folder.
//!
//! Nodes store their own name and a parent index, so absolute paths are
//! derived from the root folder at lookup time and the whole arena
//! serializes as-is.

pub mod detector;

pub use detector::ChangeDetector;

use crate::config::ScopeConfig;
use crate::parse::ParserKind;
use crate::scanner;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Scope(ScopeEntry),
    File(FileEntry),
    HtmlPair(HtmlPairEntry),
}

/// A folder. A child name lives in exactly one of the three maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeEntry {
    pub files: BTreeMap<String, NodeId>,
    pub html_pairs: BTreeMap<String, NodeId>,
    pub scopes: BTreeMap<String, NodeId>,
    #[serde(skip, default = "checked_by_default")]
    pub checked: bool,
}

impl Default for ScopeEntry {
    fn default() -> Self {
        Self {
            files: BTreeMap::new(),
            html_pairs: BTreeMap::new(),
            scopes: BTreeMap::new(),
            checked: true,
        }
    }
}

fn checked_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub last_modified: i64,
    pub parser: ParserKind,
}

impl FileEntry {
    /// Gone, touched, or claimed by a different parser under `config`.
    pub fn is_modified(&self, path: &Path, config: &ScopeConfig) -> bool {
        !path.is_file()
            || scanner::modified_ms(path) != Some(self.last_modified)
            || config.parser_for(path) != Some(self.parser)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtmlPairEntry {
    pub last_modified: i64,
    /// Snapshot of the resource folder; its name is the folder's name.
    pub folder: Option<ChangeDetector>,
}

impl HtmlPairEntry {
    pub fn folder_name(&self) -> Option<&str> {
        self.folder.as_ref().map(ChangeDetector::name)
    }

    pub fn is_modified(&self, path: &Path, config: &ScopeConfig) -> bool {
        if !path.is_file()
            || scanner::modified_ms(path) != Some(self.last_modified)
            || config.parser_for(path) != Some(ParserKind::Html)
        {
            return true;
        }
        match (&self.folder, path.parent()) {
            (Some(folder), Some(dir)) => folder.is_modified(&dir.join(folder.name()), config),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeTree {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
}

impl Default for ScopeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(Node {
                name: String::new(),
                parent: None,
                kind: NodeKind::Scope(ScopeEntry::default()),
            })],
            free: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn scope(&self, id: NodeId) -> Option<&ScopeEntry> {
        match &self.node(id)?.kind {
            NodeKind::Scope(scope) => Some(scope),
            _ => None,
        }
    }

    fn scope_mut(&mut self, id: NodeId) -> Option<&mut ScopeEntry> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Scope(scope) => Some(scope),
            _ => None,
        }
    }

    /// Absolute path of `id`, given the folder the root node stands for.
    pub fn path(&self, root_dir: &Path, id: NodeId) -> PathBuf {
        let mut names = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(node) = self.node(current) else { break };
            if node.parent.is_some() {
                names.push(node.name.as_str());
            }
            cursor = node.parent;
        }
        let mut path = root_dir.to_path_buf();
        path.extend(names.into_iter().rev());
        path
    }

    pub fn add_scope(&mut self, parent: NodeId, name: &str) -> NodeId {
        let id = self.insert(parent, name, NodeKind::Scope(ScopeEntry::default()));
        if let Some(scope) = self.scope_mut(parent) {
            scope.scopes.insert(name.to_string(), id);
        }
        id
    }

    pub fn add_file(&mut self, parent: NodeId, name: &str, entry: FileEntry) -> NodeId {
        let id = self.insert(parent, name, NodeKind::File(entry));
        if let Some(scope) = self.scope_mut(parent) {
            scope.files.insert(name.to_string(), id);
        }
        id
    }

    pub fn add_html_pair(&mut self, parent: NodeId, name: &str, entry: HtmlPairEntry) -> NodeId {
        let id = self.insert(parent, name, NodeKind::HtmlPair(entry));
        if let Some(scope) = self.scope_mut(parent) {
            scope.html_pairs.insert(name.to_string(), id);
        }
        id
    }

    fn insert(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> NodeId {
        let node = Some(Node {
            name: name.to_string(),
            parent: Some(parent),
            kind,
        });
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                NodeId(slot)
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    /// Detach `id` from its parent and drop its whole subtree. The root
    /// cannot be removed.
    pub fn remove(&mut self, id: NodeId) {
        let Some(node) = self.node(id) else { return };
        let Some(parent) = node.parent else { return };
        let name = node.name.clone();
        let is_scope = matches!(node.kind, NodeKind::Scope(_));
        let is_pair = matches!(node.kind, NodeKind::HtmlPair(_));

        if let Some(scope) = self.scope_mut(parent) {
            let map = if is_scope {
                &mut scope.scopes
            } else if is_pair {
                &mut scope.html_pairs
            } else {
                &mut scope.files
            };
            if map.get(&name) == Some(&id) {
                map.remove(&name);
            }
        }

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(NodeKind::Scope(scope)) = self.node(current).map(|n| &n.kind) {
                stack.extend(scope.files.values());
                stack.extend(scope.html_pairs.values());
                stack.extend(scope.scopes.values());
            }
            self.nodes[current.0] = None;
            self.free.push(current.0);
        }
    }

    /// Every file and HTML pair below `id`, `id` included.
    pub fn documents_under(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            match self.node(current).map(|n| &n.kind) {
                Some(NodeKind::Scope(scope)) => {
                    stack.extend(scope.scopes.values());
                    out.extend(scope.files.values());
                    out.extend(scope.html_pairs.values());
                }
                Some(_) => out.push(current),
                None => {}
            }
        }
        out
    }

    /// Number of indexed documents (files plus HTML pairs).
    pub fn file_count(&self) -> usize {
        self.nodes
            .iter()
            .flatten()
            .filter(|node| !matches!(node.kind, NodeKind::Scope(_)))
            .count()
    }

    pub fn scope_count(&self) -> usize {
        self.nodes
            .iter()
            .flatten()
            .filter(|node| matches!(node.kind, NodeKind::Scope(_)))
            .count()
    }

    /// The scope node standing for `dir`, searching from the root folder.
    pub fn find_scope(&self, root_dir: &Path, dir: &Path) -> Option<NodeId> {
        let relative = dir.strip_prefix(root_dir).ok()?;
        let mut current = self.root();
        for part in relative.components() {
            let name = part.as_os_str().to_string_lossy();
            current = *self.scope(current)?.scopes.get(name.as_ref())?;
        }
        Some(current)
    }

    /// The HTML pair whose resource folder is `folder`.
    pub fn find_pair_by_folder(&self, root_dir: &Path, folder: &Path) -> Option<NodeId> {
        let parent = self.find_scope(root_dir, folder.parent()?)?;
        let folder_name = folder.file_name()?.to_string_lossy();
        self.scope(parent)?
            .html_pairs
            .values()
            .copied()
            .find(|&id| match self.node(id).map(|n| &n.kind) {
                Some(NodeKind::HtmlPair(pair)) => pair.folder_name() == Some(folder_name.as_ref()),
                _ => false,
            })
    }

    pub fn is_checked(&self, id: NodeId) -> bool {
        self.scope(id).map(|scope| scope.checked).unwrap_or(false)
    }

    pub fn set_checked(&mut self, id: NodeId, checked: bool) {
        if let Some(scope) = self.scope_mut(id) {
            scope.checked = checked;
        }
    }

    /// Set `id` and every scope below it.
    pub fn set_checked_deep(&mut self, id: NodeId, checked: bool) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(scope) = self.scope_mut(current) {
                scope.checked = checked;
                stack.extend(scope.scopes.values());
            }
        }
    }

    /// Whether `id` or any scope below it is checked.
    pub fn any_checked_deep(&self, id: NodeId) -> bool {
        let Some(scope) = self.scope(id) else {
            return false;
        };
        scope.checked
            || scope
                .scopes
                .values()
                .any(|&child| self.any_checked_deep(child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> (ScopeTree, NodeId, NodeId) {
        let mut tree = ScopeTree::new();
        let root = tree.root();
        tree.add_file(
            root,
            "a.txt",
            FileEntry {
                last_modified: 1,
                parser: ParserKind::Text,
            },
        );
        let sub = tree.add_scope(root, "sub");
        let deeper = tree.add_scope(sub, "deeper");
        tree.add_file(
            deeper,
            "b.txt",
            FileEntry {
                last_modified: 2,
                parser: ParserKind::Text,
            },
        );
        tree.add_html_pair(
            sub,
            "page.htm",
            HtmlPairEntry {
                last_modified: 3,
                folder: Some(ChangeDetector::Dir {
                    name: "page_files".into(),
                    children: Vec::new(),
                }),
            },
        );
        (tree, sub, deeper)
    }

    #[test]
    fn derives_paths_from_names() {
        let (tree, _sub, deeper) = sample();
        assert_eq!(
            tree.path(Path::new("/docs"), deeper),
            PathBuf::from("/docs/sub/deeper")
        );
        assert_eq!(tree.path(Path::new("/docs"), tree.root()), PathBuf::from("/docs"));
        assert_eq!(
            tree.find_scope(Path::new("/docs"), Path::new("/docs/sub/deeper")),
            Some(deeper)
        );
        assert!(tree
            .find_pair_by_folder(Path::new("/docs"), Path::new("/docs/sub/page_files"))
            .is_some());
    }

    #[test]
    fn removing_a_scope_drops_its_subtree() {
        let (mut tree, sub, _deeper) = sample();
        assert_eq!(tree.file_count(), 3);
        assert_eq!(tree.documents_under(sub).len(), 2);

        tree.remove(sub);
        assert_eq!(tree.file_count(), 1);
        assert_eq!(tree.scope_count(), 1);
        assert!(tree.scope(tree.root()).unwrap().scopes.is_empty());

        let again = tree.add_scope(tree.root(), "again");
        assert!(tree.node(again).is_some());
        assert_eq!(tree.scope_count(), 2);
    }

    #[test]
    fn checked_state_propagates_down_and_reads_up() {
        let (mut tree, sub, deeper) = sample();
        let root = tree.root();
        tree.set_checked_deep(root, false);
        assert!(!tree.is_checked(deeper));
        assert!(!tree.any_checked_deep(root));

        tree.set_checked(deeper, true);
        assert!(tree.any_checked_deep(root));
        assert!(tree.any_checked_deep(sub));
        assert!(!tree.is_checked(sub));
    }

    #[test]
    fn checked_state_is_not_persisted() {
        let (mut tree, _sub, deeper) = sample();
        tree.set_checked_deep(tree.root(), false);

        let json = serde_json::to_string(&tree).unwrap();
        let restored: ScopeTree = serde_json::from_str(&json).unwrap();
        assert!(restored.is_checked(deeper));
        assert!(restored.is_checked(restored.root()));
        assert_eq!(restored.file_count(), tree.file_count());
    }
}
