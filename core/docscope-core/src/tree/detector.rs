use crate::config::ScopeConfig;
use crate::scanner;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Snapshot of a subtree's modification times and listings. Nodes hold names
/// only; the caller supplies the location when checking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeDetector {
    File {
        name: String,
        last_modified: i64,
    },
    Dir {
        name: String,
        children: Vec<ChangeDetector>,
    },
}

impl ChangeDetector {
    /// Record `path` and, for a directory, every subdirectory and parsable
    /// file below it. Symlinks are not followed.
    pub fn snapshot(path: &Path, config: &ScopeConfig) -> Self {
        let name = crate::paths::file_name(path);
        if !path.is_dir() {
            return ChangeDetector::File {
                name,
                last_modified: scanner::modified_ms(path).unwrap_or_default(),
            };
        }

        let children = scanner::list_entries(path)
            .unwrap_or_default()
            .into_iter()
            .filter(|entry| entry.is_dir() || config.can_parse(&entry.path))
            .map(|entry| {
                if entry.is_dir() {
                    ChangeDetector::snapshot(&entry.path, config)
                } else {
                    ChangeDetector::File {
                        name: entry.name,
                        last_modified: entry.modified_ms,
                    }
                }
            })
            .collect();

        ChangeDetector::Dir { name, children }
    }

    pub fn name(&self) -> &str {
        match self {
            ChangeDetector::File { name, .. } | ChangeDetector::Dir { name, .. } => name,
        }
    }

    /// `path` is where this node lives now.
    pub fn is_modified(&self, path: &Path, config: &ScopeConfig) -> bool {
        match self {
            ChangeDetector::File { last_modified, .. } => {
                !path.is_file() || scanner::modified_ms(path) != Some(*last_modified)
            }
            ChangeDetector::Dir { children, .. } => {
                if !path.is_dir() {
                    return true;
                }
                if children
                    .iter()
                    .any(|child| child.is_modified(&path.join(child.name()), config))
                {
                    return true;
                }

                let known: HashSet<&str> = children.iter().map(ChangeDetector::name).collect();
                let Ok(entries) = scanner::list_entries(path) else {
                    return true;
                };
                entries
                    .iter()
                    .filter(|entry| entry.is_dir() || config.can_parse(&entry.path))
                    .any(|entry| !known.contains(entry.name.as_str()))
            }
        }
    }
}
