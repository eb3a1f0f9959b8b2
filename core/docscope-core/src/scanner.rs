use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone)]
pub struct EntryMeta {
    pub path: PathBuf,
    pub name: String,
    pub kind: EntryKind,
    pub modified_ms: i64,
}

impl EntryMeta {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// List one directory level sorted by name. Symlinks and anything that is
/// neither a regular file nor a directory are left out.
pub fn list_entries(dir: &Path) -> Result<Vec<EntryMeta>> {
    let read = fs::read_dir(dir).map_err(|err| Error::io(dir, err))?;

    let mut entries = Vec::new();
    for entry in read {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::debug!("skipping unreadable entry in {}: {err}", dir.display());
                continue;
            }
        };
        let path = entry.path();
        let Ok(metadata) = fs::symlink_metadata(&path) else {
            continue;
        };
        let file_type = metadata.file_type();
        let kind = if file_type.is_symlink() {
            continue;
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            continue;
        };

        entries.push(EntryMeta {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
            kind,
            modified_ms: millis(&metadata),
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Modification time in milliseconds, or `None` when the path is gone.
pub fn modified_ms(path: &Path) -> Option<i64> {
    fs::symlink_metadata(path).ok().map(|meta| millis(&meta))
}

fn millis(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|dur| dur.as_millis() as i64)
        .unwrap_or_default()
}
