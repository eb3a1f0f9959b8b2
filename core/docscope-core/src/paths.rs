use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Folder-name suffixes browsers use when saving "complete" web pages.
pub const HTML_FOLDER_SUFFIXES: &[&str] = &[
    "_archivos",
    "_arquivos",
    "_bestanden",
    "_bylos",
    "-Dateien",
    "_datoteke",
    "_dosyalar",
    "_elemei",
    "_failid",
    "_fails",
    "_fajlovi",
    "_ficheiros",
    "_fichiers",
    "-filer",
    ".files",
    "_files",
    "_file",
    "_fitxers",
    "_fitxategiak",
    "_pliki",
    "_soubory",
    "_tiedostot",
];

/// A path as persisted: relative to the base directory when it lies under
/// it, absolute otherwise, always with `/` separators.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoredPath(String);

impl StoredPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        StoredPath(normalize_separators(&raw.into()))
    }
}

impl fmt::Display for StoredPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Converts between absolute paths and their stored form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathBase {
    base: PathBuf,
}

impl PathBase {
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            base: absolutize(base.as_ref()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.base
    }

    pub fn store(&self, path: &Path) -> StoredPath {
        let absolute = absolutize(path);
        let stored = match absolute.strip_prefix(&self.base) {
            Ok(relative) if !relative.as_os_str().is_empty() => relative.to_path_buf(),
            _ => absolute,
        };
        StoredPath::from_raw(stored.to_string_lossy().into_owned())
    }

    pub fn resolve(&self, stored: &StoredPath) -> PathBuf {
        self.resolve_str(stored.as_str())
    }

    /// Resolve a raw stored string, which may have been written on another
    /// platform with `\` separators.
    pub fn resolve_str(&self, raw: &str) -> PathBuf {
        let normalized = normalize_separators(raw);
        if is_absolute_str(&normalized) {
            PathBuf::from(normalized)
        } else {
            let mut path = self.base.clone();
            path.extend(normalized.split('/').filter(|part| !part.is_empty()));
            path
        }
    }
}

/// Make `path` absolute and strip `.`/`..` components without touching the
/// filesystem.
pub fn absolutize(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn normalize_separators(raw: &str) -> String {
    raw.replace('\\', "/")
}

fn is_absolute_str(normalized: &str) -> bool {
    if normalized.starts_with('/') {
        return true;
    }
    let bytes = normalized.as_bytes();
    // "C:/..." written by a Windows build
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

/// Whether `dir` is a strict ancestor of `path`, compared component-wise.
pub fn contains(dir: &Path, path: &Path) -> bool {
    let dir = absolutize(dir);
    let path = absolutize(path);
    dir != path && path.starts_with(&dir)
}

/// Whether two folders overlap: equal, or one nested in the other.
pub fn intersects(a: &Path, b: &Path) -> bool {
    let a = absolutize(a);
    let b = absolutize(b);
    a == b || a.starts_with(&b) || b.starts_with(&a)
}

/// `foo_files` -> `foo`. Name-only; the caller decides whether it is a folder.
pub fn html_dir_basename(name: &str) -> Option<&str> {
    HTML_FOLDER_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .filter(|base| !base.is_empty())
}

/// File name without its last extension; the full name if that would be empty.
pub fn name_no_ext(path: &Path) -> String {
    match path.file_stem() {
        Some(stem) if !stem.is_empty() => stem.to_string_lossy().into_owned(),
        _ => file_name(path),
    }
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

static LAST_ID: AtomicU64 = AtomicU64::new(0);

/// Millisecond timestamp, bumped so two calls never return the same value.
pub fn unique_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let mut last = LAST_ID.load(Ordering::SeqCst);
    loop {
        let next = now.max(last + 1);
        match LAST_ID.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return next.to_string(),
            Err(observed) => last = observed,
        }
    }
}
