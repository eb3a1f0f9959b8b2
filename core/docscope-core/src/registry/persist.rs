use crate::config::ScopeConfig;
use crate::error::{Error, ParseError, Result};
use crate::paths::{PathBase, StoredPath};
use crate::root::{RootScope, RootState};
use crate::tree::ScopeTree;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    version: u32,
    scopes: Vec<PersistedScope>,
}

/// Everything about a root scope that outlives the process. Queue state and
/// checked flags are left out.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedScope {
    id: String,
    directory: StoredPath,
    index_dir: StoredPath,
    config: ScopeConfig,
    tree: ScopeTree,
    #[serde(default)]
    parse_errors: Vec<ParseError>,
    #[serde(default)]
    parse_time_ms: u64,
    #[serde(default)]
    finished_with_errors: bool,
    #[serde(default)]
    delete_on_exit: bool,
}

/// Write the registry file and the plain-text manifest next to it. Both are
/// replaced atomically.
pub fn save(
    registry_file: &Path,
    manifest: &Path,
    scopes: &[Arc<RootScope>],
    base: &PathBase,
) -> Result<()> {
    let file = RegistryFile {
        version: FORMAT_VERSION,
        scopes: scopes
            .iter()
            .map(|scope| {
                let state = scope.state_snapshot();
                PersistedScope {
                    id: scope.id().to_string(),
                    directory: base.store(scope.directory()),
                    index_dir: base.store(scope.index_dir()),
                    config: state.config,
                    tree: state.tree,
                    parse_errors: state.parse_errors,
                    parse_time_ms: state.parse_time.as_millis() as u64,
                    finished_with_errors: state.finished_with_errors,
                    delete_on_exit: state.delete_on_exit,
                }
            })
            .collect(),
    };
    write_atomic(registry_file, &serde_json::to_vec_pretty(&file)?)?;

    let mut listing = String::new();
    for scope in scopes {
        listing.push_str(&scope.directory().to_string_lossy());
        listing.push('\n');
    }
    write_atomic(manifest, listing.as_bytes())
}

/// Read the registry file. A missing or unreadable file yields no scopes.
pub fn load(registry_file: &Path, base: &PathBase) -> Vec<RootScope> {
    let bytes = match fs::read(registry_file) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            warn!("cannot read {}: {err}", registry_file.display());
            return Vec::new();
        }
    };
    let file: RegistryFile = match serde_json::from_slice(&bytes) {
        Ok(file) => file,
        Err(err) => {
            warn!("ignoring corrupt registry {}: {err}", registry_file.display());
            return Vec::new();
        }
    };

    file.scopes
        .into_iter()
        .map(|scope| {
            RootScope::from_parts(
                scope.id,
                base.resolve(&scope.directory),
                base.resolve(&scope.index_dir),
                RootState {
                    config: scope.config,
                    tree: scope.tree,
                    parse_errors: scope.parse_errors,
                    parse_time: Duration::from_millis(scope.parse_time_ms),
                    finished_with_errors: scope.finished_with_errors,
                    delete_on_exit: scope.delete_on_exit,
                },
            )
        })
        .collect()
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|err| Error::io(dir, err))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|err| Error::io(dir, err))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|err| Error::io(path, err))?;
    tmp.persist(path).map_err(|err| Error::io(path, err.error))?;
    Ok(())
}
