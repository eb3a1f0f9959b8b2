#![allow(dead_code)]

use docscope_core::{EngineConfig, IndexingEnv, RootScope};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub fn engine_config(base: &Path) -> EngineConfig {
    let mut config = EngineConfig::with_base_dir(base);
    config.writer_threads = 1;
    config.writer_heap_bytes = 32 * 1024 * 1024;
    config
}

pub fn env(base: &Path) -> IndexingEnv {
    IndexingEnv::from_config(&engine_config(base))
}

pub fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

/// Move the modification time well away from whatever it was.
pub fn touch(path: &Path, offset_secs: u64) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(offset_secs))
        .unwrap();
}

/// Indexed paths relative to the scope folder, sorted.
pub fn indexed(scope: &RootScope, env: &IndexingEnv) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = scope
        .list_documents(&env.base)
        .unwrap()
        .into_iter()
        .map(|doc| doc.path.strip_prefix(scope.directory()).unwrap().to_path_buf())
        .collect();
    paths.sort();
    paths
}
