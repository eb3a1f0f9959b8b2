use crate::error::{Error, Result};
use crate::parse::ParserKind;
use config::{Config, Environment, File};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

const DEFAULT_MAX_RESULTS: usize = 10_000;
const DEFAULT_MAX_TEXT_BYTES: u64 = 16 * 1024 * 1024;
const DEFAULT_WRITER_HEAP_BYTES: usize = 128 * 1024 * 1024;
const DEFAULT_WRITER_THREADS: usize = 0; // replaced with num_cpus at runtime

/// Tantivy refuses writer arenas smaller than ~15 MB per indexing thread.
pub(crate) const MIN_HEAP_PER_THREAD: usize = 16 * 1024 * 1024;

const DEFAULT_TEXT_EXTENSIONS: &[&str] = &["txt", "nfo"];
const DEFAULT_HTML_EXTENSIONS: &[&str] = &["html", "htm", "shtml", "shtm", "php", "asp", "jsp"];

const LIST_KEYS: &[&str] = &["text_extensions", "html_extensions", "exclusion_filters"];

/// Engine-wide settings. Every field has a default so an empty or missing
/// configuration file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory that stored paths are made relative to.
    pub base_dir: PathBuf,
    /// Parent folder of every per-scope index. Defaults to `<base_dir>/indexes`.
    pub indexes_dir: Option<PathBuf>,
    pub max_results: usize,
    pub use_or_operator: bool,
    pub text_extensions: Vec<String>,
    pub html_extensions: Vec<String>,
    pub exclusion_filters: Vec<String>,
    pub detect_html_pairs: bool,
    pub max_text_bytes: u64,
    pub writer_threads: usize,
    pub writer_heap_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            indexes_dir: None,
            max_results: DEFAULT_MAX_RESULTS,
            use_or_operator: true,
            text_extensions: to_strings(DEFAULT_TEXT_EXTENSIONS),
            html_extensions: to_strings(DEFAULT_HTML_EXTENSIONS),
            exclusion_filters: Vec::new(),
            detect_html_pairs: true,
            max_text_bytes: DEFAULT_MAX_TEXT_BYTES,
            writer_threads: DEFAULT_WRITER_THREADS,
            writer_heap_bytes: DEFAULT_WRITER_HEAP_BYTES,
        }
    }
}

impl EngineConfig {
    /// Layer an optional TOML file and `DOCSCOPE__*` environment variables
    /// over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.to_path_buf()).required(false));
        }

        let mut environment = Environment::with_prefix("DOCSCOPE")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",");
        for key in LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }
        builder = builder.add_source(environment);

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Config rooted at `base_dir`, with indexes under `<base_dir>/indexes`.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_results == 0 {
            return Err(Error::InvalidConfig("max_results must be > 0".into()));
        }
        if self.writer_heap_bytes < MIN_HEAP_PER_THREAD {
            return Err(Error::InvalidConfig(format!(
                "writer_heap_bytes must be at least {MIN_HEAP_PER_THREAD}"
            )));
        }
        ExclusionSet::compile(&self.exclusion_filters)?;
        Ok(())
    }

    pub fn indexes_dir(&self) -> PathBuf {
        match &self.indexes_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.base_dir.join(dir),
            None => self.base_dir.join("indexes"),
        }
    }

    pub fn registry_file(&self) -> PathBuf {
        self.indexes_dir().join("registry.json")
    }

    /// Plain-text list of scope folders, one per line, for helper processes.
    pub fn manifest_file(&self) -> PathBuf {
        self.indexes_dir().join(".indexes.txt")
    }

    pub fn writer_threads(&self) -> usize {
        let wanted = if self.writer_threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.writer_threads.max(1)
        };
        wanted.min((self.writer_heap_bytes / MIN_HEAP_PER_THREAD).max(1))
    }

    pub fn scope_defaults(&self) -> ScopeConfig {
        ScopeConfig {
            text_extensions: self.text_extensions.clone(),
            html_extensions: self.html_extensions.clone(),
            exclusion_filters: self.exclusion_filters.clone(),
            detect_html_pairs: self.detect_html_pairs,
        }
    }
}

/// Per-scope crawl settings, persisted with the scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConfig {
    pub text_extensions: Vec<String>,
    pub html_extensions: Vec<String>,
    pub exclusion_filters: Vec<String>,
    pub detect_html_pairs: bool,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            text_extensions: to_strings(DEFAULT_TEXT_EXTENSIONS),
            html_extensions: to_strings(DEFAULT_HTML_EXTENSIONS),
            exclusion_filters: Vec::new(),
            detect_html_pairs: true,
        }
    }
}

impl ScopeConfig {
    /// Which parser handles `path`. HTML extensions win over text extensions
    /// so user-edited lists can override each other predictably.
    pub fn parser_for(&self, path: &Path) -> Option<ParserKind> {
        let ext = extension_of(path)?;
        if contains_ext(&self.html_extensions, &ext) {
            Some(ParserKind::Html)
        } else if contains_ext(&self.text_extensions, &ext) {
            Some(ParserKind::Text)
        } else {
            None
        }
    }

    pub fn can_parse(&self, path: &Path) -> bool {
        self.parser_for(path).is_some()
    }

    pub fn is_html(&self, path: &Path) -> bool {
        matches!(self.parser_for(path), Some(ParserKind::Html))
    }
}

/// Compiled exclusion regexes. A pattern must match the whole file name.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    patterns: Vec<Regex>,
}

impl ExclusionSet {
    pub fn compile(filters: &[String]) -> Result<Self> {
        let mut patterns = Vec::with_capacity(filters.len());
        for raw in filters.iter().map(|f| f.trim()).filter(|f| !f.is_empty()) {
            let regex = Regex::new(&format!("^(?:{raw})$")).map_err(|source| {
                Error::InvalidPattern {
                    pattern: raw.to_string(),
                    source,
                }
            })?;
            patterns.push(regex);
        }
        Ok(Self { patterns })
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };
        self.patterns.iter().any(|p| p.is_match(&name))
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .filter(|ext| !ext.is_empty())
}

fn contains_ext(list: &[String], ext: &str) -> bool {
    list.iter()
        .any(|candidate| candidate.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn html_extensions_take_priority() {
        let mut config = ScopeConfig::default();
        config.text_extensions.push("htm".into());
        assert_eq!(
            config.parser_for(Path::new("a/page.HTM")),
            Some(ParserKind::Html)
        );
        assert_eq!(
            config.parser_for(Path::new("notes.txt")),
            Some(ParserKind::Text)
        );
        assert_eq!(config.parser_for(Path::new("image.png")), None);
        assert_eq!(config.parser_for(Path::new("Makefile")), None);
    }

    #[test]
    fn exclusion_matches_whole_file_name() {
        let set = ExclusionSet::compile(&[".*\\.log".into(), "draft".into()]).unwrap();
        assert!(set.is_excluded(Path::new("/tmp/x/server.log")));
        assert!(set.is_excluded(Path::new("draft")));
        assert!(!set.is_excluded(Path::new("draft.txt")));
        assert!(!set.is_excluded(Path::new("catalog.txt")));
    }

    #[test]
    fn rejects_bad_patterns() {
        let err = ExclusionSet::compile(&["(unclosed".into()]).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }

    #[test]
    fn loads_file_over_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("docscope.toml");
        fs::write(
            &path,
            "max_results = 25\nuse_or_operator = false\ntext_extensions = [\"txt\", \"md\"]\n",
        )
        .unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.max_results, 25);
        assert!(!config.use_or_operator);
        assert_eq!(config.text_extensions, vec!["txt", "md"]);
        assert!(config.detect_html_pairs);
    }

    #[test]
    fn writer_threads_fit_heap() {
        let config = EngineConfig {
            writer_threads: 64,
            writer_heap_bytes: 2 * MIN_HEAP_PER_THREAD,
            ..EngineConfig::with_base_dir("/tmp")
        };
        assert_eq!(config.writer_threads(), 2);
        assert_eq!(config.indexes_dir(), PathBuf::from("/tmp/indexes"));
    }
}
