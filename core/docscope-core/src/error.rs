use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("scope directory not found: {}", .0.display())]
    ScopeMissing(PathBuf),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("index error: {0}")]
    Index(#[from] tantivy::TantivyError),

    #[error("registry serialization error: {0}")]
    Persist(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid exclusion pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("{} intersects {conflict}", directory.display())]
    Intersects {
        directory: PathBuf,
        conflict: Conflict,
    },

    #[error("scope not registered: {}", .0.display())]
    NotRegistered(PathBuf),

    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// What a new scope collided with when it was checked against the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    RegisteredScope,
    QueuedJob,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::RegisteredScope => f.write_str("an already indexed folder"),
            Conflict::QueuedJob => f.write_str("a folder in the indexing queue"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("invalid query near {fragment:?}: {message}")]
    QuerySyntax { fragment: String, message: String },

    #[error("index folder not found: {}", .0.display())]
    MissingIndex(PathBuf),

    #[error("search failed: {0}")]
    Storage(String),
}

impl From<tantivy::TantivyError> for SearchError {
    fn from(err: tantivy::TantivyError) -> Self {
        SearchError::Storage(err.to_string())
    }
}

/// A per-file extraction failure. Never aborts a crawl.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{}: {message}", path.display())]
pub struct ParseError {
    pub path: PathBuf,
    pub message: String,
}

impl ParseError {
    pub fn new(path: &Path, message: impl Into<String>) -> Self {
        ParseError {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}
