mod cancel;
pub mod config;
mod document;
mod error;
mod events;
mod indexer;
mod job;
pub mod parse;
pub mod paths;
mod query;
pub mod registry;
mod root;
mod scanner;
pub mod schema;
pub mod tree;
mod watch;

pub use crate::cancel::CancellationToken;
pub use crate::config::{EngineConfig, ScopeConfig};
pub use crate::document::{Document, IndexedDocument, ResultDocument};
pub use crate::error::{Conflict, Error, ParseError, Result, SearchError};
pub use crate::events::RegistryEvent;
pub use crate::indexer::IndexSettings;
pub use crate::job::{IndexingJob, JobId};
pub use crate::parse::{ParseLimits, ParserKind};
pub use crate::query::{build_query, SearchRequest};
pub use crate::registry::Registry;
pub use crate::root::{IndexingEnv, RootScope, UpdateReport};
pub use crate::scanner::{list_entries, EntryKind, EntryMeta};
pub use crate::tree::{ChangeDetector, NodeId, ScopeTree};
pub use crate::watch::FolderWatcher;
