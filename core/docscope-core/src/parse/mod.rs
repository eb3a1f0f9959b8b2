//! File parsers. The set is closed: a file is handled by the parser whose
//! extension list claims it in the scope configuration.

pub mod html;
pub mod text;

use crate::config::ScopeConfig;
use crate::document::Document;
use crate::error::ParseError;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParserKind {
    Text,
    Html,
}

impl ParserKind {
    pub const ALL: [ParserKind; 2] = [ParserKind::Text, ParserKind::Html];

    /// Stable identifier stored in the `parsed_by` field.
    pub fn id(self) -> &'static str {
        match self {
            ParserKind::Text => "TextParser",
            ParserKind::Html => "HtmlParser",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ParserKind::Text => "Plain Text",
            ParserKind::Html => "HTML",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    pub fn extensions(self, config: &ScopeConfig) -> &[String] {
        match self {
            ParserKind::Text => &config.text_extensions,
            ParserKind::Html => &config.html_extensions,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParseLimits {
    pub max_text_bytes: u64,
}

/// Parse `path` with `kind`. Panics inside a parser and failed allocations
/// come back as a `ParseError` for this file only.
pub fn parse_file(
    path: &Path,
    kind: ParserKind,
    html_folder: Option<&Path>,
    config: &ScopeConfig,
    limits: ParseLimits,
) -> Result<Document, ParseError> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match kind {
        ParserKind::Text => text::parse(path, limits),
        ParserKind::Html => html::parse(path, html_folder, config, limits),
    }));

    let mut doc = match outcome {
        Ok(Ok(doc)) => doc,
        Ok(Err(err)) => return Err(ParseError::new(path, format!("{err:#}"))),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "parser panicked".to_string());
            return Err(ParseError::new(path, message));
        }
    };
    doc.parsed_by = kind;
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const LIMITS: ParseLimits = ParseLimits {
        max_text_bytes: 1024 * 1024,
    };

    #[test]
    fn ids_resolve_back() {
        for kind in ParserKind::ALL {
            assert_eq!(ParserKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(ParserKind::from_id("PdfParser"), None);
    }

    #[test]
    fn tags_document_with_parser() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("readme.txt");
        fs::write(&path, "plain words").unwrap();

        let doc = parse_file(&path, ParserKind::Text, None, &ScopeConfig::default(), LIMITS)
            .unwrap();
        assert_eq!(doc.parsed_by, ParserKind::Text);
        assert!(doc.contents.contains("plain words"));
    }

    #[test]
    fn failures_name_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        let err = parse_file(&path, ParserKind::Text, None, &ScopeConfig::default(), LIMITS)
            .unwrap_err();
        assert_eq!(err.path, path);
    }
}
