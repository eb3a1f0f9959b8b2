use crate::parse::ParserKind;
use crate::paths::{self, PathBase};
use crate::schema::IndexFields;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tantivy::query::Query;
use tantivy::schema::{Field, TantivyDocument, Value};

/// A parsed file, ready to be written to an index.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: PathBuf,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub contents: String,
    pub last_modified: i64,
    pub parsed_by: ParserKind,
}

impl Document {
    pub fn new(path: &Path, parsed_by: ParserKind) -> Self {
        Self {
            path: path.to_path_buf(),
            title: None,
            authors: Vec::new(),
            contents: String::new(),
            last_modified: 0,
            parsed_by,
        }
    }

    pub fn filename(&self) -> String {
        paths::name_no_ext(&self.path)
    }

    pub(crate) fn to_tantivy(&self, fields: &IndexFields, base: &PathBase) -> TantivyDocument {
        let filename = self.filename();

        let mut doc = TantivyDocument::new();
        doc.add_text(fields.path, base.store(&self.path).as_str());
        doc.add_text(fields.filename, &filename);
        // filename terms are searchable through the default field too
        let mut contents = String::with_capacity(filename.len() + 1 + self.contents.len());
        contents.push_str(&filename);
        contents.push(' ');
        contents.push_str(&self.contents);
        doc.add_text(fields.contents, contents);
        // untitled documents take their file name as title
        let title = self
            .title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&filename);
        doc.add_text(fields.title, title);
        for author in self.authors.iter().filter(|a| !a.trim().is_empty()) {
            doc.add_text(fields.author, author);
        }
        doc.add_i64(fields.last_modified, self.last_modified);
        doc.add_text(fields.parsed_by, self.parsed_by.id());
        doc
    }
}

/// The stored half of an indexed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedDocument {
    pub path: PathBuf,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub last_modified: i64,
    pub parsed_by: String,
}

impl IndexedDocument {
    pub(crate) fn from_stored(
        doc: &TantivyDocument,
        fields: &IndexFields,
        base: &PathBase,
    ) -> Option<Self> {
        let stored_path = field_text(doc, fields.path)?;
        Some(Self {
            path: base.resolve_str(stored_path),
            title: field_text(doc, fields.title).map(str::to_string),
            authors: doc
                .get_all(fields.author)
                .filter_map(|value| value.as_str())
                .map(str::to_string)
                .collect(),
            last_modified: doc
                .get_first(fields.last_modified)
                .and_then(|value| value.as_i64())
                .unwrap_or_default(),
            parsed_by: field_text(doc, fields.parsed_by)
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// The parser that produced this document, if it is still known.
    pub fn parser(&self) -> Option<ParserKind> {
        ParserKind::from_id(&self.parsed_by)
    }
}

/// A search hit. Sorting a slice of these puts the best match first.
#[derive(Debug, Clone)]
pub struct ResultDocument {
    pub document: IndexedDocument,
    pub score: f32,
    /// The parsed query, kept for term highlighting.
    pub query: Arc<dyn Query>,
}

impl ResultDocument {
    pub fn path(&self) -> &Path {
        &self.document.path
    }
}

impl PartialEq for ResultDocument {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ResultDocument {}

impl PartialOrd for ResultDocument {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResultDocument {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.document.path.cmp(&other.document.path))
    }
}

fn field_text(doc: &TantivyDocument, field: Field) -> Option<&str> {
    doc.get_first(field).and_then(|value| value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::build_schema;
    use tantivy::query::AllQuery;

    fn hit(path: &str, score: f32) -> ResultDocument {
        ResultDocument {
            document: IndexedDocument {
                path: PathBuf::from(path),
                title: None,
                authors: Vec::new(),
                last_modified: 0,
                parsed_by: ParserKind::Text.id().to_string(),
            },
            score,
            query: Arc::new(AllQuery),
        }
    }

    #[test]
    fn sorts_by_descending_score() {
        let mut hits = vec![hit("/a", 0.5), hit("/b", 2.0), hit("/c", 1.0)];
        hits.sort();
        let order: Vec<_> = hits.iter().map(|h| h.path().to_path_buf()).collect();
        assert_eq!(
            order,
            vec![
                PathBuf::from("/b"),
                PathBuf::from("/c"),
                PathBuf::from("/a")
            ]
        );
    }

    #[test]
    fn stored_fields_round_trip() {
        let schema = build_schema();
        let fields = IndexFields::resolve(&schema).unwrap();
        let base = PathBase::new("/data");

        let mut doc = Document::new(Path::new("/data/notes/todo.txt"), ParserKind::Html);
        doc.title = Some("Todo".into());
        doc.authors = vec!["Ann".into(), "Bo".into()];
        doc.contents = "milk".into();
        doc.last_modified = 42;

        let tantivy_doc = doc.to_tantivy(&fields, &base);
        assert_eq!(field_text(&tantivy_doc, fields.path), Some("notes/todo.txt"));

        let stored = IndexedDocument::from_stored(&tantivy_doc, &fields, &base).unwrap();
        assert_eq!(stored.path, PathBuf::from("/data/notes/todo.txt"));
        assert_eq!(stored.title.as_deref(), Some("Todo"));
        assert_eq!(stored.authors, vec!["Ann", "Bo"]);
        assert_eq!(stored.last_modified, 42);
        assert_eq!(stored.parser(), Some(ParserKind::Html));

        doc.title = Some("  ".into());
        let untitled = doc.to_tantivy(&fields, &base);
        let stored = IndexedDocument::from_stored(&untitled, &fields, &base).unwrap();
        assert_eq!(stored.title.as_deref(), Some("todo"));
    }
}
