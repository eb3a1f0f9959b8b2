use crate::config::EngineConfig;
use crate::document::{Document, IndexedDocument};
use crate::error::{Error, Result};
use crate::paths::PathBase;
use crate::schema::{build_schema, IndexFields};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tantivy::collector::DocSetCollector;
use tantivy::directory::MmapDirectory;
use tantivy::merge_policy::LogMergePolicy;
use tantivy::query::AllQuery;
use tantivy::schema::{TantivyDocument, Value};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError, Term};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSettings {
    pub writer_threads: usize,
    pub writer_heap_bytes: usize,
}

impl IndexSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            writer_threads: config.writer_threads(),
            writer_heap_bytes: config.writer_heap_bytes,
        }
    }
}

/// An open index for one root scope, with its single writer. Dropping it
/// without [`ScopeIndex::commit`] discards every pending change.
pub struct ScopeIndex {
    index: Index,
    writer: IndexWriter,
    fields: IndexFields,
    base: PathBase,
}

impl ScopeIndex {
    pub fn open_or_create(dir: &Path, settings: IndexSettings, base: PathBase) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|err| Error::io(dir, err))?;

        let directory = MmapDirectory::open(dir).map_err(TantivyError::from)?;
        let index = Index::open_or_create(directory, build_schema())?;
        let fields = IndexFields::resolve(&index.schema())?;

        let writer: IndexWriter = index
            .writer_with_num_threads(settings.writer_threads.max(1), settings.writer_heap_bytes)?;
        let mut merge_policy = LogMergePolicy::default();
        merge_policy.set_level_log_size(1.2);
        writer.set_merge_policy(Box::new(merge_policy));

        Ok(Self {
            index,
            writer,
            fields,
            base,
        })
    }

    pub fn add(&mut self, doc: &Document) -> Result<()> {
        self.writer
            .add_document(doc.to_tantivy(&self.fields, &self.base))?;
        Ok(())
    }

    /// Delete every committed document whose stored path resolves to one of
    /// `paths`. Returns how many were matched.
    pub fn delete_paths(&mut self, paths: &HashSet<PathBuf>) -> Result<usize> {
        if paths.is_empty() {
            return Ok(0);
        }
        let reader = manual_reader(&self.index)?;
        let searcher = reader.searcher();
        let addresses = searcher.search(&AllQuery, &DocSetCollector)?;

        let mut deleted = 0;
        for address in addresses {
            let doc: TantivyDocument = searcher.doc(address)?;
            let Some(raw) = doc.get_first(self.fields.path).and_then(|v| v.as_str()) else {
                continue;
            };
            if paths.contains(&self.base.resolve_str(raw)) {
                // delete by the raw stored value, whatever separators it uses
                self.writer
                    .delete_term(Term::from_field_text(self.fields.path, raw));
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    pub fn commit(mut self) -> Result<()> {
        self.writer.commit()?;
        self.writer.wait_merging_threads()?;
        Ok(())
    }
}

fn manual_reader(index: &Index) -> tantivy::Result<IndexReader> {
    index
        .reader_builder()
        .reload_policy(ReloadPolicy::Manual)
        .try_into()
}

/// Open an existing index read-only. The reader lives as long as the caller
/// keeps it.
pub fn open_reader(dir: &Path) -> tantivy::Result<(IndexReader, IndexFields)> {
    let index = Index::open_in_dir(dir)?;
    let fields = IndexFields::resolve(&index.schema())
        .map_err(|err| TantivyError::SchemaError(err.to_string()))?;
    Ok((manual_reader(&index)?, fields))
}

/// Every document stored in the index at `dir`, sorted by path.
pub fn list_documents(dir: &Path, base: &PathBase) -> Result<Vec<IndexedDocument>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let (reader, fields) = open_reader(dir)?;
    let searcher = reader.searcher();
    let mut docs = Vec::new();
    for address in searcher.search(&AllQuery, &DocSetCollector)? {
        let doc: TantivyDocument = searcher.doc(address)?;
        if let Some(stored) = IndexedDocument::from_stored(&doc, &fields, base) {
            docs.push(stored);
        }
    }
    docs.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(docs)
}
