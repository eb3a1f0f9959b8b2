use crate::document::{IndexedDocument, ResultDocument};
use crate::error::SearchError;
use crate::indexer;
use crate::paths::PathBase;
use crate::schema::{self, build_schema, IndexFields};
use globset::{GlobBuilder, GlobMatcher};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{
    Bm25StatisticsProvider, BooleanQuery, FuzzyTermQuery, Occur, Query, QueryParser, RegexQuery,
};
use tantivy::schema::{Field, TantivyDocument};
use tantivy::tokenizer::TokenizerManager;
use tantivy::{Searcher, Term};

const MAX_FUZZY_DISTANCE: u8 = 2;

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub text: String,
    /// Capped by the engine's `max_results`.
    pub limit: Option<usize>,
    /// Overrides the engine default for bare terms.
    pub use_or_operator: Option<bool>,
    /// Case-insensitive glob on absolute result paths.
    pub path_glob: Option<String>,
}

impl SearchRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Run the request against every index in `index_dirs` and merge the hits
/// by score. Term statistics are summed over all indexes first, so a
/// document scores the same whichever scope it lives in. Readers live only
/// for the duration of the call.
pub fn search(
    index_dirs: &[PathBuf],
    request: &SearchRequest,
    max_results: usize,
    default_or: bool,
    base: &PathBase,
) -> Result<Vec<ResultDocument>, SearchError> {
    let text = request.text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    let use_or_operator = request.use_or_operator.unwrap_or(default_or);
    let limit = request
        .limit
        .map_or(max_results, |limit| limit.min(max_results))
        .max(1);

    let query: Arc<dyn Query> = Arc::from(build_query(text, use_or_operator)?);
    let glob = build_glob_matcher(request.path_glob.as_deref())?;

    if let Some(missing) = index_dirs.iter().find(|dir| !dir.is_dir()) {
        return Err(SearchError::MissingIndex(missing.clone()));
    }

    let opened = index_dirs
        .par_iter()
        .map(|dir| OpenIndex::open(dir))
        .collect::<Result<Vec<_>, SearchError>>()?;
    let statistics = CombinedStatistics(&opened);

    let per_index: Vec<Result<Vec<ResultDocument>, SearchError>> = opened
        .par_iter()
        .map(|index| index.search(&query, &statistics, limit, base))
        .collect();

    let mut hits = Vec::new();
    for result in per_index {
        hits.extend(result?);
    }
    if let Some(matcher) = glob {
        hits.retain(|hit| matcher.is_match(hit.path()));
    }
    hits.sort();
    hits.truncate(limit);
    Ok(hits)
}

struct OpenIndex {
    searcher: Searcher,
    fields: IndexFields,
}

impl OpenIndex {
    fn open(dir: &Path) -> Result<Self, SearchError> {
        let (reader, fields) = indexer::open_reader(dir)?;
        Ok(Self {
            searcher: reader.searcher(),
            fields,
        })
    }

    fn search(
        &self,
        query: &Arc<dyn Query>,
        statistics: &CombinedStatistics<'_>,
        limit: usize,
        base: &PathBase,
    ) -> Result<Vec<ResultDocument>, SearchError> {
        let top_docs = self.searcher.search_with_statistics_provider(
            query.as_ref(),
            &TopDocs::with_limit(limit),
            statistics,
        )?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = self.searcher.doc(address)?;
            let Some(document) = IndexedDocument::from_stored(&doc, &self.fields, base) else {
                continue;
            };
            hits.push(ResultDocument {
                document,
                score,
                query: Arc::clone(query),
            });
        }
        Ok(hits)
    }
}

/// BM25 statistics summed over several indexes.
struct CombinedStatistics<'a>(&'a [OpenIndex]);

impl Bm25StatisticsProvider for CombinedStatistics<'_> {
    fn total_num_tokens(&self, field: Field) -> tantivy::Result<u64> {
        self.0
            .iter()
            .map(|index| Bm25StatisticsProvider::total_num_tokens(&index.searcher, field))
            .sum()
    }

    fn total_num_docs(&self) -> tantivy::Result<u64> {
        self.0
            .iter()
            .map(|index| Bm25StatisticsProvider::total_num_docs(&index.searcher))
            .sum()
    }

    fn doc_freq(&self, term: &Term) -> tantivy::Result<u64> {
        self.0.iter().map(|index| index.searcher.doc_freq(term)).sum()
    }
}

/// Parse the user's query. Top-level pieces are joined the way Lucene joins
/// them: `AND`/`OR` retype the clause before them as well, `NOT`, `+` and `-`
/// set the clause they precede. Wildcard (`rep*rt`, `te?t`) and fuzzy
/// (`colour~`, `colour~1`, `colour~0.8`) terms are built directly, anything
/// else goes through tantivy's grammar with `contents` as default field.
pub fn build_query(text: &str, use_or_operator: bool) -> Result<Box<dyn Query>, SearchError> {
    let schema = build_schema();
    let fields =
        IndexFields::resolve(&schema).map_err(|err| SearchError::Storage(err.to_string()))?;
    let mut parser = QueryParser::new(schema, vec![fields.contents], TokenizerManager::default());
    if !use_or_operator {
        parser.set_conjunction_by_default();
    }

    let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
    let mut conjunction = None;
    let mut negate_next = false;

    for chunk in top_level_chunks(text) {
        match chunk {
            "AND" | "&&" => conjunction = Some(Occur::Must),
            "OR" | "||" => conjunction = Some(Occur::Should),
            "NOT" | "!" => negate_next = true,
            _ => {
                let (modifier, body) = split_modifier(chunk);
                if body.is_empty() {
                    continue;
                }
                let modifier = if std::mem::take(&mut negate_next) {
                    Some(Occur::MustNot)
                } else {
                    modifier
                };
                let query = match SpecialTerm::parse(body)? {
                    Some(special) => special.build(&fields)?,
                    None => parser
                        .parse_query(body)
                        .map_err(|err| SearchError::QuerySyntax {
                            fragment: body.to_string(),
                            message: err.to_string(),
                        })?,
                };
                let previous = clauses.last_mut().map(|(occur, _)| occur);
                let occur = join_occur(previous, conjunction.take(), modifier, use_or_operator);
                clauses.push((occur, query));
            }
        }
    }

    Ok(Box::new(BooleanQuery::new(clauses)))
}

/// Occur of a new clause given the conjunction before it and its own
/// modifier. An explicit conjunction also retypes a previous clause that is
/// not negated.
fn join_occur(
    previous: Option<&mut Occur>,
    conjunction: Option<Occur>,
    modifier: Option<Occur>,
    use_or_operator: bool,
) -> Occur {
    if let Some(previous) = previous.filter(|occur| **occur != Occur::MustNot) {
        match conjunction {
            Some(Occur::Must) => *previous = Occur::Must,
            Some(Occur::Should) if !use_or_operator => *previous = Occur::Should,
            _ => {}
        }
    }
    match (modifier, conjunction) {
        (Some(occur), _) => occur,
        (None, Some(occur)) => occur,
        (None, None) if use_or_operator => Occur::Should,
        (None, None) => Occur::Must,
    }
}

fn split_modifier(chunk: &str) -> (Option<Occur>, &str) {
    match chunk.as_bytes().first() {
        Some(b'+') => (Some(Occur::Must), &chunk[1..]),
        Some(b'-') => (Some(Occur::MustNot), &chunk[1..]),
        _ => (None, chunk),
    }
}

/// Whitespace-separated pieces of `text`, keeping quoted phrases, groups and
/// ranges whole.
fn top_level_chunks(text: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = None;
    let mut depth = 0usize;
    let mut in_quote = false;

    for (i, c) in text.char_indices() {
        match c {
            '"' => in_quote = !in_quote,
            '(' | '[' | '{' if !in_quote => depth += 1,
            ')' | ']' | '}' if !in_quote => depth = depth.saturating_sub(1),
            _ => {}
        }
        if c.is_whitespace() && !in_quote && depth == 0 {
            if let Some(s) = start.take() {
                chunks.push(&text[s..i]);
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        chunks.push(&text[s..]);
    }
    chunks
}

#[derive(Debug, PartialEq, Eq)]
enum TermKind {
    Wildcard,
    Fuzzy(u8),
}

#[derive(Debug, PartialEq, Eq)]
struct SpecialTerm<'a> {
    field: Option<&'a str>,
    term: String,
    kind: TermKind,
}

impl<'a> SpecialTerm<'a> {
    fn parse(chunk: &'a str) -> Result<Option<Self>, SearchError> {
        if chunk.contains(['"', '(', ')', '[', ']', '{', '}', '\\']) {
            return Ok(None);
        }
        let (field, term) = match chunk.split_once(':') {
            Some((field, term)) if !field.is_empty() => (Some(field), term),
            _ => (None, chunk),
        };

        let (term, kind) = if let Some((word, distance)) = term.rsplit_once('~') {
            if word.is_empty() || word.contains(['*', '?']) {
                return Ok(None);
            }
            (word, TermKind::Fuzzy(fuzzy_distance(word, distance)?))
        } else if term.contains(['*', '?']) && term.chars().any(char::is_alphanumeric) {
            (term, TermKind::Wildcard)
        } else {
            return Ok(None);
        };

        Ok(Some(Self {
            field,
            term: term.to_lowercase(),
            kind,
        }))
    }

    fn build(&self, fields: &IndexFields) -> Result<Box<dyn Query>, SearchError> {
        let field = self.target(fields)?;
        match self.kind {
            TermKind::Fuzzy(distance) => {
                let term = Term::from_field_text(field, &self.term);
                Ok(Box::new(FuzzyTermQuery::new(term, distance, true)))
            }
            TermKind::Wildcard => {
                let pattern = wildcard_to_regex(&self.term);
                let query = RegexQuery::from_pattern(&pattern, field).map_err(|err| {
                    SearchError::QuerySyntax {
                        fragment: self.term.clone(),
                        message: err.to_string(),
                    }
                })?;
                Ok(Box::new(query))
            }
        }
    }

    fn target(&self, fields: &IndexFields) -> Result<Field, SearchError> {
        match self.field {
            None | Some(schema::CONTENTS) => Ok(fields.contents),
            Some(schema::TITLE) => Ok(fields.title),
            Some(schema::AUTHOR) => Ok(fields.author),
            Some(schema::FILENAME) => Ok(fields.filename),
            Some(other) => Err(SearchError::QuerySyntax {
                fragment: format!("{other}:{}", self.term),
                message: format!("unknown field {other:?}"),
            }),
        }
    }
}

/// Edit distance after `~`: empty means the maximum, an integer is an edit
/// count, and a fraction below 1 is a Lucene similarity scaled by the term
/// length.
fn fuzzy_distance(word: &str, raw: &str) -> Result<u8, SearchError> {
    if raw.is_empty() {
        return Ok(MAX_FUZZY_DISTANCE);
    }
    if let Ok(edits) = raw.parse::<u8>() {
        return Ok(edits.min(MAX_FUZZY_DISTANCE));
    }
    match raw.parse::<f32>() {
        Ok(similarity) if (0.0..1.0).contains(&similarity) => {
            let edits = ((1.0 - similarity) * word.chars().count() as f32) as u8;
            Ok(edits.min(MAX_FUZZY_DISTANCE))
        }
        _ => Err(SearchError::QuerySyntax {
            fragment: format!("{word}~{raw}"),
            message: "fuzzy distance must be an edit count or a similarity below 1".into(),
        }),
    }
}

fn wildcard_to_regex(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 8);
    for c in term.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    pattern
}

fn build_glob_matcher(pattern: Option<&str>) -> Result<Option<GlobMatcher>, SearchError> {
    let Some(raw) = pattern.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(None);
    };

    let glob = GlobBuilder::new(raw)
        .case_insensitive(true)
        .build()
        .map_err(|err| SearchError::QuerySyntax {
            fragment: raw.to_string(),
            message: err.to_string(),
        })?;

    Ok(Some(glob.compile_matcher()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::indexer::{IndexSettings, ScopeIndex};
    use crate::parse::ParserKind;
    use tempfile::tempdir;

    fn index_with(dir: &Path, base: &PathBase, docs: &[(&str, &str)]) -> PathBuf {
        let index_dir = dir.join(".idx");
        let settings = IndexSettings {
            writer_threads: 1,
            writer_heap_bytes: 32 * 1024 * 1024,
        };
        let mut index = ScopeIndex::open_or_create(&index_dir, settings, base.clone()).unwrap();
        for (name, body) in docs {
            let mut doc = Document::new(&dir.join(name), ParserKind::Text);
            doc.contents = body.to_string();
            index.add(&doc).unwrap();
        }
        index.commit().unwrap();
        index_dir
    }

    fn borrowed(docs: &[(String, String)]) -> Vec<(&str, &str)> {
        docs.iter().map(|(n, b)| (n.as_str(), b.as_str())).collect()
    }

    fn names(hits: &[ResultDocument]) -> Vec<String> {
        let mut names: Vec<_> = hits
            .iter()
            .map(|hit| crate::paths::file_name(hit.path()))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn splits_on_top_level_whitespace() {
        assert_eq!(
            top_level_chunks(r#"alpha "two words" (a OR b)  beta* date:[1 TO 5]"#),
            vec!["alpha", "\"two words\"", "(a OR b)", "beta*", "date:[1 TO 5]"]
        );
    }

    #[test]
    fn recognises_special_terms() {
        let wildcard = SpecialTerm::parse("title:Rep*rt").unwrap().unwrap();
        assert_eq!(wildcard.field, Some("title"));
        assert_eq!(wildcard.term, "rep*rt");
        assert_eq!(wildcard.kind, TermKind::Wildcard);

        let fuzzy = |chunk| SpecialTerm::parse(chunk).unwrap().unwrap().kind;
        assert_eq!(fuzzy("colour~"), TermKind::Fuzzy(2));
        assert_eq!(fuzzy("colour~1"), TermKind::Fuzzy(1));
        assert_eq!(fuzzy("colour~9"), TermKind::Fuzzy(2));
        assert_eq!(fuzzy("colour~0.8"), TermKind::Fuzzy(1));
        assert_eq!(fuzzy("colour~0.5"), TermKind::Fuzzy(2));
        assert!(matches!(
            SpecialTerm::parse("colour~1.5"),
            Err(SearchError::QuerySyntax { .. })
        ));

        assert!(SpecialTerm::parse("plain").unwrap().is_none());
        assert!(SpecialTerm::parse("\"quoted*\"").unwrap().is_none());
        assert!(SpecialTerm::parse("*").unwrap().is_none());
        assert_eq!(wildcard_to_regex("a.b*"), "a\\.b.*");
    }

    #[test]
    fn joins_clauses_like_lucene() {
        let mut previous = Occur::Must;
        assert_eq!(
            join_occur(Some(&mut previous), Some(Occur::Should), None, false),
            Occur::Should
        );
        assert_eq!(previous, Occur::Should);

        let mut previous = Occur::Should;
        assert_eq!(
            join_occur(Some(&mut previous), Some(Occur::Must), None, true),
            Occur::Must
        );
        assert_eq!(previous, Occur::Must);

        let mut negated = Occur::MustNot;
        join_occur(Some(&mut negated), Some(Occur::Must), None, true);
        assert_eq!(negated, Occur::MustNot);

        assert_eq!(join_occur(None, None, None, false), Occur::Must);
        assert_eq!(join_occur(None, None, None, true), Occur::Should);
        assert_eq!(
            join_occur(None, Some(Occur::Must), Some(Occur::MustNot), true),
            Occur::MustNot
        );
    }

    #[test]
    fn wildcard_fuzzy_and_boolean_terms() {
        let dir = tempdir().unwrap();
        let base = PathBase::new(dir.path());
        let index_dir = index_with(
            dir.path(),
            &base,
            &[
                ("one.txt", "quarterly report draft"),
                ("two.txt", "annual colour chart"),
                ("three.txt", "report on colour"),
            ],
        );
        let dirs = vec![index_dir];
        let run = |text: &str, or: bool| {
            names(&search(&dirs, &SearchRequest::new(text), 10, or, &base).unwrap())
        };

        assert_eq!(run("rep*t", true), vec!["one.txt", "three.txt"]);
        assert_eq!(run("color~1", true), vec!["three.txt", "two.txt"]);
        assert_eq!(run("colous~0.8", true), vec!["three.txt", "two.txt"]);
        assert_eq!(run("report colour", false), vec!["three.txt"]);
        assert_eq!(run("report colour", true).len(), 3);
        assert_eq!(run("rep* AND annual", true), Vec::<String>::new());
        assert_eq!(run("colour NOT rep*", true), vec!["two.txt"]);
        assert_eq!(run("colour -report", false), vec!["two.txt"]);
        assert_eq!(run("+draft colour", true), vec!["one.txt"]);
        assert_eq!(run("filename:thr*", true), vec!["three.txt"]);
        assert_eq!(run("title:three", true), vec!["three.txt"]);
    }

    #[test]
    fn or_joins_special_terms_under_and_default() {
        let dir = tempdir().unwrap();
        let base = PathBase::new(dir.path());
        let index_dir = index_with(
            dir.path(),
            &base,
            &[("one.txt", "quarterly report draft"), ("two.txt", "annual colour chart")],
        );
        let dirs = vec![index_dir];
        let run = |text: &str| {
            names(&search(&dirs, &SearchRequest::new(text), 10, false, &base).unwrap())
        };

        let both = vec!["one.txt", "two.txt"];
        assert_eq!(run("report OR annual"), both);
        assert_eq!(run("rep* OR annual"), both);
        assert_eq!(run("annual OR rep*"), both);
        assert_eq!(run("colr~ OR draft"), both);
        assert_eq!(run("rep* annual"), Vec::<String>::new());
    }

    #[test]
    fn scores_do_not_depend_on_the_index() {
        let dir = tempdir().unwrap();
        let base = PathBase::new(dir.path());
        let busy = dir.path().join("busy");
        let quiet = dir.path().join("quiet");

        let mut busy_docs = vec![("target.txt".to_string(), "invoice payment".to_string())];
        let mut quiet_docs = busy_docs.clone();
        for i in 0..50 {
            busy_docs.push((format!("inv-{i}.txt"), format!("invoice number {i}")));
            quiet_docs.push((format!("misc-{i}.txt"), format!("unrelated note {i}")));
        }
        let busy_dir = index_with(&busy, &base, &borrowed(&busy_docs));
        let quiet_dir = index_with(&quiet, &base, &borrowed(&quiet_docs));

        let hits = search(
            &[busy_dir, quiet_dir],
            &SearchRequest::new("invoice"),
            100,
            true,
            &base,
        )
        .unwrap();
        let score_of = |path: PathBuf| {
            hits.iter()
                .find(|hit| hit.path() == path)
                .map(|hit| hit.score)
                .unwrap()
        };
        let in_busy = score_of(busy.join("target.txt"));
        let in_quiet = score_of(quiet.join("target.txt"));
        assert!((in_busy - in_quiet).abs() < 1e-5, "{in_busy} != {in_quiet}");
        assert_eq!(hits.len(), 52);
    }

    #[test]
    fn reports_syntax_errors_and_missing_indexes() {
        let dir = tempdir().unwrap();
        let base = PathBase::new(dir.path());

        let err = build_query("nosuchfield:value", true).unwrap_err();
        assert!(matches!(err, SearchError::QuerySyntax { .. }));

        let err = build_query("bogus:abc*", true).unwrap_err();
        assert!(matches!(err, SearchError::QuerySyntax { .. }));

        let err = build_query("colour~abc", true).unwrap_err();
        assert!(matches!(
            err,
            SearchError::QuerySyntax { fragment, .. } if fragment == "colour~abc"
        ));

        let missing = dir.path().join("gone");
        let err = search(&[missing.clone()], &SearchRequest::new("x"), 10, true, &base)
            .unwrap_err();
        assert!(matches!(err, SearchError::MissingIndex(path) if path == missing));
    }

    #[test]
    fn applies_glob_filter() {
        let dir = tempdir().unwrap();
        let base = PathBase::new(dir.path());
        let index_dir = index_with(
            dir.path(),
            &base,
            &[("readme.txt", "introduction"), ("notes.nfo", "introduction")],
        );

        let mut request = SearchRequest::new("introduction");
        request.path_glob = Some("**/*.NFO".into());
        let hits = search(&[index_dir], &request, 10, true, &base).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].path().ends_with("notes.nfo"));
        assert!(hits[0].score > 0.0);
    }
}
