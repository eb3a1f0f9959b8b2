mod common;

use common::{env, indexed, touch, write};
use docscope_core::tree::{HtmlPairEntry, NodeKind};
use docscope_core::{CancellationToken, Error, RootScope, ScopeConfig};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn scope(base: &Path, config: ScopeConfig) -> RootScope {
    RootScope::new(&base.join("docs"), &base.join("indexes"), config)
}

fn pair_entry(scope: &RootScope, name: &str) -> HtmlPairEntry {
    scope.with_tree(|tree| {
        let id = tree.scope(tree.root()).unwrap().html_pairs[name];
        match &tree.node(id).unwrap().kind {
            NodeKind::HtmlPair(pair) => pair.clone(),
            other => panic!("expected an html pair, got {other:?}"),
        }
    })
}

#[test]
fn build_counts_only_eligible_files() {
    let dir = tempdir().unwrap();
    let docs = dir.path().join("docs");
    write(&docs.join("a.txt"), "alpha");
    write(&docs.join("b.nfo"), "beta");
    write(&docs.join("sub/c.txt"), "gamma");
    write(&docs.join("sub/deeper/d.txt"), "delta");
    write(&docs.join("secret.txt"), "hidden");
    write(&docs.join("sub/secret-2.txt"), "hidden too");
    write(&docs.join("image.png"), "not text");

    let mut config = ScopeConfig::default();
    config.exclusion_filters = vec!["secret.*".into()];
    let scope = scope(dir.path(), config);
    let env = env(dir.path());

    let report = scope.update_index(&env, &CancellationToken::new()).unwrap();
    assert_eq!(report.added, 4);
    assert_eq!(scope.file_count(), 4);
    assert_eq!(
        indexed(&scope, &env),
        vec![
            PathBuf::from("a.txt"),
            PathBuf::from("b.nfo"),
            PathBuf::from("sub/c.txt"),
            PathBuf::from("sub/deeper/d.txt"),
        ]
    );
}

#[test]
fn second_update_is_a_no_op() {
    let dir = tempdir().unwrap();
    let docs = dir.path().join("docs");
    write(&docs.join("a.txt"), "alpha");
    write(&docs.join("sub/b.txt"), "beta");
    write(&docs.join("report.htm"), "<html><body>summary</body></html>");
    write(&docs.join("report_files/notes.txt"), "appendix");
    write(&docs.join("lonely.html"), "<p>no folder</p>");

    let scope = scope(dir.path(), ScopeConfig::default());
    let env = env(dir.path());
    scope.update_index(&env, &CancellationToken::new()).unwrap();
    let before = scope.with_tree(|tree| tree.clone());

    let report = scope.update_index(&env, &CancellationToken::new()).unwrap();
    assert_eq!((report.added, report.deleted), (0, 0));
    assert_eq!(scope.with_tree(|tree| tree.clone()), before);
    assert_eq!(indexed(&scope, &env).len(), 4);
}

#[test]
fn html_file_and_folder_index_as_one_document() {
    let dir = tempdir().unwrap();
    let docs = dir.path().join("docs");
    write(
        &docs.join("report.htm"),
        "<html><head><title>Quarterly</title></head><body>summary</body></html>",
    );
    write(&docs.join("report_files/notes.txt"), "appendix");

    let scope = scope(dir.path(), ScopeConfig::default());
    let env = env(dir.path());
    scope.update_index(&env, &CancellationToken::new()).unwrap();

    scope.with_tree(|tree| {
        let root = tree.scope(tree.root()).unwrap();
        assert_eq!(root.html_pairs.len(), 1);
        assert!(root.files.is_empty());
        assert!(root.scopes.is_empty());
    });
    assert_eq!(pair_entry(&scope, "report.htm").folder_name(), Some("report_files"));

    let docs_indexed = scope.list_documents(&env.base).unwrap();
    assert_eq!(docs_indexed.len(), 1);
    assert_eq!(docs_indexed[0].title.as_deref(), Some("Quarterly"));
    assert_eq!(docs_indexed[0].path, docs.join("report.htm"));
}

#[test]
fn touching_a_resource_file_reindexes_only_its_pair() {
    let dir = tempdir().unwrap();
    let docs = dir.path().join("docs");
    write(&docs.join("report.htm"), "<p>summary</p>");
    write(&docs.join("report_files/notes.txt"), "appendix");
    write(&docs.join("other.txt"), "unrelated");

    let config = ScopeConfig::default();
    let scope = scope(dir.path(), config.clone());
    let env = env(dir.path());
    scope.update_index(&env, &CancellationToken::new()).unwrap();

    touch(&docs.join("report_files/notes.txt"), 120);
    assert!(pair_entry(&scope, "report.htm").is_modified(&docs.join("report.htm"), &config));

    let report = scope.update_index(&env, &CancellationToken::new()).unwrap();
    assert_eq!((report.added, report.deleted), (1, 1));
    assert!(!pair_entry(&scope, "report.htm").is_modified(&docs.join("report.htm"), &config));
    assert_eq!(
        indexed(&scope, &env),
        vec![PathBuf::from("other.txt"), PathBuf::from("report.htm")]
    );
}

#[test]
fn new_html_file_claims_an_existing_folder() {
    let dir = tempdir().unwrap();
    let docs = dir.path().join("docs");
    write(&docs.join("late_files/part.txt"), "fragment");

    let scope = scope(dir.path(), ScopeConfig::default());
    let env = env(dir.path());
    scope.update_index(&env, &CancellationToken::new()).unwrap();
    assert_eq!(indexed(&scope, &env), vec![PathBuf::from("late_files/part.txt")]);

    write(&docs.join("late.html"), "<p>main page</p>");
    let report = scope.update_index(&env, &CancellationToken::new()).unwrap();
    assert_eq!((report.added, report.deleted), (1, 1));
    assert_eq!(indexed(&scope, &env), vec![PathBuf::from("late.html")]);
    assert_eq!(pair_entry(&scope, "late.html").folder_name(), Some("late_files"));
    assert_eq!(scope.with_tree(|tree| tree.scope_count()), 1);
}

#[test]
fn removed_and_changed_entries_propagate() {
    let dir = tempdir().unwrap();
    let docs = dir.path().join("docs");
    write(&docs.join("keep.txt"), "keep");
    write(&docs.join("edit.txt"), "first draft");
    write(&docs.join("gone/one.txt"), "one");
    write(&docs.join("gone/nested/two.txt"), "two");

    let scope = scope(dir.path(), ScopeConfig::default());
    let env = env(dir.path());
    scope.update_index(&env, &CancellationToken::new()).unwrap();
    assert_eq!(indexed(&scope, &env).len(), 4);

    fs::remove_dir_all(docs.join("gone")).unwrap();
    write(&docs.join("edit.txt"), "second draft");
    touch(&docs.join("edit.txt"), 60);

    let report = scope.update_index(&env, &CancellationToken::new()).unwrap();
    assert_eq!(report.deleted, 3);
    assert_eq!(report.added, 1);
    assert_eq!(
        indexed(&scope, &env),
        vec![PathBuf::from("edit.txt"), PathBuf::from("keep.txt")]
    );
    scope.with_tree(|tree| {
        assert_eq!(tree.scope_count(), 1);
        assert!(tree.find_scope(scope.directory(), &docs.join("gone")).is_none());
    });
}

#[test]
fn exclusion_added_later_removes_matching_documents() {
    let dir = tempdir().unwrap();
    let docs = dir.path().join("docs");
    write(&docs.join("a.txt"), "alpha");
    write(&docs.join("draft.txt"), "draft");

    let scope = scope(dir.path(), ScopeConfig::default());
    let env = env(dir.path());
    scope.update_index(&env, &CancellationToken::new()).unwrap();

    let mut config = scope.config();
    config.exclusion_filters = vec!["draft\\..*".into()];
    scope.set_config(config);
    let report = scope.update_index(&env, &CancellationToken::new()).unwrap();
    assert_eq!((report.added, report.deleted), (0, 1));
    assert_eq!(indexed(&scope, &env), vec![PathBuf::from("a.txt")]);
}

#[test]
fn rebuild_starts_over() {
    let dir = tempdir().unwrap();
    let docs = dir.path().join("docs");
    write(&docs.join("a.txt"), "alpha");
    write(&docs.join("sub/b.txt"), "beta");

    let scope = scope(dir.path(), ScopeConfig::default());
    let env = env(dir.path());
    scope.update_index(&env, &CancellationToken::new()).unwrap();

    let report = scope.rebuild(&env, &CancellationToken::new()).unwrap();
    assert_eq!(report.added, 2);
    assert_eq!(report.deleted, 0);
    assert_eq!(indexed(&scope, &env).len(), 2);
}

#[test]
fn vanished_scope_folder_is_an_error() {
    let dir = tempdir().unwrap();
    let docs = dir.path().join("docs");
    write(&docs.join("a.txt"), "alpha");

    let scope = scope(dir.path(), ScopeConfig::default());
    let env = env(dir.path());
    scope.update_index(&env, &CancellationToken::new()).unwrap();
    fs::remove_dir_all(&docs).unwrap();

    let err = scope
        .update_index(&env, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, Error::ScopeMissing(path) if path == docs));
    assert!(scope.finished_with_errors());
    assert_eq!(scope.file_count(), 1);
}
