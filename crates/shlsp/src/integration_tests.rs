//! Integration tests over real workspaces: background scanning feeding the
//! analyzer, cross-file queries through source edges, and rename end to end.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;
use tower_lsp::lsp_types::{Position, Url};

use crate::analyzer::Analyzer;
use crate::scanner::{BackgroundScanner, ScanParams};

/// Helper managing a temporary directory of shell files. The directory is
/// cleaned up when the workspace is dropped.
struct TestWorkspace {
    _temp_dir: TempDir,
    root: PathBuf,
}

impl TestWorkspace {
    fn new() -> Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path().to_path_buf();
        Ok(Self {
            _temp_dir: temp_dir,
            root,
        })
    }

    fn add_file(&self, relative: &str, content: &str) -> Result<Url> {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(Url::from_file_path(&path).expect("tempdir paths are absolute"))
    }

    fn uri(&self, relative: &str) -> Url {
        Url::from_file_path(self.root.join(relative)).expect("tempdir paths are absolute")
    }

    fn root_path(&self) -> &std::path::Path {
        &self.root
    }
}

fn default_params() -> ScanParams {
    ScanParams {
        glob_pattern: "**/*@(.sh|.inc|.bash|.command)".to_string(),
        max_files: 500,
    }
}

async fn scan_workspace(workspace: &TestWorkspace, params: &ScanParams) -> (Arc<Analyzer>, usize) {
    let analyzer = Arc::new(Analyzer::new());
    let scanner = BackgroundScanner::new(analyzer.clone());
    let result = scanner.scan(workspace.root_path(), params).await;
    (analyzer, result.files_parsed)
}

#[tokio::test]
async fn test_scan_is_idempotent() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.add_file("a.sh", "A=1\nhelper() { :; }\n")?;
    workspace.add_file("lib/b.sh", "B=2\n")?;

    let analyzer = Arc::new(Analyzer::new());
    let scanner = BackgroundScanner::new(analyzer.clone());

    let first = scanner.scan(workspace.root_path(), &default_params()).await;
    let symbols_first = analyzer.declarations_for_file(&workspace.uri("a.sh"));

    let second = scanner.scan(workspace.root_path(), &default_params()).await;
    let symbols_second = analyzer.declarations_for_file(&workspace.uri("a.sh"));

    assert_eq!(first.files_parsed, second.files_parsed);
    assert_eq!(symbols_first, symbols_second);
    assert_eq!(symbols_first.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_cross_file_definition_through_source_edge() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.add_file("extension.inc", "extension_greet() {\n  echo hi\n}\n")?;
    workspace.add_file("main.sh", "source ./extension.inc\nextension_greet\n")?;

    let (analyzer, parsed) = scan_workspace(&workspace, &default_params()).await;
    assert_eq!(parsed, 2);

    // Workspace-wide inclusion is off; the source edge carries the symbol
    let found = analyzer.find_declarations(
        &workspace.uri("main.sh"),
        "extension_greet",
        Position::new(1, 3),
        true,
    );
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].location.uri, workspace.uri("extension.inc"));
    Ok(())
}

#[tokio::test]
async fn test_unconnected_symbol_requires_workspace_wide_inclusion() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.add_file("island.sh", "ISLAND=1\n")?;
    workspace.add_file("main.sh", "echo \"$ISLAND\"\n")?;

    let (analyzer, _) = scan_workspace(&workspace, &default_params()).await;

    let position = Position::new(0, 7);
    let uri = workspace.uri("main.sh");
    assert!(analyzer
        .find_declarations(&uri, "ISLAND", position, true)
        .is_empty());

    analyzer.set_include_all_workspace_symbols(true);
    assert_eq!(
        analyzer.find_declarations(&uri, "ISLAND", position, true).len(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_max_files_zero_indexes_nothing() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.add_file("a.sh", "A=1\n")?;

    let params = ScanParams {
        max_files: 0,
        ..default_params()
    };
    let (analyzer, parsed) = scan_workspace(&workspace, &params).await;

    assert_eq!(parsed, 0);
    assert_eq!(analyzer.indexed_file_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_rename_rejection_is_atomic() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.add_file("a.sh", "X=1\necho \"$X\"\n")?;

    let (analyzer, _) = scan_workspace(&workspace, &default_params()).await;

    let result = analyzer.rename(&workspace.uri("a.sh"), Position::new(1, 7), "1abc");
    assert!(result.is_err());

    // Nothing was touched: a valid follow-up rename still sees the old name
    let changes = analyzer
        .rename(&workspace.uri("a.sh"), Position::new(1, 7), "Y")
        .expect("valid rename succeeds");
    assert_eq!(changes[&workspace.uri("a.sh")].len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_rename_propagates_across_sourcing_files() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.add_file("lib.sh", "shared_task() {\n  echo working\n}\n")?;
    workspace.add_file("main.sh", "source ./lib.sh\nshared_task\nshared_task\n")?;

    let (analyzer, _) = scan_workspace(&workspace, &default_params()).await;

    let changes = analyzer
        .rename(&workspace.uri("lib.sh"), Position::new(0, 3), "renamed_task")
        .expect("rename succeeds");

    assert_eq!(changes[&workspace.uri("lib.sh")].len(), 1);
    assert_eq!(changes[&workspace.uri("main.sh")].len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_function_scoped_rename_stays_inside_function() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    let code = "setup() {\n  local tmp=/tmp/work\n  echo \"$tmp\"\n}\ntmp=global\necho \"$tmp\"\n";
    workspace.add_file("a.sh", code)?;
    workspace.add_file("b.sh", "tmp=elsewhere\n")?;

    let (analyzer, _) = scan_workspace(&workspace, &default_params()).await;

    let changes = analyzer
        .rename(&workspace.uri("a.sh"), Position::new(2, 9), "scratch")
        .expect("rename succeeds");

    // Edits confined to a.sh, and every range inside the function's span
    assert_eq!(changes.len(), 1);
    let edits = &changes[&workspace.uri("a.sh")];
    assert_eq!(edits.len(), 2);
    assert!(edits.iter().all(|e| e.range.end.line <= 3));
    Ok(())
}

#[tokio::test]
async fn test_unsupported_interpreter_skipped() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.add_file("ok.sh", "#!/usr/bin/env bash\nOK=1\n")?;
    workspace.add_file("other.sh", "#!/usr/bin/env fish\nset fish_var 1\n")?;

    let (analyzer, parsed) = scan_workspace(&workspace, &default_params()).await;

    assert_eq!(parsed, 1);
    assert!(analyzer
        .declarations_for_file(&workspace.uri("other.sh"))
        .is_empty());
    Ok(())
}

#[tokio::test]
async fn test_fuzzy_workspace_search() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.add_file("a.sh", "deploy_production() { :; }\n")?;
    workspace.add_file("b.sh", "DRY_RUN=false\n")?;

    let (analyzer, _) = scan_workspace(&workspace, &default_params()).await;

    let hits = analyzer.fuzzy_find_declarations("dppr");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "deploy_production");

    // Exact-mode lookup requires equality
    let exact = analyzer.find_references("deploy_production");
    assert_eq!(exact.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_transitive_source_chain() -> Result<()> {
    let workspace = TestWorkspace::new()?;
    workspace.add_file("base.sh", "BASE_DIR=/srv\n")?;
    workspace.add_file("mid.sh", "source ./base.sh\n")?;
    workspace.add_file("top.sh", "source ./mid.sh\necho \"$BASE_DIR\"\n")?;

    let (analyzer, _) = scan_workspace(&workspace, &default_params()).await;

    let found = analyzer.find_declarations(
        &workspace.uri("top.sh"),
        "BASE_DIR",
        Position::new(1, 7),
        true,
    );
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].location.uri, workspace.uri("base.sh"));
    Ok(())
}

#[tokio::test]
async fn test_edit_after_scan_wins() -> Result<()> {
    // Last write per URI wins; re-analysis replaces the scanned entry
    let workspace = TestWorkspace::new()?;
    workspace.add_file("a.sh", "OLD_NAME=1\n")?;

    let (analyzer, _) = scan_workspace(&workspace, &default_params()).await;
    analyzer.analyze_file(&workspace.uri("a.sh"), "NEW_NAME=1\n");

    let names: Vec<String> = analyzer
        .declarations_for_file(&workspace.uri("a.sh"))
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["NEW_NAME".to_string()]);
    Ok(())
}
