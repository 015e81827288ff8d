//! Integration tests for pass orchestration over the built-in catalogue.

use kvci::fakes::ScriptedExecutor;
use kvci::{
    builtin_registry, CommandOutput, CommandSpec, HarnessConfig, HarnessError, Module, PassRunner,
    PassStatus,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Repository tree that passes every in-process check.
fn clean_tree() -> TempDir {
    let root = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        root.path().join("main.go"),
        "// Copyright 2016 The etcd Authors\n\npackage main\n\nfunc (s *Server) Start() {}\nfunc (s *Server) Stop() {}\n",
    )
    .unwrap();
    std::fs::write(root.path().join("README.md"), "# etcd\n\nA distributed key-value store.\n").unwrap();
    root
}

fn config(root: &Path, passes: &[&str]) -> HarnessConfig {
    HarnessConfig {
        passes: passes.iter().map(|p| p.to_string()).collect(),
        root: root.to_path_buf(),
        modules: vec![Module::new("root", ".")],
        ..HarnessConfig::default()
    }
}

fn runner(config: HarnessConfig, executor: Arc<ScriptedExecutor>) -> PassRunner {
    PassRunner::new(
        Arc::new(config),
        executor,
        Arc::new(builtin_registry().expect("registry")),
    )
}

/// Answers git with a merge base and well-formed titles; everything else is silent.
fn quiet_repo(spec: &CommandSpec) -> CommandOutput {
    if spec.is("git", "merge-base") {
        CommandOutput::success("4f1c2a9\n")
    } else if spec.is("git", "log") {
        CommandOutput::success("raft: fix leader transfer\nclientv3, etcdserver: add lease keepalive\n")
    } else {
        CommandOutput::default()
    }
}

/// Test: fmt over a clean tree succeeds and records every sub-pass
#[tokio::test]
async fn test_fmt_clean_tree_succeeds() {
    let root = clean_tree();
    let executor = Arc::new(ScriptedExecutor::new(quiet_repo));
    let report = runner(config(root.path(), &["fmt"]), executor).run().await;

    assert!(report.success, "fmt should pass: {:?}", report.failure);
    assert_eq!(report.failed_count(), 0);
    assert_eq!(report.passes.len(), 14, "13 sub-passes plus fmt");
    assert_eq!(report.passes.last().map(|p| p.name.as_str()), Some("fmt"));
    assert_eq!(report.status_of("commit_title"), Some(PassStatus::Passed));
}

/// Test: a checker finding stops fmt before the next sub-pass
#[tokio::test]
async fn test_fmt_finding_stops_remaining_checks() {
    let root = clean_tree();
    std::fs::write(root.path().join("CONTRIBUTING.md"), "Before you start, read this.\n").unwrap();
    let executor = Arc::new(ScriptedExecutor::new(quiet_repo));
    let report = runner(config(root.path(), &["fmt", "unit"]), executor.clone())
        .run()
        .await;

    assert!(!report.success);
    assert_eq!(report.status_of("markdown_you"), Some(PassStatus::Failed));
    assert_eq!(report.status_of("fmt"), Some(PassStatus::Failed));
    assert_eq!(report.status_of("gofmt"), None);
    assert_eq!(report.status_of("unit"), None);
    assert!(executor.calls().iter().all(|c| c.program != "gofmt"));
    assert!(report.failure.unwrap().contains("CONTRIBUTING.md:1"));
}

/// Test: missing soft analyzers are skipped without failing the run
#[tokio::test]
async fn test_missing_soft_tools_are_skipped() {
    let root = clean_tree();
    let executor = Arc::new(
        ScriptedExecutor::new(quiet_repo)
            .without_tool("staticcheck")
            .without_tool("nakedret"),
    );
    let report = runner(config(root.path(), &["fmt"]), executor.clone()).run().await;

    assert!(report.success);
    assert_eq!(report.skipped_count(), 2);
    assert_eq!(report.status_of("staticcheck"), Some(PassStatus::Skipped));
    assert!(executor.calls().iter().all(|c| c.program != "staticcheck"));
}

/// Test: a failing unit package fails the run and stops later passes
#[tokio::test]
async fn test_failing_unit_package_stops_run() {
    let root = clean_tree();
    let executor = Arc::new(ScriptedExecutor::new(|spec| {
        if spec.is("go", "test") {
            CommandOutput::failure(1, "--- FAIL: TestLeaderElection (0.01s)\nFAIL\tgo.etcd.io/etcd/raft")
        } else {
            CommandOutput::default()
        }
    }));
    let report = runner(config(root.path(), &["unit", "build"]), executor.clone())
        .run()
        .await;

    assert!(!report.success);
    assert_eq!(report.status_of("unit"), Some(PassStatus::Failed));
    assert_eq!(report.status_of("build"), None);
    assert!(report.failure.unwrap().starts_with("pass 'unit' failed"));
    assert!(executor.calls().iter().all(|c| !c.is("go", "build")));
}

/// Test: a composite aborts at its failing sub-pass
#[tokio::test]
async fn test_composite_aborts_at_failing_sub_pass() {
    let root = clean_tree();
    let executor = Arc::new(ScriptedExecutor::new(|spec| {
        if spec.args.iter().any(|a| a == "./integration/...") {
            CommandOutput::failure(1, "FAIL")
        } else {
            CommandOutput::default()
        }
    }));
    let runner = runner(config(root.path(), &["integration_e2e"]), executor.clone());
    let report = runner.run().await;

    assert!(!report.success);
    let order: Vec<_> = report
        .passes
        .iter()
        .map(|p| (p.name.as_str(), p.status))
        .collect();
    assert_eq!(
        order,
        vec![
            ("integration", PassStatus::Failed),
            ("integration_e2e", PassStatus::Failed),
        ]
    );
    assert!(executor
        .calls()
        .iter()
        .all(|c| !c.args.iter().any(|a| a == "./tests/e2e/...")));
}

/// Test: every module is visited even when one fails
#[tokio::test]
async fn test_build_visits_every_module() {
    let root = clean_tree();
    let executor = Arc::new(ScriptedExecutor::new(|spec| {
        match spec.current_dir.as_deref().and_then(|d| d.file_name()) {
            Some(name) if name == "api" => CommandOutput::failure(2, "api/types.go:3: undefined: Foo"),
            _ => CommandOutput::default(),
        }
    }));
    let mut config = config(root.path(), &["build"]);
    config.modules = vec![
        Module::new("root", "."),
        Module::new("api", "api"),
        Module::new("tools", "tools"),
    ];
    let runner = runner(config, executor.clone());

    let err = runner.run_pass("build", &[]).await.unwrap_err();

    assert_eq!(executor.calls().len(), 3);
    match err.root_cause() {
        HarnessError::ModulesFailed { modules, reasons } => {
            assert_eq!(modules, &vec!["api"]);
            assert_eq!(reasons.len(), 1);
            assert!(reasons[0].starts_with("api: "));
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Test: the dependency check leaves manifests byte-identical
#[tokio::test]
async fn test_dep_leaves_manifests_untouched() {
    let root = clean_tree();
    std::fs::create_dir(root.path().join("api")).unwrap();
    let manifests = [
        ("go.mod", "module go.etcd.io/etcd\n\ngo 1.12\n"),
        ("go.sum", "github.com/a/b v1.0.0 h1:x=\n"),
        ("api/go.mod", "module go.etcd.io/etcd/api\n\ngo 1.12\n"),
    ];
    for (path, contents) in manifests {
        std::fs::write(root.path().join(path), contents).unwrap();
    }
    // tidy adds a go.sum to api, which the check must undo
    let executor = Arc::new(ScriptedExecutor::new(|spec| {
        if let Some(dir) = &spec.current_dir {
            if dir.ends_with("api") {
                std::fs::write(dir.join("go.sum"), "github.com/c/d v0.1.0 h1:y=\n").unwrap();
            }
        }
        CommandOutput::default()
    }));
    let mut config = config(root.path(), &["dep"]);
    config.modules = Module::defaults();

    let report = runner(config, executor).run().await;

    assert!(!report.success);
    let failure = report.failure.unwrap();
    assert!(failure.contains("failed modules: api"), "{failure}");
    assert!(failure.contains("dependencies of module api are out of sync"));
    for (path, contents) in manifests {
        assert_eq!(std::fs::read_to_string(root.path().join(path)).unwrap(), contents);
    }
    assert!(!root.path().join("api/go.sum").exists());
}

/// Test: an unknown pass name fails before anything runs
#[tokio::test]
async fn test_unknown_pass_fails() {
    let root = clean_tree();
    let executor = Arc::new(ScriptedExecutor::succeeding());
    let report = runner(config(root.path(), &["lint", "unit"]), executor.clone())
        .run()
        .await;

    assert!(!report.success);
    assert_eq!(report.failure.as_deref(), Some("unknown pass: lint"));
    assert!(report.passes.is_empty());
    assert!(executor.calls().is_empty());
}
