//! Built-in pass catalogue.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

use crate::bom::BomPass;
use crate::checker::{CheckContext, Checker, CheckerPass, CheckScope, ToolChecker};
use crate::command::{run_checked, CheckMode, CheckOutput, CommandSpec};
use crate::config::HarnessConfig;
use crate::coverage::{CoveragePass, INSTRUMENTED_BINARY};
use crate::depsync::DepSyncPass;
use crate::error::Result;
use crate::gotest::{run_go_tests, ConcurrencyMode, TestInvocation};
use crate::lint::{
    CommitTitleChecker, LicenseHeaderChecker, MarkdownYouChecker, ReceiverNameChecker,
    ShellcheckChecker,
};
use crate::module::for_each_module;
use crate::pass::{CompositePass, Pass, PassOutcome, PassRegistry};
use crate::release::ReleasePass;
use crate::runner::PassRunner;

/// Sub-passes of `fmt`, in order.
pub const FMT_PASSES: [&str; 13] = [
    "shellcheck",
    "markdown_you",
    "gofmt",
    "govet",
    "revive",
    "staticcheck",
    "unparam",
    "unconvert",
    "ineffassign",
    "nakedret",
    "license_header",
    "receiver_name",
    "commit_title",
];

/// One `go test` invocation of a suite.
#[derive(Debug, Clone)]
pub struct TestStep {
    pub packages: String,
    pub mode: ConcurrencyMode,
    /// Used when `TIMEOUT` is unset.
    pub default_timeout: String,
    pub flags: Vec<String>,
    pub tags: Vec<String>,
}

impl TestStep {
    pub fn new(packages: &str, mode: ConcurrencyMode, default_timeout: &str) -> Self {
        Self {
            packages: packages.to_string(),
            mode,
            default_timeout: default_timeout.to_string(),
            flags: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn flags(mut self, flags: &[&str]) -> Self {
        self.flags.extend(flags.iter().map(|f| f.to_string()));
        self
    }

    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.tags.extend(tags.iter().map(|t| t.to_string()));
        self
    }

    fn invocation(&self, config: &HarnessConfig, packages: String, dir: PathBuf) -> TestInvocation<'static> {
        TestInvocation::new(packages, self.mode, config.timeout_or(&self.default_timeout))
            .flags(self.flags.iter().cloned())
            .tags(self.tags.iter().cloned())
            .in_dir(dir)
    }
}

/// Test suite pass made of one or more steps, stopping at the first failing step.
pub struct TestPass {
    name: String,
    description: String,
    steps: Vec<TestStep>,
    per_module: bool,
}

impl TestPass {
    pub fn new(name: &str, description: &str, steps: Vec<TestStep>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            steps,
            per_module: false,
        }
    }

    /// Run every step once per module, unless `PKG` narrows the run.
    pub fn per_module(mut self) -> Self {
        self.per_module = true;
        self
    }
}

#[async_trait]
impl Pass for TestPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn run(&self, runner: &PassRunner, args: &[String]) -> Result<PassOutcome> {
        let executor = runner.executor();
        let config = runner.config();

        for step in &self.steps {
            match (&config.user_pkg, self.per_module) {
                (Some(pkg), true) => {
                    let invocation = step.invocation(config, format!("./{pkg}"), config.root.clone());
                    run_go_tests(executor, config, &invocation, args).await?;
                }
                (None, true) => {
                    for_each_module(&config.modules, |module| async move {
                        let invocation =
                            step.invocation(config, step.packages.clone(), config.module_dir(&module));
                        run_go_tests(executor, config, &invocation, args).await
                    })
                    .await?;
                }
                (_, false) => {
                    let invocation = step.invocation(config, step.packages.clone(), config.root.clone());
                    run_go_tests(executor, config, &invocation, args).await?;
                }
            }
        }
        Ok(PassOutcome::Passed)
    }
}

/// `build_cov`: compile coverage-instrumented test binaries.
pub struct BuildCovPass;

impl BuildCovPass {
    /// `(binary name, package)` pairs to compile.
    pub const TARGETS: [(&'static str, &'static str); 2] =
        [(INSTRUMENTED_BINARY, "."), ("etcdctl_test", "./etcdctl")];
}

#[async_trait]
impl Pass for BuildCovPass {
    fn name(&self) -> &str {
        "build_cov"
    }

    fn description(&self) -> &str {
        "build coverage-instrumented test binaries"
    }

    async fn run(&self, runner: &PassRunner, _args: &[String]) -> Result<PassOutcome> {
        let executor = runner.executor();
        let config = runner.config();
        let bin = config.bin_path();
        std::fs::create_dir_all(&bin)?;

        for (binary, package) in Self::TARGETS {
            let output = bin.join(binary);
            info!(binary = %output.display(), "Building instrumented binary");
            let spec = CommandSpec::new("go")
                .args(["test", "-tags", "cov", "-c", "-covermode=set", "-coverpkg=./..."])
                .arg("-o")
                .arg(output.to_string_lossy())
                .arg(package)
                .current_dir(&config.root)
                .env("GOARCH", &config.goarch);
            run_checked(executor, &spec, CheckMode::StatusOnly).await?;
        }
        Ok(PassOutcome::Passed)
    }
}

/// `gofmt -l -s` over every module, or once from the repository root when
/// `PKG` names a single package directory.
pub struct GofmtChecker;

#[async_trait]
impl Checker for GofmtChecker {
    fn name(&self) -> &str {
        "gofmt"
    }

    fn description(&self) -> &str {
        "gofmt simplification check"
    }

    fn scope(&self, config: &HarnessConfig) -> CheckScope {
        if config.user_pkg.is_some() {
            CheckScope::Repository
        } else {
            CheckScope::PerModule
        }
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutput> {
        let target = ctx.config.user_pkg.as_deref().unwrap_or(".");
        let spec = CommandSpec::new("gofmt")
            .args(["-l", "-s", target])
            .current_dir(ctx.dir);
        Ok(ctx.executor.execute(&spec).await?.into())
    }
}

fn analyzer(name: &str, args: &[&str], install_hint: &str) -> CheckerPass {
    CheckerPass::new(
        ToolChecker::new(name, name, args.iter().copied())
            .describe(format!("{name} analysis"))
            .soft(install_hint),
    )
}

/// Registry with every built-in pass.
pub fn builtin_registry() -> Result<PassRegistry> {
    let mut registry = PassRegistry::new();

    registry.register(
        TestPass::new(
            "unit",
            "short unit tests",
            vec![TestStep::new("./...", ConcurrencyMode::Parallel, "3m").flags(&["-short"])],
        )
        .per_module(),
    )?;
    registry.register(TestPass::new(
        "integration",
        "server integration tests",
        vec![TestStep::new("./integration/...", ConcurrencyMode::KeepGoing, "30m")
            .flags(&["-p=2", "-v"])],
    ))?;
    registry.register(TestPass::new(
        "integration_extra",
        "client integration, store variant and example tests",
        vec![
            TestStep::new("./clientv3/integration/...", ConcurrencyMode::KeepGoing, "20m"),
            TestStep::new("./clientv3/integration/...", ConcurrencyMode::KeepGoing, "20m")
                .tags(&["v2v3"]),
            TestStep::new("./contrib/raftexample", ConcurrencyMode::KeepGoing, "5m"),
        ],
    ))?;
    registry.register(TestPass::new(
        "e2e",
        "end-to-end tests",
        vec![TestStep::new("./tests/e2e/...", ConcurrencyMode::KeepGoing, "30m")],
    ))?;
    registry.register(TestPass::new(
        "grpcproxy",
        "integration tests through the gRPC proxy",
        vec![TestStep::new(
            "./integration/... ./clientv3/integration/...",
            ConcurrencyMode::FailFast,
            "30m",
        )
        .tags(&["cluster_proxy"])],
    ))?;
    registry.register(CompositePass::new(
        "integration_e2e",
        "integration then end-to-end tests",
        ["integration", "e2e"],
    ))?;

    registry.register(CheckerPass::new(
        ToolChecker::new("build", "go", ["build", "./..."])
            .describe("build every module")
            .mode(CheckMode::StatusOnly),
    ))?;
    registry.register(BuildCovPass)?;
    registry.register(CoveragePass::default())?;
    registry.register(ReleasePass)?;
    registry.register(BomPass)?;
    registry.register(DepSyncPass)?;

    registry.register(CompositePass::new("fmt", "source checks", FMT_PASSES))?;
    registry.register(CheckerPass::new(ShellcheckChecker))?;
    registry.register(CheckerPass::new(MarkdownYouChecker))?;
    registry.register(CheckerPass::new(GofmtChecker))?;
    registry.register(CheckerPass::new(
        ToolChecker::new("govet", "go", ["vet", "./..."]).describe("go vet"),
    ))?;
    registry.register(analyzer("revive", &["./..."], "go get github.com/mgechev/revive"))?;
    registry.register(analyzer(
        "staticcheck",
        &["./..."],
        "go get honnef.co/go/tools/cmd/staticcheck",
    ))?;
    registry.register(analyzer("unparam", &["./..."], "go get mvdan.cc/unparam"))?;
    registry.register(analyzer(
        "unconvert",
        &["-v", "./..."],
        "go get github.com/mdempsky/unconvert",
    ))?;
    registry.register(analyzer(
        "ineffassign",
        &["."],
        "go get github.com/gordonklaus/ineffassign",
    ))?;
    registry.register(analyzer(
        "nakedret",
        &["./..."],
        "go get github.com/alexkohler/nakedret",
    ))?;
    registry.register(CheckerPass::new(LicenseHeaderChecker))?;
    registry.register(CheckerPass::new(ReceiverNameChecker))?;
    registry.register(CheckerPass::new(CommitTitleChecker))?;

    Ok(registry)
}
