//! Pluggable checkers and the pass that runs them.
//!
//! A [`Checker`] produces `(output, status)`; [`CheckerPass`] applies the
//! checker's [`CheckMode`] to that result, either once for the repository or
//! once per module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::command::{evaluate, CheckMode, CheckOutput, CommandExecutor, CommandSpec};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::module::for_each_module;
use crate::pass::{Pass, PassOutcome};
use crate::runner::PassRunner;

/// Whether a check runs once or once per module.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckScope {
    Repository,
    PerModule,
}

/// What happens when a checker's tool is absent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    /// Skip the check with a warning.
    Soft,
    /// Fail the pass.
    Hard,
}

/// External tool a checker depends on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolRequirement {
    pub tool: String,
    pub install_hint: String,
    pub requirement: Requirement,
}

impl ToolRequirement {
    pub fn soft(tool: impl Into<String>, install_hint: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            install_hint: install_hint.into(),
            requirement: Requirement::Soft,
        }
    }

    pub fn hard(tool: impl Into<String>, install_hint: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            install_hint: install_hint.into(),
            requirement: Requirement::Hard,
        }
    }

    /// `Ok(None)` when present, `Ok(Some(reason))` for a missing soft tool.
    pub fn check(&self, executor: &dyn CommandExecutor) -> Result<Option<String>> {
        if executor.tool_available(&self.tool) {
            return Ok(None);
        }
        match self.requirement {
            Requirement::Soft => {
                let reason = format!(
                    "{} not found; install with `{}`",
                    self.tool, self.install_hint
                );
                warn!(tool = %self.tool, "{reason}");
                Ok(Some(reason))
            }
            Requirement::Hard => Err(HarnessError::ToolMissing {
                tool: self.tool.clone(),
                hint: self.install_hint.clone(),
            }),
        }
    }
}

/// What a checker sees when it runs.
pub struct CheckContext<'a> {
    pub executor: &'a dyn CommandExecutor,
    pub config: &'a HarnessConfig,
    /// Repository root or module directory, depending on scope.
    pub dir: &'a Path,
}

/// A source of check findings.
#[async_trait]
pub trait Checker: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn mode(&self) -> CheckMode {
        CheckMode::StatusAndSilence
    }

    /// Where the check runs. May depend on the configuration.
    fn scope(&self, _config: &HarnessConfig) -> CheckScope {
        CheckScope::Repository
    }

    fn requirement(&self) -> Option<ToolRequirement> {
        None
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutput>;
}

/// Checker backed by a single external command.
#[derive(Debug, Clone)]
pub struct ToolChecker {
    name: String,
    description: String,
    program: String,
    args: Vec<String>,
    mode: CheckMode,
    scope: CheckScope,
    requirement: Option<ToolRequirement>,
}

impl ToolChecker {
    pub fn new<I, S>(name: impl Into<String>, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            description: String::new(),
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            mode: CheckMode::StatusAndSilence,
            scope: CheckScope::PerModule,
            requirement: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn mode(mut self, mode: CheckMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn scope(mut self, scope: CheckScope) -> Self {
        self.scope = scope;
        self
    }

    /// Skip when `program` is missing.
    pub fn soft(mut self, install_hint: impl Into<String>) -> Self {
        self.requirement = Some(ToolRequirement::soft(self.program.clone(), install_hint));
        self
    }

    pub fn command(&self, ctx: &CheckContext<'_>) -> CommandSpec {
        CommandSpec::new(&self.program)
            .args(self.args.iter().cloned())
            .current_dir(ctx.dir)
            .env("GOARCH", &ctx.config.goarch)
    }
}

#[async_trait]
impl Checker for ToolChecker {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn mode(&self) -> CheckMode {
        self.mode
    }

    fn scope(&self, _config: &HarnessConfig) -> CheckScope {
        self.scope
    }

    fn requirement(&self) -> Option<ToolRequirement> {
        self.requirement.clone()
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutput> {
        let output = ctx.executor.execute(&self.command(ctx)).await?;
        Ok(output.into())
    }
}

/// Pass that runs one checker.
pub struct CheckerPass {
    checker: Arc<dyn Checker>,
}

impl CheckerPass {
    pub fn new<C: Checker + 'static>(checker: C) -> Self {
        Self {
            checker: Arc::new(checker),
        }
    }
}

#[async_trait]
impl Pass for CheckerPass {
    fn name(&self) -> &str {
        self.checker.name()
    }

    fn description(&self) -> &str {
        self.checker.description()
    }

    async fn run(&self, runner: &PassRunner, _args: &[String]) -> Result<PassOutcome> {
        let executor = runner.executor();
        let config = runner.config();

        if let Some(requirement) = self.checker.requirement() {
            if let Some(reason) = requirement.check(executor)? {
                return Ok(PassOutcome::skipped(reason));
            }
        }

        let checker = self.checker.as_ref();
        match checker.scope(config) {
            CheckScope::Repository => {
                let ctx = CheckContext {
                    executor,
                    config,
                    dir: &config.root,
                };
                run_and_evaluate(checker, &ctx).await?;
            }
            CheckScope::PerModule => {
                for_each_module(&config.modules, |module| async move {
                    let dir = config.module_dir(&module);
                    let ctx = CheckContext {
                        executor,
                        config,
                        dir: &dir,
                    };
                    run_and_evaluate(checker, &ctx).await
                })
                .await?;
            }
        }

        Ok(PassOutcome::Passed)
    }
}

async fn run_and_evaluate(checker: &dyn Checker, ctx: &CheckContext<'_>) -> Result<()> {
    info!(check = %checker.name(), dir = %ctx.dir.display(), "Running check");
    let result = checker.run(ctx).await?;
    evaluate(checker.name(), checker.mode(), &result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::fakes::ScriptedExecutor;
    use crate::module::Module;
    use crate::pass::PassRegistry;

    fn runner_with(executor: Arc<ScriptedExecutor>, checker: ToolChecker) -> PassRunner {
        let mut registry = PassRegistry::new();
        registry.register(CheckerPass::new(checker)).unwrap();
        let config = HarnessConfig {
            modules: vec![Module::new("root", "."), Module::new("api", "api")],
            ..HarnessConfig::default()
        };
        PassRunner::new(Arc::new(config), executor, Arc::new(registry))
    }

    #[tokio::test]
    async fn test_silent_tool_passes_in_every_module() {
        let executor = Arc::new(ScriptedExecutor::succeeding());
        let checker = ToolChecker::new("gofmt", "gofmt", ["-l", "-s", "."]);
        let runner = runner_with(executor.clone(), checker);

        let outcome = runner.run_pass("gofmt", &[]).await.unwrap();
        assert_eq!(outcome, PassOutcome::Passed);

        let dirs: Vec<_> = executor
            .calls()
            .into_iter()
            .map(|spec| spec.current_dir.unwrap())
            .collect();
        assert_eq!(dirs, vec![Path::new("./."), Path::new("./api")]);
    }

    #[tokio::test]
    async fn test_output_in_one_module_fails_after_checking_all() {
        let executor = ScriptedExecutor::new(|spec| {
            if spec.current_dir.as_deref() == Some(Path::new("./api")) {
                CommandOutput::success("etcdserverpb/rpc.go\n")
            } else {
                CommandOutput::default()
            }
        });
        let checker = ToolChecker::new("gofmt", "gofmt", ["-l", "-s", "."]);
        let executor = Arc::new(executor);
        let runner = runner_with(executor.clone(), checker);

        let err = runner.run_pass("gofmt", &[]).await.unwrap_err();
        assert_eq!(executor.calls().len(), 2);
        match err.root_cause() {
            HarnessError::ModulesFailed { modules, reasons } => {
                assert_eq!(modules, &vec!["api"]);
                assert!(reasons[0].contains("etcdserverpb/rpc.go"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_soft_tool_skips() {
        let executor = ScriptedExecutor::succeeding().without_tool("staticcheck");
        let checker =
            ToolChecker::new("staticcheck", "staticcheck", ["./..."]).soft("go install staticcheck");
        let runner = runner_with(Arc::new(executor), checker);

        let outcome = runner.run_pass("staticcheck", &[]).await.unwrap();
        assert!(matches!(outcome, PassOutcome::Skipped { reason } if reason.contains("staticcheck")));
    }

    #[test]
    fn test_missing_hard_tool_fails() {
        let executor = ScriptedExecutor::succeeding().without_tool("gocovmerge");
        let requirement = ToolRequirement::hard("gocovmerge", "go install gocovmerge");
        assert!(matches!(
            requirement.check(&executor),
            Err(HarnessError::ToolMissing { tool, .. }) if tool == "gocovmerge"
        ));
    }

    #[tokio::test]
    async fn test_status_only_tool_ignores_output() {
        let executor = ScriptedExecutor::new(|_| CommandOutput::success("building...\n"));
        let checker = ToolChecker::new("build", "go", ["build", "./..."]).mode(CheckMode::StatusOnly);
        let runner = runner_with(Arc::new(executor), checker);

        assert!(runner.run_pass("build", &[]).await.is_ok());
    }
}
