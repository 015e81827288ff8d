//! External command execution and output checking.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, error};

use crate::error::{HarnessError, Result};

/// An external command to run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,

    /// Arguments passed verbatim.
    pub args: Vec<String>,

    /// Environment overrides on top of the inherited environment.
    pub env: BTreeMap<String, String>,

    /// Working directory (inherited when `None`).
    pub current_dir: Option<PathBuf>,

    /// Timeout in seconds (0 = none).
    pub timeout_secs: u64,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Whether the first argument equals `subcommand` (e.g. `go test`).
    pub fn is(&self, program: &str, subcommand: &str) -> bool {
        self.program == program && self.args.first().map(String::as_str) == Some(subcommand)
    }

    /// Value following `flag` in the arguments, or of a `flag=value` argument.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        let prefixed = format!("{flag}=");
        let mut iter = self.args.iter();
        while let Some(arg) = iter.next() {
            if arg == flag {
                return iter.next().map(String::as_str);
            }
            if let Some(value) = arg.strip_prefix(&prefixed) {
                return Some(value);
            }
        }
        None
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    /// Whether the command exited with status 0.
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, each without trailing newlines.
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim_end_matches(['\n', '\r']);
        let stderr = self.stderr.trim_end_matches(['\n', '\r']);
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, _) => stderr.to_string(),
            (false, true) => stdout.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}

/// How a command's result is judged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckMode {
    /// Success iff the exit status is zero.
    StatusOnly,

    /// Success iff the exit status is zero and nothing was printed.
    StatusAndSilence,
}

/// Output and status of a single check, from a tool or an in-process scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckOutput {
    pub output: String,
    pub status: i32,
}

impl CheckOutput {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn findings(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            status: 0,
        }
    }
}

impl From<CommandOutput> for CheckOutput {
    fn from(output: CommandOutput) -> Self {
        Self {
            output: output.combined(),
            status: output.exit_code,
        }
    }
}

/// Judge a check result under `mode`.
///
/// Under [`CheckMode::StatusAndSilence`] any output is echoed before the
/// error line and returned in [`HarnessError::CheckFailed`].
pub fn evaluate(label: &str, mode: CheckMode, result: &CheckOutput) -> Result<()> {
    if result.status != 0 {
        if !result.output.is_empty() {
            error!("{}", result.output);
        }
        error!(check = %label, exit_code = result.status, "check exited with non-zero status");
        return Err(HarnessError::CommandFailed {
            command: label.to_string(),
            exit_code: result.status,
        });
    }

    if mode == CheckMode::StatusAndSilence && !result.output.is_empty() {
        error!("{}", result.output);
        error!(check = %label, "check produced output");
        return Err(HarnessError::CheckFailed {
            check: label.to_string(),
            output: result.output.clone(),
        });
    }

    Ok(())
}

/// Executes external commands.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command to completion and capture its output.
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Whether `tool` can be found on the search path.
    fn tool_available(&self, tool: &str) -> bool;
}

/// Run `spec` and judge it under `mode`.
pub async fn run_checked(
    executor: &dyn CommandExecutor,
    spec: &CommandSpec,
    mode: CheckMode,
) -> Result<CommandOutput> {
    let output = executor.execute(spec).await?;
    let label = spec.to_string();
    if mode == CheckMode::StatusOnly && !output.passed() {
        // the tool's own output already explains the failure
        error!(command = %label, exit_code = output.exit_code, "command failed");
        return Err(HarnessError::CommandFailed {
            command: label,
            exit_code: output.exit_code,
        });
    }
    evaluate(&label, mode, &CheckOutput::from(output.clone()))?;
    Ok(output)
}

/// Executor that spawns real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        if spec.program.is_empty() {
            return Err(HarnessError::EmptyCommand);
        }

        let start = Instant::now();
        debug!(command = %spec, "Executing command");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }

        let child = command.spawn()?;

        let output = if spec.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(spec.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| HarnessError::CommandTimedOut {
                command: spec.to_string(),
                timeout_secs: spec.timeout_secs,
            })??
        } else {
            child.wait_with_output().await?
        };

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn tool_available(&self, tool: &str) -> bool {
        find_on_path(tool).is_some()
    }
}

/// Locate an executable on `PATH`.
pub fn find_on_path(tool: &str) -> Option<PathBuf> {
    let candidate = Path::new(tool);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(tool))
        .find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_display_and_flags() {
        let spec = CommandSpec::new("go")
            .args(["test", "-timeout=3m", "-coverprofile", "/tmp/a.coverprofile", "./..."]);
        assert_eq!(spec.to_string(), "go test -timeout=3m -coverprofile /tmp/a.coverprofile ./...");
        assert!(spec.is("go", "test"));
        assert!(!spec.is("go", "vet"));
        assert_eq!(spec.flag_value("-timeout"), Some("3m"));
        assert_eq!(spec.flag_value("-coverprofile"), Some("/tmp/a.coverprofile"));
        assert_eq!(spec.flag_value("-run"), None);
    }

    #[test]
    fn test_silence_check_passes_on_empty_output() {
        let result = CheckOutput::clean();
        assert!(evaluate("gofmt", CheckMode::StatusAndSilence, &result).is_ok());
    }

    #[test]
    fn test_silence_check_fails_on_output_with_zero_status() {
        let result = CheckOutput::findings("server/raft.go");
        let err = evaluate("gofmt", CheckMode::StatusAndSilence, &result).unwrap_err();
        match err {
            HarnessError::CheckFailed { check, output } => {
                assert_eq!(check, "gofmt");
                assert_eq!(output, "server/raft.go");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_silence_check_fails_on_whitespace_output() {
        let result = CheckOutput::findings("\n   \n");
        assert!(matches!(
            evaluate("gofmt", CheckMode::StatusAndSilence, &result),
            Err(HarnessError::CheckFailed { .. })
        ));
        assert!(evaluate("gofmt", CheckMode::StatusOnly, &result).is_ok());
    }

    #[test]
    fn test_status_only_ignores_output() {
        let result = CheckOutput::findings("ok  \tgo.etcd.io/etcd/raft\t0.3s");
        assert!(evaluate("go test", CheckMode::StatusOnly, &result).is_ok());

        let result = CheckOutput {
            output: String::new(),
            status: 2,
        };
        assert!(matches!(
            evaluate("go build", CheckMode::StatusOnly, &result),
            Err(HarnessError::CommandFailed { exit_code: 2, .. })
        ));
    }

    #[test]
    fn test_combined_output() {
        let output = CommandOutput {
            exit_code: 0,
            stdout: "a\n".to_string(),
            stderr: "b\n".to_string(),
            duration_ms: 0,
        };
        assert_eq!(output.combined(), "a\nb");
        assert_eq!(CommandOutput::failure(1, "boom\n").combined(), "boom");
        assert_eq!(CommandOutput::success("  \n").combined(), "  ");
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let spec = CommandSpec::new("echo").arg("hello");
        let output = ProcessExecutor.execute(&spec).await.expect("execute failed");
        assert!(output.passed());
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let spec = CommandSpec::new("false");
        let output = ProcessExecutor.execute(&spec).await.expect("execute failed");
        assert!(!output.passed());
    }

    #[tokio::test]
    async fn test_run_checked_silence_on_real_process() {
        let quiet = CommandSpec::new("true");
        assert!(run_checked(&ProcessExecutor, &quiet, CheckMode::StatusAndSilence)
            .await
            .is_ok());

        let noisy = CommandSpec::new("echo").arg("finding");
        let err = run_checked(&ProcessExecutor, &noisy, CheckMode::StatusAndSilence)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::CheckFailed { output, .. } if output == "finding"));
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let spec = CommandSpec::new("sleep").arg("5").timeout_secs(1);
        let err = ProcessExecutor.execute(&spec).await.unwrap_err();
        assert!(matches!(err, HarnessError::CommandTimedOut { timeout_secs: 1, .. }));
    }

    #[tokio::test]
    async fn test_empty_program_rejected() {
        let err = ProcessExecutor.execute(&CommandSpec::default()).await.unwrap_err();
        assert!(matches!(err, HarnessError::EmptyCommand));
    }

    #[test]
    fn test_find_on_path() {
        assert!(find_on_path("sh").is_some());
        assert!(find_on_path("definitely-not-a-real-tool-kvci").is_none());
    }
}
