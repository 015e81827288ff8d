//! `go test` invocation over a package set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::command::{CommandExecutor, CommandSpec};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};

/// How packages of a test invocation are scheduled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// One `go test` over every package.
    Parallel,

    /// One `go test` per package, stopping at the first failure.
    FailFast,

    /// One `go test` per package, reporting failures after all ran.
    KeepGoing,
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConcurrencyMode::Parallel => "parallel",
            ConcurrencyMode::FailFast => "fail_fast",
            ConcurrencyMode::KeepGoing => "keep_going",
        };
        f.write_str(name)
    }
}

/// Maps a package pattern to the coverage profile it should write.
pub type ProfileNamer = dyn Fn(&str) -> PathBuf + Send + Sync;

/// One `go test` request.
pub struct TestInvocation<'a> {
    /// Whitespace-separated package patterns.
    pub packages: String,
    pub mode: ConcurrencyMode,
    pub timeout: String,
    /// Flags placed before the common flags.
    pub flags: Vec<String>,
    /// Build tags (`-tags`).
    pub tags: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Directory `go test` runs in.
    pub dir: PathBuf,
    pub coverprofile: Option<&'a ProfileNamer>,
}

impl<'a> TestInvocation<'a> {
    pub fn new(packages: impl Into<String>, mode: ConcurrencyMode, timeout: impl Into<String>) -> Self {
        Self {
            packages: packages.into(),
            mode,
            timeout: timeout.into(),
            flags: Vec::new(),
            tags: Vec::new(),
            env: BTreeMap::new(),
            dir: PathBuf::from("."),
            coverprofile: None,
        }
    }

    pub fn flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags.extend(flags.into_iter().map(Into::into));
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn in_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn coverprofile(mut self, namer: &'a ProfileNamer) -> Self {
        self.coverprofile = Some(namer);
        self
    }

    /// Package patterns in the order given.
    pub fn package_list(&self) -> Vec<String> {
        self.packages.split_whitespace().map(str::to_string).collect()
    }

    /// Build the `go test` command for `packages`.
    pub fn command(&self, config: &HarnessConfig, packages: &[String], args: &[String]) -> CommandSpec {
        let mut spec = CommandSpec::new("go")
            .arg("test")
            .args(self.flags.iter().cloned())
            .current_dir(&self.dir)
            .env("GOARCH", &config.goarch);

        if !self.tags.is_empty() {
            spec = spec.arg("-tags").arg(self.tags.join(" "));
        }
        spec = spec
            .arg(format!("-timeout={}", self.timeout))
            .arg(format!("-cpu={}", config.cpu))
            .arg(config.race_flag());
        if let Some(run) = config.run_flag() {
            spec = spec.arg(run);
        }
        if let Some(namer) = self.coverprofile {
            let profile = namer(&packages.join(" "));
            spec = spec.arg("-coverprofile").arg(profile.to_string_lossy());
        }
        for (key, value) in &self.env {
            spec = spec.env(key, value);
        }
        spec.args(args.iter().cloned()).args(packages.iter().cloned())
    }
}

/// Run `invocation` under its concurrency mode.
///
/// Succeeds only when every package passed.
pub async fn run_go_tests(
    executor: &dyn CommandExecutor,
    config: &HarnessConfig,
    invocation: &TestInvocation<'_>,
    args: &[String],
) -> Result<()> {
    let packages = invocation.package_list();
    if packages.is_empty() {
        return Err(HarnessError::Config("empty package set".to_string()));
    }

    info!(
        mode = %invocation.mode,
        packages = %invocation.packages,
        timeout = %invocation.timeout,
        "Running go test"
    );

    match invocation.mode {
        ConcurrencyMode::Parallel => {
            if run_one(executor, config, invocation, &packages, args).await? {
                Ok(())
            } else {
                Err(HarnessError::TestsFailed { packages })
            }
        }
        ConcurrencyMode::FailFast => {
            for package in packages {
                let group = std::slice::from_ref(&package);
                if !run_one(executor, config, invocation, group, args).await? {
                    return Err(HarnessError::TestsFailed {
                        packages: vec![package],
                    });
                }
            }
            Ok(())
        }
        ConcurrencyMode::KeepGoing => {
            let mut failed = Vec::new();
            for package in packages {
                let group = std::slice::from_ref(&package);
                match run_one(executor, config, invocation, group, args).await {
                    Ok(true) => {}
                    Ok(false) => failed.push(package),
                    Err(e) => {
                        error!(package = %package, error = %e, "go test could not run");
                        failed.push(package);
                    }
                }
            }
            if failed.is_empty() {
                Ok(())
            } else {
                for package in &failed {
                    error!("--- FAIL: {package}");
                }
                Err(HarnessError::TestsFailed { packages: failed })
            }
        }
    }
}

async fn run_one(
    executor: &dyn CommandExecutor,
    config: &HarnessConfig,
    invocation: &TestInvocation<'_>,
    packages: &[String],
    args: &[String],
) -> Result<bool> {
    let spec = invocation.command(config, packages, args);
    let output = executor.execute(&spec).await?;
    if output.passed() {
        info!(packages = %packages.join(" "), duration_ms = output.duration_ms, "go test passed");
        Ok(true)
    } else {
        let detail = output.combined();
        if !detail.is_empty() {
            error!("{detail}");
        }
        error!(
            packages = %packages.join(" "),
            exit_code = output.exit_code,
            "go test failed"
        );
        Ok(false)
    }
}
