//! Coverage collection and incremental profile merging.
//!
//! Every group runs even when an earlier one failed; failures are collected
//! and reported after the cumulative report has been written.

use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::checker::ToolRequirement;
use crate::command::{CommandExecutor, CommandSpec};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::gotest::{run_go_tests, ConcurrencyMode, ProfileNamer, TestInvocation};
use crate::pass::{Pass, PassOutcome};
use crate::runner::PassRunner;

/// Cumulative report file name inside `COVERDIR`.
pub const COVER_REPORT: &str = "cover.out";

/// Report contents before any profile is merged.
pub const COVER_BASELINE: &str = "mode: set\n";

/// Extension of per-group profiles.
pub const PROFILE_EXTENSION: &str = "coverprofile";

/// Name of the coverage-instrumented server binary in the bin directory.
pub const INSTRUMENTED_BINARY: &str = "etcd_test";

/// Package paths left out of the unit group.
const INTEGRATION_PACKAGES: &str = r"(integration|tests/e2e|contrib|functional)";

/// Which packages a group tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    /// Fixed patterns, run from the repository root.
    Listed(String),

    /// `go list ./...` of every module, minus integration packages.
    Discovered,
}

/// Where a group's coverage data ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileTarget {
    /// One profile per package, named after its import path.
    PerPackage,

    /// One profile with the given file stem.
    Named(String),

    /// Written by the instrumented binary the tests launch.
    Instrumented,
}

/// One test group run under coverage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageGroup {
    pub name: String,
    pub packages: PackageSource,
    pub tags: Vec<String>,
    pub timeout: String,
    pub flags: Vec<String>,
    pub profile: ProfileTarget,
}

impl CoverageGroup {
    /// Group writing a single named profile.
    pub fn listed(name: &str, packages: &str, profile: &str) -> Self {
        Self {
            name: name.to_string(),
            packages: PackageSource::Listed(packages.to_string()),
            tags: Vec::new(),
            timeout: "20m".to_string(),
            flags: Vec::new(),
            profile: ProfileTarget::Named(profile.to_string()),
        }
    }

    /// Group whose coverage comes from the instrumented binary.
    pub fn instrumented(name: &str, packages: &str) -> Self {
        Self {
            name: name.to_string(),
            packages: PackageSource::Listed(packages.to_string()),
            tags: vec!["cov".to_string()],
            timeout: "30m".to_string(),
            flags: Vec::new(),
            profile: ProfileTarget::Instrumented,
        }
    }

    /// Unit tests of every non-integration package, one profile each.
    pub fn unit() -> Self {
        Self {
            name: "unit".to_string(),
            packages: PackageSource::Discovered,
            tags: Vec::new(),
            timeout: "20m".to_string(),
            // skips examples, which leak goroutines under coverage
            flags: vec!["-run=Test".to_string()],
            profile: ProfileTarget::PerPackage,
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags.extend(tags.iter().map(|t| t.to_string()));
        self
    }

    pub fn with_flags(mut self, flags: &[&str]) -> Self {
        self.flags.extend(flags.iter().map(|f| f.to_string()));
        self
    }

    /// Groups run by the `cov` pass, in order.
    pub fn defaults() -> Vec<CoverageGroup> {
        vec![
            CoverageGroup::unit(),
            CoverageGroup::listed("integration", "./integration/...", "integration"),
            CoverageGroup::listed(
                "integration-examples",
                "./clientv3/...",
                "integration_examples",
            )
            .with_flags(&["-run=Example"]),
            CoverageGroup::listed("store-variant", "./clientv3/integration/...", "store-v2v3")
                .with_tags(&["v2v3"]),
            CoverageGroup::listed(
                "cluster-proxy-variant",
                "./integration/... ./clientv3/integration/...",
                "proxy_integration",
            )
            .with_tags(&["cluster_proxy"]),
            CoverageGroup::instrumented("e2e", "./tests/e2e/..."),
            CoverageGroup::instrumented("e2e-with-proxy", "./tests/e2e/...")
                .with_tags(&["cluster_proxy"]),
        ]
    }

    fn mode(&self) -> ConcurrencyMode {
        match self.profile {
            ProfileTarget::PerPackage => ConcurrencyMode::KeepGoing,
            _ => ConcurrencyMode::Parallel,
        }
    }

    fn coverage_flags(&self) -> Vec<String> {
        let mut flags = match self.profile {
            ProfileTarget::Instrumented => vec!["-v".to_string()],
            _ => vec![
                "-covermode=set".to_string(),
                "-coverpkg=./...".to_string(),
                "-v".to_string(),
            ],
        };
        flags.extend(self.flags.iter().cloned());
        flags
    }
}

/// Outcome of a coverage run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageReport {
    /// Path of the cumulative report.
    pub report: PathBuf,

    /// Profiles that were merged into the report.
    pub merged: Vec<PathBuf>,

    /// Failed groups and profiles, in the order they failed.
    pub failed: Vec<String>,
}

/// Profile file name for a package import path.
pub fn profile_name(package: &str) -> String {
    format!("{}.{PROFILE_EXTENSION}", package.replace('/', "_"))
}

/// Runs coverage groups and merges their profiles.
pub struct CoverageAggregator<'a> {
    executor: &'a dyn CommandExecutor,
    config: &'a HarnessConfig,
    coverdir: PathBuf,
}

impl<'a> CoverageAggregator<'a> {
    pub fn new(executor: &'a dyn CommandExecutor, config: &'a HarnessConfig, coverdir: &Path) -> Self {
        Self {
            executor,
            config,
            coverdir: coverdir.to_path_buf(),
        }
    }

    /// Run every group, merge, and fail listing every failed group.
    pub async fn run(&self, groups: &[CoverageGroup], args: &[String]) -> Result<CoverageReport> {
        std::fs::create_dir_all(&self.coverdir)?;

        let mut failed = Vec::new();
        for group in groups {
            info!(group = %group.name, "Collecting coverage");
            if let Err(e) = self.run_group(group, args).await {
                error!(group = %group.name, error = %e, "coverage group failed");
                failed.push(group.name.clone());
            }
        }

        let (report, merged, merge_failures) = merge_profiles(self.executor, &self.coverdir).await?;
        failed.extend(merge_failures);

        info!(
            "Coverage report written; view it with: go tool cover -html={}",
            report.display()
        );

        if failed.is_empty() {
            Ok(CoverageReport {
                report,
                merged,
                failed,
            })
        } else {
            for name in &failed {
                error!("--- FAIL: {name}");
            }
            Err(HarnessError::CoverageFailed { groups: failed })
        }
    }

    async fn run_group(&self, group: &CoverageGroup, args: &[String]) -> Result<()> {
        let coverdir = self.coverdir.clone();
        let namer: Box<ProfileNamer> = match &group.profile {
            ProfileTarget::PerPackage => {
                Box::new(move |package: &str| coverdir.join(profile_name(package)))
            }
            ProfileTarget::Named(stem) => {
                let file = format!("{stem}.{PROFILE_EXTENSION}");
                Box::new(move |_: &str| coverdir.join(&file))
            }
            ProfileTarget::Instrumented => Box::new(move |_: &str| coverdir.clone()),
        };

        match &group.packages {
            PackageSource::Listed(packages) => {
                let invocation =
                    self.invocation(group, packages.clone(), &self.config.root, namer.as_ref());
                run_go_tests(self.executor, self.config, &invocation, args).await
            }
            PackageSource::Discovered => {
                let mut failed = Vec::new();
                let mut reasons = Vec::new();
                for module in &self.config.modules {
                    let dir = self.config.module_dir(module);
                    let packages = match self.unit_packages(&dir).await {
                        Ok(packages) => packages,
                        Err(e) => {
                            warn!(module = %module.name, error = %e, "listing packages failed");
                            reasons.push(format!("{}: {e}", module.name));
                            failed.push(module.name.clone());
                            continue;
                        }
                    };
                    if packages.is_empty() {
                        continue;
                    }
                    let invocation = self.invocation(group, packages.join(" "), &dir, namer.as_ref());
                    if let Err(e) = run_go_tests(self.executor, self.config, &invocation, args).await {
                        warn!(module = %module.name, error = %e, "unit coverage failed");
                        reasons.push(format!("{}: {e}", module.name));
                        failed.push(module.name.clone());
                    }
                }
                if failed.is_empty() {
                    Ok(())
                } else {
                    Err(HarnessError::ModulesFailed {
                        modules: failed,
                        reasons,
                    })
                }
            }
        }
    }

    fn invocation<'n>(
        &self,
        group: &CoverageGroup,
        packages: String,
        dir: &Path,
        namer: &'n ProfileNamer,
    ) -> TestInvocation<'n> {
        let invocation = TestInvocation::new(packages, group.mode(), group.timeout.clone())
            .flags(group.coverage_flags())
            .tags(group.tags.iter().cloned())
            .env("COVERDIR", self.coverdir.to_string_lossy())
            .in_dir(dir);
        match group.profile {
            ProfileTarget::Instrumented => invocation,
            _ => invocation.coverprofile(namer),
        }
    }

    /// Non-integration packages of the module at `dir`.
    async fn unit_packages(&self, dir: &Path) -> Result<Vec<String>> {
        let spec = CommandSpec::new("go")
            .args(["list", "./..."])
            .current_dir(dir)
            .env("GOARCH", &self.config.goarch);
        let output = self.executor.execute(&spec).await?;
        if !output.passed() {
            return Err(HarnessError::CommandFailed {
                command: spec.to_string(),
                exit_code: output.exit_code,
            });
        }
        let integration = Regex::new(INTEGRATION_PACKAGES)?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|p| !p.is_empty() && !integration.is_match(p))
            .map(str::to_string)
            .collect())
    }
}

/// Merge every profile in `coverdir` into `cover.out`.
///
/// Starts from [`COVER_BASELINE`]. A merge result replaces the report only
/// when it is non-empty. Returns the report path, the merged profiles and
/// the profiles whose merge failed.
pub async fn merge_profiles(
    executor: &dyn CommandExecutor,
    coverdir: &Path,
) -> Result<(PathBuf, Vec<PathBuf>, Vec<String>)> {
    let report = coverdir.join(COVER_REPORT);
    let scratch = coverdir.join("cover.tmp");
    std::fs::write(&report, COVER_BASELINE)?;

    let mut profiles: Vec<PathBuf> = std::fs::read_dir(coverdir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|e| e == PROFILE_EXTENSION).unwrap_or(false))
        .collect();
    profiles.sort();

    let mut merged = Vec::new();
    let mut failed = Vec::new();
    for profile in profiles {
        info!("merging test coverage file {}", profile.display());
        let spec = CommandSpec::new("gocovmerge")
            .arg(profile.to_string_lossy())
            .arg(report.to_string_lossy());
        let output = match executor.execute(&spec).await {
            Ok(output) => output,
            Err(e) => {
                error!(profile = %profile.display(), error = %e, "gocovmerge failed to run");
                failed.push(profile.display().to_string());
                continue;
            }
        };
        if !output.passed() {
            failed.push(profile.display().to_string());
        }
        if output.stdout.trim().is_empty() {
            warn!(profile = %profile.display(), "merge produced no output; keeping previous report");
            continue;
        }
        std::fs::write(&scratch, &output.stdout)?;
        std::fs::rename(&scratch, &report)?;
        merged.push(profile);
    }

    strip_generated(&report)?;
    Ok((report, merged, failed))
}

/// Drop generated-code entries from a coverage report.
pub fn strip_generated(report: &Path) -> Result<()> {
    let content = std::fs::read_to_string(report)?;
    let mut kept: String = content
        .lines()
        .filter(|line| !line.contains("generated.go"))
        .collect::<Vec<_>>()
        .join("\n");
    kept.push('\n');
    std::fs::write(report, kept)?;
    Ok(())
}

/// The `cov` pass.
pub struct CoveragePass {
    groups: Vec<CoverageGroup>,
}

impl CoveragePass {
    pub fn new(groups: Vec<CoverageGroup>) -> Self {
        Self { groups }
    }
}

impl Default for CoveragePass {
    fn default() -> Self {
        Self::new(CoverageGroup::defaults())
    }
}

#[async_trait]
impl Pass for CoveragePass {
    fn name(&self) -> &str {
        "cov"
    }

    fn description(&self) -> &str {
        "collect and merge code coverage"
    }

    async fn run(&self, runner: &PassRunner, args: &[String]) -> Result<PassOutcome> {
        let executor = runner.executor();
        let config = runner.config();

        ToolRequirement::hard("gocovmerge", "go install github.com/wadey/gocovmerge@latest")
            .check(executor)?;
        let coverdir = config.require_coverdir()?;

        if self.groups.iter().any(|g| g.profile == ProfileTarget::Instrumented) {
            let binary = config.bin_path().join(INSTRUMENTED_BINARY);
            if !binary.is_file() {
                return Err(HarnessError::ToolMissing {
                    tool: binary.display().to_string(),
                    hint: "run the build_cov pass first".to_string(),
                });
            }
        }

        let aggregator = CoverageAggregator::new(executor, config, coverdir);
        aggregator.run(&self.groups, args).await?;
        Ok(PassOutcome::Passed)
    }
}
