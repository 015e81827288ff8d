//! Previous-release binary download for upgrade testing.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::command::{run_checked, CheckMode, CommandExecutor, CommandSpec};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::pass::{Pass, PassOutcome};
use crate::runner::PassRunner;

/// Installed name of the previous-release server binary.
pub const LAST_RELEASE_BINARY: &str = "etcd-last-release";

/// Version to download: `MANUAL_VER`, else the newest matching tag, else the fallback.
pub async fn resolve_version(executor: &dyn CommandExecutor, config: &HarnessConfig) -> Result<String> {
    if let Some(version) = &config.manual_ver {
        return Ok(version.clone());
    }

    let spec = CommandSpec::new("git")
        .args(["tag", "-l", "--sort=-version:refname"])
        .arg(&config.release.tag_pattern)
        .current_dir(&config.root);
    let output = executor.execute(&spec).await?;
    if !output.passed() {
        warn!(exit_code = output.exit_code, "git tag failed; using fallback release");
    }

    let newest = output
        .stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty());
    Ok(match newest {
        Some(tag) if output.passed() => tag.to_string(),
        _ => config.release.fallback_version.clone(),
    })
}

/// Archive name for `version` on `goarch`.
pub fn tarball_name(config: &HarnessConfig, version: &str) -> String {
    format!(
        "{}-{version}-linux-{}.tar.gz",
        config.release.binary_name, config.goarch
    )
}

pub fn download_url(config: &HarnessConfig, version: &str) -> String {
    format!(
        "{}/{version}/{}",
        config.release.download_base.trim_end_matches('/'),
        tarball_name(config, version)
    )
}

/// Download, unpack and install the release binary, returning its path.
pub async fn install_release(
    executor: &dyn CommandExecutor,
    config: &HarnessConfig,
    version: &str,
) -> Result<PathBuf> {
    let scratch = tempfile::tempdir()?;
    let archive = scratch.path().join(tarball_name(config, version));
    let url = download_url(config, version);

    info!("Downloading {url}");
    let download = CommandSpec::new("curl")
        .args(["--fail", "-L"])
        .arg(&url)
        .arg("-o")
        .arg(archive.to_string_lossy())
        .timeout_secs(config.release.download_timeout_secs);
    run_checked(executor, &download, CheckMode::StatusOnly).await?;

    let extract = CommandSpec::new("tar")
        .arg("xzf")
        .arg(archive.to_string_lossy())
        .arg("-C")
        .arg(scratch.path().to_string_lossy())
        .arg("--strip-components=1");
    run_checked(executor, &extract, CheckMode::StatusOnly).await?;

    let unpacked = scratch.path().join(&config.release.binary_name);
    if !unpacked.is_file() {
        return Err(HarnessError::Config(format!(
            "{} not found in {}",
            config.release.binary_name,
            tarball_name(config, version)
        )));
    }

    let bin = config.bin_path();
    std::fs::create_dir_all(&bin)?;
    let installed = bin.join(LAST_RELEASE_BINARY);
    std::fs::copy(&unpacked, &installed)?;
    info!(version = %version, path = %installed.display(), "Installed previous release");
    Ok(installed)
}

/// The `release` pass.
pub struct ReleasePass;

#[async_trait]
impl Pass for ReleasePass {
    fn name(&self) -> &str {
        "release"
    }

    fn description(&self) -> &str {
        "download the previous release binary for upgrade tests"
    }

    async fn run(&self, runner: &PassRunner, _args: &[String]) -> Result<PassOutcome> {
        let executor = runner.executor();
        let config = runner.config();

        let version = resolve_version(executor, config).await?;
        install_release(executor, config, &version).await?;
        Ok(PassOutcome::Passed)
    }
}
