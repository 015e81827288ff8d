//! Dependency manifest synchronisation check.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{error, info};

use crate::command::{run_checked, CheckMode, CommandExecutor, CommandSpec};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::module::{for_each_module, Module};
use crate::pass::{Pass, PassOutcome};
use crate::runner::PassRunner;

/// Files a module's dependency state lives in.
pub const MANIFESTS: [&str; 2] = ["go.mod", "go.sum"];

/// Saved copy of a module's manifests.
///
/// Files absent at capture time are removed again on restore.
pub struct ManifestSnapshot {
    dir: PathBuf,
    saved: TempDir,
    present: Vec<&'static str>,
}

impl ManifestSnapshot {
    pub fn capture(dir: &Path) -> Result<Self> {
        let saved = tempfile::tempdir()?;
        let mut present = Vec::new();
        for name in MANIFESTS {
            let path = dir.join(name);
            if path.is_file() {
                std::fs::copy(&path, saved.path().join(name))?;
                present.push(name);
            }
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            saved,
            present,
        })
    }

    /// Digest of the saved manifests.
    pub fn digest(&self) -> Result<String> {
        manifest_digest(self.saved.path())
    }

    pub fn restore(&self) -> Result<()> {
        for name in MANIFESTS {
            let target = self.dir.join(name);
            if self.present.contains(&name) {
                std::fs::copy(self.saved.path().join(name), &target)?;
            } else if target.exists() {
                std::fs::remove_file(&target)?;
            }
        }
        Ok(())
    }
}

/// SHA-256 over the manifests in `dir`, missing files hashing as empty.
pub fn manifest_digest(dir: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    for name in MANIFESTS {
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        match std::fs::read(dir.join(name)) {
            Ok(bytes) => hasher.update(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        hasher.update(b"\0");
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Verify one module's manifests are tidy, leaving them untouched.
pub async fn check_module(
    executor: &dyn CommandExecutor,
    config: &HarnessConfig,
    module: &Module,
) -> Result<()> {
    let dir = config.module_dir(module);
    if !dir.join("go.mod").is_file() {
        info!(module = %module.name, "no go.mod; skipping dependency check");
        return Ok(());
    }

    let snapshot = ManifestSnapshot::capture(&dir)?;
    let before = snapshot.digest()?;

    let spec = CommandSpec::new("go")
        .args(["mod", "tidy"])
        .current_dir(&dir)
        .env("GOARCH", &config.goarch);
    let tidied = run_checked(executor, &spec, CheckMode::StatusOnly).await;
    let after = manifest_digest(&dir);

    snapshot.restore()?;
    tidied?;

    if before != after? {
        error!(module = %module.name, "go.mod/go.sum are not in sync; run `go mod tidy`");
        return Err(HarnessError::DependenciesOutOfSync {
            module: module.name.clone(),
        });
    }
    Ok(())
}

/// The `dep` pass.
pub struct DepSyncPass;

#[async_trait]
impl Pass for DepSyncPass {
    fn name(&self) -> &str {
        "dep"
    }

    fn description(&self) -> &str {
        "check go.mod and go.sum are tidy in every module"
    }

    async fn run(&self, runner: &PassRunner, _args: &[String]) -> Result<PassOutcome> {
        let executor = runner.executor();
        let config = runner.config();
        for_each_module(&config.modules, |module| async move {
            check_module(executor, config, &module).await
        })
        .await?;
        Ok(PassOutcome::Passed)
    }
}
