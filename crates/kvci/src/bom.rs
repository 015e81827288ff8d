//! License bill-of-materials comparison.

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tracing::{error, info};

use crate::checker::ToolRequirement;
use crate::command::{run_checked, CheckMode, CommandSpec};
use crate::error::{HarnessError, Result};
use crate::pass::{Pass, PassOutcome};
use crate::runner::PassRunner;

pub const BOM_TOOL: &str = "license-bill-of-materials";
pub const BOM_BASELINE: &str = "bill-of-materials.json";
pub const BOM_OVERRIDES: &str = "bill-of-materials.override.json";
pub const BOM_CURRENT: &str = "bom-now.json";

/// Compare a freshly generated bill of materials against the baseline in `root`.
///
/// Documents are compared structurally. On mismatch the generated document
/// is written to [`BOM_CURRENT`] for inspection.
pub fn compare_with_baseline(root: &Path, generated: &str) -> Result<()> {
    let baseline: Value = serde_json::from_str(&std::fs::read_to_string(root.join(BOM_BASELINE))?)?;
    let current: Value = serde_json::from_str(generated)?;
    if baseline == current {
        return Ok(());
    }

    let dump = root.join(BOM_CURRENT);
    std::fs::write(&dump, serde_json::to_string_pretty(&current)?)?;
    error!(
        "vendored licenses do not match {BOM_BASELINE}; current state written to {}",
        dump.display()
    );
    Err(HarnessError::BillOfMaterialsMismatch {
        baseline: BOM_BASELINE.to_string(),
    })
}

/// The `bom` pass.
pub struct BomPass;

#[async_trait]
impl Pass for BomPass {
    fn name(&self) -> &str {
        "bom"
    }

    fn description(&self) -> &str {
        "check the license bill of materials"
    }

    async fn run(&self, runner: &PassRunner, _args: &[String]) -> Result<PassOutcome> {
        let executor = runner.executor();
        let config = runner.config();

        let requirement = ToolRequirement::soft(
            BOM_TOOL,
            "go get github.com/coreos/license-bill-of-materials",
        );
        if let Some(reason) = requirement.check(executor)? {
            return Ok(PassOutcome::skipped(reason));
        }

        info!("Checking bill of materials...");
        let spec = CommandSpec::new(BOM_TOOL)
            .args(["--override-file", BOM_OVERRIDES, "./..."])
            .current_dir(&config.root);
        let output = run_checked(executor, &spec, CheckMode::StatusOnly).await?;

        compare_with_baseline(&config.root, &output.stdout)?;
        Ok(PassOutcome::Passed)
    }
}
