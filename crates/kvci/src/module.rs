//! Source modules and per-module iteration.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use tracing::{error, info};

use crate::error::{HarnessError, Result};

/// A source tree root with its own `go.mod`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Module {
    /// Display name.
    pub name: String,

    /// Path relative to the repository root.
    pub path: PathBuf,
}

impl Module {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// The root module and the `api` submodule.
    pub fn defaults() -> Vec<Module> {
        vec![Module::new("root", "."), Module::new("api", "api")]
    }

    /// Parse `name=path` or bare `path` entries separated by whitespace or commas.
    pub fn parse_list(raw: &str) -> Result<Vec<Module>> {
        let mut modules = Vec::new();
        for entry in raw.split(|c: char| c == ',' || c.is_whitespace()) {
            if entry.is_empty() {
                continue;
            }
            let module = match entry.split_once('=') {
                Some((name, path)) if !name.is_empty() && !path.is_empty() => {
                    Module::new(name, path)
                }
                Some(_) => {
                    return Err(HarnessError::Config(format!("invalid module entry: {entry}")))
                }
                None if entry == "." => Module::new("root", "."),
                None => Module::new(entry.trim_end_matches('/'), entry),
            };
            if modules.iter().any(|m: &Module| m.name == module.name) {
                return Err(HarnessError::Config(format!(
                    "duplicate module name: {}",
                    module.name
                )));
            }
            modules.push(module);
        }
        if modules.is_empty() {
            return Err(HarnessError::Config("module list is empty".to_string()));
        }
        Ok(modules)
    }
}

/// Run `op` on every module, even after failures.
///
/// Fails with [`HarnessError::ModulesFailed`] naming every module whose
/// operation failed, together with its error.
pub async fn for_each_module<F, Fut>(modules: &[Module], mut op: F) -> Result<()>
where
    F: FnMut(Module) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut failed = Vec::new();
    let mut reasons = Vec::new();

    for module in modules {
        info!(module = %module.name, "Running for module");
        if let Err(e) = op(module.clone()).await {
            error!(module = %module.name, error = %e, "module failed");
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
