//! Pass definitions and the name-to-pass registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{HarnessError, Result};
use crate::runner::PassRunner;

/// Whether a pass calls tools itself or runs other passes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    Atomic,
    Composite,
}

/// Non-failing result of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Passed,

    /// A soft tool was missing; nothing was checked.
    Skipped { reason: String },
}

impl PassOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        PassOutcome::Skipped {
            reason: reason.into(),
        }
    }
}

/// A named unit of build, test or check work.
#[async_trait]
pub trait Pass: Send + Sync {
    /// Registry key.
    fn name(&self) -> &str;

    /// One-line summary for listings.
    fn description(&self) -> &str {
        ""
    }

    fn kind(&self) -> PassKind {
        PassKind::Atomic
    }

    /// Run the pass. `args` are the residual arguments forwarded to tools.
    async fn run(&self, runner: &PassRunner, args: &[String]) -> Result<PassOutcome>;
}

/// Pass that runs a fixed list of other passes in order.
#[derive(Debug, Clone)]
pub struct CompositePass {
    name: String,
    description: String,
    sub_passes: Vec<String>,
}

impl CompositePass {
    pub fn new<I, S>(name: impl Into<String>, description: impl Into<String>, sub_passes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            description: description.into(),
            sub_passes: sub_passes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn sub_passes(&self) -> &[String] {
        &self.sub_passes
    }
}

#[async_trait]
impl Pass for CompositePass {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn kind(&self) -> PassKind {
        PassKind::Composite
    }

    async fn run(&self, runner: &PassRunner, args: &[String]) -> Result<PassOutcome> {
        runner.run_passes(&self.sub_passes, args).await?;
        Ok(PassOutcome::Passed)
    }
}

/// Static mapping from pass name to pass.
#[derive(Default, Clone)]
pub struct PassRegistry {
    passes: HashMap<String, Arc<dyn Pass>>,
}

impl PassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pass under its own name.
    pub fn register<P: Pass + 'static>(&mut self, pass: P) -> Result<()> {
        self.register_arc(Arc::new(pass))
    }

    pub fn register_arc(&mut self, pass: Arc<dyn Pass>) -> Result<()> {
        let name = pass.name().to_string();
        if self.passes.contains_key(&name) {
            return Err(HarnessError::Config(format!("pass {name} registered twice")));
        }
        self.passes.insert(name, pass);
        Ok(())
    }

    /// Look up a pass by exact name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Pass>> {
        self.passes
            .get(name)
            .cloned()
            .ok_or_else(|| HarnessError::UnknownPass {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.passes.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.passes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

impl std::fmt::Debug for PassRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassRegistry")
            .field("passes", &self.names())
            .finish()
    }
}
