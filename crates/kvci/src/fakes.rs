//! In-memory fakes for the command layer (testing only)
//!
//! `ScriptedExecutor` answers every command through a handler closure and
//! records what was asked of it, so passes can be exercised without a Go
//! toolchain.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::command::{CommandExecutor, CommandOutput, CommandSpec};
use crate::error::Result;

type Handler = dyn Fn(&CommandSpec) -> Result<CommandOutput> + Send + Sync;

/// Executor whose results come from a closure.
pub struct ScriptedExecutor {
    handler: Box<Handler>,
    calls: Mutex<Vec<CommandSpec>>,
    missing_tools: HashSet<String>,
}

impl ScriptedExecutor {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&CommandSpec) -> CommandOutput + Send + Sync + 'static,
    {
        Self::fallible(move |spec| Ok(handler(spec)))
    }

    /// Executor whose handler may fail to run a command at all, as when a
    /// binary cannot be spawned.
    pub fn fallible<F>(handler: F) -> Self
    where
        F: Fn(&CommandSpec) -> Result<CommandOutput> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            missing_tools: HashSet::new(),
        }
    }

    /// Executor where every command succeeds silently.
    pub fn succeeding() -> Self {
        Self::new(|_| CommandOutput::default())
    }

    /// Report `tool` as absent from the search path.
    pub fn without_tool(mut self, tool: impl Into<String>) -> Self {
        self.missing_tools.insert(tool.into());
        self
    }

    /// Every command executed so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Executed commands rendered as strings.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        (self.handler)(spec)
    }

    fn tool_available(&self, tool: &str) -> bool {
        !self.missing_tools.contains(tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;

    #[tokio::test]
    async fn test_records_calls() {
        let executor = ScriptedExecutor::succeeding().without_tool("staticcheck");
        executor
            .execute(&CommandSpec::new("go").args(["vet", "./..."]))
            .await
            .unwrap();

        assert_eq!(executor.command_lines(), vec!["go vet ./..."]);
        assert!(executor.tool_available("gofmt"));
        assert!(!executor.tool_available("staticcheck"));
    }

    #[tokio::test]
    async fn test_fallible_handler_errors_are_returned() {
        let executor = ScriptedExecutor::fallible(|spec| {
            Err(HarnessError::ToolMissing {
                tool: spec.program.clone(),
                hint: "install it".to_string(),
            })
        });
        let err = executor.execute(&CommandSpec::new("gofmt")).await.unwrap_err();

        assert!(matches!(err, HarnessError::ToolMissing { tool, .. } if tool == "gofmt"));
        assert_eq!(executor.calls().len(), 1);
    }
}
