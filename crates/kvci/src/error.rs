//! Error taxonomy for pass execution.

/// Errors produced while resolving, running or checking passes.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("unknown pass: {name}")]
    UnknownPass { name: String },

    #[error("pass '{pass}' failed: {source}")]
    PassFailed {
        pass: String,
        #[source]
        source: Box<HarnessError>,
    },

    #[error("{check} produced output:\n{output}")]
    CheckFailed { check: String, output: String },

    #[error("`{command}` exited with code {exit_code}")]
    CommandFailed { command: String, exit_code: i32 },

    #[error("`{command}` timed out after {timeout_secs} seconds")]
    CommandTimedOut { command: String, timeout_secs: u64 },

    #[error("command has no program")]
    EmptyCommand,

    #[error("required tool {tool} is not available ({hint})")]
    ToolMissing { tool: String, hint: String },

    #[error("failed modules: {}{}", .modules.join(", "), indented(.reasons))]
    ModulesFailed {
        modules: Vec<String>,
        /// `<module>: <error>` for each failed module, in visit order.
        reasons: Vec<String>,
    },

    #[error("failed packages: {}", .packages.join(", "))]
    TestsFailed { packages: Vec<String> },

    #[error("coverage failed for: {}", .groups.join(", "))]
    CoverageFailed { groups: Vec<String> },

    #[error("dependencies of module {module} are out of sync; run `go mod tidy`")]
    DependenciesOutOfSync { module: String },

    #[error("vendored licenses do not match {baseline}")]
    BillOfMaterialsMismatch { baseline: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl HarnessError {
    /// Innermost error of a chain of nested pass failures.
    pub fn root_cause(&self) -> &HarnessError {
        match self {
            HarnessError::PassFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Names of the passes this failure propagated through, outermost first.
    pub fn pass_chain(&self) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = self;
        while let HarnessError::PassFailed { pass, source } = current {
            chain.push(pass.as_str());
            current = source;
        }
        chain
    }
}

fn indented(lines: &[String]) -> String {
    lines.iter().map(|line| format!("\n  {line}")).collect()
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_errors_list_every_member() {
        let err = HarnessError::ModulesFailed {
            modules: vec!["root".to_string(), "api".to_string()],
            reasons: vec![
                "root: `go build ./...` exited with code 2".to_string(),
                "api: `go build ./...` exited with code 1".to_string(),
            ],
        };
        assert_eq!(
            err.to_string(),
            "failed modules: root, api\n  root: `go build ./...` exited with code 2\n  api: `go build ./...` exited with code 1"
        );

        let err = HarnessError::CoverageFailed {
            groups: vec!["integration".to_string()],
        };
        assert!(err.to_string().contains("integration"));
    }

    #[test]
    fn test_pass_chain_and_root_cause() {
        let err = HarnessError::PassFailed {
            pass: "fmt".to_string(),
            source: Box::new(HarnessError::PassFailed {
                pass: "gofmt".to_string(),
                source: Box::new(HarnessError::CheckFailed {
                    check: "gofmt".to_string(),
                    output: "server.go".to_string(),
                }),
            }),
        };

        assert_eq!(err.pass_chain(), vec!["fmt", "gofmt"]);
        assert!(matches!(
            err.root_cause(),
            HarnessError::CheckFailed { output, .. } if output == "server.go"
        ));
    }
}
