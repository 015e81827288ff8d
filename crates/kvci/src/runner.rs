//! Pass orchestration and run reporting.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::command::CommandExecutor;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::pass::{PassKind, PassOutcome, PassRegistry};
use crate::telemetry::{pass_span, run_span};

/// Final state of a single pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    Passed,
    Failed,
    Skipped,
}

/// Record of one pass execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassRecord {
    /// Pass name.
    pub name: String,

    pub kind: PassKind,

    pub status: PassStatus,

    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Skip reason or failure message.
    pub detail: Option<String>,
}

/// Result of a complete run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,

    /// Whether every pass passed or was skipped.
    pub success: bool,

    /// Records in completion order; sub-passes precede their composite.
    pub passes: Vec<PassRecord>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// Message of the failure that stopped the run.
    pub failure: Option<String>,
}

impl RunReport {
    /// Number of passes that passed.
    pub fn passed_count(&self) -> usize {
        self.count(PassStatus::Passed)
    }

    /// Number of passes that failed.
    pub fn failed_count(&self) -> usize {
        self.count(PassStatus::Failed)
    }

    /// Number of passes skipped for a missing tool.
    pub fn skipped_count(&self) -> usize {
        self.count(PassStatus::Skipped)
    }

    /// Status of the named pass, if it ran.
    pub fn status_of(&self, name: &str) -> Option<PassStatus> {
        self.passes.iter().find(|p| p.name == name).map(|p| p.status)
    }

    fn count(&self, status: PassStatus) -> usize {
        self.passes.iter().filter(|p| p.status == status).count()
    }
}

/// Sequential pass orchestrator.
///
/// Runs passes one at a time and stops at the first failure. Composite
/// passes re-enter [`PassRunner::run_passes`], so the same stop rule applies
/// at every level.
pub struct PassRunner {
    config: Arc<HarnessConfig>,
    executor: Arc<dyn CommandExecutor>,
    registry: Arc<PassRegistry>,
    run_id: String,
    records: Mutex<Vec<PassRecord>>,
}

impl PassRunner {
    pub fn new(
        config: Arc<HarnessConfig>,
        executor: Arc<dyn CommandExecutor>,
        registry: Arc<PassRegistry>,
    ) -> Self {
        Self {
            config,
            executor,
            registry,
            run_id: Uuid::new_v4().to_string(),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn executor(&self) -> &dyn CommandExecutor {
        self.executor.as_ref()
    }

    pub fn registry(&self) -> &PassRegistry {
        &self.registry
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run the configured pass list with the configured residual arguments.
    pub async fn run(&self) -> RunReport {
        let start = Instant::now();
        let span = run_span(&self.run_id);
        span.in_scope(|| info!(passes = %self.config.passes.join(" "), "Starting run"));

        let result = self
            .run_passes(&self.config.passes, &self.config.extra_args)
            .instrument(span.clone())
            .await;

        let failure = span.in_scope(|| match &result {
            Ok(()) => {
                info!("SUCCESS");
                None
            }
            Err(e) => {
                error!("FAILED: {e}");
                Some(e.to_string())
            }
        });

        RunReport {
            run_id: self.run_id.clone(),
            success: result.is_ok(),
            passes: self.records().await,
            duration_ms: start.elapsed().as_millis() as u64,
            failure,
        }
    }

    /// Run `names` in order, stopping at the first failure.
    pub async fn run_passes(&self, names: &[String], args: &[String]) -> Result<()> {
        for name in names {
            self.run_pass(name, args).await?;
        }
        Ok(())
    }

    /// Resolve and run a single pass, logging and recording its outcome.
    pub async fn run_pass(&self, name: &str, args: &[String]) -> Result<PassOutcome> {
        self.run_pass_in_span(name, args)
            .instrument(pass_span(name))
            .await
    }

    async fn run_pass_in_span(&self, name: &str, args: &[String]) -> Result<PassOutcome> {
        let started_at = Utc::now();
        let pass = match self.registry.get(name) {
            Ok(pass) => pass,
            Err(e) => {
                error!("FAIL: '{name}' failed at {}: {e}", timestamp(Utc::now()));
                return Err(e);
            }
        };

        let start = Instant::now();
        info!("Starting '{name}' pass at {}", timestamp(started_at));

        let result = pass.run(self, args).await;
        let finished_at = Utc::now();

        let (status, detail) = match &result {
            Ok(PassOutcome::Passed) => {
                info!("'{name}' completed at {}", timestamp(finished_at));
                (PassStatus::Passed, None)
            }
            Ok(PassOutcome::Skipped { reason }) => {
                warn!("'{name}' skipped at {}: {reason}", timestamp(finished_at));
                (PassStatus::Skipped, Some(reason.clone()))
            }
            Err(e) => {
                error!("FAIL: '{name}' failed at {}", timestamp(finished_at));
                (PassStatus::Failed, Some(e.to_string()))
            }
        };

        self.records.lock().await.push(PassRecord {
            name: name.to_string(),
            kind: pass.kind(),
            status,
            started_at,
            finished_at,
            duration_ms: start.elapsed().as_millis() as u64,
            detail,
        });

        result.map_err(|source| HarnessError::PassFailed {
            pass: name.to_string(),
            source: Box::new(source),
        })
    }

    /// Records of every pass finished so far.
    pub async fn records(&self) -> Vec<PassRecord> {
        self.records.lock().await.clone()
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedExecutor;
    use crate::pass::{CompositePass, Pass};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    struct CountingPass {
        name: String,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Pass for CountingPass {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(&self, _runner: &PassRunner, _args: &[String]) -> Result<PassOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(HarnessError::CommandFailed {
                    command: self.name.clone(),
                    exit_code: 1,
                })
            } else {
                Ok(PassOutcome::Passed)
            }
        }
    }

    fn runner(passes: &[&str], registry: PassRegistry) -> PassRunner {
        let config = HarnessConfig {
            passes: passes.iter().map(|p| p.to_string()).collect(),
            ..HarnessConfig::default()
        };
        PassRunner::new(
            Arc::new(config),
            Arc::new(ScriptedExecutor::succeeding()),
            Arc::new(registry),
        )
    }

    fn counting(registry: &mut PassRegistry, name: &str, fail: bool) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        registry
            .register(CountingPass {
                name: name.to_string(),
                fail,
                calls: calls.clone(),
            })
            .unwrap();
        calls
    }

    #[tokio::test]
    async fn test_all_passes_succeed() {
        let mut registry = PassRegistry::new();
        let a = counting(&mut registry, "a", false);
        let b = counting(&mut registry, "b", false);

        let report = runner(&["a", "b"], registry).run().await;

        assert!(report.success);
        assert_eq!(report.passed_count(), 2);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert!(report.failure.is_none());
    }

    #[tokio::test]
    async fn test_failure_stops_later_passes() {
        let mut registry = PassRegistry::new();
        counting(&mut registry, "a", false);
        counting(&mut registry, "b", true);
        let c = counting(&mut registry, "c", false);

        let report = runner(&["a", "b", "c"], registry).run().await;

        assert!(!report.success);
        assert_eq!(report.status_of("a"), Some(PassStatus::Passed));
        assert_eq!(report.status_of("b"), Some(PassStatus::Failed));
        assert_eq!(report.status_of("c"), None);
        assert_eq!(c.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_composite_stops_at_failing_sub_pass() {
        let mut registry = PassRegistry::new();
        counting(&mut registry, "a", false);
        counting(&mut registry, "b", true);
        let c = counting(&mut registry, "c", false);
        registry
            .register(CompositePass::new("group", "", ["a", "b", "c"]))
            .unwrap();

        let runner = runner(&["group"], registry);
        let err = runner
            .run_passes(&["group".to_string()], &[])
            .await
            .unwrap_err();

        assert_eq!(err.pass_chain(), vec!["group", "b"]);
        assert_eq!(c.load(Ordering::SeqCst), 0);

        let records = runner.records().await;
        let names: Vec<_> = records.iter().map(|r| (r.name.as_str(), r.status)).collect();
        assert_eq!(
            names,
            vec![
                ("a", PassStatus::Passed),
                ("b", PassStatus::Failed),
                ("group", PassStatus::Failed),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_pass_is_an_error() {
        let mut registry = PassRegistry::new();
        let a = counting(&mut registry, "a", false);

        let runner = runner(&["nope", "a"], registry);
        let report = runner.run().await;

        assert!(!report.success);
        assert!(report.failure.unwrap().contains("unknown pass: nope"));
        assert_eq!(a.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failing_pass_logs_lifecycle() {
        let mut registry = PassRegistry::new();
        counting(&mut registry, "unit", true);

        let report = runner(&["unit"], registry).run().await;

        assert!(!report.success);
        assert!(logs_contain("Starting 'unit' pass at"));
        assert!(logs_contain("FAIL: 'unit' failed at"));
        assert!(logs_contain("FAILED: pass 'unit' failed"));
        assert!(!logs_contain("SUCCESS"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_passing_run_logs_success() {
        let mut registry = PassRegistry::new();
        counting(&mut registry, "build", false);

        let runner = runner(&["build"], registry);
        let report = runner.run().await;

        assert!(report.success);
        assert!(logs_contain("Starting 'build' pass at"));
        assert!(logs_contain("'build' completed at"));
        assert!(logs_contain("SUCCESS"));
        assert!(logs_contain(runner.run_id()));
    }

    #[test]
    fn test_report_counts() {
        let now = Utc::now();
        let record = |name: &str, status| PassRecord {
            name: name.to_string(),
            kind: PassKind::Atomic,
            status,
            started_at: now,
            finished_at: now,
            duration_ms: 1,
            detail: None,
        };
        let report = RunReport {
            run_id: "run".to_string(),
            success: false,
            passes: vec![
                record("fmt", PassStatus::Passed),
                record("bom", PassStatus::Skipped),
                record("unit", PassStatus::Failed),
            ],
            duration_ms: 3,
            failure: Some("pass 'unit' failed".to_string()),
        };

        assert_eq!(report.passed_count(), 1);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.failed_count(), 1);
    }
}
