//! kvci: CI pass harness for the key-value store repository
//!
//! Runs named build, test and check passes in order and stops at the first
//! failing one.
//!
//! ## Key Components
//!
//! - `PassRunner`: sequential orchestrator producing a `RunReport`
//! - `PassRegistry`: exact-name lookup of `Pass` implementations
//! - `Checker`: pluggable `(output, status)` source judged by a `CheckMode`
//! - `CoverageAggregator`: tolerant coverage collection and profile merging
//! - `CommandExecutor`: seam between passes and child processes

pub mod bom;
pub mod checker;
pub mod command;
pub mod config;
pub mod coverage;
pub mod depsync;
mod error;
pub mod fakes;
pub mod gotest;
pub mod lint;
pub mod module;
pub mod pass;
pub mod passes;
pub mod release;
pub mod runner;
pub mod telemetry;

pub use checker::{CheckContext, CheckScope, Checker, CheckerPass, ToolChecker, ToolRequirement};
pub use command::{
    CheckMode, CheckOutput, CommandExecutor, CommandOutput, CommandSpec, ProcessExecutor,
};
pub use config::{HarnessConfig, ReleaseConfig, Settings};
pub use coverage::{CoverageAggregator, CoverageGroup, CoveragePass, CoverageReport};
pub use error::{HarnessError, Result};
pub use gotest::{run_go_tests, ConcurrencyMode, TestInvocation};
pub use module::{for_each_module, Module};
pub use pass::{CompositePass, Pass, PassKind, PassOutcome, PassRegistry};
pub use passes::builtin_registry;
pub use runner::{PassRecord, PassRunner, PassStatus, RunReport};
pub use telemetry::init_tracing;
