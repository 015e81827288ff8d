//! kvci - CI pass runner for the key-value store repository
//!
//! Runs the passes named by `--passes` / `PASSES` in order, stopping at the
//! first failure. Exits 0 on success and 255 on any failure, configuration
//! errors included. Arguments after the options are forwarded to `go test`.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, Level};

use kvci::{builtin_registry, HarnessConfig, PassRegistry, PassRunner, ProcessExecutor, RunReport, Settings};

/// Exit status for any failed run.
const FAILURE_EXIT: i32 = 255;

#[derive(Parser, Debug)]
#[command(name = "kvci")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run build, test and check passes for the key-value store", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, env = "KVCI_LOG_JSON")]
    json: bool,

    /// List available passes and exit
    #[arg(long)]
    list: bool,

    /// Write the run report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Whitespace-separated pass names
    #[arg(long, env = "PASSES")]
    passes: Option<String>,

    /// Restrict unit tests and gofmt to one package directory
    #[arg(long, env = "PKG")]
    pkg: Option<String>,

    /// Older spelling of PKG
    #[arg(long, env = "USERPKG", hide = true)]
    userpkg: Option<String>,

    /// Overall `go test` timeout (e.g. 10m)
    #[arg(long, env = "TIMEOUT")]
    timeout: Option<String>,

    /// Only run tests matching this pattern
    #[arg(long, env = "TESTCASE")]
    testcase: Option<String>,

    /// CPU list for `go test -cpu`
    #[arg(long, env = "CPU")]
    cpu: Option<String>,

    /// Race detector setting (true/false)
    #[arg(long, env = "RACE")]
    race: Option<String>,

    /// Target architecture
    #[arg(long, env = "GOARCH")]
    goarch: Option<String>,

    /// Coverage output directory
    #[arg(long, env = "COVERDIR")]
    coverdir: Option<PathBuf>,

    /// Release version for upgrade tests
    #[arg(long, env = "MANUAL_VER")]
    manual_ver: Option<String>,

    /// Modules as `name=path` or `path`, comma or space separated
    #[arg(long, env = "KVCI_MODULES")]
    modules: Option<String>,

    /// Repository root
    #[arg(long, env = "KVCI_ROOT")]
    root: Option<PathBuf>,

    /// Directory for built binaries
    #[arg(long, env = "KVCI_BIN_DIR")]
    bin_dir: Option<PathBuf>,

    /// Branch commit titles are checked against
    #[arg(long, env = "KVCI_BASE_BRANCH")]
    base_branch: Option<String>,

    /// Arguments forwarded to `go test`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    go_test_args: Vec<String>,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            passes: self.passes.clone(),
            pkg: self.pkg.clone().or_else(|| self.userpkg.clone()),
            timeout: self.timeout.clone(),
            testcase: self.testcase.clone(),
            cpu: self.cpu.clone(),
            race: self.race.clone(),
            goarch: self.goarch.clone(),
            coverdir: self.coverdir.clone(),
            manual_ver: self.manual_ver.clone(),
            modules: self.modules.clone(),
            root: self.root.clone(),
            bin_dir: self.bin_dir.clone(),
            base_branch: self.base_branch.clone(),
            extra_args: self.go_test_args.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    kvci::init_tracing(cli.json, level);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            FAILURE_EXIT
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let registry = builtin_registry().context("Failed to build pass registry")?;

    if cli.list {
        print!("{}", pass_listing(&registry));
        return Ok(0);
    }

    let config = HarnessConfig::from_settings(cli.settings()).context("Invalid configuration")?;
    debug!(config = %serde_json::to_string(&config)?, "Resolved configuration");

    let runner = PassRunner::new(
        Arc::new(config),
        Arc::new(ProcessExecutor),
        Arc::new(registry),
    );
    let report = runner.run().await;

    if let Some(path) = &cli.report {
        write_report(path, &report)?;
    }

    Ok(exit_code(&report))
}

fn exit_code(report: &RunReport) -> i32 {
    if report.success {
        0
    } else {
        FAILURE_EXIT
    }
}

fn pass_listing(registry: &PassRegistry) -> String {
    let mut out = String::new();
    for name in registry.names() {
        let description = registry
            .get(name)
            .map(|p| p.description().to_string())
            .unwrap_or_default();
        out.push_str(&format!("{name:<18} {description}\n"));
    }
    out
}

fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write run report to {}", path.display()))?;
    Ok(())
}
