//! Harness configuration, resolved once at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{HarnessError, Result};
use crate::module::Module;

/// Passes run when `PASSES` is not given.
pub const DEFAULT_PASSES: &str = "fmt bom dep build unit";

/// CPU counts handed to `go test -cpu` when `CPU` is not given.
pub const DEFAULT_TEST_CPUS: &str = "1,2,4";

/// Raw option values as supplied by flags or environment variables.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Settings {
    pub passes: Option<String>,
    pub pkg: Option<String>,
    pub timeout: Option<String>,
    pub testcase: Option<String>,
    pub cpu: Option<String>,
    pub race: Option<String>,
    pub goarch: Option<String>,
    pub coverdir: Option<PathBuf>,
    pub manual_ver: Option<String>,
    pub modules: Option<String>,
    pub root: Option<PathBuf>,
    pub bin_dir: Option<PathBuf>,
    pub base_branch: Option<String>,
    pub extra_args: Vec<String>,
}

/// Options for the `release` pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseConfig {
    /// Tag glob used to find the newest previous release.
    pub tag_pattern: String,

    /// Version used when no tag matches.
    pub fallback_version: String,

    /// Base URL that release archives are published under.
    pub download_base: String,

    /// Name of the server binary inside the archive.
    pub binary_name: String,

    /// Download timeout in seconds.
    pub download_timeout_secs: u64,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            tag_pattern: "v3.3.*".to_string(),
            fallback_version: "v3.3.0".to_string(),
            download_base: "https://github.com/etcd-io/etcd/releases/download".to_string(),
            binary_name: "etcd".to_string(),
            download_timeout_secs: 600,
        }
    }
}

/// Resolved harness configuration passed to every pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Ordered pass names.
    pub passes: Vec<String>,

    /// Package override (normalised `PKG`/`USERPKG`).
    pub user_pkg: Option<String>,

    /// `go test -timeout` override; passes fall back to their own default.
    pub timeout: Option<String>,

    /// `go test -run` filter.
    pub testcase: Option<String>,

    /// `go test -cpu` list.
    pub cpu: String,

    /// Raw `RACE` value; see [`HarnessConfig::race_flag`].
    pub race: Option<String>,

    /// Target architecture exported to go commands.
    pub goarch: String,

    /// Coverage output directory.
    pub coverdir: Option<PathBuf>,

    /// Release version to upgrade from, overriding tag discovery.
    pub manual_ver: Option<String>,

    /// Source modules, root module first.
    pub modules: Vec<Module>,

    /// Repository root.
    pub root: PathBuf,

    /// Directory holding built and downloaded binaries.
    pub bin_dir: PathBuf,

    /// Branch that commit titles are checked against.
    pub base_branch: String,

    /// Arguments forwarded verbatim to `go test`.
    pub extra_args: Vec<String>,

    pub release: ReleaseConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            passes: parse_passes(DEFAULT_PASSES),
            user_pkg: None,
            timeout: None,
            testcase: None,
            cpu: DEFAULT_TEST_CPUS.to_string(),
            race: None,
            goarch: host_goarch().to_string(),
            coverdir: None,
            manual_ver: None,
            modules: Module::defaults(),
            root: PathBuf::from("."),
            bin_dir: PathBuf::from("bin"),
            base_branch: "master".to_string(),
            extra_args: Vec::new(),
            release: ReleaseConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Resolve raw settings into a configuration.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let defaults = Self::default();

        let passes = match settings.passes.as_deref() {
            Some(raw) if !raw.trim().is_empty() => parse_passes(raw),
            _ => defaults.passes,
        };

        let modules = match settings.modules.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Module::parse_list(raw)?,
            _ => defaults.modules,
        };

        let goarch = non_empty(settings.goarch).unwrap_or(defaults.goarch);
        if goarch.chars().any(char::is_whitespace) {
            return Err(HarnessError::Config(format!("invalid GOARCH: {goarch:?}")));
        }

        Ok(Self {
            passes,
            user_pkg: non_empty(settings.pkg).and_then(|p| normalize_user_pkg(&p)),
            timeout: non_empty(settings.timeout),
            testcase: non_empty(settings.testcase),
            cpu: non_empty(settings.cpu).unwrap_or(defaults.cpu),
            race: non_empty(settings.race),
            goarch,
            coverdir: settings.coverdir.filter(|p| !p.as_os_str().is_empty()),
            manual_ver: non_empty(settings.manual_ver),
            modules,
            root: settings.root.unwrap_or(defaults.root),
            bin_dir: settings.bin_dir.unwrap_or(defaults.bin_dir),
            base_branch: non_empty(settings.base_branch).unwrap_or(defaults.base_branch),
            extra_args: settings.extra_args,
            release: defaults.release,
        })
    }

    /// The `go test` race flag for this configuration.
    ///
    /// Unset `RACE` enables the detector only on amd64.
    pub fn race_flag(&self) -> String {
        match &self.race {
            Some(value) => format!("--race={value}"),
            None if self.goarch == "amd64" => "--race".to_string(),
            None => "--race=false".to_string(),
        }
    }

    /// `-run=<TESTCASE>` when a filter is configured.
    pub fn run_flag(&self) -> Option<String> {
        self.testcase.as_ref().map(|t| format!("-run={t}"))
    }

    /// Timeout for a pass whose own default is `default`.
    pub fn timeout_or(&self, default: &str) -> String {
        self.timeout.clone().unwrap_or_else(|| default.to_string())
    }

    /// Path of a module relative to the repository root.
    pub fn module_dir(&self, module: &Module) -> PathBuf {
        self.root.join(&module.path)
    }

    /// Binary directory resolved against the repository root.
    pub fn bin_path(&self) -> PathBuf {
        if self.bin_dir.is_absolute() {
            self.bin_dir.clone()
        } else {
            self.root.join(&self.bin_dir)
        }
    }

    /// `COVERDIR`, or the hard-requirement error when it is unset.
    pub fn require_coverdir(&self) -> Result<&Path> {
        self.coverdir.as_deref().ok_or_else(|| HarnessError::ToolMissing {
            tool: "COVERDIR".to_string(),
            hint: "set COVERDIR to the coverage output directory".to_string(),
        })
    }
}

/// Split a whitespace-separated pass list.
pub fn parse_passes(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Strip a leading `./` or `/` and a trailing `/` from a package override.
/// `.` alone means no override.
pub fn normalize_user_pkg(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    let trimmed = trimmed.strip_prefix('/').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() || trimmed == "." {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// GOARCH name of the host architecture.
pub fn host_goarch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "arm" => "arm",
        "powerpc64" => "ppc64le",
        "s390x" => "s390x",
        "riscv64" => "riscv64",
        other => other,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
