//! In-process source checks.
//!
//! These follow the silent-checker convention: an empty [`CheckOutput`] means
//! the tree is clean, anything else is the list of findings.

use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::checker::{CheckContext, Checker, ToolRequirement};
use crate::command::{CheckOutput, CommandSpec};
use crate::error::{HarnessError, Result};

/// Directories never scanned.
const SKIPPED_DIRS: &[&str] = &[".git", "vendor", "gopath.proto", "node_modules"];

/// Collect files under `dir` with extension `ext`, sorted.
pub fn source_files(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk(dir, ext, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk(dir: &Path, ext: &str, files: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            let skipped = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| SKIPPED_DIRS.contains(&n))
                .unwrap_or(false);
            if !skipped {
                walk(&path, ext, files)?;
            }
        } else if path.extension().map(|e| e == ext).unwrap_or(false) {
            files.push(path);
        }
    }
    Ok(())
}

fn display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// Flags second-person wording in Markdown documentation.
#[derive(Debug, Clone, Default)]
pub struct MarkdownYouChecker;

impl MarkdownYouChecker {
    pub fn scan(root: &Path) -> Result<String> {
        let pattern = Regex::new(r"[Yy]ou[r]?[ '.,;]")?;
        let mut findings = Vec::new();
        for file in source_files(root, "md")? {
            let rel = display(root, &file);
            if rel.starts_with("Documentation/v2") {
                continue;
            }
            let content = std::fs::read_to_string(&file)?;
            for (idx, line) in content.lines().enumerate() {
                if pattern.is_match(line) {
                    findings.push(format!("{rel}:{}:{line}", idx + 1));
                }
            }
        }
        if findings.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!("found 'you' in documentation:\n{}", findings.join("\n")))
        }
    }
}

#[async_trait]
impl Checker for MarkdownYouChecker {
    fn name(&self) -> &str {
        "markdown_you"
    }

    fn description(&self) -> &str {
        "no second-person wording in Markdown"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutput> {
        Ok(CheckOutput::findings(Self::scan(ctx.dir)?))
    }
}

/// Requires a copyright notice (or generated-code marker) in every Go file.
#[derive(Debug, Clone, Default)]
pub struct LicenseHeaderChecker;

impl LicenseHeaderChecker {
    pub fn scan(root: &Path) -> Result<String> {
        let header = Regex::new(r"Copyright|generated|GENERATED")?;
        let mut missing = Vec::new();
        for file in source_files(root, "go")? {
            let content = std::fs::read_to_string(&file)?;
            let has_header = content.lines().take(3).any(|line| header.is_match(line));
            if !has_header {
                missing.push(format!("  {}", display(root, &file)));
            }
        }
        if missing.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!("license header checking failed:\n{}", missing.join("\n")))
        }
    }
}

#[async_trait]
impl Checker for LicenseHeaderChecker {
    fn name(&self) -> &str {
        "license_header"
    }

    fn description(&self) -> &str {
        "license header in every Go file"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutput> {
        Ok(CheckOutput::findings(Self::scan(ctx.dir)?))
    }
}

/// Requires one receiver name per type within a package directory.
#[derive(Debug, Clone, Default)]
pub struct ReceiverNameChecker;

impl ReceiverNameChecker {
    pub fn scan(root: &Path) -> Result<String> {
        let receiver = Regex::new(r"^func \((\w+) \*?(\w+)\)")?;
        let mut names: BTreeMap<(String, String), BTreeSet<String>> = BTreeMap::new();

        for file in source_files(root, "go")? {
            let rel = display(root, &file);
            if rel.contains("generated") || rel.contains("pb/") || rel.ends_with(".pb.go") {
                continue;
            }
            let dir = file
                .parent()
                .map(|p| display(root, p))
                .unwrap_or_default();
            let content = std::fs::read_to_string(&file)?;
            for line in content.lines() {
                if let Some(caps) = receiver.captures(line) {
                    let type_name = caps[2].to_string();
                    if type_name.contains('_') {
                        continue;
                    }
                    names
                        .entry((dir.clone(), type_name))
                        .or_default()
                        .insert(caps[1].to_string());
                }
            }
        }

        let mismatched: Vec<String> = names
            .into_iter()
            .filter(|(_, recvs)| recvs.len() > 1)
            .map(|((dir, type_name), recvs)| {
                let dir = if dir.is_empty() { ".".to_string() } else { dir };
                let recvs: Vec<_> = recvs.into_iter().collect();
                format!("  {dir} {type_name}: {}", recvs.join(", "))
            })
            .collect();

        if mismatched.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!("Mismatched receiver names:\n{}", mismatched.join("\n")))
        }
    }
}

#[async_trait]
impl Checker for ReceiverNameChecker {
    fn name(&self) -> &str {
        "receiver_name"
    }

    fn description(&self) -> &str {
        "consistent method receiver names"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutput> {
        Ok(CheckOutput::findings(Self::scan(ctx.dir)?))
    }
}

/// Checks commit titles since the merge base with the base branch.
#[derive(Debug, Clone, Default)]
pub struct CommitTitleChecker;

impl CommitTitleChecker {
    /// Expected `<package>{, <package>}: <description>`.
    pub fn validate(titles: &[String]) -> Result<String> {
        let format = Regex::new(r"^[^\s:,]+(, [^\s:,]+)*: \S")?;
        let bad: Vec<&String> = titles
            .iter()
            .filter(|t| !t.starts_with("Merge") && !t.starts_with("Revert"))
            .filter(|t| !format.is_match(t))
            .collect();

        if bad.is_empty() {
            return Ok(String::new());
        }
        let mut out = String::from(
            "Expected commit title format '<package>{\", \"<package>}: <description>'",
        );
        for title in bad {
            out.push_str("\nGot: ");
            out.push_str(title);
        }
        Ok(out)
    }
}

#[async_trait]
impl Checker for CommitTitleChecker {
    fn name(&self) -> &str {
        "commit_title"
    }

    fn description(&self) -> &str {
        "commit titles prefixed with the affected packages"
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutput> {
        let base = ctx
            .executor
            .execute(
                &CommandSpec::new("git")
                    .args(["merge-base", "HEAD", ctx.config.base_branch.as_str()])
                    .current_dir(ctx.dir),
            )
            .await?;
        if !base.passed() {
            return Ok(base.into());
        }
        let base = base.stdout.trim().to_string();
        if base.is_empty() {
            return Err(HarnessError::Config(format!(
                "no merge base with {}",
                ctx.config.base_branch
            )));
        }

        let log = ctx
            .executor
            .execute(
                &CommandSpec::new("git")
                    .args(["log", "--format=%s"])
                    .arg(format!("{base}...HEAD"))
                    .current_dir(ctx.dir),
            )
            .await?;
        if !log.passed() {
            return Ok(log.into());
        }

        let titles: Vec<String> = log
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Ok(CheckOutput::findings(Self::validate(&titles)?))
    }
}

/// Runs shellcheck over every shell script in the repository.
#[derive(Debug, Clone, Default)]
pub struct ShellcheckChecker;

#[async_trait]
impl Checker for ShellcheckChecker {
    fn name(&self) -> &str {
        "shellcheck"
    }

    fn description(&self) -> &str {
        "shellcheck over shell scripts"
    }

    fn requirement(&self) -> Option<ToolRequirement> {
        Some(ToolRequirement::soft(
            "shellcheck",
            "apt-get install shellcheck",
        ))
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckOutput> {
        let scripts = source_files(ctx.dir, "sh")?;
        if scripts.is_empty() {
            return Ok(CheckOutput::clean());
        }
        let spec = CommandSpec::new("shellcheck")
            .arg("-fgcc")
            .args(scripts.iter().map(|p| display(ctx.dir, p)))
            .current_dir(ctx.dir);
        let output = ctx.executor.execute(&spec).await?;
        // shellcheck exits non-zero with findings; the findings are what matter
        Ok(CheckOutput::findings(output.combined()))
    }
}
