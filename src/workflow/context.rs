use crate::env::EnvSnapshot;
use crate::error::ToolError;
use crate::recipe::{RecipeKind, RecipeScope};
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// File in the package workdir collecting the output of every failed build
/// tool invocation.
pub(crate) const TRANSCRIPT_LOG: &str = "bitbake_error_log.txt";

/// One package the user asked to upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PackageRequest {
    pub(crate) pn: String,
    /// Explicit target version; `None` leaves it to the upstream check.
    pub(crate) target: Option<String>,
    pub(crate) maintainer: Option<String>,
}

impl PackageRequest {
    pub(crate) fn new(pn: impl Into<String>, target: Option<String>) -> Self {
        Self {
            pn: pn.into(),
            target,
            maintainer: None,
        }
    }
}

/// State of one package's upgrade attempt, threaded through every step.
#[derive(Debug)]
pub(crate) struct UpgradeContext {
    pub(crate) pn: String,
    pub(crate) target: Option<String>,
    pub(crate) maintainer: Option<String>,
    pub(crate) workdir: PathBuf,
    pub(crate) env: Option<EnvSnapshot>,
    /// Snapshot taken before the recipe was renamed.
    pub(crate) original_env: Option<EnvSnapshot>,
    pub(crate) kind: Option<RecipeKind>,
    pub(crate) old_version: Option<String>,
    /// Commit message fragments, in the order they were produced.
    pub(crate) notes: Vec<String>,
    /// Archive suffixes already fetched, including the recipe's own.
    pub(crate) tried_suffixes: BTreeSet<String>,
    pub(crate) checksums_changed: bool,
    pub(crate) license_diff: Option<PathBuf>,
}

impl UpgradeContext {
    pub(crate) fn new(request: &PackageRequest, workdir: PathBuf) -> Self {
        Self {
            pn: request.pn.clone(),
            target: request.target.clone(),
            maintainer: request.maintainer.clone(),
            workdir,
            env: None,
            original_env: None,
            kind: None,
            old_version: None,
            notes: Vec::new(),
            tried_suffixes: BTreeSet::new(),
            checksums_changed: false,
            license_diff: None,
        }
    }

    pub(crate) fn env(&self) -> Result<&EnvSnapshot> {
        self.env
            .as_ref()
            .ok_or_else(|| anyhow!("{}: recipe environment not loaded", self.pn))
    }

    pub(crate) fn target(&self) -> Result<&str> {
        self.target
            .as_deref()
            .ok_or_else(|| anyhow!("{}: no target version", self.pn))
    }

    /// Recipe files for the current environment.
    pub(crate) fn scope(&self) -> Result<RecipeScope> {
        let scope = RecipeScope::from_env(self.env()?)?;
        Ok(match self.kind {
            Some(RecipeKind::Git) => scope.with_git_named(),
            _ => scope,
        })
    }

    pub(crate) fn commit_message(&self) -> String {
        let version = self.target.as_deref().unwrap_or("unknown version");
        let mut message = format!("{}: upgrade to {}\n\n", self.pn, version);
        for note in &self.notes {
            message.push_str(note);
            message.push('\n');
        }
        message
    }

    /// Append a failed invocation's stdout and stderr to the workdir
    /// transcript and return the transcript path.
    pub(crate) fn save_transcript(&self, err: &ToolError) -> Result<PathBuf> {
        let path = self.workdir.join(TRANSCRIPT_LOG);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        writeln!(file, "==== {}", err.command)
            .and_then(|_| file.write_all(err.stdout.as_bytes()))
            .and_then(|_| {
                if err.stderr.is_empty() {
                    return Ok(());
                }
                writeln!(file, "---- stderr")?;
                file.write_all(err.stderr.as_bytes())
            })
            .with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}
