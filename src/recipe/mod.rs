//! Text rewrites against recipe and include files.
//!
//! Every operation here is stateless: it reads the candidate files, rewrites
//! matching lines and replaces each changed file atomically.
mod checksums;
mod git_rev;
mod license;
mod not_shipped;
mod patches;
mod rename;
mod suffix;

pub use checksums::{apply_checksums, parse_fetch_log, ChecksumSet};
pub use git_rev::{bump_revision, find_tag_commit, git_repo_url, tag_from_version};
pub use license::{
    capture_license_diff, find_license_mismatch, substitute_checksum, LicenseMismatch,
};
pub use not_shipped::{add_not_shipped, collect_not_shipped};
pub use patches::{find_faulty_patch, remove_patch, FaultyPatch, RemovedPatch};
pub use rename::{rename_versioned, strip_revision_markers};
pub use suffix::{current_suffix, is_uri_failure, replace_suffix, ARCHIVE_SUFFIXES};

use crate::env::EnvSnapshot;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// How a recipe obtains its sources, derived from `SRC_URI`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeKind {
    /// Release archive fetched over http(s) or ftp, pinned by checksums.
    Archive,
    /// Git checkout pinned by `SRCREV`.
    Git,
}

impl RecipeKind {
    /// `None` means the transport is not supported.
    pub fn detect(src_uri: &str) -> Option<Self> {
        if ["http://", "https://", "ftp://"]
            .iter()
            .any(|scheme| src_uri.contains(scheme))
        {
            Some(RecipeKind::Archive)
        } else if src_uri.contains("git://") {
            Some(RecipeKind::Git)
        } else {
            None
        }
    }
}

/// The recipe directory and naming tokens that identify one package's files.
#[derive(Debug, Clone)]
pub struct RecipeScope {
    pub dir: PathBuf,
    pub pn: String,
    /// Version token embedded in recipe file names.
    pub version: String,
    pub main_file: PathBuf,
    /// Also treat `<pn>*git*.bb` files as part of the set.
    pub include_git_named: bool,
}

impl RecipeScope {
    pub fn from_env(env: &EnvSnapshot) -> Result<Self> {
        Ok(Self {
            dir: env.recipe_dir()?,
            pn: env.pn()?.to_string(),
            version: env.pkgv()?.to_string(),
            main_file: env.recipe_file()?,
            include_git_named: false,
        })
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_git_named(mut self) -> Self {
        self.include_git_named = true;
        self
    }

    /// Recipe file set: `<pn>*<version>*.bb` files plus `<pn>*.inc` files.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let entries =
            fs::read_dir(&self.dir).with_context(|| format!("read {}", self.dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if self.in_set(name) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn in_set(&self, name: &str) -> bool {
        if !name.starts_with(&self.pn) {
            return false;
        }
        if name.contains(".inc") {
            return true;
        }
        let versioned = name.contains(&self.version)
            || (self.include_git_named && name.contains("git"));
        versioned && name.contains(".bb")
    }

    /// The shared include file and the primary recipe, when present.
    pub fn include_and_main(&self) -> Vec<PathBuf> {
        let include = self.dir.join(format!("{}.inc", self.pn));
        [include, self.main_file.clone()]
            .into_iter()
            .filter(|path| path.is_file())
            .collect()
    }
}

/// Rewrite `path` through `transform`; returns whether the content changed.
pub fn rewrite_file<F>(path: &Path, transform: F) -> Result<bool>
where
    F: FnOnce(&str) -> Result<String>,
{
    let original =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let updated = transform(&original)?;
    if updated == original {
        return Ok(false);
    }
    write_atomic(path, updated.as_bytes())?;
    Ok(true)
}

/// Rewrite every line of `path`; the closure returns the replacement text for
/// a line (including its newline), or an empty string to drop it.
pub fn rewrite_lines<F>(path: &Path, mut edit: F) -> Result<bool>
where
    F: FnMut(&str) -> String,
{
    rewrite_file(path, |text| {
        Ok(text.split_inclusive('\n').map(&mut edit).collect())
    })
}

/// Replace `path` with `bytes` without ever exposing a partial file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let staged = stage_atomic(path, bytes)?;
    staged
        .persist(path)
        .map_err(|err| anyhow!("replace {}: {}", path.display(), err.error))?;
    Ok(())
}

/// Write `bytes` to a temporary sibling of `path`. Dropping the handle
/// without persisting removes it and leaves `path` untouched.
pub fn stage_atomic(path: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", path.display()))?;
    let mut staged =
        NamedTempFile::new_in(dir).with_context(|| format!("stage {}", path.display()))?;
    staged
        .write_all(bytes)
        .with_context(|| format!("stage {}", path.display()))?;
    staged
        .as_file()
        .sync_all()
        .with_context(|| format!("sync {}", path.display()))?;
    Ok(staged)
}

/// Line ending of `line`, so replacements keep the file's convention.
fn line_ending(line: &str) -> &str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else if line.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}
