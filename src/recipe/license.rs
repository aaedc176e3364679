use super::{rewrite_lines, RecipeScope};
use anyhow::{Context, Result};
use regex::Regex;
use similar::TextDiff;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// A license file whose checksum no longer matches `LIC_FILES_CHKSUM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseMismatch {
    /// Path relative to the source directory.
    pub file: String,
    pub old_md5: String,
    pub new_md5: Option<String>,
}

fn old_checksum_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?:md5 data is not matching|LIC_FILES_CHKSUM does not match) for file://([^;\s]+)\S*?;md5=([0-9a-fA-F]+)",
        )
        .expect("regex for license mismatch")
    })
}

fn new_checksum_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"The new md5 checksum is ([0-9a-fA-F]+)").expect("regex for new license md5")
    })
}

/// Parse a configure or license log for a checksum mismatch reported against
/// recipe `pn`.
pub fn find_license_mismatch(log: &str, pn: &str) -> Option<LicenseMismatch> {
    let mut mismatch: Option<LicenseMismatch> = None;
    for line in log.lines().filter(|line| line.contains(pn)) {
        if let Some(caps) = old_checksum_line().captures(line) {
            mismatch = Some(LicenseMismatch {
                file: caps[1].to_string(),
                old_md5: caps[2].to_string(),
                new_md5: None,
            });
        } else if let Some(caps) = new_checksum_line().captures(line) {
            if let Some(found) = mismatch.as_mut() {
                found.new_md5 = Some(caps[1].to_string());
            }
        }
    }
    mismatch
}

fn read_or_empty(path: &Path) -> Result<String> {
    match fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).to_string()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

/// Write a unified diff of the license file between the old and new source
/// trees to `<workdir>/<basename>.diff`, plus both checksums to
/// `license_checksums.txt`. Returns the diff path.
pub fn capture_license_diff(
    old_source: &Path,
    new_source: &Path,
    mismatch: &LicenseMismatch,
    workdir: &Path,
) -> Result<PathBuf> {
    let old_text = read_or_empty(&old_source.join(&mismatch.file))?;
    let new_text = read_or_empty(&new_source.join(&mismatch.file))?;
    let diff = TextDiff::from_lines(&old_text, &new_text)
        .unified_diff()
        .context_radius(3)
        .header(
            &format!("old/{}", mismatch.file),
            &format!("new/{}", mismatch.file),
        )
        .to_string();

    let basename = Path::new(&mismatch.file)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| mismatch.file.clone());
    let diff_path = workdir.join(format!("{basename}.diff"));
    fs::write(&diff_path, diff).with_context(|| format!("write {}", diff_path.display()))?;

    let sums_path = workdir.join("license_checksums.txt");
    let sums = format!(
        "old checksum = {}\nnew checksum = {}\n",
        mismatch.old_md5,
        mismatch.new_md5.as_deref().unwrap_or("unknown")
    );
    fs::write(&sums_path, sums).with_context(|| format!("write {}", sums_path.display()))?;
    Ok(diff_path)
}

/// Replace `old_md5` with `new_md5` in every file of the recipe set. Returns
/// the number of lines changed.
pub fn substitute_checksum(scope: &RecipeScope, old_md5: &str, new_md5: &str) -> Result<usize> {
    let mut changed = 0;
    for path in scope.files()? {
        rewrite_lines(&path, |line| {
            if line.contains(old_md5) {
                changed += 1;
                line.replace(old_md5, new_md5)
            } else {
                line.to_string()
            }
        })?;
    }
    Ok(changed)
}
