use super::{line_ending, rewrite_file, RecipeScope};
use crate::error::UpgradeError;
use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::Path;

/// Patch named by a failed `do_patch` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultyPatch {
    pub name: String,
    /// The new sources already contain the change.
    pub reverse_applied: bool,
}

/// A patch that was deleted from the recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedPatch {
    pub name: String,
    /// First word of the patch's `Upstream-Status:` tag, lowercased.
    pub status: Option<String>,
    pub reverse_applied: bool,
}

impl RemovedPatch {
    /// Line for the commit message's removed-patches list.
    pub fn note(&self) -> String {
        let mut note = format!(" * {}", self.name);
        if let Some(status) = &self.status {
            note.push_str(&format!(" ({status})"));
        }
        if self.reverse_applied {
            note.push_str(" + reverse-applied");
        }
        note
    }
}

/// First patch reported as not applying (or applying in reverse).
pub fn find_faulty_patch(log: &str) -> Option<FaultyPatch> {
    for line in log.lines() {
        let line = line.trim_start();
        let Some(rest) = line.strip_prefix("Patch ") else {
            continue;
        };
        let Some((name, tail)) = rest.split_once(' ') else {
            continue;
        };
        let reverse_applied = tail.starts_with("can be reverse-applied");
        if reverse_applied || tail.starts_with("does not apply") {
            return Some(FaultyPatch {
                name: name.to_string(),
                reverse_applied,
            });
        }
    }
    None
}

/// Delete `patch` from the recipe's patch directories and drop its
/// `file://` reference from the include file and the main recipe.
///
/// Returns `None` when the patch is no longer on disk, so removing the same
/// patch twice leaves every file untouched.
pub fn remove_patch(scope: &RecipeScope, patch: &FaultyPatch) -> Result<Option<RemovedPatch>> {
    let dirs = [
        format!("{}-{}", scope.pn, scope.version),
        scope.pn.clone(),
        "files".to_string(),
    ];
    let mut status = None;
    let mut found = false;
    for dir in dirs {
        let path = scope.dir.join(dir).join(&patch.name);
        if !path.is_file() {
            continue;
        }
        found = true;
        if let Some(tag) = upstream_status(&path)? {
            status = Some(tag);
        }
        fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        tracing::info!(patch = %patch.name, path = %path.display(), "removed patch");
    }
    if !found {
        return Ok(None);
    }

    let uri = format!("file://{}", patch.name);
    for file in scope.include_and_main() {
        remove_uri(&file, &uri)?;
    }
    Ok(Some(RemovedPatch {
        name: patch.name.clone(),
        status,
        reverse_applied: patch.reverse_applied,
    }))
}

fn upstream_status(path: &Path) -> Result<Option<String>> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    let status = text
        .lines()
        .filter_map(|line| line.split_once("Upstream-Status:"))
        .filter_map(|(_, rest)| rest.split_whitespace().next())
        .map(str::to_lowercase)
        .next();
    Ok(status)
}

/// The four layouts a patch reference can take inside a `SRC_URI` value.
struct UriForms {
    mention: Regex,
    single_line: Regex,
    first_line: Regex,
    middle_line: Regex,
    last_line: Regex,
}

impl UriForms {
    fn new(uri: &str) -> Result<Self> {
        let uri = format!(r#"{}(?:;[^\s"\\]*)?"#, regex::escape(uri));
        let assign = r"SRC_URI(?:[:_](?:append|prepend))?\s*[+.?:]?=";
        let build = |pattern: String| {
            Regex::new(&pattern).with_context(|| format!("build pattern {pattern}"))
        };
        Ok(Self {
            mention: build(format!(r#"{uri}(?:[\s"\\]|$)"#))?,
            single_line: build(format!(r#"^{assign}\s*"\s*{uri}\s*"\s*$"#))?,
            first_line: build(format!(r#"^({assign}\s*"\s*){uri}\s*\\\s*$"#))?,
            middle_line: build(format!(r#"^[\t ]*{uri}\s*\\\s*$"#))?,
            last_line: build(format!(r#"^([\t ]*){uri}\s*"\s*$"#))?,
        })
    }

    fn rewrite(&self, line: &str) -> Option<String> {
        let ending = line_ending(line);
        let body = line.trim_end_matches(['\r', '\n']);
        if self.single_line.is_match(body) || self.middle_line.is_match(body) {
            return Some(String::new());
        }
        if let Some(caps) = self.first_line.captures(body) {
            return Some(format!("{}\\{ending}", &caps[1]));
        }
        if let Some(caps) = self.last_line.captures(body) {
            return Some(format!("{}\"{ending}", &caps[1]));
        }
        None
    }
}

fn remove_uri(path: &Path, uri: &str) -> Result<bool> {
    let forms = UriForms::new(uri)?;
    rewrite_file(path, |text| {
        let mut out = String::with_capacity(text.len());
        for line in text.split_inclusive('\n') {
            if !forms.mention.is_match(line) {
                out.push_str(line);
                continue;
            }
            let replacement = forms.rewrite(line).ok_or_else(|| {
                UpgradeError::Patch(format!(
                    "unrecognised reference to {uri} in {}",
                    path.display()
                ))
            })?;
            out.push_str(&replacement);
        }
        Ok(out)
    })
}
