use super::{rewrite_lines, RecipeScope};
use anyhow::{Context, Result};
use std::fs;

/// Archive suffixes tried, in order, when upstream no longer serves the
/// current one.
pub const ARCHIVE_SUFFIXES: &[&str] = &[
    "tar.gz",
    "tgz",
    "zip",
    "tar.bz2",
    "tar.xz",
    "tar.lz4",
    "bz2",
    "lz4",
    "orig.tar.gz",
    "src.tar.gz",
    "src.rpm",
    "src.tgz",
    "stable.tar.gz",
];

const VERSION_MARKER: &str = "${PV}.";

/// True when the fetch failed to download the URL at all, as opposed to
/// downloading something with unexpected checksums.
pub fn is_uri_failure(log: &str) -> bool {
    log.contains("Fetcher failure for URL") && !log.contains("Checksum mismatch")
}

/// Byte range of the suffix following `${PV}.` in `line`.
fn suffix_span(line: &str) -> Option<(usize, usize)> {
    let start = line.find(VERSION_MARKER)? + VERSION_MARKER.len();
    let rest = &line[start..];
    let len = rest
        .find(|c: char| matches!(c, '"' | ' ' | ';' | '\\' | '\r' | '\n' | '\t'))
        .unwrap_or(rest.len());
    (len > 0).then_some((start, start + len))
}

/// An assignment whose quoted value is still open and carries on to the next
/// line.
fn continues_open_value(line: &str) -> bool {
    line.trim_end().ends_with('\\') && line.matches('"').count() == 1
}

/// Tracks whether a line carries the versioned source: either the `SRC_URI`
/// assignment itself or the first line continuing it.
#[derive(Default)]
struct SourceTracker {
    continuation: bool,
}

impl SourceTracker {
    fn carries_suffix(&mut self, line: &str) -> bool {
        if line.starts_with("SRC_URI") && !line.starts_with("SRC_URI[") {
            let found = suffix_span(line).is_some();
            self.continuation = !found && continues_open_value(line);
            return found;
        }
        if self.continuation {
            self.continuation = false;
            return suffix_span(line).is_some();
        }
        false
    }
}

/// Suffix currently used by the recipe's versioned source, if any.
pub fn current_suffix(scope: &RecipeScope) -> Result<Option<String>> {
    for path in scope.files()? {
        let text =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let mut tracker = SourceTracker::default();
        for line in text.lines() {
            if tracker.carries_suffix(line) {
                if let Some((start, end)) = suffix_span(line) {
                    return Ok(Some(line[start..end].to_string()));
                }
            }
        }
    }
    Ok(None)
}

/// Swap the suffix of the versioned source for `suffix` in every file of the
/// set. Returns false when no source line was found.
pub fn replace_suffix(scope: &RecipeScope, suffix: &str) -> Result<bool> {
    let mut replaced = false;
    for path in scope.files()? {
        let mut tracker = SourceTracker::default();
        rewrite_lines(&path, |line| {
            if !tracker.carries_suffix(line) {
                return line.to_string();
            }
            match suffix_span(line) {
                Some((start, end)) => {
                    replaced = true;
                    format!("{}{}{}", &line[..start], suffix, &line[end..])
                }
                None => line.to_string(),
            }
        })?;
    }
    Ok(replaced)
}
