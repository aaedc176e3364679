use super::{line_ending, rewrite_lines, RecipeScope};
use anyhow::Result;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn checksum_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^SRC_URI\[(.*?)(md5|sha1|sha256|sha384|sha512)sum\]")
            .expect("regex for checksum assignments")
    })
}

/// Checksum assignment lines reported by a failed fetch, keyed by source label
/// (`""` for the unlabelled source, `"tarball."` for `SRC_URI[tarball.md5sum]`)
/// and then by algorithm.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumSet {
    lines: BTreeMap<String, BTreeMap<String, String>>,
}

impl ChecksumSet {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.values().map(BTreeMap::len).sum()
    }

    fn replacement(&self, line: &str) -> Option<&str> {
        let caps = checksum_line().captures(line)?;
        self.lines
            .get(&caps[1])
            .and_then(|by_algo| by_algo.get(&caps[2]))
            .map(String::as_str)
    }
}

/// Collect `SRC_URI[<label><algo>sum] = "..."` lines from a fetch log.
pub fn parse_fetch_log(log: &str) -> ChecksumSet {
    let mut set = ChecksumSet::default();
    for line in log.lines() {
        let Some(caps) = checksum_line().captures(line) else {
            continue;
        };
        set.lines
            .entry(caps[1].to_string())
            .or_default()
            .insert(caps[2].to_string(), line.trim_end().to_string());
    }
    set
}

/// Replace matching checksum assignments in every file of the recipe set.
/// Returns the number of lines replaced.
pub fn apply_checksums(scope: &RecipeScope, set: &ChecksumSet) -> Result<usize> {
    let mut replaced = 0;
    for path in scope.files()? {
        rewrite_lines(&path, |line| match set.replacement(line) {
            Some(new_line) => {
                replaced += 1;
                format!("{new_line}{}", line_ending(line))
            }
            None => line.to_string(),
        })?;
    }
    Ok(replaced)
}
