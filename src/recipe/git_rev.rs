use super::{line_ending, rewrite_lines, RecipeScope};
use anyhow::Result;
use regex::Regex;
use std::sync::OnceLock;

fn srcrev_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"^SRCREV\s*=\s*".*""#).expect("regex for SRCREV"))
}

fn pv_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"^PV\s*=\s*"[^+"]*([^"]*)""#).expect("regex for PV"))
}

/// Release tag embedded in a git version string: `1.4+git0+8ac3f2` → `1.4`.
pub fn tag_from_version(version: &str) -> &str {
    match version.split_once('+') {
        Some((tag, rest)) if rest.contains('+') => tag,
        _ => version,
    }
}

/// First `git://` URL in a `SRC_URI` value, without its parameters.
pub fn git_repo_url(src_uri: &str) -> Option<&str> {
    let start = src_uri.find("git://")?;
    let rest = &src_uri[start..];
    let end = rest
        .find(|c: char| c == ';' || c.is_whitespace())
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Commit a tag points at, from `git ls-remote --tags` output. Peeled
/// (`^{}`) entries name the commit behind an annotated tag and win; a
/// `v`-prefixed tag is accepted when the bare one is missing.
pub fn find_tag_commit(ls_remote: &str, tag: &str) -> Option<String> {
    let lookup = |wanted: String| {
        ls_remote.lines().find_map(|line| {
            let mut parts = line.split_whitespace();
            let sha = parts.next()?;
            (parts.next()? == wanted).then(|| sha.to_string())
        })
    };
    [tag.to_string(), format!("v{tag}")].iter().find_map(|name| {
        lookup(format!("refs/tags/{name}^{{}}")).or_else(|| lookup(format!("refs/tags/{name}")))
    })
}

/// Point `SRCREV` at `sha` and move `PV` to `new_tag`, keeping any `+...`
/// suffix of the old value. Returns the number of lines rewritten.
pub fn bump_revision(scope: &RecipeScope, sha: &str, new_tag: &str) -> Result<usize> {
    let mut changed = 0;
    for path in scope.files()? {
        rewrite_lines(&path, |line| {
            let ending = line_ending(line);
            if srcrev_line().is_match(line) {
                changed += 1;
                return format!("SRCREV = \"{sha}\"{ending}");
            }
            if let Some(caps) = pv_line().captures(line) {
                changed += 1;
                return format!("PV = \"{new_tag}{}\"{ending}", &caps[1]);
            }
            line.to_string()
        })?;
    }
    Ok(changed)
}
