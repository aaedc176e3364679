//! Reader for the upstream version check report (`checkpkg.csv`).
use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

fn checkpkg_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([^ \t]*)[ \t]+([^ \t]*)[ \t]+([^ \t]*).*<(.*)@(.*)>[ \t]+.*")
            .expect("regex for checkpkg line")
    })
}

/// One recipe with the version upstream currently offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamCandidate {
    pub pn: String,
    pub current: String,
    pub next: String,
    pub maintainer: String,
}

impl UpstreamCandidate {
    /// Upstream has a real version that differs from ours.
    pub fn is_upgradable(&self) -> bool {
        self.current != self.next && self.next != "N/A" && self.next != "INVALID"
    }
}

/// `None` for the header and for lines without a maintainer address.
pub fn parse_checkpkg_line(line: &str) -> Option<UpstreamCandidate> {
    let caps = checkpkg_line().captures(line)?;
    Some(UpstreamCandidate {
        pn: caps[1].to_string(),
        current: caps[2].to_string(),
        next: caps[3].to_string(),
        maintainer: format!("{}@{}", &caps[4], &caps[5]),
    })
}

pub fn read_candidates(path: &Path) -> Result<Vec<UpstreamCandidate>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("read upstream version report {}", path.display()))?;
    Ok(text.lines().filter_map(parse_checkpkg_line).collect())
}
