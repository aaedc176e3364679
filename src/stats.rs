//! Run statistics: outcome counts overall, per status label and per
//! maintainer.
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

const NOT_NEEDED: &str = "UpgradeNotNeeded";
const SUCCEEDED: &str = "Succeeded";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatEntry {
    pub pn: String,
    pub version: String,
    pub maintainer: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintainerCounts {
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Statistics {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Packages grouped by status label.
    pub by_status: BTreeMap<String, Vec<StatEntry>>,
    pub by_maintainer: BTreeMap<String, MaintainerCounts>,
}

impl Statistics {
    /// Count one finished package. Packages that needed no upgrade are not
    /// attempts.
    pub fn record(&mut self, pn: &str, version: &str, maintainer: &str, status: &str) {
        if status == NOT_NEEDED {
            return;
        }
        self.by_status
            .entry(status.to_string())
            .or_default()
            .push(StatEntry {
                pn: pn.to_string(),
                version: version.to_string(),
                maintainer: maintainer.to_string(),
            });
        let counts = self.by_maintainer.entry(maintainer.to_string()).or_default();
        if status == SUCCEEDED {
            self.succeeded += 1;
            counts.succeeded += 1;
        } else {
            self.failed += 1;
            counts.failed += 1;
        }
        self.attempted += 1;
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let rule = "=".repeat(52);
        let _ = writeln!(out, "Upgrade statistics:\n{rule}");
        for (status, entries) in &self.by_status {
            let _ = writeln!(out, "* {status}: {}", entries.len());
            for entry in entries {
                let _ = writeln!(out, "    {}, {}, {}", entry.pn, entry.version, entry.maintainer);
            }
        }
        let _ = writeln!(out, "{}", "+".repeat(52));
        let _ = writeln!(
            out,
            "TOTAL: attempted={} succeeded={}({:.2}%) failed={}({:.2}%)\n",
            self.attempted,
            self.succeeded,
            percent(self.succeeded, self.attempted),
            self.failed,
            percent(self.failed, self.attempted)
        );
        let _ = writeln!(out, "* Statistics per maintainer:");
        for (maintainer, counts) in &self.by_maintainer {
            let attempted = counts.succeeded + counts.failed;
            let name = maintainer.split('@').next().unwrap_or(maintainer);
            let _ = writeln!(
                out,
                "    {name}: attempted={attempted} succeeded={}({:.2}%) failed={}({:.2}%)",
                counts.succeeded,
                percent(counts.succeeded, attempted),
                counts.failed,
                percent(counts.failed, attempted)
            );
        }
        out
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 * 100.0 / whole as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Statistics {
        let mut stats = Statistics::default();
        stats.record("foo", "1.2", "jane@example.com", "Succeeded");
        stats.record("bar", "3.2", "jane@example.com", "Failed(do_compile)");
        stats.record("baz", "2.1", "john@example.com", "Failed(do_fetch)");
        stats.record("qux", "1.0", "john@example.com", "UpgradeNotNeeded");
        stats
    }

    #[test]
    fn not_needed_upgrades_are_not_attempts() {
        let stats = sample();
        assert_eq!(stats.attempted, 3);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 2);
        assert!(!stats.by_status.contains_key("UpgradeNotNeeded"));
        assert_eq!(
            stats.by_maintainer["jane@example.com"],
            MaintainerCounts {
                succeeded: 1,
                failed: 1
            }
        );
    }

    #[test]
    fn render_lists_statuses_and_maintainers() {
        let text = sample().render();
        assert!(text.contains("* Failed(do_compile): 1\n    bar, 3.2, jane@example.com\n"));
        assert!(text.contains("TOTAL: attempted=3 succeeded=1(33.33%) failed=2(66.67%)"));
        assert!(text.contains("    jane: attempted=2 succeeded=1(50.00%) failed=1(50.00%)"));
        assert!(text.contains("    john: attempted=1 succeeded=0(0.00%) failed=1(100.00%)"));
    }

    #[test]
    fn empty_run_renders_zero_percentages() {
        let text = Statistics::default().render();
        assert!(text.contains("attempted=0 succeeded=0(0.00%) failed=0(0.00%)"));
    }
}
