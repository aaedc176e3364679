//! Failure classification from build tool transcripts.
//!
//! A failed build prints where each failing task stored its log. The
//! classifier turns those lines into one `FailureRecord` per failing recipe;
//! everything else about the failure is read later from the task log itself.
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Build phase a failed task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailurePhase {
    Fetch,
    Patch,
    Configure,
    Compile,
    Package,
    Unknown,
}

impl FailurePhase {
    pub fn from_task(task: &str) -> Self {
        match task {
            "do_fetch" | "do_unpack" => FailurePhase::Fetch,
            "do_patch" => FailurePhase::Patch,
            "do_configure" | "do_populate_lic" => FailurePhase::Configure,
            "do_compile" | "do_install" => FailurePhase::Compile,
            task if task.starts_with("do_package") => FailurePhase::Package,
            _ => FailurePhase::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FailurePhase::Fetch => "fetch",
            FailurePhase::Patch => "patch",
            FailurePhase::Configure => "configure",
            FailurePhase::Compile => "compile",
            FailurePhase::Package => "package",
            FailurePhase::Unknown => "unknown",
        }
    }
}

/// One failing recipe extracted from a build transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub recipe: String,
    pub phase: FailurePhase,
    pub task: String,
    pub log_path: PathBuf,
    pub machine: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The recipe cannot be built for this host; not an error.
    IncompatibleHost,
    /// Failing recipes keyed by name. Later lines for the same recipe win.
    Failed {
        machine: Option<String>,
        records: BTreeMap<String, FailureRecord>,
    },
    /// No recognizable failure line.
    Unknown,
}

pub trait FailureClassifier {
    /// Classify the stdout of a failed build of `pn`. `transcript_log` is where
    /// that stdout was saved; it stands in for the log of failures that have
    /// no task log of their own.
    fn classify(&self, pn: &str, transcript: &str, transcript_log: &Path) -> Classification;
}

struct Patterns {
    machine: Regex,
    task_log: Regex,
    not_shipped: Regex,
    incompatible: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        machine: Regex::new(r#"^MACHINE\s*=\s*"([^"]*)""#).expect("regex for MACHINE"),
        task_log: Regex::new(
            r"^ERROR: Logfile of failure stored in: (.*/([^/]+)/[^/]+/temp/log\.([^.]+)\.\d+)",
        )
        .expect("regex for task log"),
        not_shipped: Regex::new(r"^ERROR: .*QA Issue: ([^ :]+): .*not shipped")
            .expect("regex for not shipped"),
        incompatible: Regex::new(r"(?:^|\s)(\S+) was skipped: incompatible with host")
            .expect("regex for incompatible host"),
    })
}

/// Classifier for bitbake's console output.
#[derive(Debug, Default)]
pub struct LogScrapeClassifier;

impl FailureClassifier for LogScrapeClassifier {
    fn classify(&self, pn: &str, transcript: &str, transcript_log: &Path) -> Classification {
        let patterns = patterns();
        let mut machine = None;
        let mut records: BTreeMap<String, FailureRecord> = BTreeMap::new();

        for line in transcript.lines() {
            let line = line.trim_end();
            if let Some(caps) = patterns.incompatible.captures(line) {
                if &caps[1] == pn {
                    return Classification::IncompatibleHost;
                }
            }
            if let Some(caps) = patterns.machine.captures(line) {
                machine = Some(caps[1].to_string());
            } else if let Some(caps) = patterns.task_log.captures(line) {
                let task = caps[3].to_string();
                records.insert(
                    caps[2].to_string(),
                    FailureRecord {
                        recipe: caps[2].to_string(),
                        phase: FailurePhase::from_task(&task),
                        task,
                        log_path: PathBuf::from(&caps[1]),
                        machine: None,
                    },
                );
            } else if let Some(caps) = patterns.not_shipped.captures(line) {
                records.insert(
                    caps[1].to_string(),
                    FailureRecord {
                        recipe: caps[1].to_string(),
                        phase: FailurePhase::Package,
                        task: "do_package".to_string(),
                        log_path: transcript_log.to_path_buf(),
                        machine: None,
                    },
                );
            }
        }

        if records.is_empty() {
            return Classification::Unknown;
        }
        for record in records.values_mut() {
            record.machine = machine.clone();
        }
        tracing::debug!(
            pn,
            machine = machine.as_deref().unwrap_or("default"),
            failing = records.len(),
            "classified build failure"
        );
        Classification::Failed { machine, records }
    }
}
