//! Typed paths into a build directory.
use std::path::{Path, PathBuf};

/// Locations the helper reads and writes, all derived from the build
/// directory.
#[derive(Debug, Clone)]
pub struct HelperPaths {
    build_dir: PathBuf,
}

impl HelperPaths {
    pub fn new(build_dir: PathBuf) -> Self {
        Self { build_dir }
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Return the `upgrade-helper/` directory path.
    pub fn helper_dir(&self) -> PathBuf {
        self.build_dir.join("upgrade-helper")
    }

    /// Return the `upgrade-helper/config.json` path.
    pub fn config_path(&self) -> PathBuf {
        self.helper_dir().join("config.json")
    }

    /// Return the `upgrade-helper/history.jsonl` path.
    pub fn history_path(&self) -> PathBuf {
        self.helper_dir().join("history.jsonl")
    }

    /// Return the `upgrade-helper/report.json` path.
    pub fn report_path(&self) -> PathBuf {
        self.helper_dir().join("report.json")
    }

    /// Per-package working directory for logs, diffs and the exported patch.
    pub fn package_workdir(&self, pn: &str) -> PathBuf {
        self.helper_dir().join(pn)
    }

    /// Output of the upstream version check.
    pub fn checkpkg_csv(&self) -> PathBuf {
        self.tmp_dir().join("log").join("checkpkg.csv")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.build_dir.join("tmp")
    }

    pub fn sstate_dir(&self) -> PathBuf {
        self.build_dir.join("sstate-cache")
    }
}
