//! Resolved recipe variables captured from the build tool.
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Immutable snapshot of a recipe's resolved variables.
///
/// A new snapshot replaces the old one after every mutating build-tool call;
/// nothing patches a snapshot in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Parse `NAME=value` lines from an environment dump.
    ///
    /// The first assignment of a name wins and surrounding double quotes are
    /// stripped. Comments, `export`/function lines and blank lines are ignored.
    pub fn parse(text: &str) -> Self {
        let mut vars = BTreeMap::new();
        for line in text.lines() {
            if line.starts_with('#') {
                continue;
            }
            let Some((name, value)) = line.split_once('=') else {
                continue;
            };
            if name.is_empty() || name.contains(char::is_whitespace) {
                continue;
            }
            vars.entry(name.to_string())
                .or_insert_with(|| value.trim_matches('"').to_string());
        }
        Self { vars }
    }

    #[cfg(test)]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| anyhow!("variable {name} missing from recipe environment"))
    }

    /// Package name.
    pub fn pn(&self) -> Result<&str> {
        self.require("PN")
    }

    /// Current version as it appears in file names (`PKGV`, falling back to `PV`).
    pub fn pkgv(&self) -> Result<&str> {
        self.get("PKGV")
            .filter(|value| !value.is_empty())
            .map_or_else(|| self.require("PV"), Ok)
    }

    pub fn src_uri(&self) -> &str {
        self.get("SRC_URI").unwrap_or_default()
    }

    /// Path of the primary recipe file.
    pub fn recipe_file(&self) -> Result<PathBuf> {
        self.require("FILE").map(PathBuf::from)
    }

    pub fn recipe_dir(&self) -> Result<PathBuf> {
        let file = self.recipe_file()?;
        file.parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow!("recipe file {} has no parent", file.display()))
    }

    /// Source staging directory (`S`).
    pub fn source_dir(&self) -> Result<PathBuf> {
        self.require("S").map(PathBuf::from)
    }

    /// Task log directory (`T`, falling back to `WORKDIR`).
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.get("T").or_else(|| self.get("WORKDIR")).map(PathBuf::from)
    }
}
