//! Helper configuration.
//!
//! Settings live in `<build>/upgrade-helper/config.json`; every field has a
//! default so a missing file or a partial one both work.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// User-tunable behavior of an upgrade run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UpgradeConfig {
    pub schema_version: u32,
    /// Machines each upgrade is compiled for, in order.
    pub machines: Vec<String>,
    pub build_command: String,
    pub git_command: String,
    /// Commit author as `Name <email>`; unset commits as the local git user.
    pub author: Option<String>,
    /// Packages never attempted in batch mode.
    pub blacklist: Vec<String>,
    /// When non-empty, only these maintainers' packages are attempted in
    /// batch mode.
    pub maintainers_whitelist: Vec<String>,
    /// Remove `sstate-cache/` before a batch run.
    pub clean_sstate: bool,
    /// Remove `tmp/` before a batch run.
    pub clean_tmp: bool,
    /// Also drop the commit of a successful upgrade, so later packages build
    /// against the original tree.
    pub drop_previous_commits: bool,
    /// In auto mode, revert the commit of a failed upgrade.
    pub drop_failed_changes: bool,
    /// Days before a fetch or unknown failure of the same target is retried.
    pub retry_cooldown_days: u32,
    /// Attempt packages in dependency order (`bitbake -g`).
    pub order_by_dependencies: bool,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        default_config()
    }
}

/// Defaults used when no config file exists.
pub fn default_config() -> UpgradeConfig {
    UpgradeConfig {
        schema_version: CONFIG_SCHEMA_VERSION,
        machines: ["qemux86", "qemux86-64", "qemuarm", "qemumips", "qemuppc"]
            .iter()
            .map(|machine| machine.to_string())
            .collect(),
        build_command: "bitbake".to_string(),
        git_command: "git".to_string(),
        author: None,
        blacklist: Vec::new(),
        maintainers_whitelist: Vec::new(),
        clean_sstate: false,
        clean_tmp: false,
        drop_previous_commits: false,
        drop_failed_changes: true,
        retry_cooldown_days: 7,
        order_by_dependencies: false,
    }
}

/// Load `path` when it exists; a missing file yields the defaults unless
/// `required` is set.
pub fn load_config(path: &Path, required: bool) -> Result<UpgradeConfig> {
    if !path.exists() {
        if required {
            return Err(anyhow!("config {} does not exist", path.display()));
        }
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(default_config());
    }
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: UpgradeConfig =
        serde_json::from_slice(&bytes).context("parse upgrade-helper config JSON")?;
    Ok(config)
}

/// Persist a config to disk in a stable JSON format.
pub fn write_config(path: &Path, config: &UpgradeConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("create upgrade-helper dir")?;
    }
    let text = serde_json::to_string_pretty(config).context("serialize config")?;
    fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn validate_config(config: &UpgradeConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {}",
            config.schema_version
        ));
    }
    if config.machines.iter().all(|machine| machine.trim().is_empty()) {
        return Err(anyhow!("machines must list at least one machine"));
    }
    if config.retry_cooldown_days == 0 {
        return Err(anyhow!("retry_cooldown_days must be at least 1"));
    }
    if config.build_command.trim().is_empty() || config.git_command.trim().is_empty() {
        return Err(anyhow!("build_command and git_command must be non-empty"));
    }
    if let Some(author) = config.author.as_deref() {
        if !(author.contains('<') && author.ends_with('>')) {
            return Err(anyhow!("author must look like \"Name <email>\" (got {author:?})"));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
