//! Failure taxonomy for one upgrade attempt.
//!
//! Plumbing errors travel as `anyhow::Error`; the kinds below are raised as
//! typed values so the batch driver can label outcomes by downcasting.
use thiserror::Error;

/// A build tool or version control command that exited unsuccessfully.
///
/// The full transcript is kept because it is the only input the failure
/// classifier gets.
#[derive(Debug, Clone, Error)]
#[error("'{command}' failed")]
pub struct ToolError {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
}

impl ToolError {
    pub fn new(
        command: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// True when either stream contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.stdout.contains(needle) || self.stderr.contains(needle)
    }
}

/// Terminal failure kinds of the upgrade engine.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("do_fetch failed: {0}")]
    Fetch(String),
    #[error("do_patch failed: {0}")]
    Patch(String),
    #[error("do_configure failed")]
    Configure,
    #[error("license checksum does not match for {file}")]
    LicenseMismatch { file: String },
    #[error("do_compile failed for {recipe}")]
    Compile { recipe: String },
    #[error("do_package failed: {0}")]
    Packaging(String),
    #[error("could not detect failed task: {0}")]
    Unknown(String),
    #[error("empty environment returned for {recipe}")]
    EmptyEnvironment { recipe: String },
    #[error("aborted by user")]
    Aborted,
    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl UpgradeError {
    /// Short status label recorded in history and statistics.
    pub fn label(&self) -> &'static str {
        match self {
            UpgradeError::Fetch(_) => "Failed(do_fetch)",
            UpgradeError::Patch(_) => "Failed(do_patch)",
            UpgradeError::Configure => "Failed(do_configure)",
            UpgradeError::LicenseMismatch { .. } => "Failed(license issue)",
            UpgradeError::Compile { .. } => "Failed(do_compile)",
            UpgradeError::Packaging(_) => "Failed(do_package)",
            UpgradeError::EmptyEnvironment { .. } => "Failed(get_env)",
            UpgradeError::Aborted => "Failed(user abort)",
            UpgradeError::Unknown(_) | UpgradeError::Tool(_) => "Failed(other errors)",
        }
    }

    /// Whether a later run may retry the same target once the cool-down passed.
    pub fn retry_after_cooldown(&self) -> bool {
        matches!(
            self,
            UpgradeError::Fetch(_) | UpgradeError::Unknown(_) | UpgradeError::Tool(_)
        )
    }
}

/// Status label for any error surfaced by a pipeline step.
pub fn failure_label(err: &anyhow::Error) -> &'static str {
    match err.downcast_ref::<UpgradeError>() {
        Some(kind) => kind.label(),
        None => "Failed(other errors)",
    }
}

/// Full transcript for errors raised by an external command, if any.
pub fn failure_transcript(err: &anyhow::Error) -> Option<&ToolError> {
    if let Some(tool) = err.downcast_ref::<ToolError>() {
        return Some(tool);
    }
    match err.downcast_ref::<UpgradeError>() {
        Some(UpgradeError::Tool(tool)) => Some(tool),
        _ => None,
    }
}
