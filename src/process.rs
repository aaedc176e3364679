//! Blocking execution of external tools.
//!
//! Commands run with an explicit argv (never through a shell) and either
//! return stdout or a `ToolError` carrying the whole transcript.
use crate::error::ToolError;
use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::Command;
use std::time::Instant;

/// Split a configured command line (e.g. `"bitbake -k"`) into argv.
pub fn split_command(command: &str) -> Result<Vec<String>> {
    let argv =
        shell_words::split(command).with_context(|| format!("parse command: {command}"))?;
    if argv.is_empty() {
        return Err(anyhow!("command is empty"));
    }
    Ok(argv)
}

/// Fail early with a readable message when a tool is not on `PATH`.
pub fn require_program(argv: &[String]) -> Result<()> {
    let program = argv.first().ok_or_else(|| anyhow!("command is empty"))?;
    which::which(program).with_context(|| format!("{program} not found in PATH"))?;
    Ok(())
}

/// Run `base + args` in `cwd` with extra environment variables.
pub fn run_tool(
    base: &[String],
    args: &[String],
    envs: &[(String, String)],
    cwd: &Path,
) -> Result<String, ToolError> {
    let rendered = render_command(base, args, envs);
    let Some((program, base_args)) = base.split_first() else {
        return Err(ToolError::new(rendered, "", "command is empty"));
    };

    let start = Instant::now();
    let output = Command::new(program)
        .args(base_args)
        .args(args)
        .envs(envs.iter().map(|(key, value)| (key.as_str(), value.as_str())))
        .current_dir(cwd)
        .output();
    let elapsed_ms = start.elapsed().as_millis();

    let output = match output {
        Ok(output) => output,
        Err(err) => return Err(ToolError::new(rendered, "", err.to_string())),
    };
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    tracing::debug!(
        command = %rendered,
        elapsed_ms,
        status = ?output.status.code(),
        stdout_bytes = stdout.len(),
        "tool invocation complete"
    );

    if !output.status.success() {
        return Err(ToolError::new(rendered, stdout, stderr));
    }
    Ok(stdout)
}

fn render_command(base: &[String], args: &[String], envs: &[(String, String)]) -> String {
    let mut parts: Vec<String> = envs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    parts.extend(base.iter().cloned());
    parts.extend(args.iter().cloned());
    parts.join(" ")
}
