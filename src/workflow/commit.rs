//! Commit, export and keep-or-drop handling after the pipeline ran.
use super::steps::{Engine, Outcome, PackageRun};
use crate::error::UpgradeError;
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Commit whatever the attempt changed and export it as a patch into the
/// workdir. Failed attempts are then dropped unless the user keeps them;
/// successful ones only when `drop_previous_commits` is set.
///
/// Returns the exported patch, or `None` when there was nothing to commit.
pub(crate) fn settle(engine: &Engine<'_>, run: &PackageRun) -> Result<Option<PathBuf>> {
    let Some(vcs) = run.vcs.as_deref() else {
        return Ok(None);
    };
    let failed = match run.outcome {
        Outcome::Skipped(_) => return Ok(None),
        Outcome::Succeeded => false,
        Outcome::Failed(_) => true,
    };
    let ctx = &run.ctx;

    match vcs.commit(&ctx.commit_message(), engine.config.author.as_deref()) {
        Ok(()) => {}
        Err(err) if err.mentions("nothing to commit") => {
            tracing::info!(pn = %ctx.pn, "nothing to commit");
            return Ok(None);
        }
        Err(err) => {
            return Err(anyhow::Error::new(UpgradeError::from(err)))
                .with_context(|| format!("commit upgrade of {}", ctx.pn));
        }
    }
    let patch = vcs
        .create_patch(&ctx.workdir)
        .map_err(UpgradeError::from)
        .with_context(|| format!("export patch for {}", ctx.pn))?;
    tracing::info!(pn = %ctx.pn, patch = %patch.display(), "exported patch");

    let drop_changes = if !failed {
        engine.config.drop_previous_commits
    } else if engine.options.interactive {
        let question = format!("{}: keep the changes?", ctx.pn);
        !engine.prompt.confirm(&question, false)?
    } else {
        engine.config.drop_failed_changes
    };
    if drop_changes {
        tracing::info!(pn = %ctx.pn, "dropping changes from git");
        vcs.reset_hard(1).map_err(UpgradeError::from)?;
        vcs.clean_untracked().map_err(UpgradeError::from)?;
    }
    Ok(Some(patch))
}
