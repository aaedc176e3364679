//! Bounded rebuild loops around the fetch and compile steps.
//!
//! Every failed build is classified, handed to the matching remediation
//! handler, and retried only when the handler edited the recipe. The ledger
//! allows one retry per (recipe, phase); patch removal is bounded by the
//! patches the recipe carries. Removals happen on a scratch branch so they can
//! be folded into the upgrade or thrown away as a unit.
use crate::bitbake::BuildTool;
use crate::classify::{Classification, FailureClassifier, FailurePhase, FailureRecord};
use crate::error::{ToolError, UpgradeError};
use crate::git::VersionControl;
use crate::prompt::Prompt;
use crate::recipe::{RecipeKind, RemovedPatch};
use crate::remedy::{self, Attempt, Remediation};
use crate::workflow::UpgradeContext;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};

pub(crate) const UPGRADE_BRANCH: &str = "upgrades";
pub(crate) const SCRATCH_BRANCH: &str = "remove_patches";

/// The external collaborators one upgrade attempt talks to.
pub(crate) struct Collaborators<'a> {
    pub(crate) build: &'a dyn BuildTool,
    pub(crate) vcs: &'a dyn VersionControl,
    pub(crate) prompt: &'a dyn Prompt,
    pub(crate) classifier: &'a dyn FailureClassifier,
}

/// (recipe, phase) pairs that already had their one retry.
#[derive(Debug, Default)]
pub(crate) struct RetryLedger {
    claimed: BTreeSet<(String, FailurePhase)>,
}

impl RetryLedger {
    /// Claim the retry for `recipe` in `phase`; false when it was spent.
    pub(crate) fn try_claim(&mut self, recipe: &str, phase: FailurePhase) -> bool {
        self.claimed.insert((recipe.to_string(), phase))
    }
}

/// Scratch branch holding speculative patch removals.
#[derive(Debug, Default)]
pub(crate) struct PatchSandbox {
    open: bool,
    /// A `temporary` commit sits under the scratch branch.
    checkpoint: bool,
    removed: Vec<RemovedPatch>,
}

impl PatchSandbox {
    /// Checkpoint the upgrade so far and switch to the scratch branch. Opening
    /// an open sandbox does nothing.
    pub(crate) fn open(&mut self, vcs: &dyn VersionControl) -> Result<()> {
        if self.open {
            return Ok(());
        }
        self.checkpoint = match vcs.commit("temporary", None) {
            Ok(()) => true,
            Err(err) if err.mentions("nothing to commit") => false,
            Err(err) => {
                return Err(anyhow::Error::new(err).context("checkpoint before removing patches"))
            }
        };
        vcs.create_branch(SCRATCH_BRANCH)?;
        self.open = true;
        tracing::debug!(checkpoint = self.checkpoint, "opened patch removal branch");
        Ok(())
    }

    pub(crate) fn record(&mut self, removed: RemovedPatch) {
        self.removed.push(removed);
    }

    /// Keep the removals: back on the upgrade branch with the checkpoint
    /// undone, everything is left in the working tree and the removed patches
    /// are listed in the commit message.
    pub(crate) fn fold(
        &mut self,
        vcs: &dyn VersionControl,
        ctx: &mut UpgradeContext,
    ) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.close(vcs, false)?;
        if !self.removed.is_empty() {
            let mut note = "Removed the following patch(es):".to_string();
            for removed in self.removed.drain(..) {
                note.push('\n');
                note.push_str(&removed.note());
            }
            ctx.notes.push(note);
        }
        Ok(())
    }

    /// Drop the removals and restore the tree as it was before the first one.
    pub(crate) fn discard(&mut self, vcs: &dyn VersionControl) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.removed.clear();
        self.close(vcs, true)
    }

    fn close(&mut self, vcs: &dyn VersionControl, drop_changes: bool) -> Result<()> {
        vcs.checkout_branch(UPGRADE_BRANCH)?;
        vcs.delete_branch(SCRATCH_BRANCH)?;
        if drop_changes {
            vcs.reset_hard(0)?;
        }
        if self.checkpoint {
            vcs.reset_soft(1)?;
        }
        self.open = false;
        self.checkpoint = false;
        Ok(())
    }
}

/// Per-package retry state shared by the fetch and compile steps.
pub(crate) struct RetryController {
    ledger: RetryLedger,
    sandbox: PatchSandbox,
    interactive: bool,
}

impl RetryController {
    pub(crate) fn new(interactive: bool) -> Self {
        Self {
            ledger: RetryLedger::default(),
            sandbox: PatchSandbox::default(),
            interactive,
        }
    }

    /// Fetch the new version. Archive recipes still carry the old checksums,
    /// so the first fetch has to fail and be fixed; a clean pass means the
    /// rename did not take.
    pub(crate) fn fetch(
        &mut self,
        tools: &Collaborators<'_>,
        ctx: &mut UpgradeContext,
    ) -> Result<()> {
        loop {
            let err = match tools.build.fetch(&ctx.pn) {
                Ok(()) if ctx.kind == Some(RecipeKind::Archive) && !ctx.checksums_changed => {
                    return Err(UpgradeError::Fetch(
                        "fetch succeeded without changing checksums".to_string(),
                    )
                    .into());
                }
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            let records = self.classify(tools, ctx, &err)?;
            let Some(record) = records.and_then(|mut records| records.remove(&ctx.pn)) else {
                let unknown =
                    UpgradeError::Unknown("unknown error occurred during fetch".to_string());
                return Err(anyhow::Error::new(err).context(unknown));
            };
            self.remediate(tools, ctx, &record)?;
        }
    }

    /// Build for one machine until it passes or a failure cannot be fixed.
    /// Patch removals are folded into the upgrade after a passing build and
    /// undone after a failing one.
    pub(crate) fn compile(
        &mut self,
        tools: &Collaborators<'_>,
        ctx: &mut UpgradeContext,
        machine: &str,
    ) -> Result<()> {
        match self.compile_until_done(tools, ctx, machine) {
            Ok(()) => self.sandbox.fold(tools.vcs, ctx),
            Err(err) => {
                if let Err(undo) = self.sandbox.discard(tools.vcs) {
                    tracing::warn!(pn = %ctx.pn, error = %undo, "could not undo patch removals");
                }
                Err(err)
            }
        }
    }

    fn compile_until_done(
        &mut self,
        tools: &Collaborators<'_>,
        ctx: &mut UpgradeContext,
        machine: &str,
    ) -> Result<()> {
        loop {
            tracing::info!(pn = %ctx.pn, machine, "compiling");
            let err = match tools.build.build(&ctx.pn, machine) {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            let log = ctx.save_transcript(&err)?;
            let records = match tools.classifier.classify(&ctx.pn, &err.stdout, &log) {
                Classification::IncompatibleHost => {
                    tracing::warn!(pn = %ctx.pn, machine, "incompatible host, build skipped");
                    return Ok(());
                }
                Classification::Unknown => {
                    return Err(anyhow::Error::new(err).context(UpgradeError::Unknown(format!(
                        "no failed task found in build output for {machine}"
                    ))));
                }
                Classification::Failed { records, .. } => records,
            };
            match records.get(&ctx.pn) {
                Some(record) => self.remediate(tools, ctx, record)?,
                None => self.clean_failed_dependencies(tools, ctx, &records)?,
            }
        }
    }

    fn classify(
        &self,
        tools: &Collaborators<'_>,
        ctx: &UpgradeContext,
        err: &ToolError,
    ) -> Result<Option<BTreeMap<String, FailureRecord>>> {
        let log = ctx.save_transcript(err)?;
        Ok(match tools.classifier.classify(&ctx.pn, &err.stdout, &log) {
            Classification::Failed { records, .. } => Some(records),
            Classification::IncompatibleHost | Classification::Unknown => None,
        })
    }

    /// Other recipes broke the build: clear their shared state once and retry.
    fn clean_failed_dependencies(
        &mut self,
        tools: &Collaborators<'_>,
        ctx: &UpgradeContext,
        records: &BTreeMap<String, FailureRecord>,
    ) -> Result<()> {
        let mut spent = None;
        for record in records.values() {
            if !self.ledger.try_claim(&record.recipe, record.phase) && spent.is_none() {
                spent = Some(record.recipe.clone());
            }
        }
        if let Some(recipe) = spent {
            return Err(UpgradeError::Compile { recipe }.into());
        }

        let recipes: Vec<String> = records.keys().cloned().collect();
        tracing::info!(
            pn = %ctx.pn,
            failed = %recipes.join(" "),
            "dependencies failed, cleaning their state and retrying"
        );
        tools
            .build
            .clean_state(&recipes)
            .context("clean state of failed dependencies")?;
        Ok(())
    }

    /// Run the handler for `record`; `Ok` means the recipe changed and the
    /// same build should run again.
    fn remediate(
        &mut self,
        tools: &Collaborators<'_>,
        ctx: &mut UpgradeContext,
        record: &FailureRecord,
    ) -> Result<()> {
        let Some(handler) = remedy::handler_for(record.phase) else {
            return Err(UpgradeError::Compile {
                recipe: record.recipe.clone(),
            }
            .into());
        };
        tracing::info!(
            pn = %ctx.pn,
            recipe = %record.recipe,
            phase = handler.phase().name(),
            task = %record.task,
            machine = record.machine.as_deref().unwrap_or("default"),
            "remediating failed task"
        );
        let mut attempt = Attempt {
            ctx,
            tools,
            ledger: &mut self.ledger,
            sandbox: &mut self.sandbox,
            interactive: self.interactive,
        };
        match handler.remediate(record, &mut attempt)? {
            Remediation::Resolved => Ok(()),
            Remediation::Unresolved(err) => Err(err.into()),
            Remediation::AlreadyAttempted => Err(remedy::exhausted(record).into()),
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
