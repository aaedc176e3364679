//! Remediation handlers, one per failure phase.
//!
//! A handler reads the failing task's log, decides whether the failure is one
//! it knows how to fix, and applies the matching recipe edit. It never
//! rebuilds; the retry controller does that after a `Resolved` outcome.
use crate::classify::{FailurePhase, FailureRecord};
use crate::error::UpgradeError;
use crate::recipe;
use crate::retry::{Collaborators, PatchSandbox, RetryLedger};
use crate::workflow::UpgradeContext;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

#[derive(Debug)]
pub(crate) enum Remediation {
    /// The recipe was edited; rebuild the same phase.
    Resolved,
    /// Not fixable automatically.
    Unresolved(UpgradeError),
    /// This fix was already applied once for the recipe and phase.
    AlreadyAttempted,
}

/// Everything a handler may touch while fixing one failure.
pub(crate) struct Attempt<'a, 'b> {
    pub(crate) ctx: &'a mut UpgradeContext,
    pub(crate) tools: &'a Collaborators<'b>,
    pub(crate) ledger: &'a mut RetryLedger,
    pub(crate) sandbox: &'a mut PatchSandbox,
    pub(crate) interactive: bool,
}

pub(crate) trait RemediationHandler {
    fn phase(&self) -> FailurePhase;
    fn remediate(
        &self,
        record: &FailureRecord,
        attempt: &mut Attempt<'_, '_>,
    ) -> Result<Remediation>;
}

pub(crate) struct FetchHandler;
pub(crate) struct PatchHandler;
pub(crate) struct ConfigureHandler;
pub(crate) struct CompileHandler;
pub(crate) struct PackageHandler;

/// Handler for `phase`; unknown tasks have none.
pub(crate) fn handler_for(phase: FailurePhase) -> Option<&'static dyn RemediationHandler> {
    match phase {
        FailurePhase::Fetch => Some(&FetchHandler),
        FailurePhase::Patch => Some(&PatchHandler),
        FailurePhase::Configure => Some(&ConfigureHandler),
        FailurePhase::Compile => Some(&CompileHandler),
        FailurePhase::Package => Some(&PackageHandler),
        FailurePhase::Unknown => None,
    }
}

/// Terminal error for a record whose fix was already spent.
pub(crate) fn exhausted(record: &FailureRecord) -> UpgradeError {
    match record.phase {
        FailurePhase::Fetch => {
            UpgradeError::Fetch(format!("{} still fails to fetch", record.recipe))
        }
        FailurePhase::Patch => {
            UpgradeError::Patch(format!("{} still fails to patch", record.recipe))
        }
        FailurePhase::Configure => UpgradeError::Configure,
        FailurePhase::Package => {
            UpgradeError::Packaging(format!("{} still fails to package", record.recipe))
        }
        FailurePhase::Compile | FailurePhase::Unknown => UpgradeError::Compile {
            recipe: record.recipe.clone(),
        },
    }
}

fn read_log(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("read task log {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

impl RemediationHandler for FetchHandler {
    fn phase(&self) -> FailurePhase {
        FailurePhase::Fetch
    }

    fn remediate(
        &self,
        record: &FailureRecord,
        attempt: &mut Attempt<'_, '_>,
    ) -> Result<Remediation> {
        let log = read_log(&record.log_path)?;
        let scope = attempt.ctx.scope()?;

        if recipe::is_uri_failure(&log) {
            let tried = &mut attempt.ctx.tried_suffixes;
            if let Some(current) = recipe::current_suffix(&scope)? {
                tried.insert(current);
            }
            let next = recipe::ARCHIVE_SUFFIXES
                .iter()
                .copied()
                .find(|suffix| !tried.contains(*suffix));
            let Some(next) = next else {
                return Ok(Remediation::Unresolved(UpgradeError::Fetch(
                    "every archive suffix failed to download".to_string(),
                )));
            };
            tried.insert(next.to_string());
            if !recipe::replace_suffix(&scope, next)? {
                return Ok(Remediation::Unresolved(UpgradeError::Fetch(
                    "SRC_URI has no versioned archive to rename".to_string(),
                )));
            }
            tracing::info!(pn = %attempt.ctx.pn, suffix = next, "trying new SRC_URI suffix");
            return Ok(Remediation::Resolved);
        }

        if !attempt.ledger.try_claim(&record.recipe, FailurePhase::Fetch) {
            return Ok(Remediation::AlreadyAttempted);
        }
        let checksums = recipe::parse_fetch_log(&log);
        if checksums.is_empty() {
            return Ok(Remediation::Unresolved(UpgradeError::Fetch(
                "no checksums reported in fetch log".to_string(),
            )));
        }
        let replaced = recipe::apply_checksums(&scope, &checksums)?;
        if replaced == 0 {
            tracing::warn!(
                pn = %attempt.ctx.pn,
                reported = checksums.len(),
                "reported checksums match no line in the recipe"
            );
            return Ok(Remediation::Unresolved(UpgradeError::Fetch(
                "recipe has no checksum lines for the reported labels".to_string(),
            )));
        }
        attempt.ctx.checksums_changed = true;
        tracing::info!(
            pn = %attempt.ctx.pn,
            reported = checksums.len(),
            replaced,
            "updated source checksums"
        );
        Ok(Remediation::Resolved)
    }
}

impl RemediationHandler for PatchHandler {
    fn phase(&self) -> FailurePhase {
        FailurePhase::Patch
    }

    fn remediate(
        &self,
        record: &FailureRecord,
        attempt: &mut Attempt<'_, '_>,
    ) -> Result<Remediation> {
        let log = read_log(&record.log_path)?;
        let Some(faulty) = recipe::find_faulty_patch(&log) else {
            return Ok(Remediation::Unresolved(UpgradeError::Patch(
                "log names no failing patch".to_string(),
            )));
        };

        attempt.sandbox.open(attempt.tools.vcs)?;
        let scope = attempt.ctx.scope()?;
        match recipe::remove_patch(&scope, &faulty)? {
            Some(removed) => {
                tracing::info!(
                    pn = %attempt.ctx.pn,
                    patch = %removed.name,
                    "removed faulty patch"
                );
                attempt.sandbox.record(removed);
                Ok(Remediation::Resolved)
            }
            None => Ok(Remediation::Unresolved(UpgradeError::Patch(format!(
                "{} is not in the recipe's patch directories",
                faulty.name
            )))),
        }
    }
}

impl RemediationHandler for ConfigureHandler {
    fn phase(&self) -> FailurePhase {
        FailurePhase::Configure
    }

    fn remediate(
        &self,
        record: &FailureRecord,
        attempt: &mut Attempt<'_, '_>,
    ) -> Result<Remediation> {
        let log = read_log(&record.log_path)?;
        let Some(mismatch) = recipe::find_license_mismatch(&log, &record.recipe) else {
            return Ok(Remediation::Unresolved(UpgradeError::Configure));
        };
        let unresolved = || {
            Remediation::Unresolved(UpgradeError::LicenseMismatch {
                file: mismatch.file.clone(),
            })
        };
        if !attempt.ledger.try_claim(&record.recipe, FailurePhase::Configure) {
            return Ok(unresolved());
        }
        let Some(new_md5) = mismatch.new_md5.as_deref() else {
            return Ok(unresolved());
        };

        let ctx = &mut *attempt.ctx;
        let new_source = ctx.env()?.source_dir()?;
        let old_source = match &ctx.original_env {
            Some(env) => env.source_dir()?,
            None => new_source.clone(),
        };
        let diff =
            recipe::capture_license_diff(&old_source, &new_source, &mismatch, &ctx.workdir)?;
        recipe::substitute_checksum(&ctx.scope()?, &mismatch.old_md5, new_md5)?;
        ctx.license_diff = Some(diff.clone());
        tracing::warn!(
            pn = %ctx.pn,
            file = %mismatch.file,
            diff = %diff.display(),
            "license checksum changed; recipe updated"
        );

        if attempt.interactive {
            let prompt = attempt.tools.prompt;
            let question = format!(
                "{}: license checksum failed for file {}. The recipe has been updated! View diff?",
                ctx.pn, mismatch.file
            );
            if prompt.confirm(&question, true)? {
                let text = fs::read_to_string(&diff)
                    .with_context(|| format!("read {}", diff.display()))?;
                prompt.show(&text);
            }
            if !prompt.confirm("Retry compilation?", true)? {
                return Ok(unresolved());
            }
        }
        ctx.notes
            .push(format!("License checksum changed for file {}", mismatch.file));
        Ok(Remediation::Resolved)
    }
}

impl RemediationHandler for CompileHandler {
    fn phase(&self) -> FailurePhase {
        FailurePhase::Compile
    }

    fn remediate(
        &self,
        record: &FailureRecord,
        _attempt: &mut Attempt<'_, '_>,
    ) -> Result<Remediation> {
        Ok(Remediation::Unresolved(UpgradeError::Compile {
            recipe: record.recipe.clone(),
        }))
    }
}

impl RemediationHandler for PackageHandler {
    fn phase(&self) -> FailurePhase {
        FailurePhase::Package
    }

    fn remediate(
        &self,
        record: &FailureRecord,
        attempt: &mut Attempt<'_, '_>,
    ) -> Result<Remediation> {
        if !attempt.ledger.try_claim(&record.recipe, FailurePhase::Package) {
            return Ok(Remediation::AlreadyAttempted);
        }
        let log = read_log(&record.log_path)?;
        let added = recipe::add_not_shipped(&attempt.ctx.scope()?, &log)?;
        if added == 0 {
            return Ok(Remediation::Unresolved(UpgradeError::Packaging(
                "no unshipped files listed in log".to_string(),
            )));
        }
        tracing::info!(pn = %attempt.ctx.pn, added, "packaged unshipped files");
        Ok(Remediation::Resolved)
    }
}

#[cfg(test)]
#[path = "remedy_tests.rs"]
mod tests;
