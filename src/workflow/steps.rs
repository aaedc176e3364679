//! The per-package step pipeline.
//!
//! Steps run in a fixed order against one `UpgradeContext`. Each either lets
//! the pipeline continue, ends it with a skip, or ends it with an error; the
//! batch driver decides what to do with the tree afterwards.
use super::context::{PackageRequest, UpgradeContext};
use crate::bitbake::BuildTool;
use crate::classify::FailureClassifier;
use crate::config::UpgradeConfig;
use crate::error::{failure_label, ToolError, UpgradeError};
use crate::git::{RepoLocator, VersionControl};
use crate::paths::HelperPaths;
use crate::prompt::Prompt;
use crate::recipe::{self, RecipeKind};
use crate::retry::{Collaborators, RetryController, SCRATCH_BRANCH, UPGRADE_BRANCH};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    CreateWorkdir,
    DetectRepo,
    PrepareBranches,
    LoadEnvironment,
    ResolveTarget,
    DetectRecipeKind,
    UnpackOriginal,
    RewriteRecipe,
    CleanAll,
    FetchNew,
    Compile,
}

impl Step {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Step::CreateWorkdir => "create_workdir",
            Step::DetectRepo => "detect_repo",
            Step::PrepareBranches => "prepare_branches",
            Step::LoadEnvironment => "load_environment",
            Step::ResolveTarget => "resolve_target",
            Step::DetectRecipeKind => "detect_recipe_kind",
            Step::UnpackOriginal => "unpack_original",
            Step::RewriteRecipe => "rewrite_recipe",
            Step::CleanAll => "cleanall",
            Step::FetchNew => "fetch",
            Step::Compile => "compile",
        }
    }
}

pub(crate) const UPGRADE_STEPS: [Step; 11] = [
    Step::CreateWorkdir,
    Step::DetectRepo,
    Step::PrepareBranches,
    Step::LoadEnvironment,
    Step::ResolveTarget,
    Step::DetectRecipeKind,
    Step::UnpackOriginal,
    Step::RewriteRecipe,
    Step::CleanAll,
    Step::FetchNew,
    Step::Compile,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SkipReason {
    UpgradeNotNeeded,
    UnsupportedProtocol,
}

impl SkipReason {
    pub(crate) fn label(self) -> &'static str {
        match self {
            SkipReason::UpgradeNotNeeded => "UpgradeNotNeeded",
            SkipReason::UnsupportedProtocol => "UnsupportedProtocol",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Skip(SkipReason),
}

#[derive(Debug)]
pub(crate) enum Outcome {
    Succeeded,
    Skipped(SkipReason),
    Failed(anyhow::Error),
}

impl Outcome {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "Succeeded",
            Outcome::Skipped(reason) => reason.label(),
            Outcome::Failed(err) => failure_label(err),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RunOptions {
    pub(crate) interactive: bool,
    pub(crate) skip_compilation: bool,
}

/// Everything the pipeline needs that outlives one package.
pub(crate) struct Engine<'a> {
    pub(crate) build: &'a dyn BuildTool,
    pub(crate) locator: &'a dyn RepoLocator,
    pub(crate) prompt: &'a dyn Prompt,
    pub(crate) classifier: &'a dyn FailureClassifier,
    pub(crate) config: &'a UpgradeConfig,
    pub(crate) paths: &'a HelperPaths,
    pub(crate) options: RunOptions,
}

/// Result of running the pipeline for one package.
pub(crate) struct PackageRun {
    pub(crate) ctx: UpgradeContext,
    /// The recipe repository, once located.
    pub(crate) vcs: Option<Box<dyn VersionControl>>,
    pub(crate) outcome: Outcome,
}

fn located(vcs: &Option<Box<dyn VersionControl>>) -> Result<&dyn VersionControl> {
    vcs.as_deref().ok_or_else(|| anyhow!("recipe repository not located"))
}

impl Engine<'_> {
    /// Run every step for `request`, stopping at the first skip or error.
    pub(crate) fn upgrade(&self, request: &PackageRequest) -> PackageRun {
        let workdir = self.paths.package_workdir(&request.pn);
        let mut run = PackageRun {
            ctx: UpgradeContext::new(request, workdir),
            vcs: None,
            outcome: Outcome::Succeeded,
        };
        let mut retry = RetryController::new(self.options.interactive);

        for step in UPGRADE_STEPS {
            let started = Instant::now();
            let flow = self.run_step(step, &mut run, &mut retry);
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match flow {
                Ok(Flow::Continue) => {
                    tracing::debug!(
                        pn = %run.ctx.pn,
                        step = step.name(),
                        elapsed_ms,
                        "step done"
                    );
                }
                Ok(Flow::Skip(reason)) => {
                    tracing::info!(
                        pn = %run.ctx.pn,
                        step = step.name(),
                        reason = reason.label(),
                        "upgrade skipped"
                    );
                    run.outcome = Outcome::Skipped(reason);
                    return run;
                }
                Err(err) => {
                    tracing::error!(
                        pn = %run.ctx.pn,
                        step = step.name(),
                        elapsed_ms,
                        status = failure_label(&err),
                        error = %format!("{err:#}"),
                        "upgrade failed"
                    );
                    if let Some(log_dir) = run.ctx.env.as_ref().and_then(|env| env.log_dir()) {
                        tracing::debug!(
                            pn = %run.ctx.pn,
                            log_dir = %log_dir.display(),
                            "task logs"
                        );
                    }
                    run.outcome = Outcome::Failed(err);
                    return run;
                }
            }
        }
        tracing::info!(pn = %run.ctx.pn, version = ?run.ctx.target, "upgrade succeeded");
        run
    }

    fn run_step(
        &self,
        step: Step,
        run: &mut PackageRun,
        retry: &mut RetryController,
    ) -> Result<Flow> {
        match step {
            Step::CreateWorkdir => self.create_workdir(&run.ctx),
            Step::DetectRepo => self.detect_repo(run),
            Step::PrepareBranches => self.prepare_branches(run),
            Step::LoadEnvironment => {
                if run.ctx.env.is_none() {
                    run.ctx.env = Some(self.build.environment(&run.ctx.pn)?);
                }
                Ok(Flow::Continue)
            }
            Step::ResolveTarget => resolve_target(&mut run.ctx),
            Step::DetectRecipeKind => detect_recipe_kind(&mut run.ctx),
            Step::UnpackOriginal => {
                let ctx = &run.ctx;
                tool_step(ctx, self.build.fetch(&ctx.pn))?;
                tool_step(ctx, self.build.unpack(&ctx.pn))?;
                Ok(Flow::Continue)
            }
            Step::RewriteRecipe => self.rewrite_recipe(run),
            Step::CleanAll => {
                tool_step(&run.ctx, self.build.clean_all(&run.ctx.pn))?;
                Ok(Flow::Continue)
            }
            Step::FetchNew => {
                if run.ctx.kind == Some(RecipeKind::Git) {
                    return Ok(Flow::Continue);
                }
                let tools = self.collaborators(located(&run.vcs)?);
                retry.fetch(&tools, &mut run.ctx)?;
                Ok(Flow::Continue)
            }
            Step::Compile => self.compile(run, retry),
        }
    }

    fn collaborators<'v>(&'v self, vcs: &'v dyn VersionControl) -> Collaborators<'v> {
        Collaborators {
            build: self.build,
            vcs,
            prompt: self.prompt,
            classifier: self.classifier,
        }
    }

    fn create_workdir(&self, ctx: &UpgradeContext) -> Result<Flow> {
        if ctx.workdir.exists() {
            fs::remove_dir_all(&ctx.workdir)
                .with_context(|| format!("empty {}", ctx.workdir.display()))?;
        }
        fs::create_dir_all(&ctx.workdir)
            .with_context(|| format!("create {}", ctx.workdir.display()))?;
        Ok(Flow::Continue)
    }

    fn detect_repo(&self, run: &mut PackageRun) -> Result<Flow> {
        let pn = run.ctx.pn.clone();
        let env = self.build.environment(&pn)?;
        let vcs = self.locator.locate(&env.recipe_dir()?)?;

        let status = vcs.status().map_err(UpgradeError::from)?;
        if !status.trim().is_empty() {
            if self.options.interactive {
                let question = format!(
                    "{pn}: git repository has uncommitted work which will be dropped! Proceed?"
                );
                if !self.prompt.confirm(&question, false)? {
                    return Err(UpgradeError::Aborted.into());
                }
            }
            tracing::warn!(pn = %pn, "dropping uncommitted changes in recipe repository");
            vcs.reset_hard(0).map_err(UpgradeError::from)?;
            vcs.clean_untracked().map_err(UpgradeError::from)?;
        } else {
            // The tree is unchanged, so the snapshot still describes it.
            run.ctx.env = Some(env);
        }
        run.vcs = Some(vcs);
        Ok(Flow::Continue)
    }

    fn prepare_branches(&self, run: &mut PackageRun) -> Result<Flow> {
        let vcs = located(&run.vcs)?;
        if vcs.checkout_branch(UPGRADE_BRANCH).is_err() {
            vcs.create_branch(UPGRADE_BRANCH)
                .map_err(UpgradeError::from)
                .context("create upgrade branch")?;
        }
        if vcs.delete_branch(SCRATCH_BRANCH).is_ok() {
            tracing::debug!(pn = %run.ctx.pn, "deleted stale patch removal branch");
        }
        Ok(Flow::Continue)
    }

    /// Strip `PR`, bump git revisions, move versioned files to the new
    /// version and take a fresh snapshot.
    fn rewrite_recipe(&self, run: &mut PackageRun) -> Result<Flow> {
        let vcs = located(&run.vcs)?;
        let ctx = &mut run.ctx;
        let target = ctx.target()?.to_string();
        let mut scope = ctx.scope()?;
        let mut new_version = target.clone();

        if ctx.kind == Some(RecipeKind::Git) {
            let old_tag = recipe::tag_from_version(&scope.version).to_string();
            let new_tag = recipe::tag_from_version(&target).to_string();
            if old_tag == new_tag {
                return Ok(Flow::Skip(SkipReason::UpgradeNotNeeded));
            }
            let env = ctx.env()?;
            let url = recipe::git_repo_url(env.src_uri()).ok_or_else(|| {
                UpgradeError::Unknown("could not extract repo url from SRC_URI".to_string())
            })?;
            let tags = vcs.ls_remote_tags(url).map_err(UpgradeError::from)?;
            let sha = recipe::find_tag_commit(&tags, &new_tag).ok_or_else(|| {
                UpgradeError::Unknown(format!("no tag {new_tag} in {url}"))
            })?;
            scope = scope.with_version(&old_tag);
            recipe::bump_revision(&scope, &sha, &new_tag)?;
            tracing::info!(pn = %ctx.pn, tag = %new_tag, sha = %sha, "bumped git revision");
            new_version = new_tag;
        }

        recipe::strip_revision_markers(&scope)?;
        let renamed = recipe::rename_versioned(&scope, &new_version, vcs)?;
        tracing::info!(
            pn = %ctx.pn,
            from = %scope.version,
            to = %new_version,
            renamed = renamed.len(),
            "renamed recipe files"
        );

        let fresh = self.build.environment(&ctx.pn)?;
        ctx.original_env = ctx.env.replace(fresh);
        Ok(Flow::Continue)
    }

    fn compile(&self, run: &mut PackageRun, retry: &mut RetryController) -> Result<Flow> {
        if self.options.skip_compilation {
            tracing::info!(pn = %run.ctx.pn, "compilation skipped");
            return Ok(Flow::Continue);
        }
        let vcs = located(&run.vcs)?;
        let tools = self.collaborators(vcs);
        let pn = run.ctx.pn.clone();
        // A compile failure only ends its own machine; anything else ends the step.
        let mut failed: Vec<&str> = Vec::new();
        let mut first_failure = None;
        for machine in &self.config.machines {
            let Err(err) = retry.compile(&tools, &mut run.ctx, machine) else {
                continue;
            };
            if !matches!(
                err.downcast_ref::<UpgradeError>(),
                Some(UpgradeError::Compile { .. })
            ) {
                return Err(err.context(format!("compile {pn} for {machine}")));
            }
            tracing::warn!(
                pn = %pn,
                machine = %machine,
                error = %format!("{err:#}"),
                "compilation failed"
            );
            failed.push(machine);
            first_failure.get_or_insert(err);
        }
        match first_failure {
            Some(err) => Err(err.context(format!("compile {pn} for {}", failed.join(" ")))),
            None => Ok(Flow::Continue),
        }
    }
}

fn resolve_target(ctx: &mut UpgradeContext) -> Result<Flow> {
    let current = ctx.env()?.pkgv()?.to_string();
    ctx.old_version = Some(current.clone());
    match ctx.target.as_deref() {
        None => {
            tracing::info!(pn = %ctx.pn, current = %current, "no newer upstream version");
            Ok(Flow::Skip(SkipReason::UpgradeNotNeeded))
        }
        Some(target) if target == current => Ok(Flow::Skip(SkipReason::UpgradeNotNeeded)),
        Some(target) => {
            tracing::info!(pn = %ctx.pn, from = %current, to = %target, "upgrading");
            Ok(Flow::Continue)
        }
    }
}

fn detect_recipe_kind(ctx: &mut UpgradeContext) -> Result<Flow> {
    match RecipeKind::detect(ctx.env()?.src_uri()) {
        Some(kind) => {
            ctx.kind = Some(kind);
            Ok(Flow::Continue)
        }
        None => Ok(Flow::Skip(SkipReason::UnsupportedProtocol)),
    }
}

/// Keep the transcript of a failed build tool call and surface it typed.
fn tool_step(ctx: &UpgradeContext, result: Result<(), ToolError>) -> Result<()> {
    let Err(err) = result else {
        return Ok(());
    };
    ctx.save_transcript(&err)?;
    Err(UpgradeError::from(err).into())
}

#[cfg(test)]
#[path = "steps_tests.rs"]
mod tests;
