//! Batch driver: pick the packages, run the pipeline for each one, settle
//! the repository and record what happened.
use super::commit::settle;
use super::context::PackageRequest;
use super::steps::{Engine, Outcome, RunOptions};
use crate::bitbake::Bitbake;
use crate::classify::LogScrapeClassifier;
use crate::cli::RootArgs;
use crate::config::{load_config, validate_config, write_config, UpgradeConfig};
use crate::error::{failure_transcript, UpgradeError};
use crate::git::GitLocator;
use crate::history::{self, HistoryEntry};
use crate::paths::HelperPaths;
use crate::process::{require_program, split_command};
use crate::prompt::StdinPrompt;
use crate::stats::Statistics;
use crate::upstream::{read_candidates, UpstreamCandidate};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Which packages the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Selection {
    /// Every recipe the upstream check reports as outdated.
    All,
    Named {
        packages: Vec<String>,
        target: Option<String>,
    },
}

impl Selection {
    pub(crate) fn from_args(packages: &[String], to_version: Option<&str>) -> Result<Self> {
        if packages.is_empty() {
            return Err(anyhow!("no packages given"));
        }
        if packages.iter().any(|pn| pn == "all") {
            if packages.len() > 1 {
                return Err(anyhow!("`all` cannot be combined with package names"));
            }
            if to_version.is_some() {
                return Err(anyhow!("--to-version cannot be used with `all`"));
            }
            return Ok(Selection::All);
        }
        if to_version.is_some() && packages.len() != 1 {
            return Err(anyhow!("--to-version needs exactly one package"));
        }
        Ok(Selection::Named {
            packages: packages.to_vec(),
            target: to_version.map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct PackageReport {
    pub(crate) pn: String,
    pub(crate) from_version: Option<String>,
    pub(crate) to_version: Option<String>,
    pub(crate) maintainer: Option<String>,
    pub(crate) status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
    /// Failing external command, when one caused the failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) patch: Option<PathBuf>,
    pub(crate) workdir: PathBuf,
}

/// Summary written to `upgrade-helper/report.json`.
#[derive(Debug, Default, Serialize)]
pub(crate) struct RunReport {
    pub(crate) packages: Vec<PackageReport>,
    pub(crate) statistics: Statistics,
}

/// Turn a selection into upgrade requests with targets and maintainers
/// filled in from the upstream version check.
pub(crate) fn select(
    engine: &Engine<'_>,
    selection: &Selection,
    latest: &BTreeMap<String, HistoryEntry>,
    today: NaiveDate,
) -> Result<Vec<PackageRequest>> {
    match selection {
        Selection::All => select_all(engine, latest, today),
        Selection::Named {
            packages,
            target: Some(target),
        } => Ok(packages
            .iter()
            .map(|pn| PackageRequest::new(pn.as_str(), Some(target.clone())))
            .collect()),
        Selection::Named {
            packages,
            target: None,
        } => select_named(engine, packages),
    }
}

fn select_named(engine: &Engine<'_>, packages: &[String]) -> Result<Vec<PackageRequest>> {
    engine
        .build
        .check_upstream(packages)
        .context("check upstream versions")?;
    let candidates = read_candidates(&engine.paths.checkpkg_csv())?;
    Ok(packages
        .iter()
        .map(|pn| {
            let mut request = PackageRequest::new(pn.as_str(), None);
            let found = candidates
                .iter()
                .find(|candidate| &candidate.pn == pn && candidate.is_upgradable());
            if let Some(candidate) = found {
                request.target = Some(candidate.next.clone());
                request.maintainer = Some(candidate.maintainer.clone());
            }
            request
        })
        .collect())
}

fn select_all(
    engine: &Engine<'_>,
    latest: &BTreeMap<String, HistoryEntry>,
    today: NaiveDate,
) -> Result<Vec<PackageRequest>> {
    prepare_build_dir(engine.paths, engine.config)?;
    engine
        .build
        .check_upstream(&["universe".to_string()])
        .context("check upstream versions")?;
    let mut requests = Vec::new();
    for candidate in read_candidates(&engine.paths.checkpkg_csv())? {
        if !candidate.is_upgradable() {
            continue;
        }
        if let Some(reason) = gate(engine.config, latest, &candidate, today) {
            tracing::info!(
                pn = %candidate.pn,
                version = %candidate.next,
                reason,
                "skipping package"
            );
            continue;
        }
        requests.push(PackageRequest {
            pn: candidate.pn,
            target: Some(candidate.next),
            maintainer: Some(candidate.maintainer),
        });
    }
    Ok(requests)
}

/// Why an outdated recipe is left out of an `all` run, if it is.
fn gate(
    config: &UpgradeConfig,
    latest: &BTreeMap<String, HistoryEntry>,
    candidate: &UpstreamCandidate,
    today: NaiveDate,
) -> Option<&'static str> {
    if config.blacklist.iter().any(|pn| pn == &candidate.pn) {
        return Some("blacklisted");
    }
    if !config.maintainers_whitelist.is_empty()
        && !config
            .maintainers_whitelist
            .iter()
            .any(|maintainer| maintainer == &candidate.maintainer)
    {
        return Some("maintainer not whitelisted");
    }
    if candidate.pn.contains("cross") || candidate.pn.contains("native") {
        return Some("cross or native recipe");
    }
    if !history::should_attempt(
        latest,
        &candidate.pn,
        &candidate.next,
        today,
        config.retry_cooldown_days,
    ) {
        return Some("already attempted");
    }
    None
}

fn prepare_build_dir(paths: &HelperPaths, config: &UpgradeConfig) -> Result<()> {
    let dirs = [
        (config.clean_sstate, paths.sstate_dir()),
        (config.clean_tmp, paths.tmp_dir()),
    ];
    for (enabled, dir) in dirs {
        if enabled && dir.exists() {
            tracing::info!(dir = %dir.display(), "removing");
            fs::remove_dir_all(&dir).with_context(|| format!("remove {}", dir.display()))?;
        }
    }
    Ok(())
}

/// Reorder so dependencies are upgraded before their dependents.
pub(crate) fn order(
    engine: &Engine<'_>,
    mut requests: Vec<PackageRequest>,
) -> Result<Vec<PackageRequest>> {
    if !engine.config.order_by_dependencies || requests.len() < 2 {
        return Ok(requests);
    }
    let names: Vec<String> = requests.iter().map(|request| request.pn.clone()).collect();
    let ordered = engine
        .build
        .dependency_order(&names)
        .context("compute dependency order")?;
    requests.sort_by_key(|request| {
        ordered
            .iter()
            .position(|pn| pn == &request.pn)
            .unwrap_or(usize::MAX)
    });
    Ok(requests)
}

/// Upgrade each request in turn. Pipeline failures are recorded, never
/// returned; only prompt errors end the batch early.
pub(crate) fn run_batch(
    engine: &Engine<'_>,
    requests: &[PackageRequest],
    today: NaiveDate,
) -> Result<RunReport> {
    let mut report = RunReport::default();
    for (index, request) in requests.iter().enumerate() {
        if index > 0
            && engine.options.interactive
            && !engine.prompt.confirm("Proceed to next package?", true)?
        {
            tracing::info!("stopping at user request");
            break;
        }

        let run = engine.upgrade(request);
        let patch = match settle(engine, &run) {
            Ok(patch) => patch,
            Err(err) => {
                tracing::warn!(pn = %request.pn, error = %format!("{err:#}"), "could not settle");
                None
            }
        };
        let status = run.outcome.label();
        let ctx = &run.ctx;
        tracing::info!(pn = %ctx.pn, status, "package finished");

        report.statistics.record(
            &ctx.pn,
            ctx.target.as_deref().unwrap_or_default(),
            ctx.maintainer.as_deref().unwrap_or_default(),
            status,
        );
        if let Some(target) = ctx.target.as_deref() {
            let retryable = match &run.outcome {
                Outcome::Failed(err) => match err.downcast_ref::<UpgradeError>() {
                    Some(kind) => kind.retry_after_cooldown(),
                    None => true,
                },
                _ => false,
            };
            let entry = HistoryEntry::new(
                &ctx.pn,
                target,
                ctx.maintainer.as_deref(),
                status,
                retryable,
                today,
            );
            if let Err(err) = history::append_history(&engine.paths.history_path(), &entry) {
                tracing::warn!(pn = %ctx.pn, error = %format!("{err:#}"), "history not updated");
            }
        }

        report.packages.push(PackageReport {
            pn: ctx.pn.clone(),
            from_version: ctx.old_version.clone(),
            to_version: ctx.target.clone(),
            maintainer: ctx.maintainer.clone(),
            status: status.to_string(),
            error: match &run.outcome {
                Outcome::Failed(err) => Some(format!("{err:#}")),
                _ => None,
            },
            command: match &run.outcome {
                Outcome::Failed(err) => failure_transcript(err).map(|tool| tool.command.clone()),
                _ => None,
            },
            patch,
            workdir: ctx.workdir.clone(),
        });
    }
    Ok(report)
}

/// Entry point behind `auh`.
pub fn run(args: &RootArgs) -> Result<()> {
    let build_dir = args.build_dir.clone().ok_or_else(|| {
        anyhow!("no build directory: pass --build-dir or set up the build environment")
    })?;
    if !build_dir.is_dir() {
        return Err(anyhow!(
            "build directory {} does not exist",
            build_dir.display()
        ));
    }
    let paths = HelperPaths::new(build_dir);
    let config = match &args.config {
        Some(path) => load_config(path, true)?,
        None => load_config(&paths.config_path(), false)?,
    };
    validate_config(&config)?;
    if args.write_config {
        write_config(&paths.config_path(), &config)?;
        println!("wrote {}", paths.config_path().display());
        return Ok(());
    }

    let selection = Selection::from_args(&args.packages, args.to_version.as_deref())?;
    let bitbake_argv = split_command(&config.build_command)?;
    let git_argv = split_command(&config.git_command)?;
    require_program(&bitbake_argv)?;
    require_program(&git_argv)?;

    let build = Bitbake::new(paths.build_dir().to_path_buf(), bitbake_argv);
    let locator = GitLocator::new(git_argv);
    let engine = Engine {
        build: &build,
        locator: &locator,
        prompt: &StdinPrompt,
        classifier: &LogScrapeClassifier,
        config: &config,
        paths: &paths,
        options: RunOptions {
            interactive: !args.auto && !matches!(selection, Selection::All),
            skip_compilation: args.skip_compilation,
        },
    };

    let today = history::today();
    let latest = history::load_latest(&paths.history_path())?;
    let requests = select(&engine, &selection, &latest, today)?;
    let requests = order(&engine, requests)?;
    if requests.is_empty() {
        tracing::info!("nothing to upgrade");
    }
    let report = run_batch(&engine, &requests, today)?;
    publish(&paths, &report, args.json)
}

fn publish(paths: &HelperPaths, report: &RunReport, json: bool) -> Result<()> {
    let text = serde_json::to_string_pretty(report).context("serialize run report")?;
    if json {
        println!("{text}");
    } else {
        if report.statistics.attempted > 1 {
            print!("{}", report.statistics.render());
        }
        for package in &report.packages {
            println!("{}: {}", package.pn, package.status);
        }
    }
    fs::create_dir_all(paths.helper_dir()).context("create upgrade-helper dir")?;
    let path = paths.report_path();
    fs::write(&path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
#[path = "batch_tests.rs"]
mod tests;
