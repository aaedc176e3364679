//! Scripted collaborators for engine tests.
//!
//! `FakeBuildTool` derives the recipe environment from the `<pn>_<ver>.bb`
//! file on disk and replays queued results for fetch and build. `FakeVcs`
//! records every call and performs moves on the real filesystem.
use crate::bitbake::BuildTool;
use crate::classify::LogScrapeClassifier;
use crate::config::{default_config, UpgradeConfig};
use crate::env::EnvSnapshot;
use crate::error::{ToolError, UpgradeError};
use crate::git::{RepoLocator, VersionControl};
use crate::paths::HelperPaths;
use crate::prompt::Prompt;
use crate::workflow::{Engine, RunOptions};
use anyhow::{Context, Result};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

/// Write a task log where bitbake would and return the console lines that
/// point at it.
pub(crate) fn task_failure(
    root: &Path,
    recipe: &str,
    version: &str,
    task: &str,
    log: &str,
) -> String {
    let dir = root
        .join("tmp/work/core2-64-poky-linux")
        .join(recipe)
        .join(format!("{version}-r0"))
        .join("temp");
    fs::create_dir_all(&dir).expect("create log dir");
    let path = dir.join(format!("log.{task}.4242"));
    fs::write(&path, log).expect("write task log");
    format!(
        "ERROR: {recipe}-{version}-r0 {task}: Function failed\n\
         ERROR: Logfile of failure stored in: {}\n",
        path.display()
    )
}

pub(crate) fn build_error(stdout: impl Into<String>) -> ToolError {
    ToolError::new("bitbake", stdout, "")
}

pub(crate) struct FakeBuildTool {
    recipe_dir: PathBuf,
    work_dir: PathBuf,
    fetches: RefCell<VecDeque<Result<(), ToolError>>>,
    builds: RefCell<VecDeque<Result<(), ToolError>>>,
    calls: RefCell<Vec<String>>,
    /// Main recipe text as seen by each fetch.
    fetched: RefCell<Vec<String>>,
    checkpkg: RefCell<Option<(PathBuf, String)>>,
    buildlist: RefCell<Option<Vec<String>>>,
}

impl FakeBuildTool {
    pub(crate) fn new(recipe_dir: &Path, work_dir: &Path) -> Self {
        Self {
            recipe_dir: recipe_dir.to_path_buf(),
            work_dir: work_dir.to_path_buf(),
            fetches: RefCell::new(VecDeque::new()),
            builds: RefCell::new(VecDeque::new()),
            calls: RefCell::new(Vec::new()),
            fetched: RefCell::new(Vec::new()),
            checkpkg: RefCell::new(None),
            buildlist: RefCell::new(None),
        }
    }

    /// Queue the outcome of the next fetch; unqueued fetches pass.
    pub(crate) fn queue_fetch(&self, result: Result<(), ToolError>) {
        self.fetches.borrow_mut().push_back(result);
    }

    /// Queue the outcome of the next build; unqueued builds pass.
    pub(crate) fn queue_build(&self, result: Result<(), ToolError>) {
        self.builds.borrow_mut().push_back(result);
    }

    /// Have `check_upstream` write `text` to `path`.
    pub(crate) fn set_checkpkg(&self, path: PathBuf, text: &str) {
        *self.checkpkg.borrow_mut() = Some((path, text.to_string()));
    }

    pub(crate) fn set_buildlist(&self, order: &[&str]) {
        *self.buildlist.borrow_mut() = Some(order.iter().map(|name| name.to_string()).collect());
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub(crate) fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub(crate) fn fetched_recipes(&self) -> Vec<String> {
        self.fetched.borrow().clone()
    }

    fn log(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn recipe_file(&self, recipe: &str) -> Result<Option<(PathBuf, String)>> {
        let prefix = format!("{recipe}_");
        let mut entries: Vec<PathBuf> = fs::read_dir(&self.recipe_dir)
            .with_context(|| format!("read {}", self.recipe_dir.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .collect();
        entries.sort();
        for path in entries {
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let version = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".bb"));
            if let Some(version) = version {
                return Ok(Some((path.clone(), version.to_string())));
            }
        }
        Ok(None)
    }
}

impl BuildTool for FakeBuildTool {
    fn environment(&self, recipe: &str) -> Result<EnvSnapshot> {
        self.log(format!("environment {recipe}"));
        let Some((file, version)) = self.recipe_file(recipe)? else {
            return Err(UpgradeError::EmptyEnvironment {
                recipe: recipe.to_string(),
            }
            .into());
        };
        let text = fs::read_to_string(&file)?;
        // An explicit PV wins over the file name, as it does for git recipes.
        let version = text
            .lines()
            .find_map(|line| line.strip_prefix("PV = "))
            .map(|pv| pv.trim_matches('"').replace("${SRCPV}", "AUTOINC+0"))
            .unwrap_or(version);
        let src_uri = text
            .lines()
            .find_map(|line| line.strip_prefix("SRC_URI = "))
            .unwrap_or_default()
            .trim_matches(['"', ' ', '\\']);
        let work = self.work_dir.join(format!("{recipe}/{version}-r0"));
        Ok(EnvSnapshot::from_pairs([
            ("PN", recipe.to_string()),
            ("PV", version.clone()),
            ("FILE", file.display().to_string()),
            ("SRC_URI", src_uri.to_string()),
            ("S", work.join(format!("{recipe}-{version}")).display().to_string()),
            ("T", work.join("temp").display().to_string()),
        ]))
    }

    fn fetch(&self, recipe: &str) -> Result<(), ToolError> {
        self.log(format!("fetch {recipe}"));
        if let Ok(Some((file, _))) = self.recipe_file(recipe) {
            let text = fs::read_to_string(file).unwrap_or_default();
            self.fetched.borrow_mut().push(text);
        }
        self.fetches.borrow_mut().pop_front().unwrap_or(Ok(()))
    }

    fn unpack(&self, recipe: &str) -> Result<(), ToolError> {
        self.log(format!("unpack {recipe}"));
        Ok(())
    }

    fn clean_all(&self, recipe: &str) -> Result<(), ToolError> {
        self.log(format!("cleanall {recipe}"));
        Ok(())
    }

    fn clean_state(&self, recipes: &[String]) -> Result<(), ToolError> {
        self.log(format!("cleansstate {}", recipes.join(" ")));
        Ok(())
    }

    fn build(&self, recipe: &str, machine: &str) -> Result<(), ToolError> {
        self.log(format!("build {recipe} {machine}"));
        self.builds.borrow_mut().pop_front().unwrap_or(Ok(()))
    }

    fn check_upstream(&self, recipes: &[String]) -> Result<()> {
        self.log(format!("checkpkg {}", recipes.join(" ")));
        if let Some((path, text)) = self.checkpkg.borrow().as_ref() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, text)?;
        }
        Ok(())
    }

    fn dependency_order(&self, recipes: &[String]) -> Result<Vec<String>> {
        self.log(format!("graph {}", recipes.join(" ")));
        let buildlist = self.buildlist.borrow();
        let Some(order) = buildlist.as_ref() else {
            return Ok(recipes.to_vec());
        };
        Ok(crate::bitbake::order_by_buildlist(recipes, &order.join("\n")))
    }
}

#[derive(Default)]
struct VcsState {
    calls: RefCell<Vec<String>>,
    commits: RefCell<Vec<String>>,
    status: RefCell<String>,
    nothing_to_commit: RefCell<bool>,
    failing: RefCell<Vec<String>>,
    tags: RefCell<String>,
}

/// Recording version control; clones share one call log.
#[derive(Clone, Default)]
pub(crate) struct FakeVcs {
    state: Rc<VcsState>,
}

impl FakeVcs {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.calls.borrow().clone()
    }

    pub(crate) fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.state
            .calls
            .borrow()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Full messages of every successful commit.
    pub(crate) fn commits(&self) -> Vec<String> {
        self.state.commits.borrow().clone()
    }

    pub(crate) fn set_status(&self, status: &str) {
        *self.state.status.borrow_mut() = status.to_string();
    }

    pub(crate) fn set_nothing_to_commit(&self, value: bool) {
        *self.state.nothing_to_commit.borrow_mut() = value;
    }

    /// Make every call starting with `prefix` fail.
    pub(crate) fn fail_on(&self, prefix: &str) {
        self.state.failing.borrow_mut().push(prefix.to_string());
    }

    pub(crate) fn set_tags(&self, ls_remote: &str) {
        *self.state.tags.borrow_mut() = ls_remote.to_string();
    }

    fn call(&self, call: String) -> Result<(), ToolError> {
        let fails = self
            .state
            .failing
            .borrow()
            .iter()
            .any(|prefix| call.starts_with(prefix.as_str()));
        self.state.calls.borrow_mut().push(call.clone());
        if fails {
            return Err(ToolError::new(format!("git {call}"), "", "scripted failure"));
        }
        Ok(())
    }
}

impl VersionControl for FakeVcs {
    fn status(&self) -> Result<String, ToolError> {
        self.call("status".to_string())?;
        Ok(self.state.status.borrow().clone())
    }

    fn create_branch(&self, name: &str) -> Result<(), ToolError> {
        self.call(format!("checkout -b {name}"))
    }

    fn checkout_branch(&self, name: &str) -> Result<(), ToolError> {
        self.call(format!("checkout {name}"))
    }

    fn delete_branch(&self, name: &str) -> Result<(), ToolError> {
        self.call(format!("branch -D {name}"))
    }

    fn move_path(&self, from: &Path, to: &Path) -> Result<(), ToolError> {
        self.call(format!("mv {} {}", from.display(), to.display()))?;
        fs::rename(from, to).map_err(|err| ToolError::new("git mv", "", err.to_string()))
    }

    fn commit(&self, message: &str, author: Option<&str>) -> Result<(), ToolError> {
        let subject = message.lines().next().unwrap_or_default();
        self.call(format!("commit {subject}"))?;
        if *self.state.nothing_to_commit.borrow() {
            return Err(ToolError::new(
                "git commit",
                "On branch upgrades\nnothing to commit, working tree clean\n",
                "",
            ));
        }
        let mut full = message.to_string();
        if let Some(author) = author {
            full.push_str(&format!("\nAuthor: {author}"));
        }
        self.state.commits.borrow_mut().push(full);
        Ok(())
    }

    fn create_patch(&self, out_dir: &Path) -> Result<PathBuf, ToolError> {
        self.call(format!("format-patch {}", out_dir.display()))?;
        let message = self.state.commits.borrow().last().cloned().unwrap_or_default();
        let path = out_dir.join("0001-upgrade.patch");
        fs::write(&path, message)
            .map_err(|err| ToolError::new("git format-patch", "", err.to_string()))?;
        Ok(path)
    }

    fn reset_hard(&self, n: usize) -> Result<(), ToolError> {
        self.call(format!("reset --hard HEAD~{n}"))
    }

    fn reset_soft(&self, n: usize) -> Result<(), ToolError> {
        self.call(format!("reset --soft HEAD~{n}"))
    }

    fn clean_untracked(&self) -> Result<(), ToolError> {
        self.call("clean -fd".to_string())
    }

    fn ls_remote_tags(&self, url: &str) -> Result<String, ToolError> {
        self.call(format!("ls-remote --tags {url}"))?;
        Ok(self.state.tags.borrow().clone())
    }
}

pub(crate) struct FakeLocator {
    pub(crate) vcs: FakeVcs,
}

impl RepoLocator for FakeLocator {
    fn locate(&self, _dir: &Path) -> Result<Box<dyn VersionControl>> {
        Ok(Box::new(self.vcs.clone()))
    }
}

/// Answers questions from a queue; an empty queue takes the default.
#[derive(Default)]
pub(crate) struct ScriptedPrompt {
    answers: RefCell<VecDeque<bool>>,
    asked: RefCell<Vec<String>>,
    shown: RefCell<Vec<String>>,
}

impl ScriptedPrompt {
    pub(crate) fn answering(answers: &[bool]) -> Self {
        Self {
            answers: RefCell::new(answers.iter().copied().collect()),
            ..Self::default()
        }
    }

    pub(crate) fn asked(&self) -> Vec<String> {
        self.asked.borrow().clone()
    }

    pub(crate) fn shown(&self) -> Vec<String> {
        self.shown.borrow().clone()
    }
}

impl Prompt for ScriptedPrompt {
    fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        self.asked.borrow_mut().push(question.to_string());
        Ok(self.answers.borrow_mut().pop_front().unwrap_or(default))
    }

    fn show(&self, text: &str) {
        self.shown.borrow_mut().push(text.to_string());
    }
}

/// A build directory, one recipe layer and scripted collaborators, wired
/// into an `Engine` on demand.
pub(crate) struct EngineRig {
    pub(crate) temp: TempDir,
    pub(crate) layer: PathBuf,
    pub(crate) build: FakeBuildTool,
    pub(crate) locator: FakeLocator,
    pub(crate) prompt: ScriptedPrompt,
    pub(crate) config: UpgradeConfig,
    pub(crate) paths: HelperPaths,
}

impl EngineRig {
    pub(crate) fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let layer = temp.path().join("meta/recipes-test");
        let build_dir = temp.path().join("build");
        fs::create_dir_all(&layer).expect("mkdir layer");
        fs::create_dir_all(&build_dir).expect("mkdir build");
        let build = FakeBuildTool::new(&layer, &build_dir.join("tmp/work"));
        let mut config = default_config();
        config.machines = vec!["qemux86".to_string()];
        Self {
            temp,
            layer,
            build,
            locator: FakeLocator {
                vcs: FakeVcs::default(),
            },
            prompt: ScriptedPrompt::default(),
            config,
            paths: HelperPaths::new(build_dir),
        }
    }

    pub(crate) fn root(&self) -> &Path {
        self.temp.path()
    }

    pub(crate) fn vcs(&self) -> &FakeVcs {
        &self.locator.vcs
    }

    /// Write `<pn>_<version>.bb` into the layer.
    pub(crate) fn add_recipe(&self, pn: &str, version: &str, text: &str) -> PathBuf {
        let path = self.layer.join(format!("{pn}_{version}.bb"));
        fs::write(&path, text).expect("write recipe");
        path
    }

    pub(crate) fn recipe_text(&self, pn: &str, version: &str) -> String {
        fs::read_to_string(self.layer.join(format!("{pn}_{version}.bb"))).expect("read recipe")
    }

    pub(crate) fn engine(&self, options: RunOptions) -> Engine<'_> {
        Engine {
            build: &self.build,
            locator: &self.locator,
            prompt: &self.prompt,
            classifier: &LogScrapeClassifier,
            config: &self.config,
            paths: &self.paths,
            options,
        }
    }
}
