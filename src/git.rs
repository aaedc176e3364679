//! Version control collaborator.
//!
//! The engine only sees `VersionControl`; `Git` drives the `git` binary in
//! the layer checkout that owns the recipe.
use crate::error::ToolError;
use crate::process::run_tool;
use anyhow::Result;
use std::path::{Path, PathBuf};

pub trait VersionControl {
    /// `git status --porcelain` output; empty when the tree is clean.
    fn status(&self) -> Result<String, ToolError>;
    fn create_branch(&self, name: &str) -> Result<(), ToolError>;
    fn checkout_branch(&self, name: &str) -> Result<(), ToolError>;
    fn delete_branch(&self, name: &str) -> Result<(), ToolError>;
    fn move_path(&self, from: &Path, to: &Path) -> Result<(), ToolError>;
    /// Commit every tracked change. `author` is `Name <email>`.
    fn commit(&self, message: &str, author: Option<&str>) -> Result<(), ToolError>;
    /// Export the last commit as a patch file into `out_dir`.
    fn create_patch(&self, out_dir: &Path) -> Result<PathBuf, ToolError>;
    /// `reset --hard HEAD~n`; `n == 0` discards working tree changes only.
    fn reset_hard(&self, n: usize) -> Result<(), ToolError>;
    fn reset_soft(&self, n: usize) -> Result<(), ToolError>;
    fn clean_untracked(&self) -> Result<(), ToolError>;
    fn ls_remote_tags(&self, url: &str) -> Result<String, ToolError>;
}

/// Finds the repository that owns a recipe directory.
pub trait RepoLocator {
    fn locate(&self, dir: &Path) -> Result<Box<dyn VersionControl>>;
}

pub struct Git {
    repo_dir: PathBuf,
    command: Vec<String>,
}

impl Git {
    pub fn new(repo_dir: PathBuf, command: Vec<String>) -> Self {
        Self { repo_dir, command }
    }

    fn run(&self, args: &[&str]) -> Result<String, ToolError> {
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        run_tool(&self.command, &args, &[], &self.repo_dir)
    }
}

fn head_offset(n: usize) -> String {
    format!("HEAD~{n}")
}

impl VersionControl for Git {
    fn status(&self) -> Result<String, ToolError> {
        self.run(&["status", "--porcelain"])
    }

    fn create_branch(&self, name: &str) -> Result<(), ToolError> {
        self.run(&["checkout", "-b", name]).map(drop)
    }

    fn checkout_branch(&self, name: &str) -> Result<(), ToolError> {
        self.run(&["checkout", name]).map(drop)
    }

    fn delete_branch(&self, name: &str) -> Result<(), ToolError> {
        self.run(&["branch", "-D", name]).map(drop)
    }

    fn move_path(&self, from: &Path, to: &Path) -> Result<(), ToolError> {
        let from = from.display().to_string();
        let to = to.display().to_string();
        self.run(&["mv", "-f", &from, &to]).map(drop)
    }

    fn commit(&self, message: &str, author: Option<&str>) -> Result<(), ToolError> {
        self.run(&["add", "--all", "."])?;
        let committed = match author {
            Some(author) => {
                let author = format!("--author={author}");
                self.run(&["commit", "-a", &author, "-m", message])
            }
            None => self.run(&["commit", "-a", "-s", "-m", message]),
        };
        committed.map(drop)
    }

    fn create_patch(&self, out_dir: &Path) -> Result<PathBuf, ToolError> {
        let out = out_dir.display().to_string();
        let stdout = self.run(&["format-patch", "-M10", "-1", "-o", &out])?;
        let name = stdout.lines().next_back().unwrap_or_default().trim();
        Ok(self.repo_dir.join(name))
    }

    fn reset_hard(&self, n: usize) -> Result<(), ToolError> {
        self.run(&["reset", "--hard", &head_offset(n)]).map(drop)
    }

    fn reset_soft(&self, n: usize) -> Result<(), ToolError> {
        self.run(&["reset", "--soft", &head_offset(n)]).map(drop)
    }

    fn clean_untracked(&self) -> Result<(), ToolError> {
        self.run(&["clean", "-fd"]).map(drop)
    }

    fn ls_remote_tags(&self, url: &str) -> Result<String, ToolError> {
        self.run(&["ls-remote", "--tags", url])
    }
}

/// Resolves the repository with `git rev-parse --show-toplevel`.
pub struct GitLocator {
    command: Vec<String>,
}

impl GitLocator {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl RepoLocator for GitLocator {
    fn locate(&self, dir: &Path) -> Result<Box<dyn VersionControl>> {
        let args = vec!["rev-parse".to_string(), "--show-toplevel".to_string()];
        let top = run_tool(&self.command, &args, &[], dir).map_err(|err| {
            anyhow::Error::new(err)
                .context(format!("{} is not inside a git repository", dir.display()))
        })?;
        let top = PathBuf::from(top.trim());
        tracing::debug!(repo = %top.display(), "located recipe repository");
        Ok(Box::new(Git::new(top, self.command.clone())))
    }
}
