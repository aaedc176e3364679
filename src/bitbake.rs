//! Build tool collaborator.
//!
//! `BuildTool` is the seam the engine is tested through; `Bitbake` runs the
//! real `bitbake` from the build directory.
use crate::env::EnvSnapshot;
use crate::error::{ToolError, UpgradeError};
use crate::process::run_tool;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

const MULTIPLE_PROVIDERS: &str =
    "ERROR: Multiple .bb files are due to be built which each provide";
const CHECKPKG_MISSING: &str = "ERROR: Task do_checkpkg does not exist";

pub trait BuildTool {
    /// Resolved variables of `recipe` (`bitbake -e`).
    fn environment(&self, recipe: &str) -> Result<EnvSnapshot>;
    fn fetch(&self, recipe: &str) -> Result<(), ToolError>;
    fn unpack(&self, recipe: &str) -> Result<(), ToolError>;
    fn clean_all(&self, recipe: &str) -> Result<(), ToolError>;
    fn clean_state(&self, recipes: &[String]) -> Result<(), ToolError>;
    /// Full build of `recipe` with `MACHINE` set to `machine`.
    fn build(&self, recipe: &str, machine: &str) -> Result<(), ToolError>;
    /// Run the upstream version check, refreshing `tmp/log/checkpkg.csv`.
    fn check_upstream(&self, recipes: &[String]) -> Result<()>;
    /// `recipes` reordered so dependencies come first.
    fn dependency_order(&self, recipes: &[String]) -> Result<Vec<String>>;
}

pub struct Bitbake {
    build_dir: PathBuf,
    command: Vec<String>,
}

impl Bitbake {
    pub fn new(build_dir: PathBuf, command: Vec<String>) -> Self {
        Self { build_dir, command }
    }

    fn run(&self, args: &[&str], recipes: &[String]) -> Result<String, ToolError> {
        self.run_with_env(args, recipes, &[])
    }

    fn run_with_env(
        &self,
        args: &[&str],
        recipes: &[String],
        envs: &[(String, String)],
    ) -> Result<String, ToolError> {
        let mut argv: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        argv.extend(recipes.iter().cloned());
        run_tool(&self.command, &argv, envs, &self.build_dir)
    }
}

fn one(recipe: &str) -> [String; 1] {
    [recipe.to_string()]
}

impl BuildTool for Bitbake {
    fn environment(&self, recipe: &str) -> Result<EnvSnapshot> {
        let dump = self.run(&["-e"], &one(recipe))?;
        let env = EnvSnapshot::parse(&dump);
        if env.is_empty() {
            return Err(UpgradeError::EmptyEnvironment {
                recipe: recipe.to_string(),
            }
            .into());
        }
        Ok(env)
    }

    fn fetch(&self, recipe: &str) -> Result<(), ToolError> {
        self.run(&["-c", "fetch"], &one(recipe)).map(drop)
    }

    fn unpack(&self, recipe: &str) -> Result<(), ToolError> {
        self.run(&["-c", "unpack"], &one(recipe)).map(drop)
    }

    fn clean_all(&self, recipe: &str) -> Result<(), ToolError> {
        self.run(&["-c", "cleanall"], &one(recipe)).map(drop)
    }

    fn clean_state(&self, recipes: &[String]) -> Result<(), ToolError> {
        self.run(&["-c", "cleansstate"], recipes).map(drop)
    }

    fn build(&self, recipe: &str, machine: &str) -> Result<(), ToolError> {
        let envs = [("MACHINE".to_string(), machine.to_string())];
        self.run_with_env(&[], &one(recipe), &envs).map(drop)
    }

    fn check_upstream(&self, recipes: &[String]) -> Result<()> {
        let universe = recipes.iter().any(|recipe| recipe == "universe");
        let args: &[&str] = if universe {
            &["-c", "checkpkg", "-k"]
        } else {
            &["-c", "checkpkg"]
        };
        match self.run(args, recipes) {
            Ok(_) => Ok(()),
            Err(err) if err.mentions(CHECKPKG_MISSING) => Err(anyhow::Error::new(err).context(
                "do_checkpkg is unavailable; add INHERIT += \"distrodata\" to local.conf",
            )),
            // -k keeps going past broken recipes; the csv is still written.
            Err(err) if universe => {
                tracing::warn!(command = %err.command, "upstream check reported errors");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn dependency_order(&self, recipes: &[String]) -> Result<Vec<String>> {
        if let Err(err) = self.run(&["-g"], recipes) {
            if !err.mentions(MULTIPLE_PROVIDERS) {
                return Err(err.into());
            }
        }
        let path = self.build_dir.join("pn-buildlist");
        let buildlist =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        Ok(order_by_buildlist(recipes, &buildlist))
    }
}

/// Order `recipes` as they appear in a `pn-buildlist`; recipes the list does
/// not mention keep their relative order at the end.
pub fn order_by_buildlist(recipes: &[String], buildlist: &str) -> Vec<String> {
    let wanted: BTreeSet<&str> = recipes.iter().map(String::as_str).collect();
    let mut ordered: Vec<String> = Vec::new();
    for name in buildlist.lines().map(str::trim) {
        if wanted.contains(name) && !ordered.iter().any(|seen| seen == name) {
            ordered.push(name.to_string());
        }
    }
    for recipe in recipes {
        if !ordered.contains(recipe) {
            ordered.push(recipe.clone());
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn buildlist_order_wins_and_unknown_recipes_trail() {
        let buildlist = "zlib\nopenssl\ncurl\nzlib\n";
        let ordered = order_by_buildlist(&names(&["curl", "mystery", "zlib"]), buildlist);
        assert_eq!(ordered, names(&["zlib", "curl", "mystery"]));
    }

    #[test]
    fn environment_rejects_empty_dump() {
        let Ok(silent) = which::which("true") else {
            return;
        };
        let temp = tempfile::tempdir().expect("tempdir");
        let bitbake = Bitbake::new(temp.path().to_path_buf(), vec![silent.display().to_string()]);
        let err = bitbake.environment("foo").expect_err("empty environment");
        assert!(matches!(
            err.downcast_ref::<UpgradeError>(),
            Some(UpgradeError::EmptyEnvironment { .. })
        ));
    }

    #[test]
    fn dependency_order_tolerates_multiple_providers() {
        let Ok(sh) = which::which("sh") else {
            return;
        };
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("pn-buildlist"), "b\na\n").expect("write");
        // A stand-in tool that fails the way bitbake -g does with duplicate providers.
        let script = format!("echo '{MULTIPLE_PROVIDERS} virtual/foo'; exit 1");
        let bitbake = Bitbake::new(
            temp.path().to_path_buf(),
            vec![sh.display().to_string(), "-c".to_string(), script],
        );
        let ordered = bitbake.dependency_order(&names(&["a", "b"])).expect("order");
        assert_eq!(ordered, names(&["b", "a"]));
    }
}
