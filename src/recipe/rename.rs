use super::{rewrite_lines, RecipeScope};
use crate::git::VersionControl;
use anyhow::Result;
use std::fs;
use std::path::PathBuf;

/// Drop `PR` assignments; the package revision restarts with every upgrade.
pub fn strip_revision_markers(scope: &RecipeScope) -> Result<usize> {
    let mut changed = 0;
    for path in scope.files()? {
        let edited = rewrite_lines(&path, |line| {
            if line.starts_with("PR=") || line.starts_with("PR =") {
                String::new()
            } else {
                line.to_string()
            }
        })?;
        if edited {
            changed += 1;
        }
    }
    Ok(changed)
}

/// Move every `<pn>*<old>*` file to its `<new>` name, plus a `<pn>-<old>`
/// files directory when one exists. Returns the new paths.
pub fn rename_versioned(
    scope: &RecipeScope,
    new_version: &str,
    vcs: &dyn VersionControl,
) -> Result<Vec<PathBuf>> {
    let mut moves = Vec::new();
    for entry in fs::read_dir(&scope.dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if name.starts_with(&scope.pn) && name.contains(&scope.version) {
            let renamed = name.replace(&scope.version, new_version);
            moves.push((path.clone(), scope.dir.join(renamed)));
        }
    }
    moves.sort();

    let files_dir = scope.dir.join(format!("{}-{}", scope.pn, scope.version));
    if files_dir.is_dir() {
        let target = scope.dir.join(format!("{}-{}", scope.pn, new_version));
        moves.push((files_dir, target));
    }

    let mut renamed = Vec::new();
    for (from, to) in moves {
        tracing::debug!(from = %from.display(), to = %to.display(), "rename");
        vcs.move_path(&from, &to)?;
        renamed.push(to);
    }
    Ok(renamed)
}
