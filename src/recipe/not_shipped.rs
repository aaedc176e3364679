use super::{line_ending, rewrite_file, RecipeScope};
use anyhow::Result;

const NOT_SHIPPED_MARKER: &str = "Files/directories were installed but not shipped";

/// Installation prefixes and the variables that name them.
const PREFIXES: &[(&str, &str)] = &[
    ("/usr", "prefix"),
    ("/bin", "base_bindir"),
    ("/sbin", "base_sbindir"),
    ("/lib", "base_libdir"),
    ("/usr/share", "datadir"),
    ("/etc", "sysconfdir"),
    ("/var", "localstatedir"),
    ("/usr/share/info", "infodir"),
    ("/usr/share/man", "mandir"),
    ("/usr/share/doc", "docdir"),
    ("/srv", "servicedir"),
    ("/usr/bin", "bindir"),
    ("/usr/sbin", "sbindir"),
    ("/usr/libexec", "libexecdir"),
    ("/usr/lib", "libdir"),
    ("/usr/include", "includedir"),
];

fn is_under(path: &str, dir: &str) -> bool {
    path == dir || path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

/// `FILES` entries for the paths a packaging log reports as installed but not
/// shipped.
///
/// Paths below an already listed path are folded into it and an entry that
/// absorbed more than one path becomes `<dir>/*`. The longest known
/// installation prefix is replaced with its variable.
pub fn collect_not_shipped(log: &str) -> Vec<String> {
    let mut entries: Vec<(String, usize)> = Vec::new();
    let mut listing = false;
    for line in log.lines() {
        if line.contains(NOT_SHIPPED_MARKER) {
            listing = true;
            continue;
        }
        let path = line.trim();
        if !listing || !path.starts_with('/') {
            continue;
        }
        match entries.iter_mut().find(|(seen, _)| is_under(path, seen)) {
            Some((_, count)) => *count += 1,
            None => entries.push((path.to_string(), 1)),
        }
    }

    entries
        .into_iter()
        .map(|(path, count)| {
            let path = if count > 1 { format!("{path}/*") } else { path };
            substitute_prefix(&path)
        })
        .collect()
}

fn substitute_prefix(path: &str) -> String {
    let best = PREFIXES
        .iter()
        .filter(|(prefix, _)| is_under(path, prefix))
        .max_by_key(|(prefix, _)| prefix.len());
    match best {
        Some((prefix, var)) => format!("${{{var}}}{}", &path[prefix.len()..]),
        None => path.to_string(),
    }
}

fn is_files_clause(line: &str) -> bool {
    ["FILES_${PN}", "FILES:${PN}"].iter().any(|head| {
        line.strip_prefix(head)
            .and_then(|rest| rest.chars().next())
            .is_some_and(|c| matches!(c, ' ' | '\t' | '+' | '=' | '?' | ':' | '.'))
    })
}

/// Render the closing line of a `FILES` value with `entries` appended.
fn close_clause(line: &str, entries: &[String], opening: bool) -> Option<String> {
    let ending = line_ending(line);
    let ending = if ending.is_empty() { "\n" } else { ending };
    let body = line.trim_end_matches(['\r', '\n']);
    let quote = body.rfind('"')?;
    let head = body[..quote].trim_end();
    let tail = &body[quote + 1..];

    let indent: String = body.chars().take_while(|c| matches!(c, ' ' | '\t')).collect();
    let indent = if opening || indent.is_empty() {
        "    ".to_string()
    } else {
        indent
    };

    let mut out = String::new();
    if !head.trim().is_empty() {
        let separator = if head.ends_with('"') { "" } else { " " };
        out.push_str(&format!("{head}{separator}\\{ending}"));
    }
    let (last, rest) = entries.split_last()?;
    for entry in rest {
        out.push_str(&format!("{indent}{entry} \\{ending}"));
    }
    out.push_str(&format!("{indent}{last}\"{tail}{ending}"));
    Some(out)
}

fn append_to_clause(text: &str, entries: &[String]) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut in_clause = false;
    let mut done = false;
    for line in text.split_inclusive('\n') {
        if done {
            out.push_str(line);
            continue;
        }
        if !in_clause && is_files_clause(line) {
            if line.matches('"').count() >= 2 {
                out.push_str(&close_clause(line, entries, true)?);
                done = true;
            } else {
                out.push_str(line);
                in_clause = true;
            }
            continue;
        }
        if in_clause && line.contains('"') {
            out.push_str(&close_clause(line, entries, false)?);
            done = true;
            continue;
        }
        out.push_str(line);
    }
    done.then_some(out)
}

fn new_clause(text: &str, entries: &[String]) -> String {
    let Some((last, rest)) = entries.split_last() else {
        return text.to_string();
    };
    let mut out = text.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("FILES:${PN} += \" \\\n");
    for entry in rest {
        out.push_str(&format!("    {entry} \\\n"));
    }
    out.push_str(&format!("    {last}\"\n"));
    out
}

/// Append the not-shipped paths from `log` to the package's `FILES` value.
///
/// The first existing `FILES` clause in the include file or main recipe is
/// extended; without one a new clause is added to the main recipe. Returns
/// the number of entries added.
pub fn add_not_shipped(scope: &RecipeScope, log: &str) -> Result<usize> {
    let entries = collect_not_shipped(log);
    if entries.is_empty() {
        return Ok(0);
    }
    for file in scope.include_and_main() {
        let mut appended = false;
        rewrite_file(&file, |text| {
            Ok(match append_to_clause(text, &entries) {
                Some(updated) => {
                    appended = true;
                    updated
                }
                None => text.to_string(),
            })
        })?;
        if appended {
            tracing::info!(file = %file.display(), count = entries.len(), "extended FILES");
            return Ok(entries.len());
        }
    }
    rewrite_file(&scope.main_file, |text| Ok(new_clause(text, &entries)))?;
    tracing::info!(
        file = %scope.main_file.display(),
        count = entries.len(),
        "added FILES clause"
    );
    Ok(entries.len())
}
