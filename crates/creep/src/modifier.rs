//! Modifier pipeline: matches each incoming action's basename against an
//! ordered list of regex rules and, on a match, runs rename/link/modify/
//! chmod/filter stages against the staged file.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;

use crate::action::{Action, ActionKind};
use crate::config::Modifier;
use crate::process::Process;
use crate::reporter::Reporter;

/// Run every action in `incoming` through `modifiers`, returning the
/// transformed output sequence. `used` tracks paths already processed
/// across the whole run (link expansion can introduce a path more than
/// once; the second visit is a no-op), so callers that need cross-call
/// loop safety should reuse the same set.
pub fn apply_all(
    reporter: &mut dyn Reporter,
    staging_dir: &Path,
    modifiers: &[Modifier],
    used: &mut HashSet<String>,
    incoming: &[Action],
) -> Result<Vec<Action>> {
    let mut output = Vec::new();

    for action in incoming {
        output.extend(apply_one(
            reporter,
            staging_dir,
            modifiers,
            used,
            &action.path,
            action.kind,
        )?);
    }

    Ok(output)
}

fn apply_one(
    reporter: &mut dyn Reporter,
    staging_dir: &Path,
    modifiers: &[Modifier],
    used: &mut HashSet<String>,
    path: &str,
    kind: ActionKind,
) -> Result<Vec<Action>> {
    let path = crate::action::normalize(path);

    if used.contains(&path) {
        return Ok(Vec::new());
    }

    used.insert(path.clone());

    let basename = path.rsplit('/').next().unwrap_or(&path).to_string();

    let modifier = modifiers.iter().find(|m| m.regex.is_match(&basename));

    let Some(modifier) = modifier else {
        return Ok(vec![Action::new(path, kind)]);
    };

    reporter.debug(&format!(
        "file '{path}' matches '{}'.",
        modifier.regex.as_str()
    ));

    let mut output = Vec::new();
    let mut path = path;
    let mut kind = kind;

    if let Some(rename) = &modifier.rename {
        let captures = modifier.regex.captures(&basename);
        let substituted = substitute_backreferences(rename, captures.as_ref());
        let new_name = substituted.rsplit('/').next().unwrap_or(&substituted).to_string();
        let previous_path = path.clone();
        path = join_sibling(&path, &new_name);

        if kind == ActionKind::Add {
            crate::path::duplicate(&staging_dir.join(&previous_path), staging_dir, &path)?;
        }

        reporter.debug(&format!("file '{previous_path}' renamed to '{path}'."));
    }

    if let Some(link) = &modifier.link {
        if kind == ActionKind::Add {
            match run(staging_dir, &path, link)? {
                Some(stdout) => {
                    for line in String::from_utf8_lossy(&stdout).lines() {
                        reporter.debug(&format!("file '{path}' is linked to file '{line}'."));
                        output.extend(apply_one(
                            reporter,
                            staging_dir,
                            modifiers,
                            used,
                            line,
                            kind,
                        )?);
                    }
                }
                None => {
                    reporter.warn(&format!("command 'link' on file '{path}' returned non-zero code."));
                    kind = ActionKind::Err;
                }
            }
        }
    }

    if let Some(modify) = &modifier.modify {
        if kind == ActionKind::Add {
            match run(staging_dir, &path, modify)? {
                Some(stdout) => {
                    std::fs::write(staging_dir.join(&path), stdout)?;
                }
                None => {
                    reporter.warn(&format!("command 'modify' on file '{path}' returned non-zero code."));
                    kind = ActionKind::Err;
                }
            }
        }
    }

    if kind == ActionKind::Add {
        set_permissions(&staging_dir.join(&path), modifier.chmod)?;
    }

    if let Some(filter) = &modifier.filter {
        let passes = !filter.is_empty() && run(staging_dir, &path, filter)?.is_some();

        if !passes {
            reporter.debug(&format!("file '{path}' filtered out."));
            kind = ActionKind::Nop;
        }
    }

    output.push(Action::new(path, kind));

    Ok(output)
}

fn run(staging_dir: &Path, path: &str, command_template: &str) -> Result<Option<Vec<u8>>> {
    let quoted = shlex::try_quote(path)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| path.to_string());
    let command = command_template.replace("{}", &quoted);

    let output = Process::shell_line(command)
        .set_shell(true)
        .set_directory(staging_dir)
        .execute()?;

    Ok(if output.success() { Some(output.stdout) } else { None })
}

fn substitute_backreferences(template: &str, captures: Option<&regex::Captures>) -> String {
    let mut result = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            let mut digits = String::new();
            while matches!(chars.peek(), Some(d) if d.is_ascii_digit()) {
                digits.push(chars.next().unwrap());
            }
            if !digits.is_empty() {
                if let Ok(index) = digits.parse::<usize>() {
                    if let Some(caps) = captures {
                        if let Some(m) = caps.get(index) {
                            result.push_str(m.as_str());
                        }
                    }
                }
                continue;
            }
            result.push(c);
        } else {
            result.push(c);
        }
    }

    result
}

fn join_sibling(path: &str, new_name: &str) -> String {
    match path.rfind('/') {
        Some(idx) => format!("{}/{}", &path[..idx], new_name),
        None => new_name.to_string(),
    }
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
