//! Deployment orchestrator: for each named location, determines a tracker
//! and a deployer, computes the action list between two revisions, previews
//! and confirms it, transmits it, and persists the new revision; then
//! recurses into cascades. Cascades hang off `Definition`, not off a
//! location.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::Value;

use crate::action::{self, Action, ActionKind};
use crate::config::{Definition, EnvironmentLocation, TrackerKind};
use crate::deployer::console::ConsoleDeployer;
use crate::deployer::file::FileDeployer;
use crate::deployer::ftp::FtpDeployer;
use crate::deployer::ssh::SshDeployer;
use crate::deployer::{Deployer, ReadOutcome};
use crate::error::CreepError;
use crate::modifier;
use crate::path;
use crate::reporter::Reporter;
use crate::revision::Revision;
use crate::source;
use crate::tracker::hash::HashTracker;
use crate::tracker::vcs::VcsTracker;
use crate::tracker::Tracker;

/// Asks a yes/no question at the preview step. `AlwaysYes` backs the CLI's
/// `-y/--yes` flag; an interactive implementation lives in the CLI crate.
pub trait Prompt {
    fn confirm(&mut self, reporter: &mut dyn Reporter, question: &str) -> bool;
}

#[derive(Default)]
pub struct AlwaysYes;

impl Prompt for AlwaysYes {
    fn confirm(&mut self, _reporter: &mut dyn Reporter, _question: &str) -> bool {
        true
    }
}

/// Explicit file lists and revision bounds supplied on the command line.
/// Cascades always run with `SyncRequest::default()`: appends/removes/rev
/// overrides given at the top level never leak into a cascaded deploy.
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    pub append_files: Vec<String>,
    pub remove_files: Vec<String>,
    pub rev_from: Option<Value>,
    pub rev_to: Option<Value>,
}

/// Run one Definition against `location_names` (or `["default"]` if empty,
/// or every environment location if `["*"]`), recursing into cascades
/// afterwards. Returns `true` if every location and cascade succeeded.
pub fn run(
    reporter: &mut dyn Reporter,
    prompt: &mut dyn Prompt,
    definition: &Definition,
    location_names: &[String],
    request: &SyncRequest,
) -> bool {
    let workspace = match source::acquire(&definition.origin) {
        Ok(workspace) => workspace,
        Err(error) => {
            reporter.error(&format!("{error:#}"));
            return false;
        }
    };

    let names = expand_location_names(location_names, definition);
    let mut ok = true;

    for name in names {
        let Some(location) = definition.environment.get_location(&name) else {
            reporter.warn(&format!(
                "there is no location \"{name}\" in your environment file."
            ));
            continue;
        };

        if location.connection.is_some() {
            reporter.info(&format!("Deploying to location \"{name}\"..."));

            match sync(reporter, prompt, workspace.path(), definition, location, &name, request) {
                SyncOutcome::Success => {}
                SyncOutcome::LocationFailed => ok = false,
                SyncOutcome::RunAborted => return false,
            }
        }
    }

    for cascade in &definition.cascades {
        reporter.info(&format!("Cascading to path \"{}\"...", cascade.path.display()));

        if !run(reporter, prompt, cascade, &[], &SyncRequest::default()) {
            ok = false;
        }
    }

    ok
}

fn expand_location_names(requested: &[String], definition: &Definition) -> Vec<String> {
    if requested.is_empty() {
        vec!["default".to_string()]
    } else if requested.len() == 1 && requested[0] == "*" {
        definition.environment.locations.keys().cloned().collect()
    } else {
        requested.to_vec()
    }
}

/// `sync`'s outcome, distinguishing a failure confined to this location from
/// one that should stop the whole run (see [`CreepError::is_fatal_to_run`]).
enum SyncOutcome {
    Success,
    LocationFailed,
    RunAborted,
}

impl SyncOutcome {
    fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success)
    }
}

fn sync(
    reporter: &mut dyn Reporter,
    prompt: &mut dyn Prompt,
    workspace_dir: &Path,
    definition: &Definition,
    location: &EnvironmentLocation,
    location_name: &str,
    request: &SyncRequest,
) -> SyncOutcome {
    match sync_inner(reporter, prompt, workspace_dir, definition, location, location_name, request) {
        Ok(true) => SyncOutcome::Success,
        Ok(false) => SyncOutcome::LocationFailed,
        Err(error) => {
            reporter.error(&format!("{error:#}"));

            let fatal = error
                .downcast_ref::<CreepError>()
                .map(CreepError::is_fatal_to_run)
                .unwrap_or(false);

            if fatal {
                SyncOutcome::RunAborted
            } else {
                SyncOutcome::LocationFailed
            }
        }
    }
}

fn sync_inner(
    reporter: &mut dyn Reporter,
    prompt: &mut dyn Prompt,
    workspace_dir: &Path,
    definition: &Definition,
    location: &EnvironmentLocation,
    location_name: &str,
    request: &SyncRequest,
) -> Result<bool> {
    let deployer = build_deployer(location, workspace_dir)?;
    let tracker = build_tracker(definition, workspace_dir);

    let data = if location.local {
        let state_path = workspace_dir.join(&location.state);
        if state_path.is_file() {
            std::fs::read(&state_path)
                .with_context(|| format!("failed to read {}", state_path.display()))?
        } else {
            Vec::new()
        }
    } else {
        match deployer.read(reporter, &location.state)? {
            ReadOutcome::Bytes(bytes) => bytes,
            ReadOutcome::Empty => Vec::new(),
            ReadOutcome::Unreachable => {
                reporter.error(&format!(
                    "can't read revision file \"{}\", check connection string and ensure parent directory exists.",
                    location.state
                ));
                return Ok(false);
            }
        }
    };

    let mut revision = Revision::parse(&data)
        .with_context(|| format!("can't parse revision from file \"{}\"", location.state))?;

    let rev_from = match request.rev_from.clone() {
        Some(value) => value,
        None => match revision.get(location_name).cloned() {
            Some(value) => value,
            None => {
                if !prompt.confirm(
                    reporter,
                    "No current revision found, are you deploying for the first time? [Y/N]",
                ) {
                    return Ok(true);
                }
                Value::Null
            }
        },
    };

    let rev_to = match request.rev_to.clone() {
        Some(value) => value,
        None => {
            let current = tracker.current(reporter, workspace_dir)?;
            if current.is_null() {
                bail!(CreepError::Revision(
                    "can't find source version, please ensure your environment file is correctly defined.".into()
                ));
            }
            current
        }
    };

    revision.set(location_name, rev_to.clone());

    let staging = tempfile::tempdir().context("failed to create staging directory")?;
    let staging_dir = staging.path();

    let tracker_actions = tracker.diff(reporter, workspace_dir, staging_dir, &rev_from, &rev_to)?;
    let manual_actions = expand_manual_actions(
        reporter,
        workspace_dir,
        staging_dir,
        &chain(&location.append_files, &request.append_files),
        &chain(&location.remove_files, &request.remove_files),
    )?;

    let mut combined = tracker_actions;
    combined.extend(manual_actions);

    let mut used = HashSet::new();
    let mut actions = modifier::apply_all(reporter, staging_dir, &definition.modifiers, &mut used, &combined)?;

    if rev_from != rev_to && !location.local {
        let bytes = revision.serialize();
        std::fs::write(staging_dir.join(&location.state), &bytes)
            .with_context(|| format!("failed to write {}", location.state))?;
        actions.push(Action::add(location.state.clone()));
    }

    if actions.is_empty() {
        reporter.info("No deployment required.");
        return Ok(true);
    }

    ConsoleDeployer.send(reporter, staging_dir, &actions)?;

    if !prompt.confirm(reporter, "Deploy? [Y/N]") {
        return Ok(true);
    }

    action::sort_for_transmission(&mut actions);
    actions.retain(|a| a.is_transmittable());
    deployer.send(reporter, staging_dir, &actions)?;

    if location.local {
        std::fs::write(workspace_dir.join(&location.state), revision.serialize())
            .with_context(|| format!("failed to write {}", location.state))?;
    }

    reporter.info("Deployment done.");

    Ok(true)
}

fn chain(a: &[String], b: &[String]) -> Vec<String> {
    a.iter().chain(b.iter()).cloned().collect()
}

/// Turn the explicit append/remove path lists into ADD/DEL actions,
/// expanding directories recursively; staged ADDs are copied into
/// `staging_dir` immediately since the modifier engine expects staged
/// bytes to already be present for every incoming ADD.
fn expand_manual_actions(
    reporter: &mut dyn Reporter,
    workspace_dir: &Path,
    staging_dir: &Path,
    append: &[String],
    remove: &[String],
) -> Result<Vec<Action>> {
    let mut actions = Vec::new();

    for entry in append {
        let full = workspace_dir.join(entry);

        if full.is_dir() {
            for relative in walk_relative(workspace_dir, &full)? {
                actions.push(Action::add(relative));
            }
        } else if full.is_file() {
            actions.push(Action::add(entry.clone()));
        } else {
            reporter.warn(&format!("can't append missing file \"{entry}\"."));
        }
    }

    for action in &actions {
        if !path::duplicate(&workspace_dir.join(&action.path), staging_dir, &action.path)? {
            reporter.warn(&format!("can't copy file \"{}\".", action.path));
        }
    }

    for entry in remove {
        let full = workspace_dir.join(entry);

        if full.is_dir() {
            for relative in walk_relative(workspace_dir, &full)? {
                actions.push(Action::del(relative));
            }
        } else {
            actions.push(Action::del(entry.clone()));
        }
    }

    Ok(actions)
}

fn walk_relative(workspace_dir: &Path, dir: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    walk_relative_into(workspace_dir, dir, &mut out)?;
    out.sort();
    Ok(out)
}

fn walk_relative_into(workspace_dir: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let entry = entry?;
        let entry_path = entry.path();

        if entry_path.is_dir() {
            walk_relative_into(workspace_dir, &entry_path, out)?;
        } else if entry_path.is_file() {
            let relative = entry_path
                .strip_prefix(workspace_dir)
                .unwrap_or(&entry_path)
                .to_string_lossy()
                .replace('\\', "/");
            out.push(relative);
        }
    }

    Ok(())
}

fn build_tracker(definition: &Definition, workspace_dir: &Path) -> Box<dyn Tracker> {
    let kind = definition.tracker.unwrap_or_else(|| detect_tracker_kind(workspace_dir));

    match kind {
        TrackerKind::Hash => {
            let algorithm = definition
                .options
                .get("algorithm")
                .cloned()
                .unwrap_or_else(|| "md5".to_string());
            // Symlinks are followed by default unless an option says otherwise.
            let follow = definition
                .options
                .get("follow")
                .map(|value| value != "false" && value != "0")
                .unwrap_or(true);
            Box::new(HashTracker::new(algorithm, follow))
        }
        TrackerKind::Vcs => Box::new(VcsTracker::default()),
    }
}

fn detect_tracker_kind(workspace_dir: &Path) -> TrackerKind {
    let mut current = Some(workspace_dir);

    while let Some(dir) = current {
        if dir.join(".git").exists() {
            return TrackerKind::Vcs;
        }
        current = dir.parent();
    }

    TrackerKind::Hash
}

fn build_deployer(location: &EnvironmentLocation, workspace_dir: &Path) -> Result<Box<dyn Deployer>> {
    let url = location
        .connection
        .as_ref()
        .expect("sync is only invoked for locations with a connection");

    match url.scheme() {
        "file" => {
            let raw = location.connection_raw.as_deref().unwrap_or(url.as_str());
            let directory = raw.splitn(2, "://").nth(1).unwrap_or(".");
            let resolved = path::join_normalized(workspace_dir, directory.trim_start_matches('/'));
            Ok(Box::new(FileDeployer::new(resolved)))
        }
        "ftp" | "ftps" => {
            let directory = url.path().trim_start_matches('/').to_string();
            let passive = location
                .options
                .get("passive")
                .map(|value| value != "false" && value != "0")
                .unwrap_or(true);
            let user = non_empty(url.username());
            Ok(Box::new(FtpDeployer::new(
                url.scheme() == "ftps",
                url.host_str().unwrap_or(""),
                url.port(),
                user.as_deref(),
                url.password(),
                &directory,
                passive,
            )))
        }
        "ssh" => {
            let directory = url.path().trim_start_matches('/').to_string();
            let extra = location.options.get("extra").cloned().unwrap_or_default();
            let user = non_empty(url.username());
            Ok(Box::new(SshDeployer::new(
                url.host_str().unwrap_or(""),
                url.port(),
                user.as_deref(),
                &directory,
                &extra,
            )))
        }
        other => bail!(CreepError::Reachability(format!(
            "unsupported scheme \"{other}\" in connection string"
        ))),
    }
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Environment, Modifier, Origin, OriginBase};
    use crate::reporter::RecordingReporter;
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::PathBuf;

    fn empty_definition(origin_dir: PathBuf, locations: BTreeMap<String, EnvironmentLocation>) -> Definition {
        Definition {
            origin: Origin {
                base: OriginBase::Local(origin_dir),
                subpath: None,
            },
            environment: Environment { locations },
            tracker: Some(TrackerKind::Hash),
            options: BTreeMap::new(),
            cascades: Vec::new(),
            modifiers: Vec::new(),
            path: PathBuf::new(),
        }
    }

    fn location(connection: &str, local: bool) -> EnvironmentLocation {
        EnvironmentLocation {
            append_files: Vec::new(),
            connection: Some(url::Url::parse(connection).unwrap()),
            connection_raw: Some(connection.to_string()),
            local,
            options: BTreeMap::new(),
            remove_files: Vec::new(),
            state: ".creep.rev".to_string(),
        }
    }

    #[test]
    fn expand_location_names_defaults_to_default() {
        let definition = empty_definition(PathBuf::from("/tmp"), BTreeMap::new());
        assert_eq!(expand_location_names(&[], &definition), vec!["default".to_string()]);
    }

    #[test]
    fn expand_location_names_star_lists_every_location() {
        let mut locations = BTreeMap::new();
        locations.insert("a".to_string(), location("file:///tmp/a", true));
        locations.insert("b".to_string(), location("file:///tmp/b", true));
        let definition = empty_definition(PathBuf::from("/tmp"), locations);

        assert_eq!(
            expand_location_names(&["*".to_string()], &definition),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let loc = location("gopher://example.com/x", false);
        assert!(build_deployer(&loc, Path::new("/tmp")).is_err());
    }

    #[test]
    fn file_scheme_resolves_relative_to_workspace_without_losing_dot_dot() {
        let td = tempfile::tempdir().unwrap();
        let workspace = td.path().join("source");
        fs::create_dir_all(&workspace).unwrap();
        fs::create_dir_all(td.path().join("target")).unwrap();

        let loc = location("file:///../target", false);
        let deployer = build_deployer(&loc, &workspace).unwrap();
        let mut reporter = RecordingReporter::default();

        // A FileDeployer resolved against the sibling "target" directory
        // should report it reachable (not "directory missing").
        let outcome = deployer.read(&mut reporter, "whatever").unwrap();
        assert!(matches!(outcome, ReadOutcome::Empty));
    }

    #[test]
    fn sync_reports_nothing_to_deploy_on_repeat_run() {
        let td = tempfile::tempdir().unwrap();
        let workspace = td.path().join("source");
        let target = td.path().join("target");
        fs::create_dir_all(&workspace).unwrap();
        fs::create_dir_all(&target).unwrap();
        fs::write(workspace.join("file.txt"), b"hello").unwrap();

        let loc = location(&format!("file://{}", target.display()), false);
        let mut locations = BTreeMap::new();
        locations.insert("default".to_string(), loc.clone());
        let definition = empty_definition(workspace.clone(), locations);

        let mut reporter = RecordingReporter::default();
        let mut prompt = AlwaysYes;
        let ok = sync(
            &mut reporter,
            &mut prompt,
            &workspace,
            &definition,
            &loc,
            "default",
            &SyncRequest::default(),
        );
        assert!(ok.is_success());
        assert!(target.join("file.txt").exists());

        let mut reporter2 = RecordingReporter::default();
        let ok2 = sync(
            &mut reporter2,
            &mut prompt,
            &workspace,
            &definition,
            &loc,
            "default",
            &SyncRequest::default(),
        );
        assert!(ok2.is_success());
        assert!(reporter2.info.iter().any(|m| m.contains("No deployment required")));
    }

    #[test]
    fn config_file_modifier_keeps_definition_file_out_of_actions() {
        let td = tempfile::tempdir().unwrap();
        let workspace = td.path().join("source");
        let target = td.path().join("target");
        fs::create_dir_all(&workspace).unwrap();
        fs::create_dir_all(&target).unwrap();
        fs::write(workspace.join("keep.txt"), b"k").unwrap();
        fs::write(workspace.join(".creep.def"), b"{}").unwrap();

        let loc = location(&format!("file://{}", target.display()), false);
        let mut locations = BTreeMap::new();
        locations.insert("default".to_string(), loc.clone());
        let mut definition = empty_definition(workspace.clone(), locations);
        definition.modifiers.push(Modifier::ignore(".creep.def"));

        let mut reporter = RecordingReporter::default();
        let mut prompt = AlwaysYes;
        sync(
            &mut reporter,
            &mut prompt,
            &workspace,
            &definition,
            &loc,
            "default",
            &SyncRequest::default(),
        );

        assert!(target.join("keep.txt").exists());
        assert!(!target.join(".creep.def").exists());
    }
}
