//! Git-backed tracker: treats a commit-ish as the revision token and lets
//! `git diff --name-status` do the change detection instead of walking and
//! hashing every file.

use std::path::Path;

use anyhow::{Result, bail};
use serde_json::Value;

use crate::action::Action;
use crate::error::CreepError;
use crate::process::Process;
use crate::reporter::Reporter;

use super::Tracker;

/// Name of the environment variable that overrides the `git` binary used,
/// so tests can point at a fake script instead of a real git checkout.
pub const GIT_PROGRAM_ENV: &str = "CREEP_GIT_PROGRAM";

fn git_program() -> String {
    std::env::var(GIT_PROGRAM_ENV).unwrap_or_else(|_| "git".to_string())
}

pub struct VcsTracker;

impl VcsTracker {
    pub fn new() -> Self {
        VcsTracker
    }

    fn rev_parse(&self, base_dir: &Path, rev: &str) -> Result<crate::process::ProcessOutput> {
        Process::command([git_program(), "rev-parse".into(), "--quiet".into(), "--verify".into(), rev.to_string()])
            .set_directory(base_dir)
            .execute()
    }
}

impl Default for VcsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker for VcsTracker {
    fn current(&self, _reporter: &mut dyn Reporter, base_dir: &Path) -> Result<Value> {
        let output = self.rev_parse(base_dir, "HEAD")?;

        if output.success() {
            Ok(Value::String(output.stdout_string().trim().to_string()))
        } else {
            Ok(Value::Null)
        }
    }

    fn diff(
        &self,
        reporter: &mut dyn Reporter,
        base_dir: &Path,
        staging_dir: &Path,
        rev_from: &Value,
        rev_to: &Value,
    ) -> Result<Vec<Action>> {
        let from_text = match rev_from {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => {
                reporter.error(&format!(
                    "corrupted source revision \"{other}\" (must be a valid Git hash)."
                ));
                bail!(CreepError::Revision(format!(
                    "source revision must be a string, got {other}"
                )));
            }
        };

        let to_text = match rev_to {
            Value::String(s) => s.clone(),
            other => {
                bail!(CreepError::Revision(format!(
                    "target revision must be a string, got {other}"
                )));
            }
        };

        let res_from = if from_text.is_empty() {
            Process::command([git_program(), "hash-object".into(), "-t".into(), "tree".into(), "/dev/null".into()])
                .set_directory(base_dir)
                .execute()?
        } else {
            self.rev_parse(base_dir, &from_text)?
        };

        if !res_from.success() {
            reporter.error(&res_from.stderr_string());
            bail!(CreepError::Revision(format!(
                "unknown source revision \"{from_text}\" (must be a valid Git tree-ish)."
            )));
        }

        let res_to = self.rev_parse(base_dir, &to_text)?;

        if !res_to.success() {
            reporter.error(&res_to.stderr_string());
            bail!(CreepError::Revision(format!(
                "unknown target revision \"{to_text}\" (must be a valid Git tree-ish)."
            )));
        }

        let hash_from = res_from.stdout_string().trim().to_string();
        let hash_to = res_to.stdout_string().trim().to_string();

        if hash_from == hash_to {
            reporter.info(&format!(
                "already at revision ((fuchsia)){}((default)).",
                &hash_from[..hash_from.len().min(8)]
            ));
            return Ok(Vec::new());
        }

        reporter.info(&format!(
            "update from revision ((fuchsia)){}((default)) to ((fuchsia)){}((default)).",
            &hash_from[..hash_from.len().min(8)],
            &hash_to[..hash_to.len().min(8)]
        ));

        let archive_file = tempfile::NamedTempFile::new()?;
        let archive_path = archive_file.path().to_path_buf();

        let archive = Process::command([
            git_program(),
            "archive".into(),
            "--output".into(),
            archive_path.to_string_lossy().into_owned(),
            hash_to.clone(),
            ".".into(),
        ])
        .set_directory(base_dir)
        .execute()?;

        if !archive.success() {
            reporter.error(&archive.stderr_string());
            bail!(CreepError::Transport("couldn't export archive from git.".into()));
        }

        std::fs::create_dir_all(staging_dir)?;

        let extract = Process::command(["tar".to_string(), "xf".into(), archive_path.to_string_lossy().into_owned()])
            .set_directory(staging_dir)
            .execute()?;

        if !extract.success() {
            reporter.error(&extract.stderr_string());
            bail!(CreepError::Transport(
                "couldn't extract git archive to staging directory.".into()
            ));
        }

        let diff = Process::command([
            git_program(),
            "diff".into(),
            "--name-status".into(),
            "--relative".into(),
            hash_from,
            hash_to,
        ])
        .set_directory(base_dir)
        .execute()?;

        if !diff.success() {
            reporter.error(&diff.stderr_string());
            bail!(CreepError::Transport("couldn't get diff from git.".into()));
        }

        let mut actions = Vec::new();

        for line in diff.stdout_string().lines() {
            let mut fields = line.split('\t');
            let mode = fields.next().unwrap_or("");
            let rest: Vec<&str> = fields.collect();

            if mode == "A" || mode == "M" {
                if let Some(path) = rest.first() {
                    actions.push(Action::add(*path));
                }
            } else if mode == "D" {
                if let Some(path) = rest.first() {
                    actions.push(Action::del(*path));
                }
            } else if mode.starts_with('R') {
                if let [path_del, path_add] = rest[..] {
                    actions.push(Action::add(path_add));
                    actions.push(Action::del(path_del));
                }
            }
        }

        Ok(actions)
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn write_fake_git(dir: &Path, script: &str) -> std::path::PathBuf {
        let path = dir.join("fake-git");
        fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &std::path::Path) -> Self {
            let previous = std::env::var(key).ok();
            unsafe { std::env::set_var(key, value) };
            EnvGuard { key, previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.previous {
                Some(v) => unsafe { std::env::set_var(self.key, v) },
                None => unsafe { std::env::remove_var(self.key) },
            }
        }
    }

    #[test]
    #[serial_test::serial]
    fn current_returns_null_when_no_commit_exists() {
        let td = tempfile::tempdir().unwrap();
        let fake = write_fake_git(td.path(), "exit 1");
        let _guard = EnvGuard::set(GIT_PROGRAM_ENV, &fake);

        let mut reporter = crate::reporter::NullReporter;
        let value = VcsTracker::new().current(&mut reporter, td.path()).unwrap();
        assert_eq!(value, Value::Null);
    }

    #[test]
    #[serial_test::serial]
    fn current_returns_trimmed_commit_hash() {
        let td = tempfile::tempdir().unwrap();
        let fake = write_fake_git(td.path(), "echo deadbeef0123\n");
        let _guard = EnvGuard::set(GIT_PROGRAM_ENV, &fake);

        let mut reporter = crate::reporter::NullReporter;
        let value = VcsTracker::new().current(&mut reporter, td.path()).unwrap();
        assert_eq!(value, Value::String("deadbeef0123".to_string()));
    }

    #[test]
    #[serial_test::serial]
    fn diff_returns_empty_when_revisions_match() {
        let td = tempfile::tempdir().unwrap();
        let fake = write_fake_git(td.path(), "echo same123\n");
        let _guard = EnvGuard::set(GIT_PROGRAM_ENV, &fake);

        let mut reporter = crate::reporter::NullReporter;
        let actions = VcsTracker::new()
            .diff(
                &mut reporter,
                td.path(),
                &td.path().join("staging"),
                &Value::String("same123".into()),
                &Value::String("same123".into()),
            )
            .unwrap();
        assert!(actions.is_empty());
    }
}
