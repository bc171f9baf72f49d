//! Local-directory deployer: copies/removes files directly on the invoking
//! filesystem. Used when a location's connection is a `file://` URL.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::action::{Action, ActionKind};
use crate::path;
use crate::reporter::Reporter;

use super::{Deployer, ReadOutcome};

pub struct FileDeployer {
    directory: PathBuf,
}

impl FileDeployer {
    pub fn new(directory: PathBuf) -> Self {
        FileDeployer { directory }
    }
}

impl Deployer for FileDeployer {
    fn read(&self, _reporter: &mut dyn Reporter, relative: &str) -> Result<ReadOutcome> {
        if !self.directory.is_dir() {
            return Ok(ReadOutcome::Unreachable);
        }

        let source = self.directory.join(relative);

        if !source.is_file() {
            return Ok(ReadOutcome::Empty);
        }

        Ok(ReadOutcome::Bytes(std::fs::read(&source)?))
    }

    fn send(&self, _reporter: &mut dyn Reporter, staging_dir: &Path, actions: &[Action]) -> Result<()> {
        for action in actions {
            match action.kind {
                ActionKind::Add => {
                    path::duplicate(&staging_dir.join(&action.path), &self.directory, &action.path)?;
                }
                ActionKind::Del => {
                    path::remove(&self.directory.join(&action.path))?;
                }
                ActionKind::Nop | ActionKind::Err => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn read_reports_unreachable_when_directory_missing() {
        let td = tempfile::tempdir().unwrap();
        let deployer = FileDeployer::new(td.path().join("nope"));
        let mut reporter = crate::reporter::NullReporter;
        assert!(matches!(
            deployer.read(&mut reporter, "x").unwrap(),
            ReadOutcome::Unreachable
        ));
    }

    #[test]
    fn read_reports_empty_when_file_missing() {
        let td = tempfile::tempdir().unwrap();
        let deployer = FileDeployer::new(td.path().to_path_buf());
        let mut reporter = crate::reporter::NullReporter;
        assert!(matches!(deployer.read(&mut reporter, "x").unwrap(), ReadOutcome::Empty));
    }

    #[test]
    fn send_copies_adds_and_removes_deletes() {
        let td = tempfile::tempdir().unwrap();
        let staging = td.path().join("staging");
        let target = td.path().join("target");
        fs::create_dir_all(&staging).unwrap();
        fs::create_dir_all(&target).unwrap();
        fs::write(staging.join("new.txt"), b"x").unwrap();
        fs::write(target.join("old.txt"), b"y").unwrap();

        let deployer = FileDeployer::new(target.clone());
        let actions = vec![Action::add("new.txt"), Action::del("old.txt")];
        let mut reporter = crate::reporter::NullReporter;
        deployer.send(&mut reporter, &staging, &actions).unwrap();

        assert!(target.join("new.txt").exists());
        assert!(!target.join("old.txt").exists());
    }
}
