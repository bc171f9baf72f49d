//! The preview-only deployer: renders a batch of actions as colored `+`/`-`/`!`
//! lines through a [`Reporter`] instead of touching any real destination.

use std::path::Path;

use anyhow::{Result, bail};

use crate::action::{Action, ActionKind};
use crate::error::CreepError;
use crate::reporter::Reporter;

use super::{Deployer, ReadOutcome};

#[derive(Default)]
pub struct ConsoleDeployer;

impl Deployer for ConsoleDeployer {
    fn read(&self, _reporter: &mut dyn Reporter, _relative: &str) -> Result<ReadOutcome> {
        bail!(CreepError::Transport(
            "the console deployer can't read a revision marker".into()
        ));
    }

    fn send(&self, reporter: &mut dyn Reporter, _staging_dir: &Path, actions: &[Action]) -> Result<()> {
        for action in actions {
            let prefix = match action.kind {
                ActionKind::Add => "((lime))+",
                ActionKind::Del => "((blue))-",
                ActionKind::Nop => continue,
                ActionKind::Err => "((red))!",
            };

            reporter.info(&format!("{prefix}((reset)) {}", action.path));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::RecordingReporter;

    #[test]
    fn send_skips_nop_and_labels_others() {
        let mut reporter = RecordingReporter::default();
        let actions = vec![
            Action::add("a"),
            Action::del("b"),
            Action::new("c", ActionKind::Nop),
            Action::new("d", ActionKind::Err),
        ];

        ConsoleDeployer.send(&mut reporter, Path::new("/tmp"), &actions).unwrap();

        assert_eq!(reporter.info.len(), 3);
        assert!(reporter.info[0].contains("+((reset)) a"));
        assert!(reporter.info[1].contains("-((reset)) b"));
        assert!(reporter.info[2].contains("!((reset)) d"));
    }
}
