//! SSH deployer: tunnels every remote operation through one persistent
//! `ssh user@host command` invocation per call, moving bytes with `tar`
//! and `cat`/`rm` rather than a dedicated SFTP client.

use std::path::Path;

use anyhow::{Result, bail};

use crate::action::{Action, ActionKind};
use crate::error::CreepError;
use crate::process::Process;
use crate::reporter::Reporter;

use super::{Deployer, ReadOutcome};

pub struct SshDeployer {
    directory: String,
    tunnel: Vec<String>,
}

impl SshDeployer {
    pub fn new(host: &str, port: Option<u16>, user: Option<&str>, directory: &str, extra: &str) -> Self {
        let host = if host.is_empty() { "localhost" } else { host };
        let user = user.unwrap_or("root");
        let remote = format!("{user}@{host}");
        let mut tunnel = vec![
            "ssh".to_string(),
            "-T".to_string(),
            "-p".to_string(),
            port.unwrap_or(22).to_string(),
        ];
        tunnel.extend(shlex::split(extra).unwrap_or_default());
        tunnel.push(remote);

        SshDeployer {
            directory: directory.to_string(),
            tunnel,
        }
    }

    fn remote_command(&self, arguments: &[String]) -> Process {
        let command = arguments.join(" ");
        let mut argv = self.tunnel.clone();
        argv.push(command);
        Process::command(argv)
    }
}

fn quote(text: &str) -> String {
    shlex::try_quote(text)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| text.to_string())
}

impl Deployer for SshDeployer {
    fn read(&self, _reporter: &mut dyn Reporter, relative: &str) -> Result<ReadOutcome> {
        let base = quote(&self.directory);
        let full = quote(&format!("{}/{relative}", self.directory));

        let arguments: Vec<String> = [
            "test", "-d", &base, "&&", "(", "test", "!", "-f", &full, "||", "cat", &full, ")",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let result = self.remote_command(&arguments).execute()?;

        if !result.success() {
            return Ok(ReadOutcome::Unreachable);
        }

        Ok(ReadOutcome::Bytes(result.stdout))
    }

    fn send(&self, reporter: &mut dyn Reporter, staging_dir: &Path, actions: &[Action]) -> Result<()> {
        let mut archive_builder = tar::Builder::new(Vec::new());
        let mut to_del = Vec::new();

        for action in actions {
            match action.kind {
                ActionKind::Add => {
                    archive_builder.append_path_with_name(staging_dir.join(&action.path), &action.path)?;
                }
                ActionKind::Del => {
                    to_del.push(format!("{}/{}", self.directory, action.path));
                }
                ActionKind::Nop | ActionKind::Err => {}
            }
        }

        let archive = archive_builder.into_inner()?;

        if !archive.is_empty() {
            let arguments = vec!["tar".to_string(), "xC".to_string(), quote(&self.directory)];
            let result = self.remote_command(&arguments).set_stdin(archive).execute()?;

            if !result.success() {
                reporter.error(&result.stderr_string());
                bail!(CreepError::Transport("couldn't push files to ssh deployer.".into()));
            }
        }

        if !to_del.is_empty() {
            let commands = to_del
                .iter()
                .map(|path| format!("rm -f {}", quote(path)))
                .collect::<Vec<_>>()
                .join(";");

            let result = self
                .remote_command(&["sh".to_string()])
                .set_stdin(commands.into_bytes())
                .execute()?;

            if !result.success() {
                reporter.error(&result.stderr_string());
                bail!(CreepError::Transport(
                    "couldn't delete files from ssh deployer.".into()
                ));
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
    fn tunnel_includes_port_and_remote() {
        let deployer = SshDeployer::new("example.com", Some(2222), Some("deploy"), "/srv", "");
        assert_eq!(
            deployer.tunnel,
            vec!["ssh", "-T", "-p", "2222", "deploy@example.com"]
        );
    }

    #[test]
    fn extra_options_are_shell_split() {
        let deployer = SshDeployer::new("host", None, Some("u"), "/srv", "-o StrictHostKeyChecking=no");
        assert!(deployer.tunnel.contains(&"-o".to_string()));
        assert!(deployer.tunnel.contains(&"StrictHostKeyChecking=no".to_string()));
    }

    #[test]
    fn send_with_no_actions_is_a_noop() {
        let td = tempfile::tempdir().unwrap();
        let mut reporter = crate::reporter::NullReporter;
        let deployer = SshDeployer::new("host", None, None, "/srv", "");
        deployer.send(&mut reporter, td.path(), &[]).unwrap();
    }

    #[test]
    fn send_builds_an_archive_entry_per_add() {
        let td = tempfile::tempdir().unwrap();
        fs::write(td.path().join("a.txt"), b"hi").unwrap();

        let mut archive_builder = tar::Builder::new(Vec::new());
        archive_builder
            .append_path_with_name(td.path().join("a.txt"), "a.txt")
            .unwrap();
        let archive = archive_builder.into_inner().unwrap();
        assert!(!archive.is_empty());
    }
}
