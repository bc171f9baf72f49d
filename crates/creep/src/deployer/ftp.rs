//! FTP/FTPS deployer: groups actions by parent directory, creates missing
//! parent directories lazily, tolerates the server's "already exists" /
//! "no such file" replies, and aborts the batch on anything else.

use std::path::Path;

use anyhow::{Result, bail};
use suppaftp::{FtpError, NativeTlsConnector, NativeTlsFtpStream as FtpStream};

use crate::action::{Action, ActionKind};
use crate::error::CreepError;
use crate::path;
use crate::reporter::Reporter;

use super::{Deployer, ReadOutcome};

pub struct FtpDeployer {
    secure: bool,
    host: String,
    port: u16,
    user: Option<String>,
    password: Option<String>,
    directory: String,
    passive: bool,
}

impl FtpDeployer {
    pub fn new(
        secure: bool,
        host: &str,
        port: Option<u16>,
        user: Option<&str>,
        password: Option<&str>,
        directory: &str,
        passive: bool,
    ) -> Self {
        FtpDeployer {
            secure,
            host: if host.is_empty() { "localhost".to_string() } else { host.to_string() },
            port: port.unwrap_or(21),
            user: user.map(str::to_string),
            password: password.map(str::to_string),
            directory: directory.to_string(),
            passive,
        }
    }

    fn connect(&self) -> Result<FtpStream> {
        let mut stream = FtpStream::connect((self.host.as_str(), self.port))
            .map_err(|e| anyhow::anyhow!(CreepError::Reachability(format!("can't connect to ftp host: {e}"))))?;

        if self.secure {
            let connector = native_tls::TlsConnector::new()
                .map_err(|e| anyhow::anyhow!(CreepError::Reachability(format!("can't build tls connector: {e}"))))?;
            stream = stream
                .into_secure(NativeTlsConnector::from(connector), &self.host)
                .map_err(|e| anyhow::anyhow!(CreepError::Reachability(format!("can't upgrade to ftps: {e}"))))?;
        }

        if let Some(user) = &self.user {
            if let Err(e) = stream.login(user.as_str(), self.password.as_deref().unwrap_or("")) {
                bail!(CreepError::Reachability(format!(
                    "can't authenticate as '{user}' on remote ftp: {e}"
                )));
            }
        }

        if !self.directory.is_empty() {
            if let Err(e) = stream.cwd(&self.directory) {
                bail!(CreepError::Reachability(format!(
                    "can't access folder '{}' on remote ftp: {e}",
                    self.directory
                )));
            }
        }

        if self.passive {
            stream.set_mode(suppaftp::Mode::Passive);
        } else {
            stream.set_mode(suppaftp::Mode::Active);
        }

        Ok(stream)
    }
}

/// "No such file/directory" (550) replies on `mkd`/`delete` are tolerated
/// rather than treated as batch-aborting errors, without depending on a
/// particular error-variant shape, since different FTP servers phrase the
/// reply text slightly differently but always lead with the status code.
fn is_tolerated(err: &FtpError, code: &str) -> bool {
    err.to_string().contains(code)
}

impl Deployer for FtpDeployer {
    fn read(&self, reporter: &mut dyn Reporter, relative: &str) -> Result<ReadOutcome> {
        let mut stream = match self.connect() {
            Ok(s) => s,
            Err(_) => return Ok(ReadOutcome::Unreachable),
        };

        let result = stream.retr_as_buffer(relative);
        let _ = stream.quit();

        match result {
            Ok(cursor) => Ok(ReadOutcome::Bytes(cursor.into_inner())),
            Err(e) if is_tolerated(&e, "550") => Ok(ReadOutcome::Empty),
            Err(e) => {
                reporter.warn(&format!("can't read file '{relative}' from ftp remote: {e}"));
                Ok(ReadOutcome::Unreachable)
            }
        }
    }

    fn send(&self, reporter: &mut dyn Reporter, staging_dir: &Path, actions: &[Action]) -> Result<()> {
        let mut stream = self.connect()?;
        let outcome = send_inner(&mut stream, staging_dir, actions);
        let _ = stream.quit();

        match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                reporter.error(&format!("can't deploy to ftp remote: {e}"));
                bail!(CreepError::Transport(e.to_string()));
            }
        }
    }
}

fn send_inner(stream: &mut FtpStream, staging_dir: &Path, actions: &[Action]) -> Result<(), FtpError> {
    let mut groups: Vec<(String, Vec<&Action>)> = Vec::new();

    for action in actions {
        let parent = match action.path.rfind('/') {
            Some(idx) => action.path[..idx].to_string(),
            None => String::new(),
        };

        match groups.iter_mut().find(|(dir, _)| dir == &parent) {
            Some((_, list)) => list.push(action),
            None => groups.push((parent, vec![action])),
        }
    }

    for (directory, group) in groups {
        let mut directory_created = false;

        for action in group {
            match action.kind {
                ActionKind::Add => {
                    if !directory_created {
                        for prefix in path::prefixes(&directory) {
                            if let Err(e) = stream.mkdir(&prefix) {
                                if !is_tolerated(&e, "550") {
                                    return Err(e);
                                }
                            }
                        }
                        directory_created = true;
                    }

                    let local = staging_dir.join(&action.path);
                    let bytes = std::fs::read(&local).map_err(FtpError::ConnectionError)?;
                    stream.put_file(&action.path, &mut bytes.as_slice())?;
                }
                ActionKind::Del => {
                    if let Err(e) = stream.rm(&action.path) {
                        if !is_tolerated(&e, "550") {
                            return Err(e);
                        }
                    }
                }
                ActionKind::Nop | ActionKind::Err => {}
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_actions_by_parent_directory() {
        let actions = vec![Action::add("a/b/x"), Action::add("a/b/y"), Action::del("a/z")];
        let mut groups: Vec<(String, usize)> = Vec::new();

        for action in &actions {
            let parent = match action.path.rfind('/') {
                Some(idx) => action.path[..idx].to_string(),
                None => String::new(),
            };
            match groups.iter_mut().find(|(dir, _)| dir == &parent) {
                Some((_, n)) => *n += 1,
                None => groups.push((parent, 1)),
            }
        }

        assert_eq!(groups, vec![("a/b".to_string(), 2), ("a".to_string(), 1)]);
    }
}
