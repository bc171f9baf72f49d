//! External command execution: working directory, optional shell wrapping,
//! optional stdin, captured stdout/stderr/exit code.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

/// Captured result of running a [`Process`].
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// A single external command invocation, built fluently before [`execute`](Process::execute).
///
/// Mirrors the two invocation styles the engine needs: a plain argv vector
/// (trackers shelling out to `git`), and a single command string run through
/// a shell (modifier `link`/`modify`/`filter` templates, which may contain
/// pipes or other shell syntax supplied by the user's definition file).
pub struct Process {
    program: String,
    args: Vec<String>,
    shell: bool,
    directory: Option<PathBuf>,
    stdin: Option<Vec<u8>>,
}

impl Process {
    /// Build a process from an explicit argv vector. `argv[0]` is the program.
    pub fn command<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut iter = argv.into_iter().map(Into::into);
        let program = iter.next().unwrap_or_default();
        let args = iter.collect();

        Process {
            program,
            args,
            shell: false,
            directory: None,
            stdin: None,
        }
    }

    /// Build a process from a single shell command line. Only meaningful
    /// combined with [`set_shell(true)`](Process::set_shell).
    pub fn shell_line(line: impl Into<String>) -> Self {
        Process {
            program: line.into(),
            args: Vec::new(),
            shell: true,
            directory: None,
            stdin: None,
        }
    }

    pub fn set_directory(mut self, directory: impl AsRef<Path>) -> Self {
        self.directory = Some(directory.as_ref().to_path_buf());
        self
    }

    pub fn set_shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    pub fn set_stdin(mut self, data: Vec<u8>) -> Self {
        self.stdin = Some(data);
        self
    }

    pub fn execute(&self) -> Result<ProcessOutput> {
        let mut command = if self.shell {
            let mut c = Command::new(if cfg!(windows) { "cmd" } else { "sh" });
            if cfg!(windows) {
                c.arg("/C").arg(&self.program);
            } else {
                c.arg("-c").arg(&self.program);
            }
            c
        } else {
            let mut c = Command::new(&self.program);
            c.args(&self.args);
            c
        };

        if let Some(directory) = &self.directory {
            command.current_dir(directory);
        }

        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        command.stdin(if self.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn command '{}'", self.program))?;

        if let Some(data) = &self.stdin {
            let mut stdin = child.stdin.take().expect("stdin was requested as piped");
            stdin
                .write_all(data)
                .context("failed to write to child stdin")?;
        }

        let output = child
            .wait_with_output()
            .with_context(|| format!("failed to wait on command '{}'", self.program))?;

        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
