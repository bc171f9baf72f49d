//! Command-line front-end for `creep`: parses arguments, loads the
//! definition tree, and runs the deployment orchestrator once per
//! requested location.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use serde_json::Value;

use creep::config;
use creep::orchestrator::{self, Prompt, SyncRequest};
use creep::reporter::Reporter;

/// Perform incremental deployment from a workspace to one or more remote destinations.
#[derive(Parser, Debug)]
#[command(name = "creep", version, about)]
struct Cli {
    /// Deploy to the named location(s); "*" deploys everywhere; defaults to "default".
    #[arg(value_name = "LOCATION")]
    locations: Vec<String>,

    /// Manually append a file or directory to the deployment.
    #[arg(short = 'a', long = "append", value_name = "PATH")]
    append: Vec<String>,

    /// Use the given path as the workspace instead of the current directory.
    #[arg(short = 'b', long = "base", value_name = "DIR", default_value = ".")]
    base: PathBuf,

    /// Read the definition from the given file, directory, or inline JSON object.
    #[arg(short = 'd', long = "definition", value_name = "FILE/DIR/JSON", default_value = ".creep.def")]
    definition: String,

    /// Use the given revision instead of reading it from the revision file.
    #[arg(short = 'f', long = "rev-from", value_name = "REV")]
    rev_from: Option<String>,

    /// Manually remove a file or directory from the deployment.
    #[arg(short = 'r', long = "remove", value_name = "PATH")]
    remove: Vec<String>,

    /// Use the given revision instead of querying the current workspace state.
    #[arg(short = 't', long = "rev-to", value_name = "REV")]
    rev_to: Option<String>,

    /// Quiet mode, don't display anything but errors.
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Verbose mode, display extra information.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Skip every prompt and always assume "yes".
    #[arg(short = 'y', long = "yes")]
    yes: bool,

    /// Disable ANSI color output even when connected to a terminal.
    #[arg(long = "no-color")]
    no_color: bool,

    #[arg(long = "extra-append", hide = true, value_name = "PATH")]
    extra_append: Vec<String>,

    #[arg(long = "extra-remove", hide = true, value_name = "PATH")]
    extra_remove: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let color = !cli.no_color && atty::is(atty::Stream::Stdout);
    let mut reporter = CliReporter {
        quiet: cli.quiet,
        verbose: cli.verbose,
        color,
    };

    match run(&cli, &mut reporter) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            reporter.error(&format!("{error:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, reporter: &mut CliReporter) -> Result<bool> {
    let definition_source = parse_definition_argument(&cli.definition);
    let mut includes = Vec::new();
    let definition = config::load_definition(reporter, &mut includes, &cli.base, definition_source, "definition")?;

    let append: Vec<String> = cli
        .append
        .iter()
        .cloned()
        .chain(cli.extra_append.iter().cloned())
        .collect();
    let remove: Vec<String> = cli
        .remove
        .iter()
        .cloned()
        .chain(cli.extra_remove.iter().cloned())
        .collect();

    let request = SyncRequest {
        append_files: append,
        remove_files: remove,
        rev_from: cli.rev_from.clone().map(Value::String),
        rev_to: cli.rev_to.clone().map(Value::String),
    };

    let mut prompt: Box<dyn Prompt> = if cli.yes {
        Box::new(orchestrator::AlwaysYes)
    } else {
        Box::new(InteractivePrompt)
    };

    Ok(orchestrator::run(reporter, prompt.as_mut(), &definition, &cli.locations, &request))
}

/// `-d`'s value is either an inline JSON object, or a path (relative to
/// `--base`) to a definition file or a directory containing `.creep.def`.
fn parse_definition_argument(text: &str) -> Value {
    let trimmed = text.trim();

    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        if let Ok(value) = serde_json::from_str(trimmed) {
            return value;
        }
    }

    Value::String(text.to_string())
}

struct InteractivePrompt;

impl Prompt for InteractivePrompt {
    fn confirm(&mut self, reporter: &mut dyn Reporter, question: &str) -> bool {
        loop {
            reporter.info(question);
            let _ = std::io::stdout().flush();

            let mut answer = String::new();
            if std::io::stdin().read_line(&mut answer).is_err() {
                return false;
            }

            match answer.trim() {
                "y" | "Y" => return true,
                "n" | "N" => return false,
                _ => reporter.warn("Invalid answer"),
            }
        }
    }
}

/// Translates the `((color))...((reset))` markup every log message carries
/// into ANSI escapes when connected to a color-capable terminal, or strips
/// it otherwise.
struct CliReporter {
    quiet: bool,
    verbose: bool,
    color: bool,
}

const COLORS: &[(&str, &str)] = &[
    ("black", "\x1b[0;30m"),
    ("maroon", "\x1b[0;31m"),
    ("green", "\x1b[0;32m"),
    ("olive", "\x1b[0;33m"),
    ("navy", "\x1b[0;34m"),
    ("purple", "\x1b[0;35m"),
    ("teal", "\x1b[0;36m"),
    ("silver", "\x1b[0;37m"),
    ("grey", "\x1b[1;30m"),
    ("red", "\x1b[1;31m"),
    ("lime", "\x1b[1;32m"),
    ("yellow", "\x1b[1;33m"),
    ("blue", "\x1b[1;34m"),
    ("fuchsia", "\x1b[1;35m"),
    ("cyan", "\x1b[1;36m"),
    ("white", "\x1b[1;37m"),
    ("reset", "\x1b[0m"),
    ("default", "\x1b[0m"),
];

fn render(message: &str, color: bool) -> String {
    let mut out = String::new();
    let mut rest = message;

    loop {
        match rest.find("((") {
            None => {
                out.push_str(rest);
                return out;
            }
            Some(start) => {
                out.push_str(&rest[..start]);
                let after = &rest[start + 2..];

                match after.find("))") {
                    None => {
                        out.push_str(&rest[start..]);
                        return out;
                    }
                    Some(end) => {
                        let tag = &after[..end];

                        if color {
                            if let Some((_, code)) = COLORS.iter().find(|(name, _)| *name == tag) {
                                out.push_str(code);
                            }
                        }

                        rest = &after[end + 2..];
                    }
                }
            }
        }
    }
}

impl CliReporter {
    fn line(&self, level: &str, level_color: &str, message: &str) -> String {
        let rendered = render(message, self.color);

        if self.color {
            format!("{level_color}{level}: {rendered}\x1b[0m")
        } else {
            format!("{level}: {rendered}")
        }
    }
}

impl Reporter for CliReporter {
    fn debug(&mut self, msg: &str) {
        if self.verbose && !self.quiet {
            println!("{}", self.line("DEBUG", "\x1b[0;33m", msg));
        }
    }

    fn info(&mut self, msg: &str) {
        if !self.quiet {
            println!("{}", self.line("INFO", "\x1b[1;37m", msg));
        }
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("{}", self.line("WARNING", "\x1b[1;33m", msg));
    }

    fn error(&mut self, msg: &str) {
        eprintln!("{}", self.line("ERROR", "\x1b[1;31m", msg));
    }
}
