//! The logging interface every component reports progress through. The
//! library never writes to stdout/stderr directly; concrete formatting
//! (color tags, verbosity gating, indentation) is the CLI crate's job.

/// Structured log sink. Implementations decide how (or whether) to render
/// each level; `((color))...((reset))` markup is produced by callers inline
/// in the message and stripped/translated by the concrete reporter.
pub trait Reporter {
    fn debug(&mut self, msg: &str);
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// A reporter that discards everything, useful for library callers and
/// tests that don't care about log output.
#[derive(Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn debug(&mut self, _msg: &str) {}
    fn info(&mut self, _msg: &str) {}
    fn warn(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}

/// A reporter that records every call, for tests asserting on log content.
#[derive(Default)]
pub struct RecordingReporter {
    pub debug: Vec<String>,
    pub info: Vec<String>,
    pub warn: Vec<String>,
    pub error: Vec<String>,
}

impl Reporter for RecordingReporter {
    fn debug(&mut self, msg: &str) {
        self.debug.push(msg.to_string());
    }
    fn info(&mut self, msg: &str) {
        self.info.push(msg.to_string());
    }
    fn warn(&mut self, msg: &str) {
        self.warn.push(msg.to_string());
    }
    fn error(&mut self, msg: &str) {
        self.error.push(msg.to_string());
    }
}
