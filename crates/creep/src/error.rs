//! The error taxonomy from the orchestrator's point of view.
//!
//! Every other module returns plain `anyhow::Result`; the orchestrator
//! downcasts failures into one of these kinds to decide whether a failure
//! aborts just the current location (and lets the run continue with the
//! next one) or the whole run.
#[derive(Debug, thiserror::Error)]
pub enum CreepError {
    /// Invalid JSON, a type mismatch, a missing required field, or an
    /// unresolvable reference while loading a Definition/Environment.
    /// Aborts the whole run.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The deployer's target can't be reached at all (directory missing,
    /// connection refused). Aborts the current location only.
    #[error("unreachable target: {0}")]
    Reachability(String),

    /// `rev_from` or `rev_to` could not be resolved by the tracker.
    /// Aborts the current location only.
    #[error("revision error: {0}")]
    Revision(String),

    /// The deployer's `send` failed partway through. Aborts the current
    /// location; the revision marker is deliberately left unmodified so a
    /// retry re-attempts the same diff.
    #[error("transport error: {0}")]
    Transport(String),
}

impl CreepError {
    /// Whether this failure should stop the whole run rather than just the
    /// current location.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, CreepError::Configuration(_))
    }
}
