//! Revision tracking: turning "what changed between two opaque tokens"
//! into a list of actions the modifier engine and a deployer can act on.
//!
//! Two implementations exist: [`hash`] walks the source tree and hashes
//! file contents, [`vcs`] defers to a `git` checkout's own object graph.

pub mod hash;
pub mod vcs;

use std::path::Path;

use anyhow::Result;
use serde_json::Value;

use crate::action::Action;
use crate::reporter::Reporter;

/// Produces an opaque revision token for the current state of a source
/// tree, and diffs two such tokens into a sorted list of actions.
///
/// Tokens round-trip through [`crate::revision::Revision`] as JSON, so a
/// tracker can use whatever shape suits it: the hash tracker nests an
/// object mirroring the directory tree, the vcs tracker uses a single
/// commit hash string.
pub trait Tracker {
    /// Compute the current revision token for the tree rooted at `base_dir`.
    fn current(&self, reporter: &mut dyn Reporter, base_dir: &Path) -> Result<Value>;

    /// Diff `rev_from` against `rev_to`, staging any added file content
    /// into `staging_dir` and returning the actions needed to bring a
    /// target from `rev_from` to `rev_to`. `base_dir` is the live source
    /// tree the new state (`rev_to`) is read from.
    fn diff(
        &self,
        reporter: &mut dyn Reporter,
        base_dir: &Path,
        staging_dir: &Path,
        rev_from: &Value,
        rev_to: &Value,
    ) -> Result<Vec<Action>>;
}
