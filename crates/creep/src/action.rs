//! The unit of work that flows from a tracker through the modifier engine
//! to a deployer: a relative path plus what should happen to it.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    Add,
    Del,
    Nop,
    Err,
}

impl ActionKind {
    /// Transmission ordering rank: deletes before adds before everything else.
    fn rank(self) -> u8 {
        match self {
            ActionKind::Del => 0,
            ActionKind::Add => 1,
            ActionKind::Nop => 2,
            ActionKind::Err => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub path: String,
    pub kind: ActionKind,
}

impl Action {
    pub fn new(path: impl Into<String>, kind: ActionKind) -> Self {
        Action {
            path: normalize(&path.into()),
            kind,
        }
    }

    pub fn add(path: impl Into<String>) -> Self {
        Action::new(path, ActionKind::Add)
    }

    pub fn del(path: impl Into<String>) -> Self {
        Action::new(path, ActionKind::Del)
    }

    /// Sort key: delete/add/nop/err rank, then path.
    pub fn sort_key(&self) -> (u8, String) {
        (self.kind.rank(), self.path.clone())
    }

    /// Actions that must never reach a deployer: suppressed by a filter, or
    /// downgraded because a prior modifier stage failed.
    pub fn is_transmittable(&self) -> bool {
        matches!(self.kind, ActionKind::Add | ActionKind::Del)
    }
}

impl PartialOrd for Action {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Action {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Normalize a logical action path to forward-slash separated, `.`/`..`-free form.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    parts.join("/")
}

/// Sort actions by `(kindRank, path)`, the order the orchestrator transmits in.
pub fn sort_for_transmission(actions: &mut [Action]) {
    actions.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_dot_segments_and_backslashes() {
        assert_eq!(normalize("a/./b\\c/../d"), "a/b/d");
        assert_eq!(normalize("./x"), "x");
    }

    #[test]
    fn sort_for_transmission_orders_deletes_before_adds() {
        let mut actions = vec![
            Action::add("b"),
            Action::del("z"),
            Action::add("a"),
            Action::del("a"),
        ];
        sort_for_transmission(&mut actions);
        let paths: Vec<_> = actions
            .iter()
            .map(|a| (a.kind, a.path.as_str()))
            .collect();
        assert_eq!(
            paths,
            vec![
                (ActionKind::Del, "a"),
                (ActionKind::Del, "z"),
                (ActionKind::Add, "a"),
                (ActionKind::Add, "b"),
            ]
        );
    }

    #[test]
    fn nop_and_err_are_not_transmittable() {
        assert!(!Action::new("x", ActionKind::Nop).is_transmittable());
        assert!(!Action::new("x", ActionKind::Err).is_transmittable());
        assert!(Action::add("x").is_transmittable());
    }

    proptest::proptest! {
        #[test]
        fn transmission_order_is_stable_under_shuffle(
            mut paths in proptest::collection::vec("[a-z]{1,6}", 1..12)
        ) {
            paths.dedup();
            let mut a: Vec<Action> = paths.iter().map(|p| Action::add(p.clone())).collect();
            let mut b = a.clone();
            b.reverse();
            sort_for_transmission(&mut a);
            sort_for_transmission(&mut b);
            proptest::prop_assert_eq!(a, b);
        }
    }
}
