//! The revision store: a `{locationName: opaqueToken}` map persisted as
//! pretty-printed, key-sorted JSON. Tokens are opaque to everything except
//! the tracker that produced them (a string for the vcs tracker, a nested
//! digest tree for the hash tracker), so they round-trip as `serde_json::Value`.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde_json::Value;

/// `BTreeMap` gives us sorted-key serialization for free; that satisfies
/// the "pretty-printed, key-sorted JSON" requirement without extra work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Revision(BTreeMap<String, Value>);

impl Revision {
    pub fn parse(data: &[u8]) -> Result<Revision> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Revision(BTreeMap::new()));
        }

        let map: BTreeMap<String, Value> =
            serde_json::from_slice(data).context("failed to parse revision file as JSON")?;

        Ok(Revision(map))
    }

    pub fn get(&self, location: &str) -> Option<&Value> {
        self.0.get(location)
    }

    pub fn set(&mut self, location: &str, token: Value) {
        self.0.insert(location.to_string(), token);
    }

    /// Serialize with 4-space indentation and sorted keys, matching the
    /// format emitted by every revision of the tool's own source.
    pub fn serialize(&self) -> Vec<u8> {
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        serde::Serialize::serialize(&self.0, &mut ser).expect("BTreeMap<String, Value> always serializes");
        buf
    }
}
