//! Content-hash tracker: walks a directory tree and digests every file,
//! producing a nested `{name: digest | {name: ...}}` tree as its revision
//! token. Diffing two such trees recursively compares entries by name.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result, bail};
use md5::{Digest, Md5};
use serde_json::{Map, Value};

use crate::action::Action;
use crate::error::CreepError;
use crate::path;
use crate::reporter::Reporter;

use super::Tracker;

pub struct HashTracker {
    algorithm: String,
    follow: bool,
}

impl HashTracker {
    pub fn new(algorithm: String, follow: bool) -> Self {
        HashTracker { algorithm, follow }
    }

    fn digest(&self, path: &Path) -> Result<String> {
        if self.algorithm != "md5" {
            bail!(CreepError::Configuration(format!(
                "unsupported hash algorithm \"{}\" (only \"md5\" is available)",
                self.algorithm
            )));
        }

        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let mut hasher = Md5::new();
        let mut buf = [0u8; 4096];

        loop {
            let read = reader.read(&mut buf)?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    fn walk(&self, base_path: &Path) -> Result<Value> {
        let mut entries = Map::new();

        let mut names: Vec<_> = std::fs::read_dir(base_path)
            .with_context(|| format!("failed to list {}", base_path.display()))?
            .collect::<std::io::Result<Vec<_>>>()?;
        names.sort_by_key(|e| e.file_name());

        for entry in names {
            let source = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = entry.file_type()?;

            let value = if !self.follow && metadata.is_symlink() {
                continue;
            } else if source.is_dir() {
                self.walk(&source)?
            } else if source.is_file() {
                Value::String(self.digest(&source)?)
            } else {
                continue;
            };

            entries.insert(name, value);
        }

        Ok(Value::Object(entries))
    }
}

impl Tracker for HashTracker {
    fn current(&self, _reporter: &mut dyn Reporter, base_dir: &Path) -> Result<Value> {
        self.walk(base_dir)
    }

    fn diff(
        &self,
        reporter: &mut dyn Reporter,
        base_dir: &Path,
        staging_dir: &Path,
        rev_from: &Value,
        rev_to: &Value,
    ) -> Result<Vec<Action>> {
        let empty = Map::new();
        let from = match rev_from {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                reporter.error(&format!("corrupted source revision \"{}\".", other));
                bail!(CreepError::Revision(format!(
                    "expected object revision token, got {other}"
                )));
            }
        };
        let to = match rev_to {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                reporter.error(&format!("corrupted target revision \"{}\".", other));
                bail!(CreepError::Revision(format!(
                    "expected object revision token, got {other}"
                )));
            }
        };

        let actions = recurse(base_dir, staging_dir, "", from, to)?;

        reporter.info(&format!("((fuchsia)){}((default)) file(s) changed.", actions.len()));

        Ok(actions)
    }
}

fn recurse(
    base_dir: &Path,
    staging_dir: &Path,
    parent: &str,
    from: &Map<String, Value>,
    to: &Map<String, Value>,
) -> Result<Vec<Action>> {
    let mut actions = Vec::new();
    let names: BTreeSet<&String> = from.keys().chain(to.keys()).collect();

    for name in names {
        let entry_from = from.get(name);
        let entry_to = to.get(name);
        let source = if parent.is_empty() {
            name.clone()
        } else {
            format!("{parent}/{name}")
        };

        match (entry_from.and_then(Value::as_object), entry_to.and_then(Value::as_object)) {
            // Was a directory, still is: recurse.
            (Some(from_dir), Some(to_dir)) => {
                actions.extend(recurse(base_dir, staging_dir, &source, from_dir, to_dir)?);
            }
            // Was a directory, no longer is.
            (Some(from_dir), None) => {
                if entry_to.is_some()
                    && path::duplicate(&base_dir.join(&source), staging_dir, &source)?
                {
                    actions.push(Action::add(source.clone()));
                }
                actions.extend(recurse(base_dir, staging_dir, &source, from_dir, &Map::new())?);
            }
            // Wasn't a directory, now is.
            (None, Some(to_dir)) => {
                if entry_from.is_some() {
                    actions.push(Action::del(source.clone()));
                }
                actions.extend(recurse(base_dir, staging_dir, &source, &Map::new(), to_dir)?);
            }
            // Neither side is a directory.
            (None, None) => {
                if entry_from != entry_to {
                    if entry_to.is_some() {
                        if path::duplicate(&base_dir.join(&source), staging_dir, &source)? {
                            actions.push(Action::add(source));
                        }
                    } else {
                        actions.push(Action::del(source));
                    }
                }
            }
        }
    }

    Ok(actions)
}
