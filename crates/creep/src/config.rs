//! Configuration reader: a typed, position-tracking cursor over a JSON
//! value tree (`Configuration`), plus the Definition/Environment/Location/
//! Modifier loaders built on top of it.
//!
//! Fields are consumed from the underlying object as they're read, so
//! whatever keys remain afterward are reportable as orphans instead of
//! being silently ignored.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde_json::{Map, Value};
use url::Url;

use crate::error::CreepError;
use crate::reporter::Reporter;

const DEFAULT_DEFINITION_FILENAME: &str = ".creep.def";
const DEFAULT_ENVIRONMENT_FILENAME: &str = ".creep.env";
pub const DEFAULT_STATE_FILENAME: &str = ".creep.rev";

/// What a single JSON node currently holds, once the cursor has peeled away
/// whether it was ever present at all.
enum Node {
    /// A JSON object whose keys not yet consumed by `read_field`/`read_object`
    /// are still present; `orphan_keys` reports what's left.
    Object(Map<String, Value>),
    /// Any other concrete JSON value (array, string, number, bool, null).
    Other(Value),
    /// The field was never present in the parent object (or the parent
    /// itself was undefined/the wrong shape).
    Undefined,
}

/// A cursor over one JSON node plus the file it came from and a
/// dotted/indexed position string, so every warning can point at
/// `"{path}:{position}"`.
pub struct Configuration {
    owner: PathBuf,
    position: String,
    node: Node,
}

impl Configuration {
    pub fn from_value(owner: PathBuf, position: impl Into<String>, value: Value) -> Self {
        let node = match value {
            Value::Object(map) => Node::Object(map),
            other => Node::Other(other),
        };
        Configuration {
            owner,
            position: position.into(),
            node,
        }
    }

    pub fn undefined(owner: PathBuf, position: impl Into<String>) -> Self {
        Configuration {
            owner,
            position: position.into(),
            node: Node::Undefined,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self.node, Node::Undefined)
    }

    fn location(&self) -> String {
        format!("{}:{}", self.owner.display(), self.position)
    }

    fn child(&self, field: &str, value: Value) -> Configuration {
        Configuration::from_value(
            self.owner.clone(),
            format!("{}.{}", self.position, field),
            value,
        )
    }

    fn child_undefined(&self, field: &str) -> Configuration {
        Configuration::undefined(self.owner.clone(), format!("{}.{}", self.position, field))
    }

    /// Remove and return the first present key among `[primary] ∪ aliases`.
    /// A non-primary match emits a deprecation warning naming both.
    pub fn read_field(
        &mut self,
        reporter: &mut dyn Reporter,
        primary: &str,
        aliases: &[&str],
    ) -> Configuration {
        match &mut self.node {
            Node::Object(map) => {
                if let Some(value) = map.remove(primary) {
                    return self.child(primary, value);
                }
                for alias in aliases {
                    if let Some(value) = map.remove(*alias) {
                        reporter.warn(&format!(
                            "{}: deprecated property \"{}\" should be replaced by \"{}\"",
                            self.location(),
                            alias,
                            primary
                        ));
                        return self.child(primary, value);
                    }
                }
                self.child_undefined(primary)
            }
            Node::Undefined => self.child_undefined(primary),
            Node::Other(_) => {
                reporter.warn(&format!("{}: property must be an object", self.location()));
                self.child_undefined(primary)
            }
        }
    }

    /// Consume every remaining key of an object node into child cursors.
    pub fn read_object(&mut self, reporter: &mut dyn Reporter) -> BTreeMap<String, Configuration> {
        match std::mem::replace(&mut self.node, Node::Undefined) {
            Node::Object(map) => map
                .into_iter()
                .map(|(name, value)| (name.clone(), self.child(&name, value)))
                .collect(),
            Node::Undefined => BTreeMap::new(),
            Node::Other(value) => {
                reporter.warn(&format!("{}: property must be an object", self.location()));
                self.node = Node::Other(value);
                BTreeMap::new()
            }
        }
    }

    /// Consume an array node into indexed child cursors.
    pub fn read_list(&mut self, reporter: &mut dyn Reporter) -> Vec<Configuration> {
        match std::mem::replace(&mut self.node, Node::Undefined) {
            Node::Other(Value::Array(items)) => items
                .into_iter()
                .enumerate()
                .map(|(index, value)| self.child(&format!("[{index}]"), value))
                .collect(),
            Node::Undefined => Vec::new(),
            other @ (Node::Object(_) | Node::Other(_)) => {
                reporter.warn(&format!("{}: property must be an array", self.location()));
                self.node = other;
                Vec::new()
            }
        }
    }

    fn current_value(&self) -> Option<Value> {
        match &self.node {
            Node::Object(map) => Some(Value::Object(map.clone())),
            Node::Other(value) => Some(value.clone()),
            Node::Undefined => None,
        }
    }

    /// Read a scalar/structured value, falling back to `default` (with a
    /// warning) on type mismatch or absence.
    pub fn read_value<T>(&self, reporter: &mut dyn Reporter, default: T) -> T
    where
        T: serde::de::DeserializeOwned,
    {
        match self.current_value() {
            None => default,
            Some(value) => match serde_json::from_value(value) {
                Ok(parsed) => parsed,
                Err(_) => {
                    reporter.warn(&format!(
                        "{}: property has an unexpected type, using default",
                        self.location()
                    ));
                    default
                }
            },
        }
    }

    /// Remaining keys of an object node that nothing ever consumed.
    pub fn orphan_keys(&self) -> Vec<String> {
        match &self.node {
            Node::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn warn_orphan_keys(&self, reporter: &mut dyn Reporter) {
        for key in self.orphan_keys() {
            reporter.warn(&format!(
                "{}: ignored unknown property \"{}\"",
                self.location(),
                key
            ));
        }
    }

    /// Resolve the current node as either an inline object or a path
    /// (relative to the owning file's directory) to a JSON file, chasing
    /// `defaultFilename` when the path names a directory. Every file
    /// actually opened is appended to `includes`.
    pub fn get_include(
        &self,
        reporter: &mut dyn Reporter,
        includes: &mut Vec<PathBuf>,
        default_filename: &str,
    ) -> Result<Configuration> {
        let base_directory = self
            .owner
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        match &self.node {
            Node::Object(_) => Ok(Configuration::from_value(
                self.owner.clone(),
                self.position.clone(),
                self.current_value().expect("object node has a value"),
            )),
            Node::Other(Value::String(relative)) => {
                let mut resolved = crate::path::join_normalized(&base_directory, relative);
                if resolved.is_dir() {
                    resolved = resolved.join(default_filename);
                }

                if !resolved.is_file() {
                    return Ok(Configuration::undefined(resolved, "."));
                }

                let text = fs::read_to_string(&resolved)
                    .with_context(|| format!("failed to read {}", resolved.display()))?;
                let value: Value = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(error) => {
                        reporter.error(&format!(
                            "{}: failed to parse JSON: {}",
                            resolved.display(),
                            error
                        ));
                        return Ok(Configuration::from_value(resolved, ".", Value::Null));
                    }
                };

                includes.push(resolved.clone());
                Ok(Configuration::from_value(resolved, ".", value))
            }
            Node::Undefined => Ok(Configuration::undefined(
                base_directory.join(default_filename),
                ".",
            )),
            Node::Other(_) => {
                reporter.warn(&format!(
                    "{}: property must be a string or an object",
                    self.location()
                ));
                Ok(Configuration::undefined(
                    base_directory.join(default_filename),
                    ".",
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------
// Domain model
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerKind {
    Hash,
    Vcs,
}

#[derive(Debug, Clone)]
pub enum OriginBase {
    /// A local directory or archive file, resolved relative to the
    /// definition file's directory.
    Local(PathBuf),
    Http(Url),
}

#[derive(Debug, Clone)]
pub struct Origin {
    pub base: OriginBase,
    pub subpath: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Modifier {
    pub regex: Regex,
    pub rename: Option<String>,
    pub link: Option<String>,
    pub modify: Option<String>,
    pub chmod: u32,
    pub filter: Option<String>,
}

impl Modifier {
    /// A synthetic, filter-only modifier that suppresses one exact
    /// basename; used to auto-ignore every configuration file actually
    /// opened while loading a Definition, so it never ships as part of a
    /// deploy.
    pub fn ignore(filename: &str) -> Modifier {
        let pattern = format!("^{}$", regex::escape(filename));
        Modifier {
            regex: Regex::new(&pattern).expect("escaped literal is always a valid regex"),
            rename: None,
            link: None,
            modify: None,
            chmod: 0o644,
            filter: Some(String::new()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnvironmentLocation {
    pub append_files: Vec<String>,
    pub connection: Option<Url>,
    /// The connection string exactly as written, kept alongside the parsed
    /// `Url` because a standard URL parser collapses `..` path segments
    /// (e.g. `file:///../target` normalizes to `file:///target`), which
    /// would silently break deploying to a directory that sits next to the
    /// workspace rather than inside it. Schemes that name a real network
    /// authority (`ftp(s)`, `ssh`) are unaffected and use the parsed
    /// `Url`'s host/port/credentials as usual.
    pub connection_raw: Option<String>,
    pub local: bool,
    pub options: BTreeMap<String, String>,
    pub remove_files: Vec<String>,
    pub state: String,
}

#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub locations: BTreeMap<String, EnvironmentLocation>,
}

impl Environment {
    pub fn get_location(&self, name: &str) -> Option<&EnvironmentLocation> {
        self.locations.get(name)
    }
}

#[derive(Debug, Clone)]
pub struct Definition {
    pub origin: Origin,
    pub environment: Environment,
    pub tracker: Option<TrackerKind>,
    pub options: BTreeMap<String, String>,
    pub cascades: Vec<Definition>,
    pub modifiers: Vec<Modifier>,
    /// Absolute path of the configuration file this Definition was loaded
    /// from, for error messages and self-ignoring; empty for an inline
    /// (command-line-supplied) definition.
    pub path: PathBuf,
}

// ---------------------------------------------------------------------
// Loaders
// ---------------------------------------------------------------------

/// Load a Definition from either an inline JSON object or a path (file or
/// directory containing `.creep.def`), relative to `base_directory`.
pub fn load_definition(
    reporter: &mut dyn Reporter,
    includes: &mut Vec<PathBuf>,
    base_directory: &Path,
    source: Value,
    position: &str,
) -> Result<Definition> {
    let owner = base_directory.join(DEFAULT_DEFINITION_FILENAME);
    let cursor = Configuration::from_value(owner, position, source);
    let before_own = includes.len();
    let resolved = cursor.get_include(reporter, includes, DEFAULT_DEFINITION_FILENAME)?;
    let own_file_opened = includes.len() > before_own;

    let definition_path = resolved_owner_path(&resolved);
    let definition_dir = definition_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| base_directory.to_path_buf());

    let mut cursor = resolved;

    let mut cascades_field = cursor.read_field(reporter, "cascades", &[]);
    let cascades = cascades_field
        .read_list(reporter)
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let value = item.current_value().unwrap_or(Value::Object(Map::new()));
            load_definition(
                reporter,
                includes,
                &definition_dir,
                value,
                &format!("{}.cascades[{}]", cascades_field.position, index),
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let mut modifiers_field = cursor.read_field(reporter, "modifiers", &[]);
    let modifiers = modifiers_field
        .read_list(reporter)
        .into_iter()
        .map(|item| load_modifier(reporter, item))
        .collect::<Result<Vec<_>>>()?;

    let before_env = includes.len();
    let mut environment_field = cursor.read_field(reporter, "environment", &[]);
    let environment = if environment_field.is_undefined() {
        load_environment(
            reporter,
            includes,
            &definition_dir,
            Value::String(".".to_string()),
        )?
    } else {
        let resolved_env =
            environment_field.get_include(reporter, includes, DEFAULT_ENVIRONMENT_FILENAME)?;
        load_environment_from_cursor(reporter, resolved_env)?
    };
    let env_files_opened: Vec<PathBuf> = includes[before_env..].to_vec();

    let mut options_field = cursor.read_field(reporter, "options", &[]);
    let options: BTreeMap<String, String> = options_field.read_value(reporter, BTreeMap::new());

    let mut origin_field = cursor.read_field(reporter, "origin", &[]);
    let origin_text: String = origin_field.read_value(reporter, ".".to_string());
    let origin = parse_origin(&origin_text, &definition_dir)?;

    let mut tracker_field = cursor.read_field(reporter, "tracker", &["source"]);
    let tracker_text: Option<String> = tracker_field.read_value(reporter, None);
    let tracker = match tracker_text.as_deref() {
        None => None,
        Some("hash") => Some(TrackerKind::Hash),
        Some("vcs") => Some(TrackerKind::Vcs),
        Some(other) => {
            bail!(CreepError::Configuration(format!(
                "{}: unknown tracker kind \"{}\"",
                cursor.location(),
                other
            )));
        }
    };

    cursor.warn_orphan_keys(reporter);

    let mut definition = Definition {
        origin,
        environment,
        tracker,
        options,
        cascades,
        modifiers,
        path: definition_path.clone(),
    };

    let mut own_files_opened: Vec<&PathBuf> = env_files_opened.iter().collect();
    if own_file_opened {
        own_files_opened.push(&definition_path);
    }

    for ignored in own_files_opened.into_iter().filter_map(|p| {
        p.file_name().map(|n| n.to_string_lossy().into_owned())
    }) {
        definition.modifiers.push(Modifier::ignore(&ignored));
    }

    Ok(definition)
}

fn resolved_owner_path(configuration: &Configuration) -> PathBuf {
    configuration.owner.clone()
}

fn load_environment(
    reporter: &mut dyn Reporter,
    includes: &mut Vec<PathBuf>,
    base_directory: &Path,
    source: Value,
) -> Result<Environment> {
    let owner = base_directory.join(DEFAULT_ENVIRONMENT_FILENAME);
    let cursor = Configuration::from_value(owner, "environment", source);
    let resolved = cursor.get_include(reporter, includes, DEFAULT_ENVIRONMENT_FILENAME)?;
    load_environment_from_cursor(reporter, resolved)
}

fn load_environment_from_cursor(
    reporter: &mut dyn Reporter,
    mut cursor: Configuration,
) -> Result<Environment> {
    let mut locations = BTreeMap::new();

    for (name, mut location_cursor) in cursor.read_object(reporter) {
        locations.insert(name, load_location(reporter, &mut location_cursor)?);
    }

    Ok(Environment { locations })
}

fn load_location(
    reporter: &mut dyn Reporter,
    cursor: &mut Configuration,
) -> Result<EnvironmentLocation> {
    let mut append_field = cursor.read_field(reporter, "append_files", &[]);
    let append_files: Vec<String> = append_field.read_value(reporter, Vec::new());

    let mut connection_field = cursor.read_field(reporter, "connection", &[]);
    let connection_text: Option<String> = connection_field.read_value(reporter, None);
    let connection = connection_text
        .as_deref()
        .map(Url::parse)
        .transpose()
        .with_context(|| format!("{}: invalid connection URL", cursor.location()))?;
    let connection_raw = connection_text;

    let mut local_field = cursor.read_field(reporter, "local", &[]);
    let local: bool = local_field.read_value(reporter, false);

    let mut options_field = cursor.read_field(reporter, "options", &[]);
    let options: BTreeMap<String, String> = options_field.read_value(reporter, BTreeMap::new());

    let mut remove_field = cursor.read_field(reporter, "remove_files", &[]);
    let remove_files: Vec<String> = remove_field.read_value(reporter, Vec::new());

    let mut state_field = cursor.read_field(reporter, "state", &[]);
    let state: String = state_field.read_value(reporter, DEFAULT_STATE_FILENAME.to_string());

    cursor.warn_orphan_keys(reporter);

    Ok(EnvironmentLocation {
        append_files,
        connection,
        connection_raw,
        local,
        options,
        remove_files,
        state,
    })
}

fn load_modifier(reporter: &mut dyn Reporter, mut cursor: Configuration) -> Result<Modifier> {
    let mut pattern_field = cursor.read_field(reporter, "pattern", &[]);
    let pattern: Option<String> = pattern_field.read_value(reporter, None);
    let pattern = pattern.ok_or_else(|| {
        CreepError::Configuration(format!(
            "{}: property \"pattern\" must be a string",
            cursor.location()
        ))
    })?;
    let regex = Regex::new(&pattern)
        .with_context(|| format!("{}: invalid regular expression \"{}\"", cursor.location(), pattern))?;

    let mut chmod_field = cursor.read_field(reporter, "chmod", &[]);
    let chmod_text: String = chmod_field.read_value(reporter, "644".to_string());
    let chmod = u32::from_str_radix(&chmod_text, 8)
        .with_context(|| format!("{}: invalid octal chmod \"{}\"", cursor.location(), chmod_text))?;

    let mut filter_field = cursor.read_field(reporter, "filter", &[]);
    let filter: Option<String> = filter_field.read_value(reporter, None);

    let mut link_field = cursor.read_field(reporter, "link", &[]);
    let link: Option<String> = link_field.read_value(reporter, None);

    let mut modify_field = cursor.read_field(reporter, "modify", &["adapt"]);
    let modify: Option<String> = modify_field.read_value(reporter, None);

    let mut rename_field = cursor.read_field(reporter, "rename", &["name"]);
    let rename: Option<String> = rename_field.read_value(reporter, None);

    cursor.warn_orphan_keys(reporter);

    Ok(Modifier {
        regex,
        rename,
        link,
        modify,
        chmod,
        filter,
    })
}

/// Parse an origin string (local path or `http(s)://...#subpath`) into an
/// [`Origin`]. Local paths are resolved directly; only http(s) strings are
/// handed to the URL parser, and its fragment (if any) becomes the
/// extracted-archive subpath.
fn parse_origin(text: &str, base_directory: &Path) -> Result<Origin> {
    if let Some(rest) = text.strip_prefix("http://").or_else(|| text.strip_prefix("https://")) {
        let _ = rest;
        let mut url = Url::parse(text).with_context(|| format!("invalid origin URL \"{text}\""))?;
        let subpath = url.fragment().map(str::to_string);
        url.set_fragment(None);
        return Ok(Origin {
            base: OriginBase::Http(url),
            subpath,
        });
    }

    if let Some(rest) = text.strip_prefix("file://") {
        let (path_part, subpath) = split_fragment(rest);
        let resolved = crate::path::join_normalized(base_directory, path_part.trim_start_matches('/'));
        return Ok(Origin {
            base: OriginBase::Local(resolved),
            subpath,
        });
    }

    let (path_part, subpath) = split_fragment(text);
    let resolved = crate::path::join_normalized(base_directory, path_part);
    Ok(Origin {
        base: OriginBase::Local(resolved),
        subpath,
    })
}

fn split_fragment(text: &str) -> (&str, Option<String>) {
    match text.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment.to_string())),
        None => (text, None),
    }
}
