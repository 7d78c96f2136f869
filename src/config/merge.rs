//! Layered merge of configuration sources, plus schema type reconciliation.
//!
//! Each leaf is decided on its own: the highest-priority source that defines
//! it with an acceptable type wins.
//!
//! ```text
//! command line  >  environment  >  constructor  >  trellis.json  >  Cargo.toml  >  default
//! ```
//!
//! `null` counts as a definition. A value of the wrong JSON type is reported
//! and ignored, so the next source down still gets a chance. Strings holding
//! a `${...}` template are accepted for any leaf; their type is settled after
//! expansion.
//!
//! Object leaves (`compiler.options`, `requiredScripts`, bundler allowlists)
//! are merged key-by-key instead, lowest priority first.

use super::flags::{coerce_str, is_numeric, parse_number};
use super::schema::{Leaf, Schema, ValueKind};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Where a config value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    CommandLine,
    Environment,
    Constructor,
    ConfigFile,
    PackageManifest,
}

impl Source {
    /// Highest priority first.
    pub const PRECEDENCE: [Source; 5] = [
        Source::CommandLine,
        Source::Environment,
        Source::Constructor,
        Source::ConfigFile,
        Source::PackageManifest,
    ];
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Source::CommandLine => "command line",
            Source::Environment => "environment",
            Source::Constructor => "constructor params",
            Source::ConfigFile => "trellis.json",
            Source::PackageManifest => "Cargo.toml [package.metadata.trellis]",
        };
        f.write_str(name)
    }
}

/// Every source's contribution, ready to merge.
///
/// Command-line and environment values are flat maps keyed by dotted path
/// and already coerced; the other three are JSON trees.
#[derive(Debug, Default)]
pub struct Layers<'a> {
    pub cli: BTreeMap<String, Value>,
    pub env: BTreeMap<String, Value>,
    pub constructor: Option<&'a Value>,
    pub config_file: Option<&'a Value>,
    pub package: Option<&'a Value>,
}

impl Layers<'_> {
    fn lookup(&self, source: Source, dotted: &str) -> Option<&Value> {
        match source {
            Source::CommandLine => self.cli.get(dotted),
            Source::Environment => self.env.get(dotted),
            Source::Constructor => self.constructor.and_then(|v| get_path(v, dotted)),
            Source::ConfigFile => self.config_file.and_then(|v| get_path(v, dotted)),
            Source::PackageManifest => self.package.and_then(|v| get_path(v, dotted)),
        }
    }
}

/// Recursively merge two JSON values. Objects merge key-by-key; anything
/// else in the overlay replaces the base.
pub fn merge_json(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_val) => merge_json(base_val, overlay_val),
                    None => overlay_val,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Merge every source into one tree shaped like the schema.
///
/// Keys the schema does not know about are dropped here; the auditor is the
/// one that reports them.
pub fn merge_layers(schema: &Schema, layers: &Layers<'_>) -> Value {
    let mut tree = Value::Object(Map::new());
    for (path, leaf) in schema.leaves() {
        let value = if leaf.is_object() {
            merge_object_leaf(&path, leaf, layers)
        } else {
            pick_leaf(&path, leaf, layers)
        };
        set_path(&mut tree, &path, value);
    }
    tree
}

fn pick_leaf(path: &str, leaf: &Leaf, layers: &Layers<'_>) -> Value {
    for source in Source::PRECEDENCE {
        let Some(value) = layers.lookup(source, path) else {
            continue;
        };
        if leaf.accepts(value) || is_template(value) {
            return value.clone();
        }
        warn!(
            param = path,
            source = %source,
            expected = %leaf.kinds_label(),
            found = %ValueKind::of(value),
            "ignoring config value of the wrong type"
        );
    }
    leaf.default.clone()
}

fn merge_object_leaf(path: &str, leaf: &Leaf, layers: &Layers<'_>) -> Value {
    let mut merged = leaf.default.clone();
    for source in Source::PRECEDENCE.iter().rev() {
        match layers.lookup(*source, path) {
            Some(value @ Value::Object(_)) => merged = merge_json(merged, value.clone()),
            Some(value) => warn!(
                param = path,
                source = %source,
                found = %ValueKind::of(value),
                "ignoring non-object value for object param"
            ),
            None => {}
        }
    }
    merged
}

/// Bring every leaf back to a kind the schema accepts.
///
/// Templates can change a value's type (a port written as `"${http.port}"`
/// comes back as a number, a route prefix of `"2024"` comes back as one too).
/// String-ish values are coerced to the leaf's kind where that is lossless;
/// anything else falls back to the default with a warning. Numeric leaves
/// with an integer or null default also require a non-negative integer.
pub fn reconcile(schema: &Schema, tree: &mut Value) {
    for (path, leaf) in schema.leaves() {
        let Some(current) = get_path(tree, &path) else {
            set_path(tree, &path, leaf.default.clone());
            continue;
        };
        if leaf.accepts(current) && integer_ok(leaf, current) {
            continue;
        }
        let coerced = match current {
            Value::String(s) => coerce_str(leaf, s),
            Value::Number(n) if leaf.kinds.contains(&ValueKind::String) => {
                Some(Value::String(n.to_string()))
            }
            Value::Bool(b) if leaf.kinds.contains(&ValueKind::String) => {
                Some(Value::String(b.to_string()))
            }
            _ => None,
        }
        .filter(|v| integer_ok(leaf, v));

        match coerced {
            Some(value) => set_path(tree, &path, value),
            None => {
                warn!(
                    param = path.as_str(),
                    expected = %leaf.kinds_label(),
                    found = %ValueKind::of(current),
                    "config value has the wrong type; using the default"
                );
                let default = leaf.default.clone();
                set_path(tree, &path, default);
            }
        }
    }
}

fn integer_ok(leaf: &Leaf, value: &Value) -> bool {
    match (&leaf.default, value) {
        (Value::Number(d), Value::Number(v)) if d.is_u64() => v.is_u64(),
        (Value::Null, Value::Number(v)) => v.is_u64(),
        _ => true,
    }
}

/// Whether a value is a string carrying a `${...}` template.
pub fn is_template(value: &Value) -> bool {
    value.as_str().is_some_and(|s| s.contains("${"))
}

/// Coerce a template-free scalar string: purely numeric strings become
/// numbers and `"true"`/`"false"` become booleans. Anything else stays as is.
pub fn coerce_literal(s: &str) -> Value {
    match s {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ if is_numeric(s) => parse_number(s)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(s.to_string())),
        _ => Value::String(s.to_string()),
    }
}

/// Look up a dotted path (`"css.compiler.module"`) in a JSON tree.
pub fn get_path<'a>(tree: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted.split('.').try_fold(tree, |node, key| node.get(key))
}

/// Set a dotted path, creating intermediate objects and replacing any
/// non-object in the way.
pub fn set_path(tree: &mut Value, dotted: &str, value: Value) {
    let mut node = tree;
    let mut parts = dotted.split('.').peekable();
    while let Some(key) = parts.next() {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        if parts.peek().is_none() {
            map.insert(key.to_string(), value);
            return;
        }
        node = map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}
