//! Command-line and environment-variable sources.
//!
//! Both sources are string based, so every value they contribute is coerced to
//! the kind its schema leaf accepts before it reaches the merge. Values are
//! keyed by the dotted leaf path they target.
//!
//! Flag rules:
//!
//! - Every flag spelling is declared on exactly one schema leaf.
//! - All flags on one leaf are mutually exclusive: the first one encountered in
//!   argument order wins and every later conflicting flag is ignored with a
//!   warning (`--enable-validator --disable-validator` → enabled).
//! - Combined single-letter flags are split: `-dha` is `-d -h -a`.
//! - Value flags accept `--http-port 8080` and `--http-port=8080`. A
//!   following token that is itself a flag is never taken as the value.
//! - Unknown tokens are left for the embedding application and ignored here.

use super::schema::{FlagAction, Leaf, Schema, ValueKind};
use serde_json::{Number, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// A flag spelling resolved to its leaf.
struct FlagTarget<'a> {
    path: &'a str,
    leaf: &'a Leaf,
    action: &'a FlagAction,
}

/// Split combined single-letter flags into one token per letter.
///
/// `-dha` → `-d -h -a`. Long flags, values, and a lone `-` pass through.
pub fn expand_short_flags(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        let is_combined = arg.len() > 2
            && arg.starts_with('-')
            && !arg.starts_with("--")
            && arg[1..].chars().all(|c| c.is_ascii_alphabetic());
        if is_combined {
            out.extend(arg[1..].chars().map(|c| format!("-{c}")));
        } else {
            out.push(arg.clone());
        }
    }
    out
}

/// Parse raw argument tokens into leaf values.
pub fn parse_args(args: &[String], schema: &Schema) -> BTreeMap<String, Value> {
    let leaves = schema.leaves();
    let mut table: HashMap<&str, FlagTarget<'_>> = HashMap::new();
    for (path, leaf) in &leaves {
        for flag in &leaf.flags {
            for spelling in &flag.spellings {
                table.insert(
                    *spelling,
                    FlagTarget {
                        path: path.as_str(),
                        leaf,
                        action: &flag.action,
                    },
                );
            }
        }
    }

    let tokens = expand_short_flags(args);
    let mut values: BTreeMap<String, Value> = BTreeMap::new();
    // Which spelling set each leaf, for conflict warnings.
    let mut winners: HashMap<&str, String> = HashMap::new();

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i].as_str();
        i += 1;

        let (name, inline) = match token.split_once('=') {
            Some((name, value)) if name.starts_with("--") => (name, Some(value)),
            _ => (token, None),
        };

        let Some(target) = table.get(name) else {
            debug!(arg = token, "ignoring unrecognised argument");
            continue;
        };

        let value = match target.action {
            FlagAction::Set(value) => value.clone(),
            FlagAction::TakesValue => {
                let raw = match inline {
                    Some(raw) => raw.to_string(),
                    None if tokens.get(i).is_some_and(|next| is_flag_value(next)) => {
                        i += 1;
                        tokens[i - 1].clone()
                    }
                    None => {
                        warn!(flag = name, "flag expects a value; ignoring it");
                        continue;
                    }
                };
                match coerce_str(target.leaf, &raw) {
                    Some(value) => value,
                    None => {
                        warn!(
                            flag = name,
                            value = raw.as_str(),
                            expected = %target.leaf.kinds_label(),
                            "flag value has the wrong type; ignoring it"
                        );
                        continue;
                    }
                }
            }
        };

        match values.get(target.path) {
            Some(existing) => {
                if *existing != value {
                    let first = winners.get(target.path).cloned().unwrap_or_default();
                    warn!(
                        param = target.path,
                        kept = first.as_str(),
                        ignored = name,
                        "conflicting command-line flags; the first one wins"
                    );
                }
            }
            None => {
                winners.insert(target.path, name.to_string());
                values.insert(target.path.to_string(), value);
            }
        }
    }

    values
}

/// Whether a token can be the value of the flag before it. Anything that
/// looks like another flag stays a flag; negative numbers are values.
fn is_flag_value(token: &str) -> bool {
    !token.starts_with('-') || parse_number(token).is_some()
}

/// Read every leaf's environment variables through `lookup`.
///
/// The first variable in a leaf's list that is set and non-empty wins. A value
/// that cannot be coerced to the leaf's kind is reported and skipped so the
/// lower-priority sources still apply.
pub fn read_env<F>(schema: &Schema, lookup: F) -> BTreeMap<String, Value>
where
    F: Fn(&str) -> Option<String>,
{
    let mut values = BTreeMap::new();
    for (path, leaf) in schema.leaves() {
        for var in &leaf.env {
            let Some(raw) = lookup(var).filter(|v| !v.trim().is_empty()) else {
                continue;
            };
            match coerce_str(leaf, &raw) {
                Some(value) => {
                    debug!(param = path.as_str(), var = *var, "using environment variable");
                    values.insert(path.clone(), value);
                }
                None => warn!(
                    var = *var,
                    value = raw.as_str(),
                    expected = %leaf.kinds_label(),
                    "environment variable has the wrong type; ignoring it"
                ),
            }
            break;
        }
    }
    values
}

/// Coerce a raw string to a value the leaf accepts.
///
/// Tried in order: boolean words (`true/on/yes/1`, `false/off/no/0`), numbers,
/// plain strings, comma-separated arrays, and `null`.
pub fn coerce_str(leaf: &Leaf, raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if leaf.kinds.contains(&ValueKind::Bool)
        && let Some(b) = parse_bool_word(raw)
    {
        return Some(Value::Bool(b));
    }
    if leaf.kinds.contains(&ValueKind::Number)
        && let Some(n) = parse_number(raw)
    {
        return Some(Value::Number(n));
    }
    if leaf.kinds.contains(&ValueKind::String) {
        return Some(Value::String(raw.to_string()));
    }
    if leaf.kinds.contains(&ValueKind::Array) {
        let items = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect();
        return Some(Value::Array(items));
    }
    if leaf.kinds.contains(&ValueKind::Null) && (raw.is_empty() || raw == "null") {
        return Some(Value::Null);
    }
    None
}

fn parse_bool_word(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Some(true),
        "false" | "off" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a purely numeric string (`42`, `-3`, `1.5`) into a JSON number.
///
/// Integers stay integers so they deserialize into integer fields.
pub fn parse_number(raw: &str) -> Option<Number> {
    if !is_numeric(raw) {
        return None;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Some(Number::from(i));
    }
    raw.parse::<f64>().ok().and_then(Number::from_f64)
}

/// Whether a string is a plain decimal number: optional sign, digits,
/// optional fraction. Exponents, `NaN` and `inf` are not numeric here.
pub fn is_numeric(raw: &str) -> bool {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    let (int, frac) = match digits.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (digits, None),
    };
    !int.is_empty()
        && int.chars().all(|c| c.is_ascii_digit())
        && frac.is_none_or(|f| !f.is_empty() && f.chars().all(|c| c.is_ascii_digit()))
}
