//! Derived parameters: mode, build-artifact switch, route prefix, ports and
//! absolute paths.
//!
//! Two passes:
//!
//! - [`derive_before_templates`] resolves paths so templates see absolute
//!   ones. Values still holding `${...}` are left for the template resolver,
//!   and the route prefix is left as written.
//! - [`derive`] runs after expansion and normalises everything. It is
//!   idempotent.

use super::merge::{get_path, is_template, set_path};
use super::Mode;
use serde_json::{Value, json};
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Where a path parameter is resolved from.
#[derive(Debug, Clone, Copy)]
enum Base {
    AppDir,
    Param(&'static str),
}

/// Path parameters in dependency order: a base is always resolved before
/// the params that join onto it.
const PATH_PARAMS: &[(&str, Base)] = &[
    ("staticsRoot", Base::AppDir),
    ("publicFolder", Base::AppDir),
    ("buildFolder", Base::AppDir),
    ("controllersPath", Base::AppDir),
    ("modelsPath", Base::AppDir),
    ("viewsPath", Base::AppDir),
    ("ignoreFile", Base::AppDir),
    ("css.sourcePath", Base::Param("staticsRoot")),
    ("js.sourcePath", Base::Param("staticsRoot")),
    ("html.sourcePath", Base::Param("staticsRoot")),
    ("css.output", Base::Param("publicFolder")),
    ("js.output", Base::Param("publicFolder")),
    ("html.output", Base::Param("publicFolder")),
    ("js.bundler.output", Base::Param("publicFolder")),
    ("clientViews.output", Base::Param("publicFolder")),
    ("clientControllers.output", Base::Param("publicFolder")),
];

const PORT_PARAMS: &[&str] = &["http.port", "https.port", "htmlValidator.port"];

/// The pass before template expansion. Returns the mode when it is already
/// concrete; its overrides are applied now and again by [`derive`].
pub fn derive_before_templates(tree: &mut Value, app_dir: &Path) -> Option<Mode> {
    let holds_template = |tree: &Value, param: &str| get_path(tree, param).is_some_and(is_template);
    let mode = (!holds_template(tree, "mode")).then(|| normalize_mode(tree));
    if !holds_template(tree, "makeBuildArtifacts") {
        normalize_build_artifacts(tree);
    }
    check_ports(tree);
    resolve_paths(tree, app_dir);
    if let Some(mode) = mode {
        apply_mode_overrides(tree, mode);
    }
    mode
}

/// Run every derivation and return the effective mode.
pub fn derive(tree: &mut Value, app_dir: &Path) -> Mode {
    let mode = normalize_mode(tree);
    normalize_build_artifacts(tree);
    let prefix = normalize_route_prefix(get_path(tree, "routePrefix"));
    set_path(tree, "routePrefix", Value::String(prefix));
    check_ports(tree);
    resolve_paths(tree, app_dir);
    apply_mode_overrides(tree, mode);
    mode
}

/// Coerce `mode` to one of the known modes. Anything else becomes production.
pub fn normalize_mode(tree: &mut Value) -> Mode {
    let raw = get_path(tree, "mode").cloned().unwrap_or(Value::Null);
    let mode = match raw.as_str().and_then(Mode::parse) {
        Some(mode) => mode,
        None => {
            warn!(mode = %raw, "unknown mode; falling back to production");
            Mode::Production
        }
    };
    set_path(tree, "mode", Value::String(mode.as_str().to_string()));
    mode
}

/// Force the settings each mode dictates, regardless of what was configured.
pub fn apply_mode_overrides(tree: &mut Value, mode: Mode) {
    match mode {
        Mode::Development => {
            set_path(tree, "minify", json!(false));
            set_path(tree, "hostPublic", json!(true));
        }
        Mode::Production => {
            set_path(tree, "htmlValidator.enable", json!(false));
        }
        Mode::ProductionProxy => {
            set_path(tree, "htmlValidator.enable", json!(false));
            set_path(tree, "localhostOnly", json!(true));
            set_path(tree, "hostPublic", json!(false));
        }
    }
}

/// Normalise `makeBuildArtifacts` to `true`, `false` or `"staticsOnly"`.
pub fn normalize_build_artifacts(tree: &mut Value) {
    let normalized = match get_path(tree, "makeBuildArtifacts") {
        Some(Value::Bool(b)) => Value::Bool(*b),
        Some(Value::String(s)) => match s.trim() {
            "staticsOnly" | "statics-only" | "statics" => json!("staticsOnly"),
            "true" => json!(true),
            "false" => json!(false),
            other => {
                warn!(value = other, "unknown makeBuildArtifacts value; using true");
                json!(true)
            }
        },
        _ => json!(true),
    };
    set_path(tree, "makeBuildArtifacts", normalized);
}

/// Normalise a route prefix: trimmed, one leading slash, no trailing slash.
/// Empty, `/` and non-strings all mean "no prefix".
pub fn normalize_route_prefix(value: Option<&Value>) -> String {
    let Some(Value::String(raw)) = value else {
        return String::new();
    };
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

fn check_ports(tree: &mut Value) {
    for param in PORT_PARAMS {
        let Some(port) = get_path(tree, param) else {
            continue;
        };
        let in_range = port.as_u64().is_some_and(|p| p <= u64::from(u16::MAX));
        // Strings are left for reconciliation, which coerces them first.
        if !in_range && !port.is_string() {
            warn!(param = *param, port = %port, "port out of range; resetting it to 0");
            set_path(tree, param, json!(0));
        }
    }
}

/// Resolve every path parameter to an absolute, lexically clean path.
///
/// Values still carrying a `${...}` template are skipped; they are resolved
/// on the pass after expansion.
pub fn resolve_paths(tree: &mut Value, app_dir: &Path) {
    for (param, base) in PATH_PARAMS {
        let base_dir = match base {
            Base::AppDir => app_dir.to_path_buf(),
            Base::Param(name) => match get_path(tree, name).and_then(Value::as_str) {
                Some(dir) if !dir.contains("${") => PathBuf::from(dir),
                _ => continue,
            },
        };
        if let Some(resolved) = resolve_one(tree, param, &base_dir) {
            set_path(tree, param, Value::String(resolved));
        }
    }
    resolve_symlinks(tree, app_dir);
}

fn resolve_one(tree: &Value, param: &str, base: &Path) -> Option<String> {
    let raw = get_path(tree, param)?.as_str()?;
    if raw.contains("${") {
        return None;
    }
    Some(path_string(&clean_path(&base.join(raw))))
}

/// Symlink sources join the app dir; destinations join the public folder.
fn resolve_symlinks(tree: &mut Value, app_dir: &Path) {
    let public = get_path(tree, "publicFolder")
        .and_then(Value::as_str)
        .map(PathBuf::from)
        .unwrap_or_else(|| app_dir.join("public"));
    let Some(Value::Array(links)) = tree.get_mut("symlinks") else {
        return;
    };
    links.retain(|link| {
        let keep = link.is_object();
        if !keep {
            warn!(entry = %link, "ignoring symlink entry that is not an object");
        }
        keep
    });
    for link in links.iter_mut() {
        let Value::Object(entry) = link else {
            continue;
        };
        for (key, base) in [("source", app_dir), ("dest", public.as_path())] {
            if let Some(Value::String(raw)) = entry.get_mut(key)
                && !raw.contains("${")
            {
                *raw = path_string(&clean_path(&base.join(raw.as_str())));
            }
        }
    }
}

/// Lexically normalise a path: drop `.` segments and fold `..` into the
/// parent. Does not touch the filesystem.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
