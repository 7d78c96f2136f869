//! Bundlers: pack many small client files into one ES module per bundle.
//!
//! Three bundlers share this code:
//!
//! | Bundler | Sources | Contents |
//! |---------|---------|----------|
//! | `clientViews` | `viewsPath` | HTML templates |
//! | `clientControllers` | `controllersPath` | client scripts |
//! | `js.bundler` | `js.sourcePath` | client scripts |
//!
//! Each bundle is written as:
//!
//! ```js
//! // Generated by trellis. ...
//! export default {
//!   "cart/item.html": "<li>...</li>",
//!   "cart/list.html": "<ul>...</ul>"
//! };
//! ```
//!
//! ## Membership
//!
//! 1. The config's bundle table is authoritative: every file (or glob) it
//!    lists goes into that bundle.
//! 2. Any other file may declare itself on its first line:
//!    `<!-- trellis:bundle admin -->` or `// trellis:exclude`.
//! 3. With `exposeAll`, files with no directive go to `defaultBundle`.
//!
//! The blocklist removes files from steps 2 and 3 only. A bundle is written
//! with write-if-changed as a whole.

use super::files::{self, IgnoreRules};
use super::{GENERATED_HEADER, PipelineReport, SkipReason, hash_bytes, minify};
use crate::config::{BundlerConfig, ResolvedConfig};
use crate::guard::{WriteGuard, WriteOutcome};
use globset::Glob;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

const DIRECTIVE_BUNDLE: &str = "trellis:bundle";
const DIRECTIVE_EXCLUDE: &str = "trellis:exclude";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleKind {
    Views,
    Controllers,
    Scripts,
}

impl BundleKind {
    pub const ALL: [BundleKind; 3] = [BundleKind::Views, BundleKind::Controllers, BundleKind::Scripts];

    pub fn name(&self) -> &'static str {
        match self {
            BundleKind::Views => "clientViews",
            BundleKind::Controllers => "clientControllers",
            BundleKind::Scripts => "js.bundler",
        }
    }

    fn extensions(&self) -> &'static [&'static str] {
        match self {
            BundleKind::Views => &["html", "htm"],
            BundleKind::Controllers | BundleKind::Scripts => &["js", "mjs"],
        }
    }

    fn minify(&self, content: &str) -> String {
        match self {
            BundleKind::Views => minify::minify_html(content),
            BundleKind::Controllers | BundleKind::Scripts => minify::minify_js(content),
        }
    }
}

impl fmt::Display for BundleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One bundler's settings, normalised across the two config shapes.
#[derive(Debug, Clone)]
pub struct BundleSpec {
    pub kind: BundleKind,
    pub enable: bool,
    pub source_dir: PathBuf,
    pub output: PathBuf,
    pub bundles: BTreeMap<String, Vec<String>>,
    pub blocklist: Vec<String>,
    pub expose_all: bool,
    pub default_bundle: String,
    pub minify: bool,
}

impl BundleSpec {
    pub fn from_config(config: &ResolvedConfig, kind: BundleKind) -> Self {
        let params = &config.params;
        let from_bundler = |cfg: &BundlerConfig, source_dir: &Path| Self {
            kind,
            enable: cfg.enable,
            source_dir: source_dir.to_path_buf(),
            output: cfg.output.clone(),
            bundles: cfg.allowlist.clone(),
            blocklist: cfg.blocklist.clone(),
            expose_all: cfg.expose_all,
            default_bundle: cfg.default_bundle.clone(),
            minify: cfg.minify && params.minify,
        };
        match kind {
            BundleKind::Views => from_bundler(&params.client_views, &params.views_path),
            BundleKind::Controllers => from_bundler(&params.client_controllers, &params.controllers_path),
            BundleKind::Scripts => {
                let js = &params.js;
                Self {
                    kind,
                    enable: js.bundler.enable,
                    source_dir: js.assets.source_path.clone(),
                    output: js.bundler.output.clone(),
                    bundles: js.bundler.bundles.clone(),
                    blocklist: js.assets.blocklist.clone(),
                    expose_all: false,
                    default_bundle: String::new(),
                    minify: params.minify && js.assets.minifier.enable,
                }
            }
        }
    }
}

/// First-line bundle directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Bundle(String),
    Exclude,
}

impl Directive {
    pub fn parse(content: &str) -> Option<Self> {
        let first = content.lines().next()?;
        let body = first
            .trim()
            .trim_start_matches("<!--")
            .trim_end_matches("-->")
            .trim_start_matches("//")
            .trim_start_matches("/*")
            .trim_end_matches("*/")
            .trim();
        if body == DIRECTIVE_EXCLUDE {
            return Some(Directive::Exclude);
        }
        let name = body.strip_prefix(DIRECTIVE_BUNDLE)?;
        // `trellis:bundlefoo` is not a directive.
        if !name.starts_with(char::is_whitespace) {
            return None;
        }
        let name = name.trim();
        (!name.is_empty()).then(|| Directive::Bundle(name.to_string()))
    }
}

/// Which files go in which bundle, keyed by path relative to the source dir.
#[derive(Debug, Default)]
pub struct BundlePlan {
    pub bundles: BTreeMap<String, BTreeMap<String, PathBuf>>,
    pub errors: Vec<String>,
}

/// Decide bundle membership.
pub fn plan(spec: &BundleSpec, ignore: &IgnoreRules) -> BundlePlan {
    let mut plan = BundlePlan::default();
    let walked: Vec<(PathBuf, String)> = files::walk_files(&spec.source_dir, ignore)
        .into_iter()
        .filter(|(path, _)| files::has_extension(path, spec.kind.extensions()))
        .map(|(path, rel)| (path, files::slash_path(&rel)))
        .collect();

    let mut claimed = BTreeSet::new();
    for (name, entries) in &spec.bundles {
        if !is_valid_bundle_name(name) {
            plan.errors.push(format!("invalid bundle name '{name}'"));
            continue;
        }
        let members = plan.bundles.entry(name.clone()).or_default();
        for entry in entries {
            let wildcard = entry.contains(['*', '?', '[', '{']);
            if wildcard {
                let matcher = match Glob::new(entry) {
                    Ok(g) => g.compile_matcher(),
                    Err(e) => {
                        plan.errors.push(format!("{name}: invalid pattern '{entry}': {e}"));
                        continue;
                    }
                };
                for (path, rel) in walked.iter().filter(|(_, rel)| matcher.is_match(rel)) {
                    members.insert(rel.clone(), path.clone());
                    claimed.insert(rel.clone());
                }
            } else {
                let rel = entry.trim_start_matches("./");
                match walked.iter().find(|(_, r)| r == rel) {
                    Some((path, _)) => {
                        members.insert(rel.to_string(), path.clone());
                        claimed.insert(rel.to_string());
                    }
                    None => plan.errors.push(format!(
                        "{name}: {entry} not found in {}",
                        spec.source_dir.display()
                    )),
                }
            }
        }
    }

    let (blocked, errors) = files::build_globset(&spec.blocklist);
    plan.errors.extend(errors);

    for (path, rel) in &walked {
        if claimed.contains(rel) {
            continue;
        }
        let directive = fs::read_to_string(path)
            .ok()
            .and_then(|content| Directive::parse(&content));
        let target = match directive {
            Some(Directive::Exclude) => continue,
            Some(Directive::Bundle(name)) => name,
            None if spec.expose_all && !spec.default_bundle.is_empty() => spec.default_bundle.clone(),
            None => continue,
        };
        if !is_valid_bundle_name(&target) {
            plan.errors.push(format!("{rel}: invalid bundle name '{target}'"));
            continue;
        }
        if blocked.is_match(rel.as_str()) {
            debug!(bundler = spec.kind.name(), file = rel.as_str(), "blocklisted");
            continue;
        }
        plan.bundles.entry(target).or_default().insert(rel.clone(), path.clone());
    }

    plan
}

/// A bundle name is a single file name: no separators, not `.` or `..`.
fn is_valid_bundle_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// The bundle's output file: `admin` → `<output>/admin.js`.
pub fn bundle_path(output: &Path, name: &str) -> PathBuf {
    if Path::new(name).extension().is_some() {
        output.join(name)
    } else {
        output.join(format!("{name}.js"))
    }
}

/// Render a bundle module. Keys are sorted, so output is deterministic.
pub fn render(contents: &BTreeMap<String, String>) -> String {
    let mut out = format!("// {GENERATED_HEADER}\nexport default {{");
    for (i, (key, value)) in contents.iter().enumerate() {
        out.push_str(if i == 0 { "\n" } else { ",\n" });
        out.push_str("  ");
        out.push_str(&js_string(key));
        out.push_str(": ");
        out.push_str(&js_string(value));
    }
    if !contents.is_empty() {
        out.push('\n');
    }
    out.push_str("};\n");
    out
}

/// A JSON string literal that is also a valid JS string literal.
fn js_string(s: &str) -> String {
    serde_json::to_string(s)
        .unwrap_or_default()
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

/// Run one bundler.
pub fn run(config: &ResolvedConfig, guard: &WriteGuard, kind: BundleKind) -> PipelineReport {
    run_spec(config, guard, &BundleSpec::from_config(config, kind))
}

pub fn run_spec(config: &ResolvedConfig, guard: &WriteGuard, spec: &BundleSpec) -> PipelineReport {
    let name = spec.kind.name();
    if !spec.enable {
        return PipelineReport::skipped(name, SkipReason::Disabled);
    }
    if !config.params.make_build_artifacts.statics() || !guard.is_enabled() {
        return PipelineReport::skipped(name, SkipReason::ArtifactsOff);
    }

    let mut report = PipelineReport::new(name);
    let ignore = IgnoreRules::load(config.app_dir(), &config.params.ignore_file);
    let plan = plan(spec, &ignore);
    for message in &plan.errors {
        error!(bundler = name, "{message}");
    }
    report.errors.extend(plan.errors);

    for (bundle, members) in &plan.bundles {
        let mut contents = BTreeMap::new();
        for (rel, path) in members {
            match fs::read_to_string(path) {
                Ok(content) => {
                    let content = if spec.minify { spec.kind.minify(&content) } else { content };
                    contents.insert(rel.clone(), content);
                }
                Err(e) => {
                    error!(file = %path.display(), error = %e, "cannot read bundle member");
                    report.failed.push(super::FileFailure {
                        source: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let output = bundle_path(&spec.output, bundle);
        let rendered = render(&contents);
        match guard.write_if_changed(&output, &rendered) {
            Ok(outcome) => report.outputs.push(super::OutputRecord {
                output,
                source: spec.source_dir.clone(),
                hash: hash_bytes(rendered.as_bytes()),
                outcome,
            }),
            Err(e) => {
                error!(file = %output.display(), error = %e, "cannot write bundle");
                report.errors.push(format!("{}: {e}", output.display()));
            }
        }
    }

    info!(
        bundler = name,
        bundles = plan.bundles.len(),
        written = report.written(),
        "bundler finished"
    );
    report
}

/// Whether any output in the report was actually written.
pub fn changed(report: &PipelineReport) -> bool {
    report.outputs.iter().any(|o| o.outcome == WriteOutcome::Written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, ConfigInputs};
    use serde_json::{Value, json};
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn resolve(tmp: &TempDir, params: Value) -> ResolvedConfig {
        config::resolve(&ConfigInputs::new(tmp.path()).with_params(params)).unwrap()
    }

    fn views(tmp: &TempDir) -> PathBuf {
        tmp.path().join("mvc/views")
    }

    // =========================================================================
    // Directives
    // =========================================================================

    #[test]
    fn directive_parsing() {
        assert_eq!(
            Directive::parse("<!-- trellis:bundle admin -->\n<p/>"),
            Some(Directive::Bundle("admin".into()))
        );
        assert_eq!(
            Directive::parse("// trellis:bundle  shop\nlet x;"),
            Some(Directive::Bundle("shop".into()))
        );
        assert_eq!(Directive::parse("/* trellis:exclude */"), Some(Directive::Exclude));
        assert_eq!(Directive::parse("// trellis:bundle"), None);
        assert_eq!(Directive::parse("// trellis:bundler x"), None);
        assert_eq!(Directive::parse("<p>trellis:bundle x</p>\n"), None);
        assert_eq!(Directive::parse(""), None);
    }

    // =========================================================================
    // Membership
    // =========================================================================

    #[test]
    fn config_is_authoritative_and_directives_add() {
        let tmp = TempDir::new().unwrap();
        let dir = views(&tmp);
        write(&dir, "cart/item.html", "<!-- trellis:bundle admin -->\n<li/>");
        write(&dir, "cart/list.html", "<ul/>");
        write(&dir, "admin/panel.html", "<!-- trellis:bundle admin -->\n<div/>");
        write(&dir, "admin/secret.html", "<!-- trellis:bundle admin -->\n<x/>");
        write(&dir, "misc.html", "<!-- trellis:exclude -->\n<p/>");
        write(&dir, "plain.html", "<p/>");
        let config = resolve(
            &tmp,
            json!({"clientViews": {
                "enable": true,
                "allowlist": {"cart": ["cart/*.html"]},
                "blocklist": ["admin/secret.html"],
            }}),
        );
        let spec = BundleSpec::from_config(&config, BundleKind::Views);
        let plan = plan(&spec, &IgnoreRules::builtin(tmp.path()));

        let keys = |b: &str| plan.bundles[b].keys().cloned().collect::<Vec<_>>();
        // The config entry wins over item.html's own directive.
        assert_eq!(keys("cart"), vec!["cart/item.html", "cart/list.html"]);
        assert_eq!(keys("admin"), vec!["admin/panel.html"]);
        assert_eq!(plan.bundles.len(), 2);
        assert!(plan.errors.is_empty());
    }

    #[test]
    fn expose_all_uses_default_bundle() {
        let tmp = TempDir::new().unwrap();
        let dir = views(&tmp);
        write(&dir, "a.html", "<a/>");
        write(&dir, "b.html", "<!-- trellis:exclude -->\n<b/>");
        write(&dir, "c.txt", "not a view");
        let config = resolve(&tmp, json!({"clientViews": {"enable": true, "exposeAll": true}}));
        let spec = BundleSpec::from_config(&config, BundleKind::Views);
        let plan = plan(&spec, &IgnoreRules::builtin(tmp.path()));
        assert_eq!(plan.bundles.len(), 1);
        assert_eq!(plan.bundles["views.js"].keys().collect::<Vec<_>>(), vec!["a.html"]);
    }

    #[test]
    fn bundle_names_cannot_leave_the_output_dir() {
        let tmp = TempDir::new().unwrap();
        let dir = views(&tmp);
        write(&dir, "evil.html", "<!-- trellis:bundle ../../x -->\n<p/>");
        write(&dir, "dots.html", "<!-- trellis:bundle .. -->\n<p/>");
        write(&dir, "ok.html", "<!-- trellis:bundle shop -->\n<p/>");
        let config = resolve(
            &tmp,
            json!({"clientViews": {"enable": true, "allowlist": {"a/b": ["ok.html"]}}}),
        );
        let spec = BundleSpec::from_config(&config, BundleKind::Views);
        let plan = plan(&spec, &IgnoreRules::builtin(tmp.path()));

        assert_eq!(plan.bundles.keys().collect::<Vec<_>>(), vec!["shop"]);
        assert_eq!(plan.errors.len(), 3);
        assert!(plan.errors.iter().any(|e| e.contains("'a/b'")));
        assert!(plan.errors.iter().any(|e| e.starts_with("evil.html") && e.contains("'../../x'")));
        assert!(plan.errors.iter().any(|e| e.starts_with("dots.html")));

        let report = run(&config, &WriteGuard::new(true), BundleKind::Views);
        assert_eq!(report.written(), 1);
        assert!(!tmp.path().join("x.js").exists());
        assert!(!tmp.path().join("public/x.js").exists());
    }

    #[test]
    fn missing_configured_file_is_reported() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(views(&tmp)).unwrap();
        let config = resolve(
            &tmp,
            json!({"clientViews": {"enable": true, "allowlist": {"main": ["gone.html"]}}}),
        );
        let spec = BundleSpec::from_config(&config, BundleKind::Views);
        let plan = plan(&spec, &IgnoreRules::builtin(tmp.path()));
        assert_eq!(plan.errors.len(), 1);
        assert!(plan.errors[0].contains("gone.html"));
    }

    // =========================================================================
    // Output
    // =========================================================================

    #[test]
    fn render_escapes_for_js() {
        let mut contents = BTreeMap::new();
        contents.insert("b.html".to_string(), "say \"hi\"\n\u{2028}".to_string());
        contents.insert("a.html".to_string(), "<p>".to_string());
        assert_eq!(
            render(&contents),
            format!(
                "// {GENERATED_HEADER}\nexport default {{\n  \"a.html\": \"<p>\",\n  \"b.html\": \"say \\\"hi\\\"\\n\\u2028\"\n}};\n"
            )
        );
        assert_eq!(
            render(&BTreeMap::new()),
            format!("// {GENERATED_HEADER}\nexport default {{}};\n")
        );
    }

    #[test]
    fn bundle_path_adds_extension() {
        let out = Path::new("/p/js");
        assert_eq!(bundle_path(out, "admin"), PathBuf::from("/p/js/admin.js"));
        assert_eq!(bundle_path(out, "views.js"), PathBuf::from("/p/js/views.js"));
    }

    #[test]
    fn bundles_are_written_once() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("mvc/controllers"), "cart.js", "// trellis:bundle shop\nexport const a = 1;\n");
        let config = resolve(&tmp, json!({"clientControllers": {"enable": true}}));
        let guard = WriteGuard::new(true);

        let first = run(&config, &guard, BundleKind::Controllers);
        assert!(changed(&first));
        let written = fs::read_to_string(tmp.path().join("public/js/controllers/shop.js")).unwrap();
        // Minified: the directive comment is gone from the bundled copy.
        assert!(written.contains("\"cart.js\": \"export const a=1;\""));

        let second = run(&config, &guard, BundleKind::Controllers);
        assert!(!changed(&second));
        assert_eq!(second.unchanged(), 1);
    }

    #[test]
    fn disabled_bundler_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let config = resolve(&tmp, json!({}));
        let report = run(&config, &WriteGuard::new(true), BundleKind::Scripts);
        assert_eq!(report.skipped, Some(SkipReason::Disabled));
    }

    #[test]
    fn script_bundles_come_from_js_sources() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("statics/js"), "lib/a.js", "a();");
        write(&tmp.path().join("statics/js"), "lib/b.js", "b();");
        let config = resolve(
            &tmp,
            json!({"minify": false, "js": {"bundler": {"enable": true, "bundles": {"lib": ["lib/*.js"]}}}}),
        );
        let report = run(&config, &WriteGuard::new(true), BundleKind::Scripts);
        assert!(report.is_ok());
        let written = fs::read_to_string(tmp.path().join("public/js/bundles/lib.js")).unwrap();
        assert!(written.contains("\"lib/a.js\": \"a();\",\n  \"lib/b.js\": \"b();\""));
    }
}
