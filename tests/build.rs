//! Builds through the public API: rebuild idempotence, allowlist
//! destinations, per-file failure isolation and the param audit.

use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::TempDir;
use trellis::App;
use trellis::audit;
use trellis::config::{self, ConfigInputs, ResolvedConfig};
use trellis::guard::{WriteGuard, WriteOutcome};
use trellis::pipeline::{self, AssetClass, TransformContext, TransformError, TransformOutput, Transformer};

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn resolve(root: &Path, params: Value) -> ResolvedConfig {
    config::resolve(&ConfigInputs::new(root).with_params(params)).unwrap()
}

fn mtimes(dir: &Path) -> BTreeMap<PathBuf, SystemTime> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let modified = e.metadata().unwrap().modified().unwrap();
            (e.into_path(), modified)
        })
        .collect()
}

// =========================================================================
// Idempotent rebuilds
// =========================================================================

#[test]
fn rebuild_of_unchanged_sources_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "statics/css/_base.css", "body { margin: 0; }\n");
    write(tmp.path(), "statics/css/main.css", "@import \"base\";\na { color: red; }\n");
    write(tmp.path(), "statics/js/app.js", "export const run = () => 1;\n");
    write(tmp.path(), "statics/pages/index.html", "<p>hi</p>\n");
    write(tmp.path(), "mvc/views/home.html", "<h1>home</h1>\n");
    let app = App::new(ConfigInputs::new(tmp.path()).with_params(json!({
        "css": {"versionFile": {}},
        "clientViews": {"enable": true, "exposeAll": true},
    })))
    .unwrap();
    app.prepare().unwrap();

    let first = app.build().unwrap();
    assert!(first.written() >= 4);
    let before = mtimes(tmp.path());

    let second = app.build().unwrap();

    assert_eq!(second.written(), 0);
    assert_eq!(second.manifest, WriteOutcome::Unchanged);
    assert_eq!(mtimes(tmp.path()), before);
    for pipeline in &second.pipelines {
        assert!(pipeline.outputs.iter().all(|o| o.outcome == WriteOutcome::Unchanged));
    }
}

// =========================================================================
// Allowlist destinations
// =========================================================================

#[test]
fn allowlist_entry_with_destination_is_written_there() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "statics/css/file1.less", "a { color: red; }\n");
    write(tmp.path(), "statics/css/other.css", "b { color: blue; }\n");
    let config = resolve(
        tmp.path(),
        json!({"minify": false, "css": {"allowlist": ["file1.less:compile/main.css"]}}),
    );

    let report = pipeline::run(&config, &WriteGuard::new(true), AssetClass::Css);

    assert!(report.is_ok(), "{report:?}");
    let out = tmp.path().join("public/css/compile/main.css");
    assert_eq!(fs::read_to_string(&out).unwrap(), "a { color: red; }\n");
    assert!(!tmp.path().join("public/css/file1.css").exists());
    assert!(!tmp.path().join("public/css/file1.less").exists());
    assert!(!tmp.path().join("public/css/other.css").exists());
}

#[test]
fn wildcard_entry_compiles_every_match() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "statics/css/file1.less", "a { color: red; }\n");
    write(tmp.path(), "statics/css/_shared.less", "b { color: blue; }\n");
    write(tmp.path(), "statics/css/other.css", "c { color: green; }\n");
    let config = resolve(
        tmp.path(),
        json!({"minify": false, "css": {"allowlist": ["*.less:compile/"]}}),
    );

    let report = pipeline::run(&config, &WriteGuard::new(true), AssetClass::Css);

    assert!(report.is_ok(), "{report:?}");
    assert_eq!(report.written(), 2);
    let out = tmp.path().join("public/css/compile");
    assert_eq!(fs::read_to_string(out.join("file1.css")).unwrap(), "a { color: red; }\n");
    assert!(out.join("_shared.css").is_file());
    assert!(!tmp.path().join("public/css/other.css").exists());
}

#[test]
fn missing_allowlisted_file_is_reported() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "statics/js/a.js", "a();\n");
    let config = resolve(tmp.path(), json!({"js": {"allowlist": ["a.js", "gone.js"]}}));

    let report = pipeline::run(&config, &WriteGuard::new(true), AssetClass::Js);

    assert_eq!(report.written(), 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("gone.js"));
}

// =========================================================================
// Per-file failures
// =========================================================================

/// Upper-cases sources; refuses files containing `#error`.
struct Shouting;

impl Transformer for Shouting {
    fn version_code(&self, _ctx: &TransformContext<'_>) -> String {
        String::new()
    }

    fn parse(&self, _ctx: &TransformContext<'_>, path: &Path) -> Result<TransformOutput, TransformError> {
        let source = fs::read_to_string(path)?;
        if source.contains("#error") {
            return Err(TransformError::Syntax {
                path: path.to_path_buf(),
                message: "refused".into(),
            });
        }
        Ok(TransformOutput::code(source.to_uppercase()))
    }
}

#[test]
fn one_broken_file_does_not_sink_the_others() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "statics/js/1.js", "one();\n");
    write(tmp.path(), "statics/js/2.js", "#error\n");
    write(tmp.path(), "statics/js/3.js", "three();\n");
    let config = resolve(tmp.path(), json!({"minify": false}));

    let report = pipeline::run_with(&config, &WriteGuard::new(true), AssetClass::Js, &Shouting);

    assert_eq!(report.written(), 2);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].source.ends_with("2.js"));
    assert!(report.failed[0].error.contains("refused"));
    let out = tmp.path().join("public/js");
    assert_eq!(fs::read_to_string(out.join("1.js")).unwrap(), "ONE();\n");
    assert_eq!(fs::read_to_string(out.join("3.js")).unwrap(), "THREE();\n");
    assert!(!out.join("2.js").exists());
}

#[test]
fn broken_css_fails_only_that_file() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "statics/css/a.css", "a { color: red; }\n");
    write(tmp.path(), "statics/css/b.css", "b { color: red;\n");
    let app = App::new(ConfigInputs::new(tmp.path())).unwrap();
    app.prepare().unwrap();

    let report = app.build().unwrap();

    assert!(!report.is_ok());
    let css = report.pipeline("css").unwrap();
    assert_eq!(css.written(), 1);
    assert_eq!(css.failed.len(), 1);
    assert!(tmp.path().join("public/css/a.css").is_file());
}

// =========================================================================
// Audit
// =========================================================================

#[test]
fn audit_names_each_extra_param() {
    let tmp = TempDir::new().unwrap();
    write(
        tmp.path(),
        "trellis.json",
        r#"{"extraParam": true, "css": {"extraParam": true}, "http": {"port": 8080}}"#,
    );

    let report = audit::audit_app(tmp.path());

    assert_eq!(report.len(), 2);
    for path in ["extraParam", "css.extraParam"] {
        let issues = report.at(path);
        assert_eq!(issues.len(), 1, "{path}");
        assert_eq!(issues[0].kind, audit::IssueKind::ExtraParam);
        assert_eq!(issues[0].path, path);
    }
}
