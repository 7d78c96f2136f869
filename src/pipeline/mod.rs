//! Static asset pipelines.
//!
//! Each asset class (CSS, JS, HTML) runs the same steps:
//!
//! ```text
//! skip checks → ensure dirs → version file → select files
//!     → parallel: parse → minify → source map → write-if-changed
//! ```
//!
//! Parsing is delegated to a [`Transformer`], chosen by the class's
//! `compiler.module` tag (see [`Compiler`]). The built-in transformers live
//! in [`css`], [`js`] and [`html`]; tests and embedders can pass their own
//! through [`run_with`].
//!
//! ## Failure model
//!
//! Per-file failures never abort a run. Every file is compiled, each
//! failure is logged with its path and recorded in the [`PipelineReport`],
//! and the pipeline still returns normally. Problems with the run as a whole
//! (an allowlisted file that does not exist, an output directory that
//! cannot be created) go to [`PipelineReport::errors`].
//!
//! ## Idempotence
//!
//! Every output goes through [`WriteGuard::write_if_changed`], so a second
//! run over unchanged sources writes nothing.
//!
//! The bundlers ([`bundle`]) and the build manifest ([`manifest`]) follow the
//! same write rules.

pub mod bundle;
pub mod css;
pub mod files;
pub mod html;
pub mod js;
pub mod manifest;
pub mod minify;
pub mod sourcemap;

use crate::config::{AppConfig, AssetConfig, ResolvedConfig};
use crate::guard::{WriteGuard, WriteOutcome};
use files::{IgnoreRules, SourceFile};
use rayon::prelude::*;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// First line of every generated file. Do not change: existing outputs are
/// compared byte-for-byte.
pub const GENERATED_HEADER: &str =
    "Generated by trellis. Do not edit: this file is rewritten on every build.";

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{}: {message}", path.display())]
    Syntax { path: PathBuf, message: String },
    #[error("@import cycle: {0}")]
    ImportCycle(String),
    #[error("source map error: {0}")]
    SourceMap(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetClass {
    Css,
    Js,
    Html,
}

impl AssetClass {
    pub const ALL: [AssetClass; 3] = [AssetClass::Css, AssetClass::Js, AssetClass::Html];

    pub fn name(&self) -> &'static str {
        match self {
            AssetClass::Css => "css",
            AssetClass::Js => "js",
            AssetClass::Html => "html",
        }
    }

    /// Source extensions picked up in directory-scan mode.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            AssetClass::Css => &["css"],
            AssetClass::Js => &["js", "mjs"],
            AssetClass::Html => &["html", "htm"],
        }
    }

    /// Extension forced onto mirrored outputs.
    pub fn output_extension(&self) -> Option<&'static str> {
        match self {
            AssetClass::Css => Some("css"),
            AssetClass::Js | AssetClass::Html => None,
        }
    }

    pub fn settings<'a>(&self, params: &'a AppConfig) -> &'a AssetConfig {
        match self {
            AssetClass::Css => &params.css,
            AssetClass::Js => &params.js.assets,
            AssetClass::Html => &params.html,
        }
    }

    /// Used when `versionFile.fileName` is empty.
    pub fn default_version_file(&self) -> &'static str {
        match self {
            AssetClass::Css => "_version.css",
            AssetClass::Js => "version.js",
            AssetClass::Html => "version.html",
        }
    }

    /// Wrap `text` in this class's comment syntax.
    pub fn comment(&self, text: &str) -> String {
        match self {
            AssetClass::Css => format!("/* {text} */"),
            AssetClass::Js => format!("// {text}"),
            AssetClass::Html => format!("<!-- {text} -->"),
        }
    }

    pub fn minify(&self, code: &str) -> String {
        match self {
            AssetClass::Css => minify::minify_css(code),
            AssetClass::Js => minify::minify_js(code),
            AssetClass::Html => minify::minify_html(code),
        }
    }

    /// Whether scan mode compiles this file on its own.
    fn accepts(&self, path: &Path) -> bool {
        if !files::has_extension(path, self.extensions()) {
            return false;
        }
        // CSS partials are @import targets only.
        !(*self == AssetClass::Css
            && path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with('_')))
    }

    fn native(&self) -> &'static dyn Transformer {
        match self {
            AssetClass::Css => &css::NativeCss,
            AssetClass::Js => &js::NativeJs,
            AssetClass::Html => &html::NativeHtml,
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The `compiler.module` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compiler {
    None,
    Native,
    Unknown(String),
}

impl Compiler {
    pub fn parse(tag: &str) -> Self {
        match tag.trim() {
            "none" | "" => Compiler::None,
            "native" => Compiler::Native,
            other => Compiler::Unknown(other.to_string()),
        }
    }
}

/// What a transformer sees of the app.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    pub config: &'a ResolvedConfig,
    pub class: AssetClass,
    pub settings: &'a AssetConfig,
}

impl<'a> TransformContext<'a> {
    pub fn new(config: &'a ResolvedConfig, class: AssetClass) -> Self {
        Self {
            config,
            class,
            settings: class.settings(&config.params),
        }
    }

    /// `compiler.options`, untouched.
    pub fn options(&self) -> &'a Value {
        &self.settings.compiler.options
    }

    pub fn option_bool(&self, key: &str) -> bool {
        self.options().get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn app_version(&self) -> &'a str {
        &self.config.app_version
    }

    /// Name of the version variable; `appVersion` unless configured.
    pub fn version_var(&self) -> &'a str {
        self.settings
            .version_file
            .as_ref()
            .map(|v| v.var_name.as_str())
            .filter(|v| !v.is_empty())
            .unwrap_or("appVersion")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub output: String,
    /// An object or a JSON string; see [`sourcemap::rewrite`].
    pub source_map: Option<Value>,
}

impl TransformOutput {
    pub fn code(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            source_map: None,
        }
    }
}

/// A source-to-browser converter for one asset class.
///
/// `Sync` because files are parsed in parallel.
pub trait Transformer: Sync {
    /// Body of the version file (the generated header is added by the
    /// pipeline).
    fn version_code(&self, ctx: &TransformContext<'_>) -> String;

    fn parse(&self, ctx: &TransformContext<'_>, path: &Path) -> Result<TransformOutput, TransformError>;
}

/// Why a pipeline did nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    NoCompiler,
    UnknownCompiler(String),
    ArtifactsOff,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Disabled => f.write_str("disabled"),
            SkipReason::NoCompiler => f.write_str("compiler set to none"),
            SkipReason::UnknownCompiler(tag) => write!(f, "unknown compiler \"{tag}\""),
            SkipReason::ArtifactsOff => f.write_str("build artifacts off"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub source: PathBuf,
    pub error: String,
}

/// One file a pipeline produced (or confirmed unchanged).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRecord {
    pub output: PathBuf,
    pub source: PathBuf,
    /// SHA-256 of the content, hex.
    pub hash: String,
    pub outcome: WriteOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub name: String,
    pub skipped: Option<SkipReason>,
    pub outputs: Vec<OutputRecord>,
    pub failed: Vec<FileFailure>,
    pub errors: Vec<String>,
}

impl PipelineReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn skipped(name: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::new(name)
        }
    }

    pub fn written(&self) -> usize {
        self.count(WriteOutcome::Written)
    }

    pub fn unchanged(&self) -> usize {
        self.count(WriteOutcome::Unchanged)
    }

    fn count(&self, outcome: WriteOutcome) -> usize {
        self.outputs.iter().filter(|o| o.outcome == outcome).count()
    }

    pub fn is_ok(&self) -> bool {
        self.failed.is_empty() && self.errors.is_empty()
    }

    /// Record a write made through `guard`.
    fn write(
        &mut self,
        guard: &WriteGuard,
        output: &Path,
        source: &Path,
        content: &str,
    ) -> std::io::Result<()> {
        let outcome = guard.write_if_changed(output, content)?;
        self.outputs.push(OutputRecord {
            output: output.to_path_buf(),
            source: source.to_path_buf(),
            hash: hash_bytes(content.as_bytes()),
            outcome,
        });
        Ok(())
    }
}

/// SHA-256 of `bytes`, as lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Run a class's pipeline with the transformer its `compiler.module` names.
pub fn run(config: &ResolvedConfig, guard: &WriteGuard, class: AssetClass) -> PipelineReport {
    let settings = class.settings(&config.params);
    match Compiler::parse(&settings.compiler.module) {
        Compiler::Native => run_with(config, guard, class, class.native()),
        Compiler::None => skip(class, SkipReason::NoCompiler),
        Compiler::Unknown(tag) => {
            warn!(pipeline = class.name(), compiler = tag.as_str(), "unknown compiler; skipping pipeline");
            skip(class, SkipReason::UnknownCompiler(tag))
        }
    }
}

fn skip(class: AssetClass, reason: SkipReason) -> PipelineReport {
    debug!(pipeline = class.name(), reason = %reason, "pipeline skipped");
    PipelineReport::skipped(class.name(), reason)
}

/// Run a class's pipeline with an explicit transformer.
pub fn run_with(
    config: &ResolvedConfig,
    guard: &WriteGuard,
    class: AssetClass,
    transformer: &dyn Transformer,
) -> PipelineReport {
    let ctx = TransformContext::new(config, class);
    let settings = ctx.settings;

    if !settings.enable {
        return skip(class, SkipReason::Disabled);
    }
    if Compiler::parse(&settings.compiler.module) == Compiler::None {
        return skip(class, SkipReason::NoCompiler);
    }
    if !config.params.make_build_artifacts.statics() || !guard.is_enabled() {
        return skip(class, SkipReason::ArtifactsOff);
    }

    let mut report = PipelineReport::new(class.name());
    for dir in [&settings.source_path, &settings.output] {
        if let Err(e) = guard.ensure_dir(dir) {
            error!(pipeline = class.name(), dir = %dir.display(), error = %e, "cannot create directory");
            report.errors.push(format!("{}: {e}", dir.display()));
            return report;
        }
    }

    // Written before file selection so the first compiled file can use it.
    if let Some(version_file) = &settings.version_file {
        let name = if version_file.file_name.is_empty() {
            class.default_version_file()
        } else {
            version_file.file_name.as_str()
        };
        let path = settings.source_path.join(name);
        let content = format!(
            "{}\n{}",
            class.comment(GENERATED_HEADER),
            transformer.version_code(&ctx)
        );
        match guard.write_if_changed(&path, &content) {
            Ok(outcome) => debug!(file = %path.display(), ?outcome, "version file"),
            Err(e) => {
                error!(file = %path.display(), error = %e, "cannot write version file");
                report.errors.push(format!("{}: {e}", path.display()));
            }
        }
    }

    let ignore = IgnoreRules::load(config.app_dir(), &config.params.ignore_file);
    let selection = files::select_files(
        &settings.source_path,
        settings.allowlist.as_deref(),
        &settings.blocklist,
        &ignore,
        |p| class.accepts(p),
    );
    for message in &selection.errors {
        error!(pipeline = class.name(), "{message}");
    }
    report.errors.extend(selection.errors);

    let minify = config.params.minify && settings.minifier.enable;
    let results: Vec<Result<PipelineReport, FileFailure>> = selection
        .files
        .par_iter()
        .map(|file| {
            compile_file(&ctx, guard, transformer, file, minify).map_err(|e| {
                error!(file = %file.path.display(), error = %e, "failed to compile");
                FileFailure {
                    source: file.path.clone(),
                    error: e.to_string(),
                }
            })
        })
        .collect();

    for result in results {
        match result {
            Ok(partial) => report.outputs.extend(partial.outputs),
            Err(failure) => report.failed.push(failure),
        }
    }

    info!(
        pipeline = class.name(),
        written = report.written(),
        unchanged = report.unchanged(),
        failed = report.failed.len(),
        "pipeline finished"
    );
    report
}

fn compile_file(
    ctx: &TransformContext<'_>,
    guard: &WriteGuard,
    transformer: &dyn Transformer,
    file: &SourceFile,
    minify: bool,
) -> Result<PipelineReport, TransformError> {
    let settings = ctx.settings;
    let params = &ctx.config.params;
    let TransformOutput { output, source_map } = transformer.parse(ctx, &file.path)?;
    let dest = file.output_path(&settings.output, ctx.class.output_extension());

    // Minified output no longer lines up with the map.
    let (mut code, mut map) = if minify {
        (ctx.class.minify(&output), None)
    } else {
        (output, source_map)
    };
    if map.is_some() && sourcemap::map_comment(ctx.class, "").is_none() {
        debug!(file = %file.path.display(), "dropping source map: no map comment for this class");
        map = None;
    }

    let mut partial = PipelineReport::new(ctx.class.name());
    if let Some(map) = map {
        let target = sourcemap::MapTarget {
            source_dir: &settings.source_path,
            output_dir: &settings.output,
            public_folder: &params.public_folder,
            route_prefix: &params.route_prefix,
            output_file: &dest,
        };
        let map = sourcemap::rewrite(map, &target)?;
        let map_path = map_path_for(&dest);
        let map_name = map_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        code = sourcemap::attach(ctx.class, code, &map_name);
        partial.write(guard, &map_path, &file.path, &serde_json::to_string(&map)?)?;
    }
    partial.write(guard, &dest, &file.path, &code)?;
    Ok(partial)
}

/// `main.css` → `main.css.map`.
pub fn map_path_for(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".map");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, ConfigInputs};
    use serde_json::json;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records parse calls and fails on files whose name contains "broken".
    struct MockTransformer {
        parsed: Mutex<Vec<String>>,
    }

    impl MockTransformer {
        fn new() -> Self {
            Self {
                parsed: Mutex::new(Vec::new()),
            }
        }
    }

    impl Transformer for MockTransformer {
        fn version_code(&self, ctx: &TransformContext<'_>) -> String {
            format!("{}={}\n", ctx.version_var(), ctx.app_version())
        }

        fn parse(&self, _ctx: &TransformContext<'_>, path: &Path) -> Result<TransformOutput, TransformError> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            self.parsed.lock().unwrap().push(name.clone());
            if name.contains("broken") {
                return Err(TransformError::Syntax {
                    path: path.to_path_buf(),
                    message: "unexpected token".into(),
                });
            }
            Ok(TransformOutput::code(format!("/* {name} */\n{}", fs::read_to_string(path)?)))
        }
    }

    fn app(tmp: &TempDir, params: Value) -> ResolvedConfig {
        config::resolve(&ConfigInputs::new(tmp.path()).with_params(params)).unwrap()
    }

    fn write(tmp: &TempDir, rel: &str, content: &str) {
        let path = tmp.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    // =========================================================================
    // Skip conditions
    // =========================================================================

    #[test]
    fn skip_conditions_touch_nothing() {
        let tmp = TempDir::new().unwrap();
        let cases = [
            (json!({"css": {"enable": false}}), SkipReason::Disabled),
            (json!({"css": {"compiler": {"module": "none"}}}), SkipReason::NoCompiler),
            (json!({"makeBuildArtifacts": false}), SkipReason::ArtifactsOff),
        ];
        for (params, reason) in cases {
            let config = app(&tmp, params);
            let report = run_with(&config, &WriteGuard::new(true), AssetClass::Css, &MockTransformer::new());
            assert_eq!(report.skipped, Some(reason));
        }
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn unknown_compiler_skips() {
        let tmp = TempDir::new().unwrap();
        let config = app(&tmp, json!({"css": {"compiler": {"module": "stylus"}}}));
        let report = run(&config, &WriteGuard::new(true), AssetClass::Css);
        assert_eq!(report.skipped, Some(SkipReason::UnknownCompiler("stylus".into())));
    }

    #[test]
    fn compiler_tags() {
        assert_eq!(Compiler::parse("native"), Compiler::Native);
        assert_eq!(Compiler::parse("none"), Compiler::None);
        assert_eq!(Compiler::parse("sass"), Compiler::Unknown("sass".into()));
    }

    // =========================================================================
    // Runs
    // =========================================================================

    #[test]
    fn per_file_failures_do_not_stop_siblings() {
        let tmp = TempDir::new().unwrap();
        write(&tmp, "statics/css/a.css", "a{}");
        write(&tmp, "statics/css/b-broken.css", "b{");
        write(&tmp, "statics/css/c.css", "c{}");
        let config = app(&tmp, json!({"minify": false}));
        let mock = MockTransformer::new();

        let report = run_with(&config, &WriteGuard::new(true), AssetClass::Css, &mock);

        assert_eq!(mock.parsed.lock().unwrap().len(), 3);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].source.ends_with("b-broken.css"));
        assert!(report.failed[0].error.contains("unexpected token"));
        assert_eq!(report.written(), 2);
        assert_eq!(
            fs::read_to_string(tmp.path().join("public/css/c.css")).unwrap(),
            "/* c.css */\nc{}"
        );
        assert!(!tmp.path().join("public/css/b-broken.css").exists());
    }

    #[test]
    fn second_run_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        write(&tmp, "statics/css/a.css", "a{}");
        write(&tmp, "statics/css/sub/b.css", "b{}");
        let config = app(&tmp, json!({"css": {"versionFile": {}}}));
        let guard = WriteGuard::new(true);

        let first = run_with(&config, &guard, AssetClass::Css, &MockTransformer::new());
        assert_eq!(first.written(), 2);
        let second = run_with(&config, &guard, AssetClass::Css, &MockTransformer::new());
        assert_eq!(second.written(), 0);
        assert_eq!(second.unchanged(), 2);
    }

    #[test]
    fn version_file_is_written_before_parsing() {
        let tmp = TempDir::new().unwrap();
        write(&tmp, "statics/css/a.css", "a{}");
        let package = config::PackageManifest {
            version: Some("3.1.4".into()),
            ..Default::default()
        };
        let inputs = ConfigInputs::new(tmp.path())
            .with_package(package)
            .with_params(json!({"css": {"versionFile": {"varName": "build"}}}));
        let config = config::resolve(&inputs).unwrap();

        let report = run_with(&config, &WriteGuard::new(true), AssetClass::Css, &MockTransformer::new());

        let version = fs::read_to_string(tmp.path().join("statics/css/_version.css")).unwrap();
        assert_eq!(version, format!("/* {GENERATED_HEADER} */\nbuild=3.1.4\n"));
        // The partial itself is not compiled.
        assert_eq!(report.outputs.len(), 1);
    }

    #[test]
    fn missing_allowlist_entry_is_reported() {
        let tmp = TempDir::new().unwrap();
        write(&tmp, "statics/css/a.css", "a{}");
        let config = app(&tmp, json!({"css": {"allowlist": ["a.css", "missing.css"]}}));
        let report = run_with(&config, &WriteGuard::new(true), AssetClass::Css, &MockTransformer::new());
        assert_eq!(report.written(), 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("missing.css"));
    }

    #[test]
    fn minify_follows_mode() {
        let tmp = TempDir::new().unwrap();
        write(&tmp, "statics/css/a.css", "a {\n  color: red;\n}\n");
        let config = app(&tmp, json!({"minify": true}));
        run_with(&config, &WriteGuard::new(true), AssetClass::Css, &MockTransformer::new());
        assert_eq!(
            fs::read_to_string(tmp.path().join("public/css/a.css")).unwrap(),
            "a{color:red}"
        );
    }

    /// Passes sources through and always returns a one-line map.
    struct MappingTransformer;

    impl Transformer for MappingTransformer {
        fn version_code(&self, _ctx: &TransformContext<'_>) -> String {
            String::new()
        }

        fn parse(&self, _ctx: &TransformContext<'_>, path: &Path) -> Result<TransformOutput, TransformError> {
            Ok(TransformOutput {
                output: fs::read_to_string(path)?,
                source_map: Some(json!({"version": 3, "sources": ["x"], "mappings": "AAAA"})),
            })
        }
    }

    #[test]
    fn maps_are_attached_to_js_but_not_html() {
        let tmp = TempDir::new().unwrap();
        write(&tmp, "statics/js/app.js", "run();\n");
        write(&tmp, "statics/pages/index.html", "<p>hi</p>\n");
        let config = app(&tmp, json!({"minify": false}));
        let guard = WriteGuard::new(true);

        run_with(&config, &guard, AssetClass::Js, &MappingTransformer);
        let html = run_with(&config, &guard, AssetClass::Html, &MappingTransformer);

        assert_eq!(
            fs::read_to_string(tmp.path().join("public/js/app.js")).unwrap(),
            "run();\n//# sourceMappingURL=app.js.map\n"
        );
        assert!(tmp.path().join("public/js/app.js.map").is_file());
        assert_eq!(html.outputs.len(), 1);
        assert_eq!(
            fs::read_to_string(tmp.path().join("public/index.html")).unwrap(),
            "<p>hi</p>\n"
        );
        assert!(!tmp.path().join("public/index.html.map").exists());
    }

    #[test]
    fn map_path_appends_suffix() {
        assert_eq!(map_path_for(Path::new("/p/css/a.css")), PathBuf::from("/p/css/a.css.map"));
    }
}
