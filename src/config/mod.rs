//! Configuration resolution.
//!
//! Params come from five sources plus the schema defaults, highest priority
//! first:
//!
//! 1. Command-line flags (`--dev`, `--http-port 8080`, `-dha`)
//! 2. Environment variables (`TRELLIS_ENV`, `HTTP_PORT`, ...)
//! 3. Params passed by the embedding application
//! 4. `<app>/trellis.json`
//! 5. `[package.metadata.trellis]` in `<app>/Cargo.toml`
//!
//! ## Phases
//!
//! ```text
//! merge → derive → templates ×3 → reconcile types → derive → typed AppConfig
//! ```
//!
//! - **merge**: per-leaf precedence, see [`merge`].
//! - **derive**: mode, build-artifact switch, route prefix, ports, absolute
//!   paths, and the overrides each mode forces. See [`derive`].
//! - **templates**: `${...}` expansion, see [`template`].
//! - **reconcile**: every leaf back to a kind the schema accepts.
//!
//! The result is a [`ResolvedConfig`], built once and shared read-only
//! (usually behind an `Arc`) by every component.
//!
//! ## Example `trellis.json`
//!
//! ```json
//! {
//!   "routePrefix": "/shop",
//!   "http": { "port": 8080 },
//!   "https": { "port": "${http.port + 1}" },
//!   "css": { "versionFile": { "fileName": "_version.css", "varName": "appVersion" } },
//!   "clientViews": { "enable": true, "exposeAll": true }
//! }
//! ```

pub mod derive;
pub mod flags;
pub mod merge;
pub mod schema;
pub mod sources;
pub mod template;

pub use schema::Schema;
pub use sources::{ConfigInputs, PackageManifest};

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Operating mode. Each mode forces a few params regardless of configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Development,
    #[default]
    Production,
    ProductionProxy,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "development" => Some(Mode::Development),
            "production" => Some(Mode::Production),
            "production-proxy" => Some(Mode::ProductionProxy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
            Mode::ProductionProxy => "production-proxy",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tri-state `makeBuildArtifacts` switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "Value")]
pub enum BuildArtifacts {
    /// Write nothing to disk.
    Off,
    /// Write compiled statics, but never scaffold the MVC folders.
    StaticsOnly,
    #[default]
    On,
}

impl BuildArtifacts {
    /// Whether static asset outputs may be written.
    pub fn statics(&self) -> bool {
        !matches!(self, BuildArtifacts::Off)
    }

    /// Whether the app folder structure may be created.
    pub fn scaffold(&self) -> bool {
        matches!(self, BuildArtifacts::On)
    }
}

impl TryFrom<Value> for BuildArtifacts {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(true) => Ok(BuildArtifacts::On),
            Value::Bool(false) => Ok(BuildArtifacts::Off),
            Value::String(s) if s == "staticsOnly" => Ok(BuildArtifacts::StaticsOnly),
            other => Err(format!("invalid makeBuildArtifacts value: {other}")),
        }
    }
}

/// Typed view of the resolved parameter tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub mode: Mode,
    pub minify: bool,
    pub make_build_artifacts: BuildArtifacts,
    pub host_public: bool,
    pub localhost_only: bool,
    pub route_prefix: String,
    /// Milliseconds.
    pub shutdown_timeout: u64,
    pub max_build_threads: Option<usize>,
    pub ignore_file: PathBuf,
    pub statics_root: PathBuf,
    pub public_folder: PathBuf,
    pub build_folder: PathBuf,
    pub controllers_path: PathBuf,
    pub models_path: PathBuf,
    pub views_path: PathBuf,
    pub http: HttpConfig,
    pub https: HttpsConfig,
    pub html_validator: ValidatorConfig,
    pub css: AssetConfig,
    pub js: JsConfig,
    pub html: AssetConfig,
    pub client_views: BundlerConfig,
    pub client_controllers: BundlerConfig,
    pub symlinks: Vec<SymlinkConfig>,
    pub required_scripts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub enable: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpsConfig {
    pub enable: bool,
    pub force: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorConfig {
    pub enable: bool,
    pub port: u16,
    pub separate_process: SeparateProcessConfig,
    pub exceptions: ValidatorExceptions,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeparateProcessConfig {
    pub enable: bool,
    pub auto_killer: bool,
    pub auto_killer_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorExceptions {
    pub request_header: String,
    pub model_value: String,
}

/// Settings shared by the CSS, JS and HTML pipelines.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetConfig {
    pub enable: bool,
    pub source_path: PathBuf,
    pub output: PathBuf,
    pub compiler: CompilerConfig,
    pub minifier: MinifierConfig,
    /// `None` means scan the whole source directory.
    pub allowlist: Option<Vec<String>>,
    pub blocklist: Vec<String>,
    #[serde(default)]
    pub version_file: Option<VersionFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsConfig {
    #[serde(flatten)]
    pub assets: AssetConfig,
    pub bundler: ScriptBundlerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompilerConfig {
    /// Transformer tag: `"native"`, `"none"`, or an unknown name.
    pub module: String,
    /// Passed through to the transformer untouched.
    pub options: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinifierConfig {
    pub enable: bool,
    pub options: Value,
}

/// A generated file exposing the app version to client code.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VersionFile {
    /// Relative to the pipeline's source directory. Empty picks a default.
    pub file_name: String,
    pub var_name: String,
}

/// `js.bundler`: named bundles of script sources.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptBundlerConfig {
    pub enable: bool,
    pub bundles: BTreeMap<String, Vec<String>>,
    pub output: PathBuf,
}

/// `clientViews` / `clientControllers`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundlerConfig {
    pub enable: bool,
    /// Bundle name → files (or globs) in it.
    pub allowlist: BTreeMap<String, Vec<String>>,
    pub blocklist: Vec<String>,
    pub expose_all: bool,
    pub default_bundle: String,
    pub minify: bool,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SymlinkConfig {
    pub source: PathBuf,
    pub dest: PathBuf,
}

/// The fully resolved configuration.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub app_dir: PathBuf,
    pub app_name: String,
    pub app_version: String,
    pub params: AppConfig,
    tree: Value,
}

impl ResolvedConfig {
    pub fn mode(&self) -> Mode {
        self.params.mode
    }

    /// The resolved parameter tree, as JSON.
    pub fn tree(&self) -> &Value {
        &self.tree
    }

    /// Look up a raw param by dotted path.
    pub fn get(&self, dotted: &str) -> Option<&Value> {
        merge::get_path(&self.tree, dotted)
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }
}

/// Worker threads for per-file compilation: `maxBuildThreads` capped at the
/// core count, or all cores when unset.
pub fn effective_threads(params: &AppConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    params
        .max_build_threads
        .filter(|n| *n > 0)
        .map(|n| n.min(cores))
        .unwrap_or(cores)
}

/// Resolve the framework schema against `inputs`.
pub fn resolve(inputs: &ConfigInputs) -> Result<ResolvedConfig, ConfigError> {
    resolve_with(&Schema::app(), inputs)
}

/// Resolve an arbitrary schema. The typed [`AppConfig`] requires the
/// framework schema's shape.
pub fn resolve_with(schema: &Schema, inputs: &ConfigInputs) -> Result<ResolvedConfig, ConfigError> {
    let tree = resolve_tree(schema, inputs);
    let params: AppConfig = serde_json::from_value(tree.clone())?;
    let app_name = inputs
        .package
        .name
        .clone()
        .or_else(|| {
            inputs
                .app_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "app".to_string());
    let app_version = inputs
        .package
        .version
        .clone()
        .unwrap_or_else(|| "0.0.0".to_string());
    debug!(app = app_name.as_str(), mode = %params.mode, "config resolved");
    Ok(ResolvedConfig {
        app_dir: inputs.app_dir.clone(),
        app_name,
        app_version,
        params,
        tree,
    })
}

/// Run every phase up to, but not including, typed deserialisation.
pub fn resolve_tree(schema: &Schema, inputs: &ConfigInputs) -> Value {
    let layers = merge::Layers {
        cli: flags::parse_args(&inputs.args, schema),
        env: flags::read_env(schema, |key| inputs.env.get(key).cloned()),
        constructor: Some(&inputs.constructor),
        config_file: inputs.config_file.as_ref(),
        package: inputs.package.config.as_ref(),
    };
    let mut tree = merge::merge_layers(schema, &layers);
    derive::derive_before_templates(&mut tree, &inputs.app_dir);
    template::resolve_templates(&mut tree, Some(&inputs.app_dir));
    merge::reconcile(schema, &mut tree);
    derive::derive(&mut tree, &inputs.app_dir);
    tree
}
