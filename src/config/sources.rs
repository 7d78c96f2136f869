//! Loading the file-backed config sources of an app directory.
//!
//! ```text
//! <app>/
//! ├── trellis.json     ← sidecar config file (optional)
//! └── Cargo.toml       ← [package] name/version,
//!                        [package.metadata.trellis] config,
//!                        [package.metadata.scripts] companion scripts
//! ```
//!
//! The strict readers return errors so the auditor can report them. The
//! resilient ones used during resolution log a warning and carry on as if
//! the file were empty.

use super::ConfigError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const CONFIG_FILENAME: &str = "trellis.json";
pub const MANIFEST_FILENAME: &str = "Cargo.toml";

/// What the package manifest contributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageManifest {
    pub name: Option<String>,
    pub version: Option<String>,
    /// `[package.metadata.trellis]`, converted to JSON.
    pub config: Option<Value>,
    /// `[package.metadata.scripts]`: companion script name → command line.
    pub scripts: BTreeMap<String, String>,
}

impl PackageManifest {
    /// Parse manifest text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let doc: toml::Table = toml::from_str(content)?;
        let Some(package) = doc.get("package").and_then(toml::Value::as_table) else {
            return Ok(Self::default());
        };
        let text = |key: &str| package.get(key).and_then(toml::Value::as_str).map(String::from);
        let metadata = package.get("metadata").and_then(toml::Value::as_table);

        let config = metadata
            .and_then(|m| m.get("trellis"))
            .map(serde_json::to_value)
            .transpose()?;

        let scripts = metadata
            .and_then(|m| m.get("scripts"))
            .and_then(toml::Value::as_table)
            .map(|table| {
                table
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|cmd| (k.clone(), cmd.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            name: text("name"),
            version: text("version"),
            config,
            scripts,
        })
    }

    /// Read `<app_dir>/Cargo.toml`. A missing manifest is `Ok(None)`.
    pub fn read(app_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let path = app_dir.join(MANIFEST_FILENAME);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Self::parse(&content).map(Some)
    }

    /// Like [`read`](Self::read), but an unreadable manifest is logged and
    /// treated as empty.
    pub fn load(app_dir: &Path) -> Self {
        match Self::read(app_dir) {
            Ok(manifest) => manifest.unwrap_or_default(),
            Err(e) => {
                warn!(file = MANIFEST_FILENAME, error = %e, "ignoring unreadable package manifest");
                Self::default()
            }
        }
    }
}

/// Read `<app_dir>/trellis.json`. A missing file is `Ok(None)`; a file that
/// is not a JSON object is an error.
pub fn read_config_file(app_dir: &Path) -> Result<Option<Value>, ConfigError> {
    let path = app_dir.join(CONFIG_FILENAME);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    let value: Value = serde_json::from_str(&content)?;
    if !value.is_object() {
        return Err(ConfigError::Validation(format!(
            "{CONFIG_FILENAME} must contain a JSON object"
        )));
    }
    Ok(Some(value))
}

/// Like [`read_config_file`], but a broken file is logged and skipped.
pub fn load_config_file(app_dir: &Path) -> Option<Value> {
    read_config_file(app_dir).unwrap_or_else(|e| {
        warn!(file = CONFIG_FILENAME, error = %e, "ignoring unreadable config file");
        None
    })
}

/// Everything resolution reads, gathered up front so it can run without
/// touching the process environment.
#[derive(Debug, Clone)]
pub struct ConfigInputs {
    pub app_dir: PathBuf,
    /// Raw command-line tokens (after the program name).
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Params supplied by the embedding application.
    pub constructor: Value,
    pub config_file: Option<Value>,
    pub package: PackageManifest,
}

impl ConfigInputs {
    /// Inputs with nothing but an app directory: every param takes its default.
    pub fn new(app_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_dir: app_dir.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            constructor: Value::Object(Map::new()),
            config_file: None,
            package: PackageManifest::default(),
        }
    }

    /// Read the app directory's config file and manifest and capture the
    /// process environment.
    pub fn load(app_dir: impl Into<PathBuf>) -> Self {
        let app_dir = app_dir.into();
        let config_file = load_config_file(&app_dir);
        let package = PackageManifest::load(&app_dir);
        Self {
            config_file,
            package,
            env: std::env::vars().collect(),
            ..Self::new(app_dir)
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.constructor = params;
        self
    }

    pub fn with_config_file(mut self, config: Value) -> Self {
        self.config_file = Some(config);
        self
    }

    pub fn with_package(mut self, package: PackageManifest) -> Self {
        self.package = package;
        self
    }
}
