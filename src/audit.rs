//! Read-only audit of an app's persisted configuration.
//!
//! Checks `trellis.json` and `[package.metadata.trellis]` against the schema
//! and the package's companion scripts against `requiredScripts`. Nothing is
//! modified; findings come back as an [`AuditReport`].
//!
//! | Code | Severity | Meaning |
//! |------|----------|---------|
//! | `extra-param` | warning | Key the schema does not know |
//! | `renamed-param` | warning | Key that was renamed; the old name is ignored |
//! | `wrong-type` | error | Value of a JSON type the param does not accept |
//! | `missing-script` | warning | Required companion script absent |
//! | `outdated-script` | warning | Companion script runs a different command |
//! | `invalid-config-file` | error | File could not be read or parsed |
//!
//! Object params (`compiler.options` and friends) are opaque: their contents
//! are never reported.

use crate::config::merge::{get_path, is_template, merge_json};
use crate::config::schema::{Schema, SchemaNode, ValueKind, join_path};
use crate::config::sources::{self, CONFIG_FILENAME, PackageManifest};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Old param paths and the names that replaced them.
const RENAMED: &[(&str, &str)] = &[
    ("generateFolderStructure", "makeBuildArtifacts"),
    ("port", "http.port"),
    ("httpsPort", "https.port"),
    ("css.whitelist", "css.allowlist"),
    ("css.blacklist", "css.blocklist"),
    ("js.whitelist", "js.allowlist"),
    ("js.blacklist", "js.blocklist"),
    ("html.whitelist", "html.allowlist"),
    ("html.blacklist", "html.blocklist"),
    ("clientViews.whitelist", "clientViews.allowlist"),
    ("clientViews.blacklist", "clientViews.blocklist"),
    ("clientControllers.whitelist", "clientControllers.allowlist"),
    ("clientControllers.blacklist", "clientControllers.blocklist"),
];

/// Label for the manifest's config table in reports.
pub const MANIFEST_SOURCE: &str = "Cargo.toml [package.metadata.trellis]";
const SCRIPTS_SOURCE: &str = "Cargo.toml [package.metadata.scripts]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    ExtraParam,
    RenamedParam,
    WrongType,
    MissingScript,
    OutdatedScript,
    InvalidConfigFile,
}

impl IssueKind {
    pub fn code(&self) -> &'static str {
        match self {
            IssueKind::ExtraParam => "extra-param",
            IssueKind::RenamedParam => "renamed-param",
            IssueKind::WrongType => "wrong-type",
            IssueKind::MissingScript => "missing-script",
            IssueKind::OutdatedScript => "outdated-script",
            IssueKind::InvalidConfigFile => "invalid-config-file",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            IssueKind::WrongType | IssueKind::InvalidConfigFile => Severity::Error,
            _ => Severity::Warning,
        }
    }
}

/// One finding.
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub kind: IssueKind,
    /// The file (or table) the finding is in.
    pub source: String,
    /// Dotted path of the offending key, or the script name.
    pub path: String,
    pub message: String,
    pub help: Option<String>,
}

impl Issue {
    pub fn new(
        kind: IssueKind,
        source: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            source: source.into(),
            path: path.into(),
            message: message.into(),
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

/// Collected findings.
#[derive(Debug, Clone, Default)]
pub struct AuditReport {
    issues: Vec<Issue>,
}

impl AuditReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    pub fn merge(&mut self, other: AuditReport) {
        self.issues.extend(other.issues);
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.kind.severity() == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.len() - self.error_count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter()
    }

    /// Issues at one dotted path.
    pub fn at(&self, path: &str) -> Vec<&Issue> {
        self.issues.iter().filter(|i| i.path == path).collect()
    }
}

/// Audit a config tree from `source` against the schema.
pub fn audit_tree(tree: &Value, schema: &Schema, source: &str) -> AuditReport {
    let mut report = AuditReport::new();
    match tree {
        Value::Object(map) => walk(map, schema.nodes(), "", source, &mut report),
        other => report.push(Issue::new(
            IssueKind::InvalidConfigFile,
            source,
            "",
            format!("expected an object at the top level, found {}", ValueKind::of(other)),
        )),
    }
    report
}

fn walk(
    user: &serde_json::Map<String, Value>,
    schema: &BTreeMap<String, SchemaNode>,
    prefix: &str,
    source: &str,
    report: &mut AuditReport,
) {
    for (key, value) in user {
        let dotted = join_path(prefix, key);
        match schema.get(key) {
            None => report.push(unknown_key(&dotted, key, prefix, source)),
            Some(SchemaNode::Leaf(leaf)) => {
                if !leaf.accepts(value) && !is_template(value) {
                    report.push(
                        Issue::new(
                            IssueKind::WrongType,
                            source,
                            &dotted,
                            format!(
                                "\"{dotted}\" should be {}, found {}",
                                leaf.kinds_label(),
                                ValueKind::of(value)
                            ),
                        )
                        .with_help(format!("default: {}", leaf.default)),
                    );
                }
            }
            Some(SchemaNode::Branch(children)) => match value {
                Value::Object(map) => walk(map, children, &dotted, source, report),
                other => report.push(Issue::new(
                    IssueKind::WrongType,
                    source,
                    &dotted,
                    format!("\"{dotted}\" should be object, found {}", ValueKind::of(other)),
                )),
            },
        }
    }
}

fn unknown_key(dotted: &str, key: &str, parent: &str, source: &str) -> Issue {
    if let Some((_, new)) = RENAMED.iter().find(|(old, _)| *old == dotted) {
        return Issue::new(
            IssueKind::RenamedParam,
            source,
            dotted,
            format!("\"{dotted}\" has been renamed to \"{new}\""),
        )
        .with_help(format!("rename the key to \"{new}\"; the old name is ignored"));
    }
    let location = if parent.is_empty() {
        "the root config".to_string()
    } else {
        format!("\"{parent}\"")
    };
    Issue::new(
        IssueKind::ExtraParam,
        source,
        dotted,
        format!("extra param \"{key}\" found in {location}"),
    )
    .with_help("remove it, or check the spelling against the documented params")
}

/// Check the package's scripts against the required ones.
///
/// A script counts as current when its command contains the required one
/// (`RUST_LOG=debug trellis audit` satisfies `trellis audit`).
pub fn audit_scripts(
    scripts: &BTreeMap<String, String>,
    required: &BTreeMap<String, String>,
) -> AuditReport {
    let mut report = AuditReport::new();
    for (name, expected) in required {
        match scripts.get(name) {
            None => report.push(
                Issue::new(
                    IssueKind::MissingScript,
                    SCRIPTS_SOURCE,
                    name,
                    format!("missing script \"{name}\""),
                )
                .with_help(format!("add: {name} = \"{expected}\"")),
            ),
            Some(found) if !found.contains(expected.as_str()) => report.push(
                Issue::new(
                    IssueKind::OutdatedScript,
                    SCRIPTS_SOURCE,
                    name,
                    format!("script \"{name}\" runs \"{found}\""),
                )
                .with_help(format!("expected it to run \"{expected}\"")),
            ),
            Some(_) => {}
        }
    }
    report
}

/// Audit an app directory: its config file, its manifest config table, and
/// its companion scripts.
pub fn audit_app(app_dir: &Path) -> AuditReport {
    audit_app_with(app_dir, &Schema::app())
}

pub fn audit_app_with(app_dir: &Path, schema: &Schema) -> AuditReport {
    let mut report = AuditReport::new();

    let manifest = match PackageManifest::read(app_dir) {
        Ok(manifest) => manifest,
        Err(e) => {
            report.push(Issue::new(
                IssueKind::InvalidConfigFile,
                sources::MANIFEST_FILENAME,
                "",
                e.to_string(),
            ));
            None
        }
    };
    let config_file = match sources::read_config_file(app_dir) {
        Ok(value) => value,
        Err(e) => {
            report.push(Issue::new(IssueKind::InvalidConfigFile, CONFIG_FILENAME, "", e.to_string()));
            None
        }
    };

    let package_config = manifest.as_ref().and_then(|m| m.config.as_ref());
    if let Some(tree) = package_config {
        report.merge(audit_tree(tree, schema, MANIFEST_SOURCE));
    }
    if let Some(tree) = &config_file {
        report.merge(audit_tree(tree, schema, CONFIG_FILENAME));
    }

    if let Some(manifest) = &manifest {
        let required = required_scripts(schema, package_config, config_file.as_ref());
        report.merge(audit_scripts(&manifest.scripts, &required));
    }

    debug!(app = %app_dir.display(), issues = report.len(), "audit finished");
    report
}

/// `requiredScripts` as configured: schema default, then the manifest table,
/// then the config file.
fn required_scripts(
    schema: &Schema,
    package: Option<&Value>,
    file: Option<&Value>,
) -> BTreeMap<String, String> {
    let default = schema
        .leaf("requiredScripts")
        .map(|l| l.default.clone())
        .unwrap_or(Value::Null);
    let merged = [package, file]
        .into_iter()
        .flatten()
        .filter_map(|tree| get_path(tree, "requiredScripts"))
        .filter(|v| v.is_object())
        .fold(default, |acc, v| merge_json(acc, v.clone()));
    merged
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn audit(tree: Value) -> AuditReport {
        audit_tree(&tree, &Schema::app(), CONFIG_FILENAME)
    }

    // =========================================================================
    // Tree checks
    // =========================================================================

    #[test]
    fn clean_config_has_no_issues() {
        let report = audit(json!({
            "http": {"port": 8080},
            "css": {"compiler": {"options": {"anything": {"goes": [1]}}}},
            "js": {"allowlist": null},
        }));
        assert!(report.is_clean(), "{:?}", report);
    }

    #[test]
    fn extra_params_at_root_and_nested_are_distinct() {
        let report = audit(json!({"extraParam": true, "css": {"extraParam": true}}));
        assert_eq!(report.len(), 2);
        let root = report.at("extraParam");
        let nested = report.at("css.extraParam");
        assert_eq!(root.len(), 1);
        assert_eq!(nested.len(), 1);
        assert_eq!(root[0].kind, IssueKind::ExtraParam);
        assert!(root[0].message.contains("root config"));
        assert!(nested[0].message.contains("\"css\""));
    }

    #[test]
    fn renamed_params_are_called_out() {
        let report = audit(json!({"generateFolderStructure": true, "css": {"whitelist": []}}));
        assert_eq!(report.len(), 2);
        let issue = &report.at("css.whitelist")[0];
        assert_eq!(issue.kind, IssueKind::RenamedParam);
        assert!(issue.message.contains("css.allowlist"));
    }

    #[test]
    fn wrong_types_are_errors() {
        let report = audit(json!({"minify": "yes", "http": 80}));
        assert_eq!(report.error_count(), 2);
        assert_eq!(report.at("minify")[0].kind, IssueKind::WrongType);
        assert!(report.at("http")[0].message.contains("object"));
    }

    #[test]
    fn templates_are_not_type_errors() {
        assert!(audit(json!({"https": {"port": "${http.port + 1}"}})).is_clean());
    }

    #[test]
    fn object_leaves_are_opaque() {
        let report = audit(json!({"requiredScripts": {"custom": "x"}, "clientViews": {"allowlist": {"a.js": ["b"]}}}));
        assert!(report.is_clean());
    }

    #[test]
    fn non_object_root_is_invalid() {
        let report = audit(json!([1]));
        assert_eq!(report.iter().next().unwrap().kind, IssueKind::InvalidConfigFile);
    }

    // =========================================================================
    // Scripts
    // =========================================================================

    #[test]
    fn script_checks() {
        let required: BTreeMap<String, String> = [
            ("audit".to_string(), "trellis audit".to_string()),
            ("build".to_string(), "trellis build".to_string()),
            ("serve".to_string(), "trellis serve".to_string()),
        ]
        .into();
        let scripts: BTreeMap<String, String> = [
            ("audit".to_string(), "RUST_LOG=debug trellis audit".to_string()),
            ("build".to_string(), "old-tool build".to_string()),
        ]
        .into();
        let report = audit_scripts(&scripts, &required);
        assert_eq!(report.len(), 2);
        assert_eq!(report.at("build")[0].kind, IssueKind::OutdatedScript);
        assert_eq!(report.at("serve")[0].kind, IssueKind::MissingScript);
    }

    // =========================================================================
    // App directory
    // =========================================================================

    #[test]
    fn audit_app_reads_both_sources() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("Cargo.toml"),
            r#"
[package]
name = "shop"

[package.metadata.trellis]
bogus = 1

[package.metadata.scripts]
audit = "trellis audit"
"#,
        )
        .unwrap();
        fs::write(tmp.path().join(CONFIG_FILENAME), r#"{"css": {"bogus": 2}}"#).unwrap();

        let report = audit_app(tmp.path());
        assert_eq!(report.len(), 2, "{:?}", report);
        assert_eq!(report.at("bogus")[0].source, MANIFEST_SOURCE);
        assert_eq!(report.at("css.bogus")[0].source, CONFIG_FILENAME);
    }

    #[test]
    fn audit_app_reports_missing_default_script() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("Cargo.toml"), "[package]\nname = \"shop\"\n").unwrap();
        let report = audit_app(tmp.path());
        assert_eq!(report.len(), 1);
        assert_eq!(report.at("audit")[0].kind, IssueKind::MissingScript);
    }

    #[test]
    fn audit_app_reports_unparsable_config() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILENAME), "{ nope").unwrap();
        let report = audit_app(tmp.path());
        assert_eq!(report.len(), 1);
        let issue = report.iter().next().unwrap();
        assert_eq!(issue.kind, IssueKind::InvalidConfigFile);
        assert_eq!(issue.source, CONFIG_FILENAME);
    }

    #[test]
    fn audit_app_without_files_is_clean() {
        let tmp = TempDir::new().unwrap();
        assert!(audit_app(tmp.path()).is_clean());
    }

    #[test]
    fn fixture_app_is_clean() {
        let tmp = crate::test_helpers::setup_fixtures();
        let report = audit_app(tmp.path());
        assert!(report.is_clean(), "{:?}", report.iter().collect::<Vec<_>>());
    }

    #[test]
    fn fixture_app_with_stray_key() {
        let tmp = crate::test_helpers::setup_fixtures();
        let mut config: Value =
            serde_json::from_str(&crate::test_helpers::read_file(tmp.path(), CONFIG_FILENAME)).unwrap();
        config["css"]["extraParam"] = json!(true);
        fs::write(tmp.path().join(CONFIG_FILENAME), config.to_string()).unwrap();

        let report = audit_app(tmp.path());
        assert_eq!(report.len(), 1);
        assert_eq!(report.at("css.extraParam")[0].kind, IssueKind::ExtraParam);
    }
}
