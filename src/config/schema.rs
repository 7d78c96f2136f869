//! Parameter schema: the shape, defaults, and sources of every config leaf.
//!
//! The schema is a tree mirroring the final configuration. Branches are plain
//! maps; leaves carry a default value, the JSON types they accept, the
//! environment variables consulted for them (in order), and the command-line
//! flags that can set them.
//!
//! ```text
//! css                         ← branch
//! ├── enable       = true     ← leaf (boolean)
//! ├── sourcePath   = "css"    ← leaf (string, resolved against staticsRoot)
//! └── compiler                ← branch
//!     ├── module   = "native"
//!     └── options  = {}       ← object leaf: merged key-by-key, never audited
//! ```
//!
//! [`Schema::app`] is the schema the framework runs with. Tests build small
//! ad-hoc schemas through the same builder API.

use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;

/// JSON value kinds a leaf may accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "boolean",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        };
        f.write_str(name)
    }
}

/// What a command-line flag does to its leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagAction {
    /// The flag alone sets the leaf to a fixed value (`--dev` → `"development"`).
    Set(Value),
    /// The flag consumes a value: `--http-port 8080` or `--http-port=8080`.
    TakesValue,
}

/// A family of spellings sharing one action.
#[derive(Debug, Clone, PartialEq)]
pub struct CliFlag {
    pub spellings: Vec<&'static str>,
    pub action: FlagAction,
}

/// A schema leaf.
#[derive(Debug, Clone)]
pub struct Leaf {
    pub default: Value,
    /// Acceptable JSON kinds. Inferred from the default unless declared.
    pub kinds: Vec<ValueKind>,
    /// Environment variables checked in order; the first one set wins.
    pub env: Vec<&'static str>,
    /// Flags that set this leaf. All flags of one leaf are mutually exclusive.
    pub flags: Vec<CliFlag>,
}

impl Leaf {
    pub fn new(default: Value) -> Self {
        let kinds = vec![ValueKind::of(&default)];
        Self {
            default,
            kinds,
            env: Vec::new(),
            flags: Vec::new(),
        }
    }

    /// Override the accepted kinds (e.g. `allowlist` is an array or null).
    pub fn kinds(mut self, kinds: &[ValueKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    pub fn env(mut self, vars: &[&'static str]) -> Self {
        self.env.extend_from_slice(vars);
        self
    }

    pub fn flag(mut self, spellings: &[&'static str], value: Value) -> Self {
        self.flags.push(CliFlag {
            spellings: spellings.to_vec(),
            action: FlagAction::Set(value),
        });
        self
    }

    pub fn value_flag(mut self, spellings: &[&'static str]) -> Self {
        self.flags.push(CliFlag {
            spellings: spellings.to_vec(),
            action: FlagAction::TakesValue,
        });
        self
    }

    pub fn accepts(&self, value: &Value) -> bool {
        self.kinds.contains(&ValueKind::of(value))
    }

    /// Object leaves are opaque pass-through bags merged key-by-key.
    pub fn is_object(&self) -> bool {
        self.kinds == [ValueKind::Object]
    }

    /// Describe accepted kinds for messages: `"array or null"`.
    pub fn kinds_label(&self) -> String {
        self.kinds
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

#[derive(Debug, Clone)]
pub enum SchemaNode {
    Leaf(Leaf),
    Branch(BTreeMap<String, SchemaNode>),
}

impl From<Leaf> for SchemaNode {
    fn from(leaf: Leaf) -> Self {
        SchemaNode::Leaf(leaf)
    }
}

/// Build a branch node from `(key, node)` pairs.
pub fn branch<const N: usize>(entries: [(&str, SchemaNode); N]) -> SchemaNode {
    SchemaNode::Branch(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}

/// Shorthand for a leaf whose kinds are inferred from its default.
pub fn leaf(default: Value) -> SchemaNode {
    SchemaNode::Leaf(Leaf::new(default))
}

/// The full parameter schema.
#[derive(Debug, Clone)]
pub struct Schema {
    root: BTreeMap<String, SchemaNode>,
}

impl Schema {
    pub fn new(root: SchemaNode) -> Self {
        match root {
            SchemaNode::Branch(map) => Self { root: map },
            SchemaNode::Leaf(_) => Self {
                root: BTreeMap::new(),
            },
        }
    }

    /// Top-level nodes, keyed by parameter name.
    pub fn nodes(&self) -> &BTreeMap<String, SchemaNode> {
        &self.root
    }

    /// Every leaf with its dotted path, in sorted depth-first order.
    pub fn leaves(&self) -> Vec<(String, &Leaf)> {
        let mut out = Vec::new();
        collect_leaves(&self.root, "", &mut out);
        out
    }

    /// Look up a node by dotted path (`"css.compiler.module"`).
    pub fn node(&self, dotted: &str) -> Option<&SchemaNode> {
        let mut parts = dotted.split('.');
        let mut node = self.root.get(parts.next()?)?;
        for part in parts {
            match node {
                SchemaNode::Branch(children) => node = children.get(part)?,
                SchemaNode::Leaf(_) => return None,
            }
        }
        Some(node)
    }

    pub fn leaf(&self, dotted: &str) -> Option<&Leaf> {
        match self.node(dotted)? {
            SchemaNode::Leaf(leaf) => Some(leaf),
            SchemaNode::Branch(_) => None,
        }
    }

    /// The tree of defaults, shaped like the final configuration.
    pub fn defaults(&self) -> Value {
        Value::Object(defaults_of(&self.root))
    }

    /// The schema the framework runs with.
    pub fn app() -> Self {
        let path = |p: &str| leaf(json!(p));
        let list_or_null = || -> SchemaNode {
            Leaf::new(Value::Null)
                .kinds(&[ValueKind::Array, ValueKind::Null])
                .into()
        };
        let version_file = || -> SchemaNode {
            Leaf::new(Value::Null)
                .kinds(&[ValueKind::Object, ValueKind::Null])
                .into()
        };

        Self::new(branch([
            (
                "mode",
                Leaf::new(json!("production"))
                    .env(&["TRELLIS_ENV", "APP_ENV"])
                    .flag(&["--dev", "--development", "-d"], json!("development"))
                    .flag(&["--prod", "--production", "-p"], json!("production"))
                    .flag(
                        &["--production-proxy", "--prod-proxy", "-x"],
                        json!("production-proxy"),
                    )
                    .into(),
            ),
            ("minify", leaf(json!(true))),
            (
                "makeBuildArtifacts",
                Leaf::new(json!(true))
                    .kinds(&[ValueKind::Bool, ValueKind::String])
                    .env(&["TRELLIS_BUILD_ARTIFACTS"])
                    .flag(&["--build-artifacts"], json!(true))
                    .flag(&["--no-build-artifacts"], json!(false))
                    .flag(&["--statics-only"], json!("staticsOnly"))
                    .into(),
            ),
            (
                "hostPublic",
                Leaf::new(json!(false))
                    .flag(&["--host-public", "--public", "-h"], json!(true))
                    .into(),
            ),
            ("localhostOnly", leaf(json!(true))),
            ("routePrefix", leaf(json!(""))),
            ("shutdownTimeout", leaf(json!(30000))),
            (
                "maxBuildThreads",
                Leaf::new(Value::Null)
                    .kinds(&[ValueKind::Number, ValueKind::Null])
                    .env(&["TRELLIS_BUILD_THREADS"])
                    .value_flag(&["--max-build-threads", "--threads"])
                    .into(),
            ),
            ("ignoreFile", path(".gitignore")),
            ("staticsRoot", path("statics")),
            ("publicFolder", path("public")),
            ("buildFolder", path(".build")),
            ("controllersPath", path("mvc/controllers")),
            ("modelsPath", path("mvc/models")),
            ("viewsPath", path("mvc/views")),
            (
                "http",
                branch([
                    ("enable", leaf(json!(true))),
                    (
                        "port",
                        Leaf::new(json!(43711))
                            .env(&["HTTP_PORT", "TRELLIS_HTTP_PORT"])
                            .value_flag(&["--http-port"])
                            .into(),
                    ),
                ]),
            ),
            (
                "https",
                branch([
                    ("enable", leaf(json!(false))),
                    ("force", leaf(json!(false))),
                    (
                        "port",
                        Leaf::new(json!(43733))
                            .env(&["HTTPS_PORT", "TRELLIS_HTTPS_PORT"])
                            .value_flag(&["--https-port"])
                            .into(),
                    ),
                ]),
            ),
            (
                "htmlValidator",
                branch([
                    (
                        "enable",
                        Leaf::new(json!(false))
                            .flag(&["--enable-validator", "--html-validator", "-e"], json!(true))
                            .flag(&["--disable-validator", "--no-validator", "-n"], json!(false))
                            .into(),
                    ),
                    ("port", leaf(json!(48888))),
                    (
                        "separateProcess",
                        branch([
                            (
                                "enable",
                                Leaf::new(json!(true))
                                    .flag(&["--attach-validator", "-a"], json!(false))
                                    .flag(
                                        &["--detach-validator", "--background-validator", "-b"],
                                        json!(true),
                                    )
                                    .into(),
                            ),
                            ("autoKiller", leaf(json!(true))),
                            ("autoKillerTimeout", leaf(json!(3_600_000))),
                        ]),
                    ),
                    (
                        "exceptions",
                        branch([
                            ("requestHeader", leaf(json!("Partial"))),
                            ("modelValue", leaf(json!("_disableValidator"))),
                        ]),
                    ),
                ]),
            ),
            (
                "css",
                branch([
                    ("enable", leaf(json!(true))),
                    ("sourcePath", path("css")),
                    ("output", path("css")),
                    (
                        "compiler",
                        branch([("module", leaf(json!("native"))), ("options", leaf(json!({})))]),
                    ),
                    (
                        "minifier",
                        branch([("enable", leaf(json!(true))), ("options", leaf(json!({})))]),
                    ),
                    ("allowlist", list_or_null()),
                    ("blocklist", leaf(json!([]))),
                    ("versionFile", version_file()),
                ]),
            ),
            (
                "js",
                branch([
                    ("enable", leaf(json!(true))),
                    ("sourcePath", path("js")),
                    ("output", path("js")),
                    (
                        "compiler",
                        branch([("module", leaf(json!("native"))), ("options", leaf(json!({})))]),
                    ),
                    (
                        "minifier",
                        branch([("enable", leaf(json!(true))), ("options", leaf(json!({})))]),
                    ),
                    ("allowlist", list_or_null()),
                    ("blocklist", leaf(json!([]))),
                    ("versionFile", version_file()),
                    (
                        "bundler",
                        branch([
                            ("enable", leaf(json!(false))),
                            ("bundles", leaf(json!({}))),
                            ("output", path("js/bundles")),
                        ]),
                    ),
                ]),
            ),
            (
                "html",
                branch([
                    ("enable", leaf(json!(true))),
                    ("sourcePath", path("pages")),
                    ("output", path("")),
                    (
                        "compiler",
                        branch([("module", leaf(json!("native"))), ("options", leaf(json!({})))]),
                    ),
                    (
                        "minifier",
                        branch([("enable", leaf(json!(true))), ("options", leaf(json!({})))]),
                    ),
                    ("allowlist", list_or_null()),
                    ("blocklist", leaf(json!([]))),
                ]),
            ),
            ("clientViews", bundler_branch("views.js", "js/views")),
            ("clientControllers", bundler_branch("controllers.js", "js/controllers")),
            ("symlinks", leaf(json!([]))),
            ("requiredScripts", leaf(json!({"audit": "trellis audit"}))),
        ]))
    }
}

fn bundler_branch(default_bundle: &str, output: &str) -> SchemaNode {
    branch([
        ("enable", leaf(json!(false))),
        ("allowlist", leaf(json!({}))),
        ("blocklist", leaf(json!([]))),
        ("exposeAll", leaf(json!(false))),
        ("defaultBundle", leaf(json!(default_bundle))),
        ("minify", leaf(json!(true))),
        ("output", leaf(json!(output))),
    ])
}

fn collect_leaves<'a>(
    nodes: &'a BTreeMap<String, SchemaNode>,
    prefix: &str,
    out: &mut Vec<(String, &'a Leaf)>,
) {
    for (key, node) in nodes {
        let dotted = join_path(prefix, key);
        match node {
            SchemaNode::Leaf(leaf) => out.push((dotted, leaf)),
            SchemaNode::Branch(children) => collect_leaves(children, &dotted, out),
        }
    }
}

fn defaults_of(nodes: &BTreeMap<String, SchemaNode>) -> Map<String, Value> {
    nodes
        .iter()
        .map(|(key, node)| {
            let value = match node {
                SchemaNode::Leaf(leaf) => leaf.default.clone(),
                SchemaNode::Branch(children) => Value::Object(defaults_of(children)),
            };
            (key.clone(), value)
        })
        .collect()
}

/// Join a dotted prefix and a key: `("css", "output")` → `"css.output"`.
pub fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_kinds_inferred_from_default() {
        let leaf = Leaf::new(json!(8080));
        assert_eq!(leaf.kinds, vec![ValueKind::Number]);
        assert!(leaf.accepts(&json!(1)));
        assert!(!leaf.accepts(&json!("1")));
    }

    #[test]
    fn declared_kinds_override_inference() {
        let leaf = Leaf::new(Value::Null).kinds(&[ValueKind::Array, ValueKind::Null]);
        assert!(leaf.accepts(&json!(["a.css"])));
        assert!(leaf.accepts(&Value::Null));
        assert_eq!(leaf.kinds_label(), "array or null");
    }

    #[test]
    fn leaves_are_dotted_and_sorted() {
        let schema = Schema::new(branch([
            ("b", leaf(json!(1))),
            ("a", branch([("y", leaf(json!(true))), ("x", leaf(json!("s")))])),
        ]));
        let paths: Vec<String> = schema.leaves().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["a.x", "a.y", "b"]);
    }

    #[test]
    fn defaults_mirror_the_tree() {
        let schema = Schema::new(branch([
            ("port", leaf(json!(80))),
            ("css", branch([("enable", leaf(json!(true)))])),
        ]));
        assert_eq!(schema.defaults(), json!({"port": 80, "css": {"enable": true}}));
    }

    #[test]
    fn node_lookup_by_dotted_path() {
        let schema = Schema::app();
        assert!(schema.leaf("css.compiler.module").is_some());
        assert!(schema.leaf("css.compiler").is_none());
        assert!(matches!(schema.node("css.compiler"), Some(SchemaNode::Branch(_))));
        assert!(schema.node("css.nope").is_none());
        assert!(schema.node("mode.deeper").is_none());
    }

    #[test]
    fn app_schema_object_leaves_are_opaque() {
        let schema = Schema::app();
        assert!(schema.leaf("css.compiler.options").unwrap().is_object());
        assert!(!schema.leaf("css.allowlist").unwrap().is_object());
    }

    #[test]
    fn app_schema_validator_flags_form_one_family() {
        let schema = Schema::app();
        let leaf = schema.leaf("htmlValidator.enable").unwrap();
        assert_eq!(leaf.flags.len(), 2);
        assert!(leaf.flags[0].spellings.contains(&"--enable-validator"));
        assert!(leaf.flags[1].spellings.contains(&"--disable-validator"));
    }
}
