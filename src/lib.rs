//! # trellis
//!
//! Convention-based scaffolding for MVC web apps: layered config resolution
//! and static asset builds.
//!
//! An app is a directory. Its params come from flags, environment variables,
//! the embedding program, `trellis.json` and `Cargo.toml`; its statics are
//! compiled from `statics/` into `public/`, and its client-side views and
//! controllers are bundled into ES modules.
//!
//! ```text
//! 1. Resolve   sources  →  ResolvedConfig    (merge, derive, templates)
//! 2. Prepare   config   →  folders           (statics, public, build, mvc)
//! 3. Build     statics  →  public/           (css, js, html, bundles, symlinks)
//! 4. Record    outputs  →  .build/.build-manifest.json
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | Schema, the five input tiers, merge, derivation, `${...}` templates, typed [`config::AppConfig`] |
//! | [`audit`] | Unknown, renamed and mistyped params in `trellis.json` and `Cargo.toml` |
//! | [`pipeline`] | Per-class asset pipelines, client bundlers, source maps, minifiers, build manifest |
//! | [`guard`] | The only path to the filesystem for build outputs; write-if-changed |
//! | [`app`] | Lifecycle: prepare, build (foreground or background), shutdown |
//! | [`routes`] | Ordered route table with held-back catch-alls |
//! | [`logging`] | `tracing` subscriber for the binary |
//! | [`output`] | CLI output formatting |
//!
//! # Embedding
//!
//! ```no_run
//! use serde_json::json;
//! use trellis::App;
//! use trellis::config::ConfigInputs;
//!
//! let inputs = ConfigInputs::load("my-app").with_params(json!({"routePrefix": "/shop"}));
//! let app = App::new(inputs)?;
//! app.prepare()?;
//! let report = app.build()?;
//! assert!(report.is_ok());
//! # Ok::<(), trellis::AppError>(())
//! ```
//!
//! # Rebuilds
//!
//! Every output goes through [`guard::WriteGuard::write_if_changed`], so a
//! rebuild against unchanged sources leaves every file (and its mtime)
//! alone. The build manifest lists what each build produced, which is how
//! outputs of removed sources are reported as stale.

pub mod app;
pub mod audit;
pub mod config;
pub mod guard;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod routes;

pub use app::{App, AppError, BuildReport};

#[cfg(test)]
pub(crate) mod test_helpers;
