//! Application lifecycle.
//!
//! ```text
//! App::new(inputs)   resolve config (once; shared as Arc, never mutated)
//!   .prepare()       create statics/public/build folders, scaffold MVC folders
//!   .build()         css → js → html → bundlers → symlinks → build manifest
//!   .routes()        ordered route table with the route prefix applied
//! ```
//!
//! Two [`WriteGuard`]s gate the filesystem: `statics` (compiled outputs,
//! bundles, symlinks, manifest) is enabled unless `makeBuildArtifacts` is
//! off; `scaffold` (MVC folders) only when it is fully on.

use crate::config::{self, ConfigError, ConfigInputs, ResolvedConfig};
use crate::guard::{WriteGuard, WriteOutcome};
use crate::pipeline::bundle::{self, BundleKind};
use crate::pipeline::manifest::BuildManifest;
use crate::pipeline::{self, AssetClass, PipelineReport};
use crate::routes::{RouteError, RouteTable};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Controllers directory not found: {}", .0.display())]
    MissingControllers(PathBuf),
    #[error("Cannot link {} -> {}: {error}", .link.display(), .target.display())]
    Symlink {
        link: PathBuf,
        target: PathBuf,
        #[source]
        error: io::Error,
    },
    #[error("Build still running after {0:?}")]
    ShutdownTimeout(Duration),
    #[error("Build thread exited without a result")]
    BuildAborted,
    #[error(transparent)]
    Routes(#[from] RouteError),
}

/// What happened to one `symlinks` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Created,
    /// Something already exists at the destination.
    Exists,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct LinkRecord {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub outcome: LinkOutcome,
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    /// CSS, JS, HTML, then the three bundlers.
    pub pipelines: Vec<PipelineReport>,
    pub symlinks: Vec<LinkRecord>,
    /// Outputs of the previous build that this one did not produce.
    pub stale: Vec<String>,
    pub manifest: WriteOutcome,
}

impl BuildReport {
    pub fn written(&self) -> usize {
        self.pipelines.iter().map(PipelineReport::written).sum()
    }

    pub fn failed(&self) -> usize {
        self.pipelines.iter().map(|p| p.failed.len() + p.errors.len()).sum()
    }

    pub fn is_ok(&self) -> bool {
        self.pipelines.iter().all(PipelineReport::is_ok)
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineReport> {
        self.pipelines.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct App {
    config: Arc<ResolvedConfig>,
    statics: WriteGuard,
    scaffold: WriteGuard,
}

impl App {
    pub fn new(inputs: ConfigInputs) -> Result<Self, AppError> {
        Ok(Self::from_config(config::resolve(&inputs)?))
    }

    pub fn from_config(config: ResolvedConfig) -> Self {
        let artifacts = config.params.make_build_artifacts;
        Self {
            config: Arc::new(config),
            statics: WriteGuard::new(artifacts.statics()),
            scaffold: WriteGuard::new(artifacts.scaffold()),
        }
    }

    pub fn config(&self) -> &Arc<ResolvedConfig> {
        &self.config
    }

    pub fn statics_guard(&self) -> &WriteGuard {
        &self.statics
    }

    /// `shutdownTimeout`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.config.params.shutdown_timeout)
    }

    /// Create the app's folders.
    ///
    /// Fails when the controllers directory is missing and the app is not
    /// allowed to create it.
    pub fn prepare(&self) -> Result<(), AppError> {
        let p = &self.config.params;
        for dir in [&p.statics_root, &p.public_folder, &p.build_folder] {
            self.statics.ensure_dir(dir)?;
        }
        for dir in [&p.controllers_path, &p.models_path, &p.views_path] {
            self.scaffold.ensure_dir(dir)?;
        }
        if !p.controllers_path.is_dir() {
            return Err(AppError::MissingControllers(p.controllers_path.clone()));
        }
        Ok(())
    }

    /// Run every pipeline, bundler and symlink, then record the build
    /// manifest. Per-file failures are in the report; only symlink and
    /// manifest I/O errors fail the build.
    pub fn build(&self) -> Result<BuildReport, AppError> {
        let config = self.config.as_ref();
        info!(app = config.app_name.as_str(), mode = %config.mode(), "building statics");

        let mut pipelines: Vec<PipelineReport> = AssetClass::ALL
            .iter()
            .map(|class| pipeline::run(config, &self.statics, *class))
            .collect();
        pipelines.extend(
            BundleKind::ALL
                .iter()
                .map(|kind| bundle::run(config, &self.statics, *kind)),
        );

        let symlinks = self.link_symlinks()?;

        let build_folder = &config.params.build_folder;
        let previous = BuildManifest::load(build_folder);
        let manifest = BuildManifest::from_reports(config.app_dir(), &pipelines);
        let stale = manifest.stale_since(&previous);
        for output in &stale {
            info!(output = output.as_str(), "output from a previous build is no longer produced");
        }
        let manifest = manifest.save(&self.statics, build_folder)?;

        let report = BuildReport {
            pipelines,
            symlinks,
            stale,
            manifest,
        };
        info!(written = report.written(), failed = report.failed(), "build finished");
        Ok(report)
    }

    fn link_symlinks(&self) -> Result<Vec<LinkRecord>, AppError> {
        let mut records = Vec::new();
        for link in &self.config.params.symlinks {
            if link.source.as_os_str().is_empty() || link.dest.as_os_str().is_empty() {
                warn!(source = %link.source.display(), dest = %link.dest.display(), "incomplete symlink entry; skipping");
                continue;
            }
            let outcome = if fs::symlink_metadata(&link.dest).is_ok() {
                LinkOutcome::Exists
            } else {
                match self.statics.symlink(&link.source, &link.dest) {
                    Ok(true) => LinkOutcome::Created,
                    Ok(false) => LinkOutcome::Disabled,
                    Err(error) => {
                        return Err(AppError::Symlink {
                            link: link.dest.clone(),
                            target: link.source.clone(),
                            error,
                        });
                    }
                }
            };
            records.push(LinkRecord {
                source: link.source.clone(),
                dest: link.dest.clone(),
                outcome,
            });
        }
        Ok(records)
    }

    /// Run [`App::build`] on its own thread.
    pub fn build_in_background(&self) -> Result<BuildHandle, AppError> {
        let app = self.clone();
        let (tx, rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("trellis-build".into())
            .spawn(move || {
                // The receiver may be gone after a shutdown timeout.
                let _ = tx.send(app.build());
            })?;
        Ok(BuildHandle {
            rx,
            thread: Some(thread),
        })
    }

    /// An empty route table carrying the app's route prefix.
    pub fn routes(&self) -> RouteTable {
        RouteTable::new(self.config.params.route_prefix.clone())
    }
}

/// A build running on a background thread.
#[derive(Debug)]
pub struct BuildHandle {
    rx: mpsc::Receiver<Result<BuildReport, AppError>>,
    thread: Option<JoinHandle<()>>,
}

impl BuildHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Block until the build settles.
    pub fn wait(mut self) -> Result<BuildReport, AppError> {
        let result = self.rx.recv().map_err(|_| AppError::BuildAborted)?;
        self.join();
        result
    }

    /// Give the build up to `timeout` to settle. On timeout the thread is
    /// left to finish on its own.
    pub fn shutdown(mut self, timeout: Duration) -> Result<BuildReport, AppError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => {
                self.join();
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(?timeout, "build did not settle before shutdown");
                Err(AppError::ShutdownTimeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(AppError::BuildAborted),
        }
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
