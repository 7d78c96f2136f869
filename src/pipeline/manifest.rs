//! Build manifest: a record of every file the last build produced.
//!
//! After each build, `<buildFolder>/.build-manifest.json` maps each output
//! (relative to the app dir) to its source and the SHA-256 of its content:
//!
//! ```json
//! {
//!   "version": 1,
//!   "entries": {
//!     "public/css/main.css": { "source": "statics/css/main.css", "hash": "9f86d0..." }
//!   }
//! }
//! ```
//!
//! Keys are sorted, so unchanged builds produce identical bytes and the
//! manifest itself obeys write-if-changed. Outputs the previous manifest
//! lists but the current build did not produce are reported as stale; they
//! are not deleted.

use super::{OutputRecord, PipelineReport};
use crate::guard::{WriteGuard, WriteOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILENAME: &str = ".build-manifest.json";

/// Bump when the format changes; older manifests are then ignored.
const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    pub source: String,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildManifest {
    pub version: u32,
    pub entries: BTreeMap<String, ManifestEntry>,
}

impl BuildManifest {
    pub fn empty() -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries: BTreeMap::new(),
        }
    }

    pub fn path(build_folder: &Path) -> PathBuf {
        build_folder.join(MANIFEST_FILENAME)
    }

    /// Load the previous manifest. Missing, unreadable or outdated files
    /// load as empty.
    pub fn load(build_folder: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(Self::path(build_folder)) else {
            return Self::empty();
        };
        match serde_json::from_str::<Self>(&content) {
            Ok(m) if m.version == MANIFEST_VERSION => m,
            _ => Self::empty(),
        }
    }

    /// Build from this run's pipeline reports. Paths are stored relative to
    /// `app_dir` with `/` separators.
    pub fn from_reports<'a>(app_dir: &Path, reports: impl IntoIterator<Item = &'a PipelineReport>) -> Self {
        let mut manifest = Self::empty();
        for record in reports.into_iter().flat_map(|r| r.outputs.iter()) {
            manifest.insert(app_dir, record);
        }
        manifest
    }

    pub fn insert(&mut self, app_dir: &Path, record: &OutputRecord) {
        self.entries.insert(
            relative_key(app_dir, &record.output),
            ManifestEntry {
                source: relative_key(app_dir, &record.source),
                hash: record.hash.clone(),
            },
        );
    }

    /// Outputs listed in `previous` but missing from `self`.
    pub fn stale_since(&self, previous: &BuildManifest) -> Vec<String> {
        previous
            .entries
            .keys()
            .filter(|k| !self.entries.contains_key(*k))
            .cloned()
            .collect()
    }

    pub fn save(&self, guard: &WriteGuard, build_folder: &Path) -> io::Result<WriteOutcome> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        guard.write_if_changed(&Self::path(build_folder), json)
    }
}

fn relative_key(app_dir: &Path, path: &Path) -> String {
    super::files::slash_path(path.strip_prefix(app_dir).unwrap_or(path))
}
