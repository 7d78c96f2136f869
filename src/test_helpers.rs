//! Shared test utilities.
//!
//! `fixtures/app/` is a small storefront app: CSS with partials and a
//! version file, two scripts, one page, client views with directives,
//! controllers with an allowlisted bundle, and a symlinked image folder.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = setup_fixtures();
//! let app = fixture_app(&tmp, &["--statics-only"]);
//! app.prepare().unwrap();
//! let report = app.build().unwrap();
//!
//! let css = find_pipeline(&report, "css");
//! assert_eq!(output_names(css), vec!["main.css", "print.css"]);
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::app::{App, BuildReport};
use crate::config::ConfigInputs;
use crate::pipeline::PipelineReport;

// =========================================================================
// Fixture setup
// =========================================================================

/// Copy `fixtures/app/` to a temp directory and return it.
pub fn setup_fixtures() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/app");
    copy_dir_recursive(&fixtures, tmp.path()).unwrap();
    tmp
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            std::fs::create_dir_all(&dst_path)?;
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// The fixture app as the CLI would load it, with `args` as framework flags.
/// The test process's environment is left out.
pub fn fixture_app(tmp: &TempDir, args: &[&str]) -> App {
    let inputs = ConfigInputs::load(tmp.path())
        .with_env(Vec::<(String, String)>::new())
        .with_args(args.iter().copied());
    App::new(inputs).unwrap()
}

/// Write `content` at `rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

pub fn read_file(root: &Path, rel: &str) -> String {
    let path = root.join(rel);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()))
}

// =========================================================================
// Report lookups: panic with a clear message on miss
// =========================================================================

/// Find a pipeline report by name. Panics if not found.
pub fn find_pipeline<'a>(report: &'a BuildReport, name: &str) -> &'a PipelineReport {
    report.pipeline(name).unwrap_or_else(|| {
        let names: Vec<&str> = report.pipelines.iter().map(|p| p.name.as_str()).collect();
        panic!("pipeline '{name}' not found. Available: {names:?}")
    })
}

/// File names of a pipeline's outputs, sorted.
pub fn output_names(report: &PipelineReport) -> Vec<String> {
    let mut names: Vec<String> = report
        .outputs
        .iter()
        .filter_map(|o| o.output.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Member keys of a rendered bundle module, in file order.
pub fn bundle_keys(rendered: &str) -> Vec<String> {
    rendered
        .lines()
        .filter_map(|line| line.strip_prefix("  \""))
        .filter_map(|rest| rest.split_once("\": ").map(|(key, _)| key.to_string()))
        .collect()
}

// =========================================================================
// Filesystem snapshots
// =========================================================================

/// Modification time of every file under `dir`, keyed by path.
pub fn mtimes(dir: &Path) -> BTreeMap<PathBuf, SystemTime> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let modified = e.metadata().unwrap().modified().unwrap();
            (e.into_path(), modified)
        })
        .collect()
}
