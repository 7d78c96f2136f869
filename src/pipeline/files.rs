//! Source file selection for the asset pipelines and bundlers.
//!
//! Two modes:
//!
//! - **Scan** (no allowlist): every file under the source directory that the
//!   pipeline accepts, minus ignored files and the blocklist.
//! - **Allowlist**: only the listed entries. Each entry is `path[:alt]`,
//!   where `alt` renames the output. The blocklist does not apply.
//!
//! ```text
//! "allowlist": [
//!   "main.css",                 → public/css/main.css
//!   "theme/dark.css:dark.css",  → public/css/dark.css
//!   "vendor/*.css:lib/",        → public/css/lib/<name>.css
//!   "print.css:media/"          → public/css/media/print.css
//! ]
//! ```
//!
//! An `alt` ending in `/`, or any `alt` on a wildcard entry, names a
//! directory. A listed file that does not exist is reported as an error for
//! the pipeline; the rest still build.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Files ignored everywhere, in addition to the app's ignore file.
const BUILTIN_IGNORES: &[&str] = &[
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    "*.swp",
    "*~",
    ".git/**",
    "node_modules/**",
];

/// Where a source file's output goes, relative to the pipeline output dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Same relative path as the source.
    Mirror,
    /// An explicit file name.
    File(PathBuf),
    /// The source file name, inside this directory.
    Directory(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the source directory.
    pub relative: PathBuf,
    pub dest: Destination,
}

impl SourceFile {
    /// Output location. `extension` replaces the source extension for
    /// mirrored and directory destinations; explicit file names are kept.
    pub fn output_path(&self, output_dir: &Path, extension: Option<&str>) -> PathBuf {
        let with_ext = |p: PathBuf| match extension {
            Some(ext) => p.with_extension(ext),
            None => p,
        };
        match &self.dest {
            Destination::Mirror => with_ext(output_dir.join(&self.relative)),
            Destination::File(name) => output_dir.join(name),
            Destination::Directory(dir) => {
                let name = self.relative.file_name().map(PathBuf::from).unwrap_or_default();
                with_ext(output_dir.join(dir).join(name))
            }
        }
    }
}

/// The selected files plus problems found while selecting them.
#[derive(Debug, Default)]
pub struct FileSet {
    pub files: Vec<SourceFile>,
    pub errors: Vec<String>,
}

/// One parsed allowlist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowEntry {
    pub pattern: String,
    pub alt: Option<String>,
}

impl AllowEntry {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((pattern, alt)) if !alt.trim().is_empty() => Self {
                pattern: pattern.trim().to_string(),
                alt: Some(alt.trim().to_string()),
            },
            Some((pattern, _)) => Self {
                pattern: pattern.trim().to_string(),
                alt: None,
            },
            None => Self {
                pattern: raw.trim().to_string(),
                alt: None,
            },
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.pattern.contains(['*', '?', '[', '{'])
    }

    fn destination(&self) -> Destination {
        match &self.alt {
            None => Destination::Mirror,
            Some(alt) if self.is_wildcard() || alt.ends_with('/') => {
                Destination::Directory(PathBuf::from(alt.trim_end_matches('/')))
            }
            Some(alt) => Destination::File(PathBuf::from(alt)),
        }
    }
}

/// Ignore rules: the built-in list plus globs read from the app's ignore
/// file (`.gitignore` by default). Patterns match paths relative to `root`.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    root: PathBuf,
    set: GlobSet,
}

impl IgnoreRules {
    /// Built-in rules only.
    pub fn builtin(root: &Path) -> Self {
        Self::from_patterns(root, BUILTIN_IGNORES.iter().map(|s| s.to_string()))
    }

    /// Built-in rules plus the ignore file, if it exists. Comments, blank
    /// lines and negations (`!pattern`) are skipped.
    pub fn load(root: &Path, ignore_file: &Path) -> Self {
        let extra = match fs::read_to_string(ignore_file) {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('!'))
                .map(String::from)
                .collect(),
            Err(_) => Vec::new(),
        };
        let patterns = BUILTIN_IGNORES.iter().map(|s| s.to_string()).chain(extra);
        Self::from_patterns(root, patterns)
    }

    fn from_patterns(root: &Path, patterns: impl Iterator<Item = String>) -> Self {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            for glob in expand_ignore_pattern(&pattern) {
                match Glob::new(&glob) {
                    Ok(g) => {
                        builder.add(g);
                    }
                    Err(e) => warn!(pattern = pattern.as_str(), error = %e, "skipping invalid ignore pattern"),
                }
            }
        }
        let set = builder.build().unwrap_or_else(|e| {
            warn!(error = %e, "failed to build ignore rules; ignoring nothing");
            GlobSet::empty()
        });
        Self {
            root: root.to_path_buf(),
            set,
        }
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        self.set.is_match(slash_path(relative))
    }
}

/// Turn a gitignore-style line into globs: a leading `/` anchors it, a
/// trailing `/` means everything below, and a bare name matches at any depth.
fn expand_ignore_pattern(pattern: &str) -> Vec<String> {
    let anchored = pattern.starts_with('/');
    let trimmed = pattern.trim_start_matches('/');
    let (body, dir_only) = match trimmed.strip_suffix('/') {
        Some(body) => (body, true),
        None => (trimmed, false),
    };
    if body.is_empty() {
        return Vec::new();
    }
    let mut globs = Vec::new();
    let bases = if anchored || body.contains('/') {
        vec![body.to_string()]
    } else {
        vec![body.to_string(), format!("**/{body}")]
    };
    for base in bases {
        if !dir_only {
            globs.push(base.clone());
        }
        if !base.ends_with("/**") {
            globs.push(format!("{base}/**"));
        }
    }
    globs
}

/// Compile blocklist globs. Invalid patterns are returned as errors.
pub fn build_globset(patterns: &[String]) -> (GlobSet, Vec<String>) {
    let mut builder = GlobSetBuilder::new();
    let mut errors = Vec::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(g) => {
                builder.add(g);
            }
            Err(e) => errors.push(format!("invalid glob pattern '{pattern}': {e}")),
        }
    }
    let set = builder.build().unwrap_or_else(|e| {
        errors.push(format!("failed to build glob set: {e}"));
        GlobSet::empty()
    });
    (set, errors)
}

/// Walk a directory and return every non-ignored file, sorted, as
/// `(absolute, relative)` pairs.
pub fn walk_files(source_dir: &Path, ignore: &IgnoreRules) -> Vec<(PathBuf, PathBuf)> {
    if !source_dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(source_dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| !ignore.is_ignored(e.path()))
        .filter_map(|e| {
            let relative = e.path().strip_prefix(source_dir).ok()?.to_path_buf();
            Some((e.path().to_path_buf(), relative))
        })
        .collect()
}

/// Select the files a pipeline will compile.
///
/// `accept` filters by file type and is applied in scan mode only. With an
/// allowlist the file set is exactly what its entries name or match.
pub fn select_files<F>(
    source_dir: &Path,
    allowlist: Option<&[String]>,
    blocklist: &[String],
    ignore: &IgnoreRules,
    accept: F,
) -> FileSet
where
    F: Fn(&Path) -> bool,
{
    let mut set = FileSet::default();
    let walked = walk_files(source_dir, ignore);

    match allowlist {
        None => {
            let (blocked, errors) = build_globset(blocklist);
            set.errors.extend(errors);
            for (path, relative) in walked {
                if !accept(&path) {
                    continue;
                }
                if blocked.is_match(slash_path(&relative)) {
                    debug!(file = %relative.display(), "blocklisted");
                    continue;
                }
                set.files.push(SourceFile {
                    path,
                    relative,
                    dest: Destination::Mirror,
                });
            }
        }
        Some(entries) => {
            for raw in entries {
                let entry = AllowEntry::parse(raw);
                if entry.is_wildcard() {
                    let matcher = match Glob::new(&entry.pattern) {
                        Ok(g) => g.compile_matcher(),
                        Err(e) => {
                            set.errors
                                .push(format!("invalid allowlist pattern '{}': {e}", entry.pattern));
                            continue;
                        }
                    };
                    let before = set.files.len();
                    for (path, relative) in &walked {
                        if matcher.is_match(slash_path(relative)) {
                            push_unique(&mut set.files, path, relative, entry.destination());
                        }
                    }
                    if set.files.len() == before {
                        warn!(pattern = entry.pattern.as_str(), "allowlist pattern matched no files");
                    }
                } else {
                    let path = source_dir.join(&entry.pattern);
                    if !path.is_file() {
                        set.errors.push(format!(
                            "{}: listed in allowlist but not found in {}",
                            entry.pattern,
                            source_dir.display()
                        ));
                        continue;
                    }
                    let relative = PathBuf::from(&entry.pattern);
                    push_unique(&mut set.files, &path, &relative, entry.destination());
                }
            }
        }
    }

    set
}

fn push_unique(files: &mut Vec<SourceFile>, path: &Path, relative: &Path, dest: Destination) {
    if files.iter().any(|f| f.path == path) {
        return;
    }
    files.push(SourceFile {
        path: path.to_path_buf(),
        relative: relative.to_path_buf(),
        dest,
    });
}

/// A relative path with `/` separators, for glob matching and bundle keys.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether a path has one of the given extensions (case-insensitive).
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
}
