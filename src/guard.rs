//! Gatekeeper for every filesystem write the framework makes.
//!
//! `makeBuildArtifacts: false` must leave the app directory untouched, so no
//! component writes directly: they go through a [`WriteGuard`]. A disabled
//! guard turns every operation into a no-op that reports `false` (or
//! [`WriteOutcome::Disabled`]).
//!
//! Two guards exist per app: one for compiled statics (enabled unless
//! artifacts are off) and one for scaffolding the MVC folders (enabled only
//! when artifacts are fully on). See [`crate::config::BuildArtifacts`].

use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// What a content-aware write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The file already held identical bytes; it was not touched.
    Unchanged,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteGuard {
    enabled: bool,
}

impl WriteGuard {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Create a directory and its parents. `Ok(false)` when disabled.
    pub fn ensure_dir(&self, path: &Path) -> io::Result<bool> {
        if !self.enabled {
            return Ok(false);
        }
        if !path.is_dir() {
            debug!(path = %path.display(), "creating directory");
            fs::create_dir_all(path)?;
        }
        Ok(true)
    }

    /// Write a file unconditionally, creating its parent directory.
    pub fn write_file(&self, path: &Path, content: impl AsRef<[u8]>) -> io::Result<bool> {
        if !self.enabled {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(true)
    }

    /// Write a file only if its bytes differ from what is already on disk.
    ///
    /// An unchanged file keeps its modification time.
    pub fn write_if_changed(&self, path: &Path, content: impl AsRef<[u8]>) -> io::Result<WriteOutcome> {
        if !self.enabled {
            return Ok(WriteOutcome::Disabled);
        }
        let content = content.as_ref();
        match fs::read(path) {
            Ok(existing) if existing == content => return Ok(WriteOutcome::Unchanged),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        self.write_file(path, content)?;
        Ok(WriteOutcome::Written)
    }

    /// Copy a file, creating the destination's parent directory.
    pub fn copy(&self, source: &Path, dest: &Path) -> io::Result<bool> {
        if !self.enabled {
            return Ok(false);
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, dest)?;
        Ok(true)
    }

    /// Create a symlink at `dest` pointing to `source`.
    ///
    /// If the link's parent directory does not exist yet it is created and
    /// the link retried once; a second failure is returned.
    pub fn symlink(&self, source: &Path, dest: &Path) -> io::Result<bool> {
        if !self.enabled {
            return Ok(false);
        }
        match make_symlink(source, dest) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                make_symlink(source, dest)?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(unix)]
fn make_symlink(source: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, dest)
}

#[cfg(windows)]
fn make_symlink(source: &Path, dest: &Path) -> io::Result<()> {
    if source.is_dir() {
        std::os::windows::fs::symlink_dir(source, dest)
    } else {
        std::os::windows::fs::symlink_file(source, dest)
    }
}
