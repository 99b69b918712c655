//! Download cache for verified artifacts.
//!
//! Entries are named `<sha256>--<artifact>` so a formula whose checksum
//! changes never picks up a stale entry. Only bytes that already passed
//! verification are stored, and every hit is verified again before use.

use crate::error::Result;
use crate::formula::Formula;
use crate::verify::{self, VerifiedArtifact};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Get the cache directory (`$XDG_CACHE_HOME/keg`, `~/.cache/keg` or equivalent)
pub fn cache_dir() -> PathBuf {
    if let Some(cache_home) = std::env::var_os("XDG_CACHE_HOME") {
        PathBuf::from(cache_home).join("keg")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".cache/keg")
    } else {
        PathBuf::from(".cache/keg")
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache path for `formula`'s artifact
    pub fn entry_path(&self, formula: &Formula) -> PathBuf {
        self.root.join(format!(
            "{}--{}",
            formula.checksum(),
            formula.artifact_name()
        ))
    }

    /// Cached artifact for `formula`, if present and still valid
    ///
    /// An entry that no longer matches its checksum is deleted.
    pub fn load(&self, formula: &Formula) -> Option<VerifiedArtifact> {
        let path = self.entry_path(formula);
        let bytes = fs::read(&path).ok()?;

        match verify::verify(formula.name(), bytes, formula.checksum()) {
            Ok(artifact) => {
                tracing::debug!(formula = formula.name(), path = %path.display(), "cache hit");
                Some(artifact)
            }
            Err(e) => {
                tracing::warn!(formula = formula.name(), error = %e, "discarding corrupt cache entry");
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    /// Store a verified artifact; the entry appears atomically
    pub fn store(&self, formula: &Formula, artifact: &VerifiedArtifact) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let path = self.entry_path(formula);

        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(artifact.bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(path)
    }

    /// Remove every cache entry, returning how many were removed
    pub fn clear(&self) -> Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
