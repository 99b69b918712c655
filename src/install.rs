//! Atomic placement of a verified artifact into the Cellar.
//!
//! The keg is assembled in a staging directory inside the formula's rack
//! (same filesystem as the final location) and then renamed to
//! `Cellar/<name>/<version>` in a single step. Until that rename the final
//! path does not exist; after it, the keg is complete with its receipt and
//! permissions already set. If linking or recording fails afterwards the keg
//! is removed again, so a failed install leaves no trace.

use crate::cellar::{InstalledRecord, InstalledSet, NewRecord, Prefix};
use crate::error::{KegError, Result};
use crate::formula::{Formula, InstallStep};
use crate::receipt::InstallReceipt;
use crate::symlink;
use crate::verify::VerifiedArtifact;
use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Places verified artifacts and records them in the installed set
#[derive(Debug, Clone)]
pub struct Installer {
    prefix: Prefix,
    installed: InstalledSet,
}

impl Installer {
    pub fn new(prefix: Prefix, installed: InstalledSet) -> Self {
        Self { prefix, installed }
    }

    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    /// Install `artifact` as `formula`
    ///
    /// # Errors
    ///
    /// [`KegError::Install`] if the keg cannot be staged, placed or linked, or
    /// if a keg for this version already exists without being recorded.
    pub fn install(
        &self,
        formula: &Formula,
        artifact: VerifiedArtifact,
        installed_on_request: bool,
    ) -> Result<InstalledRecord> {
        let name = formula.name();
        let rack = self.prefix.rack(name);
        let keg = self.prefix.keg(name, formula.version());

        if artifact.formula() != name || artifact.checksum() != formula.checksum() {
            return Err(KegError::install(
                name,
                &keg,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("artifact was verified for {}", artifact.formula()),
                ),
            ));
        }

        if keg.symlink_metadata().is_ok() {
            return Err(KegError::install(
                name,
                &keg,
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "keg exists but is not in the installed set; remove it first",
                ),
            ));
        }

        fs::create_dir_all(&rack).map_err(|e| KegError::install(name, &rack, e))?;

        if let Err(e) = self.place(formula, &artifact, &keg, installed_on_request) {
            remove_if_empty(&rack);
            return Err(e);
        }

        let links = match symlink::link_keg(&self.prefix, name, &keg) {
            Ok(links) => links,
            Err(e) => {
                self.discard_keg(&keg);
                return Err(KegError::install(name, self.prefix.bin(), e));
            }
        };

        let record = self.installed.record(NewRecord {
            name: name.to_string(),
            version: formula.version().to_string(),
            install_path: keg.clone(),
            checksum: formula.checksum().to_string(),
            installed_on_request,
        });
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                symlink::unlink(&links);
                self.discard_keg(&keg);
                return Err(KegError::install(name, self.prefix.registry(), e));
            }
        };

        tracing::info!(
            formula = name,
            version = formula.version(),
            path = %keg.display(),
            links = links.len(),
            "installed"
        );
        Ok(record)
    }

    /// Stage the keg next to its final location, then rename it into place
    fn place(
        &self,
        formula: &Formula,
        artifact: &VerifiedArtifact,
        keg: &Path,
        installed_on_request: bool,
    ) -> Result<()> {
        let name = formula.name();
        let rack = self.prefix.rack(name);

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&rack)
            .map_err(|e| KegError::install(name, &rack, e))?;

        for step in formula.install_steps() {
            write_step(staging.path(), step, artifact.bytes())
                .map_err(|e| KegError::install(name, keg.join(step.dir.as_str()).join(&step.name), e))?;
        }

        InstallReceipt::new(formula, installed_on_request)
            .write(staging.path())
            .map_err(|e| KegError::install(name, keg, e))?;

        // The staging dir is consumed by the rename; dropping it afterwards is a no-op
        fs::rename(staging.path(), keg).map_err(|e| KegError::install(name, keg, e))?;
        Ok(())
    }

    fn discard_keg(&self, keg: &Path) {
        if let Err(e) = fs::remove_dir_all(keg) {
            tracing::warn!(path = %keg.display(), error = %e, "failed to remove keg after failed install");
        }
        if let Some(rack) = keg.parent() {
            remove_if_empty(rack);
        }
    }
}

/// Write the artifact for one install step and apply its mode
fn write_step(staging: &Path, step: &InstallStep, bytes: &[u8]) -> io::Result<()> {
    let dir = staging.join(step.dir.as_str());
    fs::create_dir_all(&dir)?;

    let path = dir.join(&step.name);
    let mut file = File::create(&path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::set_permissions(&path, fs::Permissions::from_mode(step.mode))
}

fn remove_if_empty(dir: &Path) {
    // Fails (and is ignored) unless the directory is empty
    let _ = fs::remove_dir(dir);
}
