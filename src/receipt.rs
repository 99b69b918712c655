//! Install receipts - `INSTALL_RECEIPT.json` stored inside each keg.
//!
//! The installed set answers "what is installed"; the receipt records how a
//! single keg came to be there:
//!
//! ```text
//! <prefix>/Cellar/rs-git-fsmonitor/0.1.1/
//!   INSTALL_RECEIPT.json
//!   bin/rs-git-fsmonitor
//! ```
//!
//! It is written into the staging directory before the keg is moved into
//! place, so a keg is never visible without its receipt.

use crate::error::Result;
use crate::formula::Formula;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub keg_version: String,
    pub name: String,
    pub version: String,
    pub source_url: String,
    pub checksum: String,
    #[serde(default)]
    pub runtime_dependencies: Vec<String>,
    pub installed_as_dependency: bool,
    pub installed_on_request: bool,
    pub time: i64,
    /// Files placed in the keg, relative to it
    #[serde(default)]
    pub files: Vec<PathBuf>,
    pub arch: String,
    pub os: String,
}

impl InstallReceipt {
    /// Receipt for a fresh install of `formula`
    pub fn new(formula: &Formula, installed_on_request: bool) -> Self {
        let files = formula
            .install_steps()
            .iter()
            .map(|step| Path::new(step.dir.as_str()).join(&step.name))
            .collect();

        Self {
            keg_version: format!("keg/{}", env!("CARGO_PKG_VERSION")),
            name: formula.name().to_string(),
            version: formula.version().to_string(),
            source_url: formula.source_url().to_string(),
            checksum: formula.checksum().to_string(),
            runtime_dependencies: formula.dependencies().to_vec(),
            installed_as_dependency: !installed_on_request,
            installed_on_request,
            time: chrono::Utc::now().timestamp(),
            files,
            arch: std::env::consts::ARCH.to_string(),
            os: std::env::consts::OS.to_string(),
        }
    }

    /// Read the receipt of the keg at `keg_path`
    pub fn read(keg_path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(keg_path.join(RECEIPT_FILE))?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write the receipt into `keg_path`
    pub fn write(&self, keg_path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(keg_path.join(RECEIPT_FILE), json)
    }
}
