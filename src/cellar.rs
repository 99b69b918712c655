//! Prefix layout and the installed-set registry.
//!
//! ```text
//! <prefix>/
//!   Cellar/<name>/<version>/     # one keg per installed formula
//!     bin/<artifact>
//!     INSTALL_RECEIPT.json
//!   bin/<artifact> -> ../Cellar/<name>/<version>/bin/<artifact>
//!   var/keg/installed.json       # the installed set
//! ```
//!
//! The installed set is shared by every pipeline in the process. Readers take
//! a consistent [`Snapshot`]; the single writer path is [`InstalledSet::record`],
//! which only the installer calls after a keg has been placed.

use crate::error::Result;
use crate::resolve::InstalledLookup;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Detect the install prefix on this system
pub fn detect_prefix() -> PathBuf {
    if let Some(prefix) = std::env::var_os("KEG_PREFIX") {
        return PathBuf::from(prefix);
    }
    PathBuf::from("/usr/local")
}

/// Paths below an install prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    root: PathBuf,
}

impl Prefix {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cellar(&self) -> PathBuf {
        self.root.join("Cellar")
    }

    /// Directory holding every version of `name`
    pub fn rack(&self, name: &str) -> PathBuf {
        self.cellar().join(name)
    }

    pub fn keg(&self, name: &str, version: &str) -> PathBuf {
        self.rack(name).join(version)
    }

    pub fn bin(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn registry(&self) -> PathBuf {
        self.root.join("var/keg/installed.json")
    }
}

/// One entry of the installed set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledRecord {
    pub name: String,
    pub version: String,
    pub install_path: PathBuf,
    pub checksum: String,
    pub installed_at: DateTime<Utc>,
    /// Strictly increasing across the registry; orders installs
    pub sequence: u64,
    #[serde(default)]
    pub installed_on_request: bool,
}

/// Fields the installer supplies; the registry assigns time and sequence
#[derive(Debug, Clone)]
pub(crate) struct NewRecord {
    pub name: String,
    pub version: String,
    pub install_path: PathBuf,
    pub checksum: String,
    pub installed_on_request: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    next_sequence: u64,
    #[serde(default)]
    packages: BTreeMap<String, InstalledRecord>,
}

/// Process-wide registry of installed formulas
#[derive(Debug, Clone)]
pub struct InstalledSet {
    path: Option<PathBuf>,
    state: Arc<RwLock<RegistryFile>>,
}

impl InstalledSet {
    /// Open the registry at `path`, starting empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            RegistryFile::default()
        };

        Ok(Self {
            path: Some(path),
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Registry that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Arc::new(RwLock::new(RegistryFile::default())),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().packages.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<InstalledRecord> {
        self.read().packages.get(name).cloned()
    }

    /// Consistent copy of the current registry contents
    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.read().packages.clone())
    }

    /// Installed records in install order
    pub fn list(&self) -> Vec<InstalledRecord> {
        self.snapshot().into_records()
    }

    /// Add a record under the writer lock and persist the registry
    ///
    /// On a persistence failure the in-memory state is left unchanged.
    pub(crate) fn record(&self, entry: NewRecord) -> std::io::Result<InstalledRecord> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let record = InstalledRecord {
            name: entry.name,
            version: entry.version,
            install_path: entry.install_path,
            checksum: entry.checksum,
            installed_at: Utc::now(),
            sequence: state.next_sequence,
            installed_on_request: entry.installed_on_request,
        };

        let mut next = state.clone();
        next.next_sequence += 1;
        next.packages.insert(record.name.clone(), record.clone());

        if let Some(path) = &self.path {
            persist(path, &next)?;
        }
        *state = next;

        tracing::debug!(name = %record.name, sequence = record.sequence, "recorded install");
        Ok(record)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryFile> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Write the registry to a temp file next to `path`, then rename it in place
fn persist(path: &Path, registry: &RegistryFile) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("registry path has no parent"))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    serde_json::to_writer_pretty(&mut tmp, registry)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Point-in-time view of the installed set
#[derive(Debug, Clone, Default)]
pub struct Snapshot(BTreeMap<String, InstalledRecord>);

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&InstalledRecord> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Records ordered by install sequence
    pub fn into_records(self) -> Vec<InstalledRecord> {
        let mut records: Vec<_> = self.0.into_values().collect();
        records.sort_by_key(|r| r.sequence);
        records
    }
}

impl InstalledLookup for Snapshot {
    fn is_installed(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> NewRecord {
        NewRecord {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            install_path: PathBuf::from(format!("/prefix/Cellar/{name}/1.0.0")),
            checksum: "0".repeat(64),
            installed_on_request: false,
        }
    }

    #[test]
    fn test_prefix_layout() {
        let prefix = Prefix::new("/opt/keg");
        assert_eq!(prefix.keg("tool", "1.2"), PathBuf::from("/opt/keg/Cellar/tool/1.2"));
        assert_eq!(prefix.bin(), PathBuf::from("/opt/keg/bin"));
        assert_eq!(
            prefix.registry(),
            PathBuf::from("/opt/keg/var/keg/installed.json")
        );
    }

    #[test]
    fn test_sequence_orders_records() {
        let set = InstalledSet::in_memory();
        let first = set.record(entry("watchman")).unwrap();
        let second = set.record(entry("rs-git-fsmonitor")).unwrap();

        assert!(first.sequence < second.sequence);
        let names: Vec<_> = set.list().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["watchman", "rs-git-fsmonitor"]);
    }

    #[test]
    fn test_snapshot_is_not_affected_by_later_writes() {
        let set = InstalledSet::in_memory();
        set.record(entry("watchman")).unwrap();
        let snapshot = set.snapshot();
        set.record(entry("tool")).unwrap();

        assert!(snapshot.is_installed("watchman"));
        assert!(!snapshot.is_installed("tool"));
        assert!(set.contains("tool"));
    }

    #[test]
    fn test_registry_persists_and_reloads() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("var/keg/installed.json");

        let set = InstalledSet::open(&path).unwrap();
        set.record(entry("watchman")).unwrap();
        set.record(entry("tool")).unwrap();

        let reopened = InstalledSet::open(&path).unwrap();
        assert_eq!(reopened.list(), set.list());

        // Sequence keeps increasing after a reload
        let third = reopened.record(entry("other")).unwrap();
        assert_eq!(third.sequence, 2);
    }

    #[test]
    fn test_concurrent_writers_get_unique_sequences() {
        let set = InstalledSet::in_memory();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let set = set.clone();
                std::thread::spawn(move || set.record(entry(&format!("pkg{i}"))).unwrap())
            })
            .collect();

        let mut sequences: Vec<u64> = handles
            .into_iter()
            .map(|h| h.join().unwrap().sequence)
            .collect();
        sequences.sort_unstable();
        assert_eq!(sequences, (0..8).collect::<Vec<_>>());
    }
}
