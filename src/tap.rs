//! Formula index - the set of formula definitions known to this process.
//!
//! Formulas are loaded from one or more local formula directories. Every
//! `*.json` file below a directory is one formula; hidden files and
//! directories are skipped. A name defined twice is an error rather than a
//! silent override.

use crate::error::{KegError, Result};
use crate::formula::{Formula, with_file_context};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Minimum Jaro-Winkler similarity for a "did you mean" hint
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// Formula definitions keyed by name
#[derive(Debug, Clone, Default)]
pub struct FormulaIndex {
    formulae: BTreeMap<String, Formula>,
}

impl FormulaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from already-parsed formulas
    pub fn from_formulae(formulae: impl IntoIterator<Item = Formula>) -> Result<Self> {
        let mut index = Self::new();
        for formula in formulae {
            index.insert(formula)?;
        }
        Ok(index)
    }

    /// Load every formula file below `dirs`
    ///
    /// Directories that do not exist are skipped. Files are parsed
    /// concurrently; the first malformed file fails the whole load.
    pub async fn load(dirs: &[PathBuf]) -> Result<Self> {
        let mut paths = Vec::new();
        for dir in dirs {
            paths.extend(formula_files(dir)?);
        }

        let parses = paths.into_iter().map(|path| async move {
            let contents = tokio::fs::read_to_string(&path).await?;
            let formula =
                Formula::from_json_str(&contents).map_err(|e| with_file_context(e, &path))?;
            Ok::<_, KegError>(formula)
        });
        let formulae = futures::future::try_join_all(parses).await?;

        tracing::debug!(count = formulae.len(), "loaded formula index");
        Self::from_formulae(formulae)
    }

    /// Add a formula; a second definition of the same name is rejected
    pub fn insert(&mut self, formula: Formula) -> Result<()> {
        if self.formulae.contains_key(formula.name()) {
            return Err(KegError::malformed(
                formula.name(),
                "defined more than once in the formula directories",
            ));
        }
        self.formulae.insert(formula.name().to_string(), formula);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Formula> {
        self.formulae.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.formulae.contains_key(name)
    }

    /// Formula names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.formulae.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Formula> {
        self.formulae.values()
    }

    pub fn len(&self) -> usize {
        self.formulae.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formulae.is_empty()
    }

    /// Closest known name to `name`, for "did you mean" hints
    pub fn suggest(&self, name: &str) -> Option<String> {
        self.names()
            .map(|candidate| (candidate, strsim::jaro_winkler(name, candidate)))
            .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(candidate, _)| candidate.to_string())
    }
}

/// All formula files below `dir`, sorted for a stable load order
fn formula_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        tracing::debug!(dir = %dir.display(), "formula directory does not exist, skipping");
        return Ok(vec![]);
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

    for entry in walker {
        let entry = entry.map_err(|e| {
            KegError::IoError(std::io::Error::other(format!(
                "Failed to read formula directory {}: {}",
                dir.display(),
                e
            )))
        })?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().and_then(|e| e.to_str()) == Some("json")
        {
            files.push(path.to_path_buf());
        }
    }

    Ok(files)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::FormulaDef;
    use std::fs;

    const DIGEST: &str = "4faf1723ea75a76e0dd6187d5a3e9074fd5e93dd13f1024843d4ed256ff689e8";

    fn formula(name: &str) -> Formula {
        Formula::from_def(FormulaDef {
            name: name.into(),
            source_url: format!("https://example.com/{name}/v1.0.0/{name}"),
            checksum: DIGEST.into(),
            ..Default::default()
        })
        .unwrap()
    }

    fn write(dir: &Path, file: &str, name: &str) {
        let json = serde_json::to_string_pretty(&formula(name).to_def()).unwrap();
        fs::write(dir.join(file), json).unwrap();
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = FormulaIndex::from_formulae([formula("watchman"), formula("watchman")])
            .unwrap_err();
        assert!(matches!(err, KegError::MalformedFormula { name, .. } if name == "watchman"));
    }

    #[test]
    fn test_suggest_close_name() {
        let index = FormulaIndex::from_formulae([formula("watchman"), formula("ripgrep")]).unwrap();
        assert_eq!(index.suggest("watchmen").as_deref(), Some("watchman"));
        assert_eq!(index.suggest("zzz"), None);
    }

    #[tokio::test]
    async fn test_load_walks_directories_and_skips_hidden() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("nested");
        let hidden = tmp.path().join(".git");
        fs::create_dir_all(&nested).unwrap();
        fs::create_dir_all(&hidden).unwrap();

        write(tmp.path(), "watchman.json", "watchman");
        write(&nested, "tool.json", "tool");
        write(&hidden, "ignored.json", "ignored");
        fs::write(tmp.path().join("README.md"), "not a formula").unwrap();

        let index = FormulaIndex::load(&[tmp.path().to_path_buf(), tmp.path().join("missing")])
            .await
            .unwrap();

        assert_eq!(index.names().collect::<Vec<_>>(), vec!["tool", "watchman"]);
    }

    #[tokio::test]
    async fn test_load_reports_malformed_file() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("broken.json"), "{ \"name\": ").unwrap();

        let err = FormulaIndex::load(&[tmp.path().to_path_buf()])
            .await
            .unwrap_err();
        match err {
            KegError::MalformedFormula { name, reason } => {
                assert_eq!(name, "broken");
                assert!(reason.contains("broken.json"));
            }
            other => panic!("expected MalformedFormula, got {other:?}"),
        }
    }
}
