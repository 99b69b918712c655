//! High-level install pipeline.
//!
//! [`PackageManager`] ties the pieces together: it resolves a formula into a
//! plan, then for each plan entry in order fetches the artifact, verifies it,
//! places it in the Cellar, records it and emits its post-install message.
//! Finally it runs the requested formula's test.
//!
//! ```no_run
//! use keg::{Config, InstallOptions, PackageManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pm = PackageManager::new(Config::from_env()).await?;
//!     let report = pm.install("rs-git-fsmonitor", &InstallOptions::default()).await?;
//!     for record in &report.installed {
//!         println!("installed {} {}", record.name, record.version);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Stages run strictly in sequence. A dependency is installed and recorded
//! before its dependent is fetched, and the first failing stage aborts
//! everything after it. Each fetch and the test run get their own timeout;
//! cancellation is checked between stages and interrupts a running fetch or
//! test.

use crate::cache::ArtifactCache;
use crate::cellar::{InstalledRecord, InstalledSet};
use crate::config::{Config, DEFAULT_TIMEOUT};
use crate::download::{Fetcher, HttpFetcher};
use crate::error::{KegError, Result, Stage};
use crate::formula::Formula;
use crate::hooks::{self, Notifier, TerminalNotifier, TestEnv, TestOutcome};
use crate::install::Installer;
use crate::resolve::{self, InstallPlan, PlanStep};
use crate::retry::{RetryPolicy, RetryingFetcher};
use crate::tap::FormulaIndex;
use crate::verify::{self, VerifiedArtifact};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Fetcher used by [`PackageManager::new`]
pub type DefaultFetcher = RetryingFetcher<HttpFetcher>;

/// Per-request knobs for [`PackageManager::install`] and [`PackageManager::test`]
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Budget for each fetch and for the test run
    pub timeout: Duration,
    pub skip_test: bool,
    pub cancel: CancellationToken,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            skip_test: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// Result of an install operation
#[derive(Debug, Clone)]
pub struct InstallReport {
    /// Formula that was asked for
    pub target: String,
    /// Newly installed formulas, dependencies first
    pub installed: Vec<InstalledRecord>,
    /// Plan entries that were already installed
    pub satisfied: Vec<String>,
    pub test: TestOutcome,
    /// Time taken (milliseconds)
    pub time_ms: u64,
}

impl InstallReport {
    /// Nothing was installed because the target already was
    pub fn already_installed(&self) -> bool {
        self.installed.is_empty() && self.satisfied.iter().any(|n| *n == self.target)
    }
}

pub struct PackageManager<F = DefaultFetcher> {
    config: Config,
    index: FormulaIndex,
    installed: InstalledSet,
    installer: Installer,
    fetcher: F,
    notifier: Box<dyn Notifier>,
    cache: Option<ArtifactCache>,
}

impl PackageManager<DefaultFetcher> {
    /// Load formulas and the installed set, fetching over HTTP(S)
    ///
    /// # Errors
    ///
    /// Fails if a formula file is malformed, the registry cannot be read, or
    /// the HTTP client cannot be created.
    pub async fn new(config: Config) -> Result<Self> {
        let http = HttpFetcher::new()
            .map_err(std::io::Error::other)?
            .with_progress(config.progress);
        let policy = RetryPolicy::with_retries(config.retries);
        Self::with_fetcher(config, RetryingFetcher::new(http, policy)).await
    }
}

impl<F: Fetcher> PackageManager<F> {
    pub async fn with_fetcher(config: Config, fetcher: F) -> Result<Self> {
        let index = FormulaIndex::load(&config.formula_dirs).await?;
        let installed = InstalledSet::open(config.layout().registry())?;
        tracing::debug!(
            formulae = index.len(),
            installed = installed.list().len(),
            prefix = %config.prefix.display(),
            "package manager ready"
        );
        Ok(Self::with_parts(config, index, installed, fetcher))
    }

    pub fn with_parts(config: Config, index: FormulaIndex, installed: InstalledSet, fetcher: F) -> Self {
        let cache = config
            .use_cache
            .then(|| ArtifactCache::new(&config.cache_dir));
        let installer = Installer::new(config.layout(), installed.clone());
        Self {
            config,
            index,
            installed,
            installer,
            fetcher,
            notifier: Box::new(TerminalNotifier),
            cache,
        }
    }

    /// Route post-install messages somewhere other than stdout
    pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Box::new(notifier);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &FormulaIndex {
        &self.index
    }

    pub fn installed(&self) -> &InstalledSet {
        &self.installed
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Resolve `name` without touching anything
    pub fn plan(&self, name: &str) -> Result<InstallPlan> {
        resolve::resolve(name, &self.index, &self.installed.snapshot())
    }

    /// Formula definition for `name`
    pub fn info(&self, name: &str) -> Result<&Formula> {
        self.index.get(name).ok_or_else(|| self.unknown(name))
    }

    /// Install `name` and whatever it depends on
    ///
    /// A failing test does not fail the install: it is reported as
    /// [`TestOutcome::Failed`] and the package stays installed.
    ///
    /// # Errors
    ///
    /// The first failing stage's error, naming the formula and stage.
    pub async fn install(&self, name: &str, opts: &InstallOptions) -> Result<InstallReport> {
        let start = Instant::now();
        let plan = self.plan(name)?;

        let mut report = InstallReport {
            target: name.to_string(),
            installed: Vec::new(),
            satisfied: Vec::new(),
            test: TestOutcome::Skipped,
            time_ms: 0,
        };
        let mut target = None;

        for step in plan.steps() {
            match step {
                PlanStep::Satisfied { name } => {
                    tracing::debug!(formula = %name, "already installed");
                    report.satisfied.push(name.clone());
                }
                PlanStep::Install { formula, requested } => {
                    let record = self.install_one(formula, *requested, opts).await?;
                    report.installed.push(record);
                    if *requested {
                        target = Some(formula);
                    }
                }
            }
        }

        if let Some(formula) = target {
            if opts.skip_test {
                tracing::debug!(formula = name, "test skipped");
            } else {
                report.test = self.run_test(formula, opts).await?;
            }
        }

        report.time_ms = start.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Run the test of an installed formula
    ///
    /// # Errors
    ///
    /// [`KegError::UnknownFormula`] if `name` has no definition,
    /// [`KegError::TestFailure`] if it is not installed, or the test's
    /// timeout or cancellation error.
    pub async fn test(&self, name: &str, opts: &InstallOptions) -> Result<TestOutcome> {
        let formula = self.info(name)?;
        if !self.installed.contains(name) {
            return Err(KegError::TestFailure {
                formula: name.to_string(),
                detail: "not installed".to_string(),
            });
        }
        self.run_test(formula, opts).await
    }

    /// Remove every cached download, returning how many were removed
    pub fn cleanup(&self) -> Result<usize> {
        ArtifactCache::new(&self.config.cache_dir).clear()
    }

    async fn install_one(
        &self,
        formula: &Formula,
        requested: bool,
        opts: &InstallOptions,
    ) -> Result<InstalledRecord> {
        let name = formula.name();
        ensure_active(&opts.cancel, name, Stage::Fetch)?;
        let artifact = self.acquire(formula, opts).await?;

        ensure_active(&opts.cancel, name, Stage::Install)?;
        let record = self.place(formula, artifact, requested).await?;

        hooks::run_post_install(formula, self.notifier.as_ref());
        Ok(record)
    }

    /// Verified artifact from the cache, or fetched and verified now
    async fn acquire(&self, formula: &Formula, opts: &InstallOptions) -> Result<VerifiedArtifact> {
        if let Some(artifact) = self.cache.as_ref().and_then(|cache| cache.load(formula)) {
            return Ok(artifact);
        }

        let bytes = self.fetch(formula, opts).await?;

        ensure_active(&opts.cancel, formula.name(), Stage::Verify)?;
        let artifact = verify::verify(formula.name(), bytes, formula.checksum())?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(formula, &artifact) {
                tracing::warn!(formula = formula.name(), error = %e, "failed to cache download");
            }
        }
        Ok(artifact)
    }

    /// Run the blocking placement off the async runtime
    async fn place(
        &self,
        formula: &Formula,
        artifact: VerifiedArtifact,
        requested: bool,
    ) -> Result<InstalledRecord> {
        let installer = self.installer.clone();
        let owned = formula.clone();
        tokio::task::spawn_blocking(move || installer.install(&owned, artifact, requested))
            .await
            .map_err(|e| {
                KegError::install(
                    formula.name(),
                    self.installer.prefix().keg(formula.name(), formula.version()),
                    std::io::Error::other(e),
                )
            })?
    }

    async fn fetch(&self, formula: &Formula, opts: &InstallOptions) -> Result<Vec<u8>> {
        let name = formula.name();
        tracing::debug!(formula = name, url = formula.source_url(), "fetching");

        tokio::select! {
            biased;
            _ = opts.cancel.cancelled() => Err(KegError::Cancelled {
                formula: name.to_string(),
                stage: Stage::Fetch,
            }),
            result = tokio::time::timeout(opts.timeout, self.fetcher.fetch(formula.source_url())) => {
                match result {
                    Ok(Ok(bytes)) => Ok(bytes),
                    Ok(Err(source)) => Err(KegError::Fetch {
                        formula: name.to_string(),
                        source,
                    }),
                    Err(_) => Err(KegError::Timeout {
                        formula: name.to_string(),
                        stage: Stage::Fetch,
                        after: opts.timeout,
                    }),
                }
            }
        }
    }

    async fn run_test(&self, formula: &Formula, opts: &InstallOptions) -> Result<TestOutcome> {
        ensure_active(&opts.cancel, formula.name(), Stage::Test)?;
        let env = TestEnv {
            bin_dir: self.config.layout().bin(),
            timeout: opts.timeout,
        };
        match hooks::run_test(formula, &env, &opts.cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(KegError::TestFailure { formula, detail }) => {
                tracing::warn!(formula = %formula, "test failed");
                Ok(TestOutcome::Failed(detail))
            }
            Err(e) => Err(e),
        }
    }

    fn unknown(&self, name: &str) -> KegError {
        KegError::UnknownFormula {
            name: name.to_string(),
            suggestion: self.index.suggest(name),
        }
    }
}

fn ensure_active(cancel: &CancellationToken, formula: &str, stage: Stage) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(KegError::Cancelled {
            formula: formula.to_string(),
            stage,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, FetchErrorKind};
    use crate::formula::FormulaDef;
    use crate::hooks::SilentNotifier;
    use crate::verify::sha256_hex;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MapFetcher {
        artifacts: HashMap<String, Vec<u8>>,
        calls: Mutex<Vec<String>>,
    }

    impl Fetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            self.artifacts
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::new(FetchErrorKind::NotFound, url, "HTTP 404"))
        }
    }

    fn formula(name: &str, payload: &[u8], deps: &[&str]) -> Formula {
        Formula::from_def(FormulaDef {
            name: name.into(),
            source_url: format!("https://example.com/{name}/v1.0.0/{name}"),
            checksum: sha256_hex(payload),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        })
        .unwrap()
    }

    fn manager(root: &std::path::Path, formulae: Vec<(Formula, &[u8])>) -> PackageManager<MapFetcher> {
        let mut fetcher = MapFetcher::default();
        for (formula, payload) in &formulae {
            fetcher
                .artifacts
                .insert(formula.source_url().to_string(), payload.to_vec());
        }
        let index = FormulaIndex::from_formulae(formulae.into_iter().map(|(f, _)| f)).unwrap();
        let mut config = Config::for_prefix(root);
        config.use_cache = false;
        PackageManager::with_parts(config, index, InstalledSet::in_memory(), fetcher)
            .with_notifier(SilentNotifier)
    }

    #[tokio::test]
    async fn test_dependency_installed_before_dependent() {
        let tmp = tempfile::tempdir().unwrap();
        let pm = manager(
            tmp.path(),
            vec![
                (formula("app", b"app", &["lib"]), b"app"),
                (formula("lib", b"lib", &[]), b"lib"),
            ],
        );

        let report = pm.install("app", &InstallOptions::default()).await.unwrap();

        let names: Vec<_> = report.installed.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["lib", "app"]);
        assert!(report.installed[0].sequence < report.installed[1].sequence);
        assert!(!report.installed[0].installed_on_request);
        assert_eq!(report.test, TestOutcome::NotDefined);
    }

    #[tokio::test]
    async fn test_fetch_failure_stops_the_plan() {
        let tmp = tempfile::tempdir().unwrap();
        let mut pm = manager(
            tmp.path(),
            vec![
                (formula("app", b"app", &["lib"]), b"app"),
                (formula("lib", b"lib", &[]), b"lib"),
            ],
        );
        pm.fetcher.artifacts.clear();

        let err = pm.install("app", &InstallOptions::default()).await.unwrap_err();
        assert_eq!(err.formula(), Some("lib"));
        assert_eq!(err.exit_code(), 21);
        assert_eq!(pm.fetcher.calls.lock().unwrap().len(), 1);
        assert!(pm.installed().list().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let tmp = tempfile::tempdir().unwrap();
        let pm = manager(tmp.path(), vec![(formula("app", b"app", &[]), b"app")]);
        let opts = InstallOptions::default();
        opts.cancel.cancel();

        let err = pm.install("app", &opts).await.unwrap_err();
        assert!(matches!(err, KegError::Cancelled { stage: Stage::Fetch, .. }));
        assert!(pm.fetcher.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_install_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let pm = manager(tmp.path(), vec![(formula("app", b"app", &[]), b"app")]);
        pm.install("app", &InstallOptions::default()).await.unwrap();

        let report = pm.install("app", &InstallOptions::default()).await.unwrap();
        assert!(report.already_installed());
        assert_eq!(report.test, TestOutcome::Skipped);
        assert_eq!(pm.fetcher.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_place_runs_off_the_runtime() {
        let tmp = tempfile::tempdir().unwrap();
        let app = formula("app", b"app", &[]);
        let pm = manager(tmp.path(), vec![(app.clone(), b"app")]);
        let artifact = verify::verify("app", b"app".to_vec(), app.checksum()).unwrap();

        let record = pm.place(&app, artifact, true).await.unwrap();

        assert_eq!(record.install_path, tmp.path().join("Cellar/app/1.0.0"));
        assert!(pm.installed().contains("app"));
        assert!(tmp.path().join("bin/app").exists());
    }

    #[test]
    fn test_ensure_active() {
        let cancel = CancellationToken::new();
        assert!(ensure_active(&cancel, "app", Stage::Verify).is_ok());
        cancel.cancel();
        assert_eq!(
            ensure_active(&cancel, "app", Stage::Verify)
                .unwrap_err()
                .exit_code(),
            130
        );
    }
}
