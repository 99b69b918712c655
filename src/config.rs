//! Runtime configuration.
//!
//! Values come from command-line flags first, then the environment, then
//! built-in defaults:
//!
//! | Setting | Environment | Default |
//! |---|---|---|
//! | prefix | `KEG_PREFIX` | `/usr/local` |
//! | formula directories | `KEG_FORMULA_PATH` (colon-separated) | `./Formula` |
//! | download cache | `KEG_CACHE`, `XDG_CACHE_HOME`, `HOME` | `~/.cache/keg` |

use crate::cache;
use crate::cellar::{self, Prefix};
use std::path::PathBuf;
use std::time::Duration;

/// Default per-stage timeout for fetching and testing
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Formula directory used when none is configured
pub const DEFAULT_FORMULA_DIR: &str = "Formula";

#[derive(Debug, Clone)]
pub struct Config {
    pub prefix: PathBuf,
    /// Searched in order; a formula defined twice is an error
    pub formula_dirs: Vec<PathBuf>,
    pub cache_dir: PathBuf,
    pub use_cache: bool,
    /// Applies to each fetch and to the test run separately
    pub timeout: Duration,
    /// Extra fetch attempts for transport and server errors
    pub retries: u32,
    /// Show a download progress bar
    pub progress: bool,
}

impl Config {
    /// Configuration from the environment and defaults
    pub fn from_env() -> Self {
        let formula_dirs = std::env::var_os("KEG_FORMULA_PATH")
            .map(|paths| {
                std::env::split_paths(&paths)
                    .filter(|p| !p.as_os_str().is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|dirs| !dirs.is_empty())
            .unwrap_or_else(|| vec![PathBuf::from(DEFAULT_FORMULA_DIR)]);

        let cache_dir = std::env::var_os("KEG_CACHE")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(cache::cache_dir);

        Self {
            prefix: cellar::detect_prefix(),
            formula_dirs,
            cache_dir,
            use_cache: true,
            timeout: DEFAULT_TIMEOUT,
            retries: 0,
            progress: false,
        }
    }

    /// Self-contained configuration rooted at `prefix`, ignoring the environment
    ///
    /// Formulas are read from `<prefix>/Formula` and the cache lives in
    /// `<prefix>/var/cache/keg`.
    pub fn for_prefix(prefix: impl Into<PathBuf>) -> Self {
        let prefix = prefix.into();
        Self {
            formula_dirs: vec![prefix.join(DEFAULT_FORMULA_DIR)],
            cache_dir: prefix.join("var/cache/keg"),
            prefix,
            use_cache: true,
            timeout: DEFAULT_TIMEOUT,
            retries: 0,
            progress: false,
        }
    }

    pub fn layout(&self) -> Prefix {
        Prefix::new(&self.prefix)
    }
}
