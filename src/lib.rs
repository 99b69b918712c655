//! Library interface for keg, a formula-driven installer for pre-built tools
//!
//! The install pipeline is exposed through [`PackageManager`]; the individual
//! stages live in their own modules and can be used on their own.

pub mod cache;
pub mod cellar;
pub mod colors;
pub mod config;
pub mod download;
pub mod error;
pub mod formula;
pub mod hooks;
pub mod install;
pub mod package_manager;
pub mod receipt;
pub mod resolve;
pub mod retry;
pub mod symlink;
pub mod tap;
pub mod verify;

// Re-export commonly used types
pub use cellar::{InstalledRecord, InstalledSet, Prefix};
pub use config::Config;
pub use download::{Fetcher, HttpFetcher};
pub use error::{FetchError, FetchErrorKind, KegError, Result, Stage};
pub use formula::{Formula, FormulaDef};
pub use hooks::{Notifier, TestOutcome};
pub use package_manager::{InstallOptions, InstallReport, PackageManager};
pub use resolve::{InstallPlan, PlanStep, resolve};
pub use tap::FormulaIndex;
pub use verify::{VerifiedArtifact, verify};
