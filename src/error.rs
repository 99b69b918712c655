//! Error taxonomy for the install pipeline.
//!
//! Every failure names the formula it belongs to and, where it applies, the
//! pipeline [`Stage`] that produced it. The CLI maps each variant onto a
//! distinct exit code via [`KegError::exit_code`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Pipeline stage a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Load,
    Resolve,
    Fetch,
    Verify,
    Install,
    PostInstall,
    Test,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Resolve => "resolve",
            Stage::Fetch => "fetch",
            Stage::Verify => "verify",
            Stage::Install => "install",
            Stage::PostInstall => "post-install",
            Stage::Test => "test",
        };
        f.write_str(name)
    }
}

/// Why an artifact could not be retrieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Network, DNS or connection failure
    Transport,
    /// The resource does not exist (404/410, missing local file)
    NotFound,
    /// The remote server failed (5xx)
    Server,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchErrorKind::Transport => "transport",
            FetchErrorKind::NotFound => "not found",
            FetchErrorKind::Server => "server",
        };
        f.write_str(name)
    }
}

/// Failure reported by a [`Fetcher`](crate::download::Fetcher)
#[derive(Error, Debug, Clone)]
#[error("{kind} error for {url}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub url: String,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            message: message.into(),
        }
    }

    /// Transport and server failures may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, FetchErrorKind::Transport | FetchErrorKind::Server)
    }
}

#[derive(Error, Debug)]
pub enum KegError {
    #[error("Malformed formula {name}: {reason}")]
    MalformedFormula { name: String, reason: String },

    #[error("Failed to fetch {formula}: {source}")]
    Fetch {
        formula: String,
        #[source]
        source: FetchError,
    },

    #[error("Checksum mismatch for {formula}: expected {expected}, got {actual}")]
    Integrity {
        formula: String,
        expected: String,
        actual: String,
    },

    #[error("Cyclic dependency: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("{formula} depends on {name}, which is neither installed nor defined")]
    MissingDependency { formula: String, name: String },

    #[error("No formula named {name}{}", did_you_mean(suggestion))]
    UnknownFormula {
        name: String,
        suggestion: Option<String>,
    },

    #[error("Failed to install {formula} at {}: {source}", path.display())]
    Install {
        formula: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} of {formula} timed out after {}s", after.as_secs_f64())]
    Timeout {
        formula: String,
        stage: Stage,
        after: Duration,
    },

    #[error("Test for {formula} failed: {detail}")]
    TestFailure { formula: String, detail: String },

    #[error("{stage} of {formula} was cancelled")]
    Cancelled { formula: String, stage: Stage },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean {}?)", s),
        None => String::new(),
    }
}

impl KegError {
    pub(crate) fn malformed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        KegError::MalformedFormula {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn install(
        formula: impl Into<String>,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        KegError::Install {
            formula: formula.into(),
            path: path.into(),
            source,
        }
    }

    /// Formula the failure belongs to, if any
    pub fn formula(&self) -> Option<&str> {
        match self {
            KegError::MalformedFormula { name, .. } | KegError::UnknownFormula { name, .. } => {
                Some(name)
            }
            KegError::Fetch { formula, .. }
            | KegError::Integrity { formula, .. }
            | KegError::MissingDependency { formula, .. }
            | KegError::Install { formula, .. }
            | KegError::Timeout { formula, .. }
            | KegError::TestFailure { formula, .. }
            | KegError::Cancelled { formula, .. } => Some(formula),
            KegError::CyclicDependency { path } => path.first().map(String::as_str),
            KegError::IoError(_) | KegError::JsonError(_) => None,
        }
    }

    /// Stage the failure is attributed to
    pub fn stage(&self) -> Option<Stage> {
        match self {
            KegError::MalformedFormula { .. } => Some(Stage::Load),
            KegError::CyclicDependency { .. }
            | KegError::MissingDependency { .. }
            | KegError::UnknownFormula { .. } => Some(Stage::Resolve),
            KegError::Fetch { .. } => Some(Stage::Fetch),
            KegError::Integrity { .. } => Some(Stage::Verify),
            KegError::Install { .. } => Some(Stage::Install),
            KegError::TestFailure { .. } => Some(Stage::Test),
            KegError::Timeout { stage, .. } | KegError::Cancelled { stage, .. } => Some(*stage),
            KegError::IoError(_) | KegError::JsonError(_) => None,
        }
    }

    /// Process exit code for this failure
    ///
    /// Codes are grouped in ranges: 1x formula data, 2x fetch, 3x integrity,
    /// 4x dependency resolution, 5x installation, 6x timeout, 7x test.
    pub fn exit_code(&self) -> u8 {
        match self {
            KegError::MalformedFormula { .. } => 10,
            KegError::Fetch { source, .. } => match source.kind {
                FetchErrorKind::Transport => 20,
                FetchErrorKind::NotFound => 21,
                FetchErrorKind::Server => 22,
            },
            KegError::Integrity { .. } => 30,
            KegError::MissingDependency { .. } => 40,
            KegError::CyclicDependency { .. } => 41,
            KegError::UnknownFormula { .. } => 42,
            KegError::Install { .. } => 50,
            KegError::Timeout { .. } => 60,
            KegError::TestFailure { .. } => 70,
            KegError::Cancelled { .. } => 130,
            KegError::IoError(_) | KegError::JsonError(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, KegError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_fetch_kind() {
        let codes: Vec<u8> = [
            FetchErrorKind::Transport,
            FetchErrorKind::NotFound,
            FetchErrorKind::Server,
        ]
        .into_iter()
        .map(|kind| {
            KegError::Fetch {
                formula: "tool".to_string(),
                source: FetchError::new(kind, "https://example.com/tool", "boom"),
            }
            .exit_code()
        })
        .collect();

        assert_eq!(codes, vec![20, 21, 22]);
    }

    #[test]
    fn test_cycle_message_shows_path() {
        let err = KegError::CyclicDependency {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Cyclic dependency: a -> b -> a");
        assert_eq!(err.formula(), Some("a"));
        assert_eq!(err.stage(), Some(Stage::Resolve));
    }

    #[test]
    fn test_unknown_formula_suggestion() {
        let err = KegError::UnknownFormula {
            name: "watchmen".into(),
            suggestion: Some("watchman".into()),
        };
        assert_eq!(
            err.to_string(),
            "No formula named watchmen (did you mean watchman?)"
        );
    }

    #[test]
    fn test_only_transport_and_server_retryable() {
        assert!(FetchError::new(FetchErrorKind::Transport, "u", "m").is_retryable());
        assert!(FetchError::new(FetchErrorKind::Server, "u", "m").is_retryable());
        assert!(!FetchError::new(FetchErrorKind::NotFound, "u", "m").is_retryable());
    }
}
