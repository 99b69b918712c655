//! Formula model: the in-memory description of one installable package.
//!
//! A formula is read from a JSON description ([`FormulaDef`]) and validated
//! once into an immutable [`Formula`]. Different versions of the same tool are
//! different `Formula` values, never different types:
//!
//! ```json
//! {
//!   "name": "rs-git-fsmonitor",
//!   "description": "Git fsmonitor hook written in Rust",
//!   "source_url": "https://github.com/jgavris/rs-git-fsmonitor/releases/download/v0.1.1/rs-git-fsmonitor",
//!   "checksum": "4faf1723ea75a76e0dd6187d5a3e9074fd5e93dd13f1024843d4ed256ff689e8",
//!   "dependencies": ["watchman"]
//! }
//! ```
//!
//! The version is taken from the `version` field, or derived from the first
//! version-looking segment of the source URL (`v0.1.1` above gives `0.1.1`).

use crate::error::{KegError, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Length of a hex-encoded SHA-256 digest
pub const SHA256_HEX_LEN: usize = 64;

/// Default mode for placed artifacts (rwxr-xr-x)
pub const DEFAULT_MODE: u32 = 0o755;

const SUPPORTED_SCHEMES: &[&str] = &["https", "http", "file"];

/// A validated SHA-256 digest, stored lower-case
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Parse a 64-character hex digest (either case)
    pub fn parse(digest: &str) -> std::result::Result<Self, String> {
        let digest = digest.trim();
        if digest.len() != SHA256_HEX_LEN {
            return Err(format!(
                "checksum must be {} hex characters, got {}",
                SHA256_HEX_LEN,
                digest.len()
            ));
        }
        if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("checksum is not hexadecimal: {}", digest));
        }
        Ok(Self(digest.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a hex digest
    pub fn matches(&self, hex_digest: &str) -> bool {
        self.0.eq_ignore_ascii_case(hex_digest)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Keg subdirectory an artifact is placed in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallDir {
    #[default]
    Bin,
    Libexec,
    Share,
}

impl InstallDir {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallDir::Bin => "bin",
            InstallDir::Libexec => "libexec",
            InstallDir::Share => "share",
        }
    }
}

/// Place the fetched artifact at `<keg>/<dir>/<name>` with `mode`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallStep {
    #[serde(default)]
    pub dir: InstallDir,
    pub name: String,
    #[serde(default = "default_mode", with = "octal_mode")]
    pub mode: u32,
}

fn default_mode() -> u32 {
    DEFAULT_MODE
}

/// Modes are written as octal strings ("755", "0o644") in formula files
mod octal_mode {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(mode: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:o}", mode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let digits = raw.strip_prefix("0o").unwrap_or(&raw);
        let mode = u32::from_str_radix(digits, 8)
            .map_err(|_| D::Error::custom(format!("invalid octal mode: {}", raw)))?;
        if mode > 0o7777 {
            return Err(D::Error::custom(format!("mode out of range: {}", raw)));
        }
        Ok(mode)
    }
}

/// Formula description as written on disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormulaDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub source_url: String,
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install: Vec<InstallStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_install_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
}

/// A validated, immutable formula
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    name: String,
    description: Option<String>,
    homepage: Option<String>,
    version: String,
    source_url: String,
    artifact_name: String,
    checksum: Checksum,
    dependencies: Vec<String>,
    install_steps: Vec<InstallStep>,
    post_install_message: Option<String>,
    test_command: Option<String>,
}

impl Formula {
    /// Validate a description into a formula
    pub fn from_def(def: FormulaDef) -> Result<Self> {
        let name = def.name.trim().to_string();
        if name.is_empty() {
            return Err(KegError::malformed("<unnamed>", "name is empty"));
        }
        if !is_valid_name(&name) {
            return Err(KegError::malformed(
                &name,
                "name may only contain letters, digits and @ . _ + -",
            ));
        }

        let source_url = def.source_url.trim().to_string();
        if source_url.is_empty() {
            return Err(KegError::malformed(&name, "source_url is empty"));
        }
        let url = Url::parse(&source_url)
            .map_err(|e| KegError::malformed(&name, format!("invalid source_url: {}", e)))?;
        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(KegError::malformed(
                &name,
                format!("unsupported URL scheme: {}", url.scheme()),
            ));
        }
        let artifact_name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .ok_or_else(|| KegError::malformed(&name, "source_url has no file name"))?;

        if def.checksum.trim().is_empty() {
            return Err(KegError::malformed(&name, "checksum is empty"));
        }
        let checksum = Checksum::parse(&def.checksum).map_err(|e| KegError::malformed(&name, e))?;

        let version = match def.version.map(|v| v.trim().to_string()) {
            Some(v) if !v.is_empty() => v,
            Some(_) => return Err(KegError::malformed(&name, "version is empty")),
            None => version_from_url(&url).ok_or_else(|| {
                KegError::malformed(&name, "no version given and none found in source_url")
            })?,
        };
        if !is_single_component(&version) {
            return Err(KegError::malformed(&name, format!("invalid version: {}", version)));
        }

        let mut seen = HashSet::new();
        for dep in &def.dependencies {
            if dep.trim().is_empty() {
                return Err(KegError::malformed(&name, "empty dependency name"));
            }
            if !is_valid_name(dep) {
                return Err(KegError::malformed(
                    &name,
                    format!("invalid dependency name: {:?}", dep),
                ));
            }
            if !seen.insert(dep.as_str()) {
                return Err(KegError::malformed(
                    &name,
                    format!("dependency listed twice: {}", dep),
                ));
            }
        }

        let install_steps = if def.install.is_empty() {
            vec![InstallStep {
                dir: InstallDir::Bin,
                name: artifact_name.clone(),
                mode: DEFAULT_MODE,
            }]
        } else {
            def.install
        };
        let mut targets = HashSet::new();
        for step in &install_steps {
            if !is_single_component(&step.name) {
                return Err(KegError::malformed(
                    &name,
                    format!("install name must be a plain file name: {}", step.name),
                ));
            }
            if !targets.insert((step.dir, step.name.as_str())) {
                return Err(KegError::malformed(
                    &name,
                    format!("{}/{} is installed twice", step.dir.as_str(), step.name),
                ));
            }
        }

        Ok(Self {
            name,
            description: def.description,
            homepage: def.homepage,
            version,
            source_url,
            artifact_name,
            checksum,
            dependencies: def.dependencies,
            install_steps,
            post_install_message: def.post_install_message.filter(|m| !m.trim().is_empty()),
            test_command: def.test_command.filter(|c| !c.trim().is_empty()),
        })
    }

    /// Parse and validate a JSON description
    pub fn from_json_str(json: &str) -> Result<Self> {
        let def: FormulaDef = serde_json::from_str(json)
            .map_err(|e| KegError::malformed("<unparsed>", e.to_string()))?;
        Self::from_def(def)
    }

    /// Read a JSON description from disk
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents).map_err(|e| with_file_context(e, path))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn homepage(&self) -> Option<&str> {
        self.homepage.as_deref()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Last path segment of the source URL
    pub fn artifact_name(&self) -> &str {
        &self.artifact_name
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn install_steps(&self) -> &[InstallStep] {
        &self.install_steps
    }

    pub fn post_install_message(&self) -> Option<&str> {
        self.post_install_message.as_deref()
    }

    pub fn test_command(&self) -> Option<&str> {
        self.test_command.as_deref()
    }

    /// Convert back into its on-disk description
    pub fn to_def(&self) -> FormulaDef {
        FormulaDef {
            name: self.name.clone(),
            description: self.description.clone(),
            homepage: self.homepage.clone(),
            version: Some(self.version.clone()),
            source_url: self.source_url.clone(),
            checksum: self.checksum.to_string(),
            dependencies: self.dependencies.clone(),
            install: self.install_steps.clone(),
            post_install_message: self.post_install_message.clone(),
            test_command: self.test_command.clone(),
        }
    }
}

/// Prefix parse errors with the file they came from
pub(crate) fn with_file_context(err: KegError, path: &Path) -> KegError {
    match err {
        KegError::MalformedFormula { name, reason } => {
            let name = if name == "<unparsed>" {
                path.file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or(name)
            } else {
                name
            };
            KegError::MalformedFormula {
                name,
                reason: format!("{} ({})", reason, path.display()),
            }
        }
        other => other,
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '+' | '-'))
}

fn is_single_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

/// First URL path segment that looks like a version (`v1.2.3`, `0.1.1`)
fn version_from_url(url: &Url) -> Option<String> {
    url.path_segments()?.find_map(|segment| {
        let candidate = segment.strip_prefix('v').unwrap_or(segment);
        let looks_like_version = candidate.starts_with(|c: char| c.is_ascii_digit())
            && candidate.contains('.')
            && candidate
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.');
        looks_like_version.then(|| candidate.to_string())
    })
}
