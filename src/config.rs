//! Braid project configuration (`.braid/config.toml`).
//!
//! Defines the typed configuration for the merge engine: target branch,
//! analyzer extension whitelist, AI budget, and VCS timeouts. Missing fields
//! use defaults; a missing file means all defaults (no error).

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Name of the state directory under the project root.
pub const STATE_DIR: &str = ".braid";

/// Name of the config file inside the state directory.
pub const CONFIG_FILE: &str = "config.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level Braid project configuration.
///
/// Parsed from `.braid/config.toml` under the project root.
#[derive(Clone, Debug, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct BraidConfig {
    /// Repository-level settings.
    #[serde(default)]
    pub repo: RepoConfig,

    /// Semantic analyzer settings.
    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    /// Merge engine settings.
    #[serde(default)]
    pub merge: MergeConfig,
}

impl BraidConfig {
    /// Load configuration for a project root.
    ///
    /// Reads `<root>/.braid/config.toml`. A missing file yields the default
    /// configuration; a present-but-invalid file is an error.
    pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
        let path = project_root.join(STATE_DIR).join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| ConfigError {
            path: Some(path.clone()),
            message: format!("could not read config: {e}"),
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError {
            path: Some(path),
            message: format!("could not parse config: {e}"),
        })
    }
}

// ---------------------------------------------------------------------------
// RepoConfig
// ---------------------------------------------------------------------------

/// Repository-level settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    /// The target branch merges land on (default: `"main"`).
    #[serde(default = "default_branch")]
    pub branch: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            branch: default_branch(),
        }
    }
}

fn default_branch() -> String {
    "main".to_owned()
}

// ---------------------------------------------------------------------------
// AnalyzerConfig
// ---------------------------------------------------------------------------

/// Semantic analyzer settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzerConfig {
    /// File extensions the analyzer classifies. Files outside this set are
    /// tracked but produce empty analyses.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    [".py", ".js", ".jsx", ".ts", ".tsx"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
}

// ---------------------------------------------------------------------------
// MergeConfig
// ---------------------------------------------------------------------------

/// Merge engine settings.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Whether the AI resolver may be consulted for hard conflicts.
    ///
    /// When false (or when no AI function is configured) every AI-bound
    /// conflict is flagged for human review instead.
    #[serde(default = "default_enable_ai")]
    pub enable_ai: bool,

    /// Token budget for a single AI resolution context.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Timeout for individual git subprocess calls, in seconds.
    #[serde(default = "default_vcs_timeout_secs")]
    pub vcs_timeout_secs: u64,

    /// Suppress all writes (merged files, reports, state updates).
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            enable_ai: default_enable_ai(),
            max_context_tokens: default_max_context_tokens(),
            vcs_timeout_secs: default_vcs_timeout_secs(),
            dry_run: false,
        }
    }
}

const fn default_enable_ai() -> bool {
    true
}

const fn default_max_context_tokens() -> usize {
    4000
}

const fn default_vcs_timeout_secs() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// A configuration file could not be loaded or parsed.
#[derive(Debug)]
pub struct ConfigError {
    /// Path to the offending file, when known.
    pub path: Option<PathBuf>,
    /// Human-readable description of the problem.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(p) => write!(f, "config error in '{}': {}", p.display(), self.message),
            None => write!(f, "config error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
