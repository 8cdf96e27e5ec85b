//! Engine configuration
//!
//! [`EngineConfig`] collects the knobs an [`Engine`](crate::Engine) needs beyond
//! the graph itself: the super-step budget, per-node rate limits and the
//! checkpoint backend. It deserializes from YAML or TOML, with
//! `${VAR}` / `${VAR:default}` environment references expanded first.
//!
//! ```yaml
//! recursion_limit: 40
//! rate_limits:
//!   search:
//!     min_delay_secs: 5.0
//!     max_delay_secs: 7.0
//! checkpoint:
//!   backend: file
//!   dir: ${STATEGRAPH_DATA:/var/lib/stategraph}
//! ```
//!
//! The same in TOML:
//!
//! ```toml
//! recursion_limit = 40
//!
//! [rate_limits.search]
//! min_delay_secs = 5.0
//! max_delay_secs = 7.0
//!
//! [checkpoint]
//! backend = "memory"
//! latest_only = true
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{GraphError, Result};
use crate::rate_limit::RateLimiter;

/// Default number of super-steps a single `start`/`resume` may run
pub const DEFAULT_RECURSION_LIMIT: usize = 25;

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum super-steps per `start`/`resume` call
    pub recursion_limit: usize,

    /// Rate limits keyed by node name
    pub rate_limits: HashMap<String, RateLimitConfig>,

    /// Where checkpoints are kept
    pub checkpoint: CheckpointBackend,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            rate_limits: HashMap::new(),
            checkpoint: CheckpointBackend::default(),
        }
    }
}

/// Randomized delay bounds for one node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub min_delay_secs: f64,
    pub max_delay_secs: f64,
}

impl RateLimitConfig {
    pub fn new(min_delay_secs: f64, max_delay_secs: f64) -> Self {
        Self {
            min_delay_secs,
            max_delay_secs,
        }
    }

    /// Build the limiter these bounds describe
    pub fn build(&self) -> Result<RateLimiter> {
        RateLimiter::from_secs(self.min_delay_secs, self.max_delay_secs)
    }
}

/// Checkpoint storage selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum CheckpointBackend {
    /// Process-local storage, lost on exit
    Memory {
        /// Keep only the newest checkpoint per thread
        #[serde(default)]
        latest_only: bool,
    },
    /// Append-only JSON-lines files, one per thread
    File { dir: PathBuf },
}

impl Default for CheckpointBackend {
    fn default() -> Self {
        CheckpointBackend::Memory { latest_only: false }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_rate_limit(mut self, node: impl Into<String>, min_delay_secs: f64, max_delay_secs: f64) -> Self {
        self.rate_limits
            .insert(node.into(), RateLimitConfig::new(min_delay_secs, max_delay_secs));
        self
    }

    pub fn with_checkpoint(mut self, backend: CheckpointBackend) -> Self {
        self.checkpoint = backend;
        self
    }

    /// Parse YAML, expanding environment references first
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(&expand_env(content)?)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML, expanding environment references first
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(&expand_env(content)?)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a `.yaml`, `.yml` or `.toml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content)?,
            Some("toml") => Self::from_toml_str(&content)?,
            _ => {
                return Err(GraphError::Configuration(format!(
                    "unsupported config file {:?}: expected .yaml, .yml or .toml",
                    path
                )))
            }
        };
        tracing::debug!(path = ?path, "Loaded engine configuration");
        Ok(config)
    }

    /// Check limits and delay bounds
    pub fn validate(&self) -> Result<()> {
        if self.recursion_limit == 0 {
            return Err(GraphError::Configuration(
                "recursion_limit must be at least 1".to_string(),
            ));
        }
        for (node, limit) in &self.rate_limits {
            limit.build().map_err(|e| {
                GraphError::Configuration(format!("rate limit for node '{}': {}", node, e))
            })?;
        }
        if let CheckpointBackend::File { dir } = &self.checkpoint {
            if dir.as_os_str().is_empty() {
                return Err(GraphError::Configuration(
                    "file checkpoint backend needs a directory".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Expand `${VAR}` and `${VAR:default}` references
///
/// Unset variables without a default expand to the empty string.
pub fn expand_env(content: &str) -> Result<String> {
    if !content.contains("${") {
        return Ok(content.to_string());
    }

    let re = regex::Regex::new(r"\$\{([^:}]+)(?::([^}]*))?\}")
        .map_err(|e| GraphError::Configuration(format!("invalid expansion pattern: {}", e)))?;

    let expanded = re.replace_all(content, |caps: &regex::Captures<'_>| {
        let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(&caps[1]).unwrap_or_else(|_| default_value.to_string())
    });
    Ok(expanded.into_owned())
}
