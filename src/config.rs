//! Configuration management for the query engine
//!
//! Provides configuration file support with TOML format, environment
//! variable overrides, and sensible defaults for the planner and the
//! composite evaluator.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Plan builder tuning
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Composite evaluator tuning
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            planner: PlannerConfig::default(),
            evaluator: EvaluatorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Configuration(format!(
                "cannot read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml(&text)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(text: &str) -> Result<Self> {
        let mut config: EngineConfig =
            toml::from_str(text).map_err(|e| Error::Configuration(format!("invalid config: {}", e)))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// `METRIQ_MAX_CONCURRENCY` overrides `evaluator.max_concurrency`,
    /// `METRIQ_MAX_STAGES` overrides `planner.max_stages`.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("METRIQ_MAX_CONCURRENCY") {
            if let Ok(n) = v.parse::<usize>() {
                self.evaluator.max_concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("METRIQ_MAX_STAGES") {
            if let Ok(n) = v.parse::<usize>() {
                self.planner.max_stages = n;
            }
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.planner.max_stages == 0 {
            return Err(Error::Configuration(
                "planner.max_stages must be at least 1".to_string(),
            ));
        }
        if self.planner.max_selectors == 0 {
            return Err(Error::Configuration(
                "planner.max_selectors must be at least 1".to_string(),
            ));
        }
        if self.evaluator.max_concurrency == 0 {
            return Err(Error::Configuration(
                "evaluator.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.planner.bucket_alias.is_empty() {
            return Err(Error::Configuration(
                "planner.bucket_alias must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Plan builder configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlannerConfig {
    /// Output name of the generated timestamp-bucket column
    #[serde(default = "default_bucket_alias")]
    pub bucket_alias: String,

    /// Prefix used for synthetic aggregate aliases
    #[serde(default = "default_alias_prefix")]
    pub synthetic_alias_prefix: String,

    /// Maximum number of chained stages (guards runaway plans)
    #[serde(default = "default_max_stages")]
    pub max_stages: usize,

    /// Maximum number of selectors per request
    #[serde(default = "default_max_selectors")]
    pub max_selectors: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            bucket_alias: default_bucket_alias(),
            synthetic_alias_prefix: default_alias_prefix(),
            max_stages: default_max_stages(),
            max_selectors: default_max_selectors(),
        }
    }
}

impl PlannerConfig {
    /// Set the bucket alias
    pub fn with_bucket_alias(mut self, alias: impl Into<String>) -> Self {
        self.bucket_alias = alias.into();
        self
    }

    /// Set the synthetic alias prefix
    pub fn with_alias_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.synthetic_alias_prefix = prefix.into();
        self
    }
}

/// Composite evaluator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvaluatorConfig {
    /// Maximum number of leaf queries evaluated concurrently
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Maximum depth of a composite expression tree
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_depth: default_max_depth(),
        }
    }
}

impl EvaluatorConfig {
    /// Set the maximum concurrent leaf queries
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }
}

fn default_bucket_alias() -> String {
    "_bucket".to_string()
}

fn default_alias_prefix() -> String {
    "__agg_".to_string()
}

fn default_max_stages() -> usize {
    8
}

fn default_max_selectors() -> usize {
    256
}

fn default_max_concurrency() -> usize {
    num_cpus::get()
}

fn default_max_depth() -> usize {
    64
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.planner.bucket_alias, "_bucket");
        assert_eq!(config.planner.synthetic_alias_prefix, "__agg_");
        assert!(config.evaluator.max_concurrency > 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [planner]
            bucket_alias = "time_bucket"
            "#,
        )
        .unwrap();
        assert_eq!(config.planner.bucket_alias, "time_bucket");
        assert_eq!(config.planner.max_stages, 8);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = EngineConfig::from_toml(
            r#"
            [planner]
            max_stages = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_overrides() {
        let planner = PlannerConfig::default().with_bucket_alias("tb");
        assert_eq!(planner.bucket_alias, "tb");

        let eval = EvaluatorConfig::default().with_max_concurrency(0);
        assert_eq!(eval.max_concurrency, 1);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("metriq.toml");
        std::fs::write(
            &path,
            r#"
            [evaluator]
            max_depth = 16
            "#,
        )
        .unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.evaluator.max_depth, 16);

        assert!(EngineConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}
