//! Engine Configuration
//!
//! Every tunable of the engine lives here. The config is plain serde data so
//! hosts can ship it as JSON next to a program; every field has a default, so
//! `{}` is a valid config.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What to do with nodes that carry a blocking diagnostic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Evaluate anyway; the blocked node yields a CompileTimeConflict exception.
    #[default]
    Attach,
    /// Refuse to start a pass while any blocking diagnostic is reachable.
    Refuse,
}

/// What a read of an unavailable stream produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailablePolicy {
    /// Read the catalog default and report the stream as degraded.
    #[default]
    Degrade,
    /// Read a StreamUnavailable exception.
    Exception,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on steps executed in one pass.
    #[serde(default = "default_step_budget")]
    pub step_budget: usize,

    /// History entries retained per stream. Versions keep growing past it.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Maximum number of cached non-reaction values. `None` keeps everything.
    #[serde(default)]
    pub cache_capacity: Option<usize>,

    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    #[serde(default)]
    pub unavailable_policy: UnavailablePolicy,
}

fn default_step_budget() -> usize {
    250_000
}

fn default_history_limit() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_budget: default_step_budget(),
            history_limit: default_history_limit(),
            cache_capacity: None,
            conflict_policy: ConflictPolicy::default(),
            unavailable_policy: UnavailablePolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn with_step_budget(mut self, step_budget: usize) -> Self {
        self.step_budget = step_budget;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_unavailable_policy(mut self, policy: UnavailablePolicy) -> Self {
        self.unavailable_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step_budget == 0 {
            return Err(ConfigError::Invalid("step_budget must be positive".into()));
        }
        if self.history_limit == 0 {
            return Err(ConfigError::Invalid("history_limit must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_uses_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.step_budget, 250_000);
    }

    #[test]
    fn fields_override_defaults() {
        let config = EngineConfig::from_json(
            r#"{"step_budget": 10, "conflict_policy": "refuse", "cache_capacity": 3}"#,
        )
        .unwrap();
        assert_eq!(config.step_budget, 10);
        assert_eq!(config.conflict_policy, ConflictPolicy::Refuse);
        assert_eq!(config.cache_capacity, Some(3));
        assert_eq!(config.unavailable_policy, UnavailablePolicy::Degrade);
    }

    #[test]
    fn zero_budget_is_rejected() {
        let error = EngineConfig::from_json(r#"{"step_budget": 0}"#).unwrap_err();
        assert!(matches!(error, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(
            EngineConfig::from_json("{"),
            Err(ConfigError::Json(_))
        ));
    }
}
