use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tunables of the session engine. Every field has a default, so an empty
/// TOML or JSON document yields the stock configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix of every storage key this engine writes
    pub storage_namespace: String,
    pub session_id_prefix: String,
    /// Longest idle gap after which a session is still resumed
    pub idle_window_minutes: i64,
    /// Maximum number of archived sessions kept per student
    pub history_limit: usize,
    /// Regular-chat counts at which the message-volume warning fires
    pub volume_warning_counts: Vec<usize>,
    /// Regular-chat counts at which the reflection prompt fires (tutor mode only)
    pub reflection_prompt_counts: Vec<usize>,
    /// How long a manual mode toggle shadows the persisted mode
    pub manual_override_minutes: i64,
    pub grading_timeout_secs: u64,
    /// Short answers longer than this count as correct when grading is unavailable
    pub short_answer_min_len: usize,
    /// Pass threshold used when a unit does not define one
    pub default_pass_threshold: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_namespace: "tutorchat".to_string(),
            session_id_prefix: "session".to_string(),
            idle_window_minutes: 30,
            history_limit: 50,
            volume_warning_counts: vec![13, 14],
            reflection_prompt_counts: vec![12, 13],
            manual_override_minutes: 5,
            grading_timeout_secs: 20,
            short_answer_min_len: 10,
            default_pass_threshold: 2,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "history_limit",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.idle_window_minutes <= 0 {
            return Err(ConfigError::Invalid {
                field: "idle_window_minutes",
                reason: format!("must be positive, got {}", self.idle_window_minutes),
            });
        }
        if self.manual_override_minutes < 0 {
            return Err(ConfigError::Invalid {
                field: "manual_override_minutes",
                reason: format!("must not be negative, got {}", self.manual_override_minutes),
            });
        }
        check_minutes("idle_window_minutes", self.idle_window_minutes)?;
        check_minutes("manual_override_minutes", self.manual_override_minutes)?;
        if self.storage_namespace.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "storage_namespace",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Saturates for values `validate` would reject
    pub fn idle_window(&self) -> Duration {
        Duration::try_minutes(self.idle_window_minutes).unwrap_or(Duration::MAX)
    }

    pub fn manual_override_window(&self) -> Duration {
        Duration::try_minutes(self.manual_override_minutes).unwrap_or(Duration::MAX)
    }

    pub fn grading_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.grading_timeout_secs)
    }
}

fn check_minutes(field: &'static str, minutes: i64) -> Result<(), ConfigError> {
    if Duration::try_minutes(minutes).is_none() {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{minutes} minutes is out of range"),
        });
    }
    Ok(())
}
