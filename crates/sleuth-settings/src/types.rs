//! Settings types. JSON keys are camelCase; every section falls back to its
//! defaults when absent.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SleuthSettings {
    pub model: ModelSettings,
    pub retry: RetrySettings,
    pub compaction: CompactionSettings,
    pub executor: ExecutorSettings,
    pub events: EventSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

impl SleuthSettings {
    /// Cross-field checks that a per-field parser can't express.
    pub fn validate(&self) -> Result<()> {
        let c = &self.compaction;
        if c.max_tokens_for_recent_messages > c.max_tokens_before_summary {
            return Err(SettingsError::InvalidValue(format!(
                "compaction.maxTokensForRecentMessages ({}) exceeds maxTokensBeforeSummary ({})",
                c.max_tokens_for_recent_messages, c.max_tokens_before_summary
            )));
        }
        if c.chars_per_token == 0 {
            return Err(SettingsError::InvalidValue(
                "compaction.charsPerToken must be positive".into(),
            ));
        }
        if self.executor.steps_per_plan_step == 0 {
            return Err(SettingsError::InvalidValue(
                "executor.stepsPerPlanStep must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(SettingsError::InvalidValue(format!(
                "retry.jitterFactor ({}) must be within 0.0..=1.0",
                self.retry.jitter_factor
            )));
        }
        Ok(())
    }
}

/// Collaborator model endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSettings {
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    /// Model name sent with every request.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub request_timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            request_timeout_ms: 300_000,
            temperature: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown_ms: 60_000,
        }
    }
}

/// Context compaction thresholds, in estimated tokens.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompactionSettings {
    pub enabled: bool,
    pub max_tokens_before_summary: usize,
    pub max_tokens_for_recent_messages: usize,
    pub chars_per_token: usize,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tokens_before_summary: 128 * 1024,
            max_tokens_for_recent_messages: 25 * 1024,
            chars_per_token: 4,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorSettings {
    /// Transition budget per plan step.
    pub steps_per_plan_step: usize,
    /// Extra transitions on top of the per-step budget.
    pub iteration_slack: usize,
    /// Truncation applied to findings/actions in step events.
    pub findings_preview_chars: usize,
    /// Truncation applied to the report in the report event.
    pub report_preview_chars: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            steps_per_plan_step: 5,
            iteration_slack: 10,
            findings_preview_chars: 2000,
            report_preview_chars: 5000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventSettings {
    pub subscriber_buffer: usize,
    /// Record every event into the session database.
    pub persist: bool,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
            persist: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub db_path: String,
    pub log_db_path: String,
    pub log_to_sqlite: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: "~/.sleuth/database/sleuth.db".into(),
            log_db_path: "~/.sleuth/database/logs.db".into(),
            log_to_sqlite: true,
        }
    }
}

impl StorageSettings {
    pub fn db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }

    pub fn log_db_path(&self) -> PathBuf {
        expand_home(&self.log_db_path)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = SleuthSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.compaction.max_tokens_before_summary, 131_072);
        assert_eq!(settings.compaction.max_tokens_for_recent_messages, 25_600);
        assert_eq!(settings.events.subscriber_buffer, 256);
        assert_eq!(settings.executor.steps_per_plan_step, 5);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(SleuthSettings::default()).unwrap();
        assert!(json["compaction"]["maxTokensBeforeSummary"].is_number());
        assert!(json["model"]["apiKeyEnv"].is_string());
        assert!(json["model"].get("temperature").is_none());
    }

    #[test]
    fn recent_budget_above_trigger_rejected() {
        let mut settings = SleuthSettings::default();
        settings.compaction.max_tokens_for_recent_messages = 200_000;
        assert!(matches!(settings.validate(), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn bad_jitter_rejected() {
        let mut settings = SleuthSettings::default();
        settings.retry.jitter_factor = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn expand_home_only_touches_tilde_prefix() {
        assert_eq!(expand_home("/var/db.sqlite"), PathBuf::from("/var/db.sqlite"));
        assert!(!expand_home("~/x.db").to_string_lossy().starts_with('~'));
    }
}
