//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SleuthSettings::default()`]
//! 2. If `~/.sleuth/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `SLEUTH_*` environment variable overrides (highest priority)
//! 4. Validate cross-field constraints

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{expand_home, SleuthSettings};

/// Resolve the path to the settings file (`~/.sleuth/settings.json`).
pub fn settings_path() -> PathBuf {
    expand_home("~/.sleuth/settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SleuthSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<SleuthSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<SleuthSettings> {
    let defaults = serde_json::to_value(SleuthSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `SLEUTH_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut SleuthSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. Invalid values are ignored with a warning.
pub fn apply_overrides_from(settings: &mut SleuthSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Model ───────────────────────────────────────────────────────
    if let Some(v) = env.string("SLEUTH_BASE_URL") {
        settings.model.base_url = v;
    }
    if let Some(v) = env.string("SLEUTH_MODEL") {
        settings.model.model = v;
    }
    if let Some(v) = env.string("SLEUTH_API_KEY_ENV") {
        settings.model.api_key_env = v;
    }
    if let Some(v) = env.u64("SLEUTH_MAX_RETRIES", 0, 20) {
        settings.retry.max_retries = v as u32;
    }

    // ── Compaction ──────────────────────────────────────────────────
    if let Some(v) = env.bool("SLEUTH_COMPACTION_ENABLED") {
        settings.compaction.enabled = v;
    }
    if let Some(v) = env.usize("SLEUTH_MAX_TOKENS_BEFORE_SUMMARY", 1024, 10_000_000) {
        settings.compaction.max_tokens_before_summary = v;
    }
    if let Some(v) = env.usize("SLEUTH_MAX_TOKENS_RECENT", 256, 10_000_000) {
        settings.compaction.max_tokens_for_recent_messages = v;
    }

    // ── Storage / logging ───────────────────────────────────────────
    if let Some(v) = env.string("SLEUTH_DB_PATH") {
        settings.storage.db_path = v;
    }
    if let Some(v) = env.string("SLEUTH_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("SLEUTH_LOG_JSON") {
        settings.logging.json = v;
    }
    if let Some(v) = env.bool("SLEUTH_PERSIST_EVENTS") {
        settings.events.persist = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"compaction": {"enabled": true, "charsPerToken": 4}});
        let source = serde_json::json!({"compaction": {"charsPerToken": 3}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["compaction"]["charsPerToken"], 3);
        assert_eq!(merged["compaction"]["enabled"], true);
    }

    #[test]
    fn merge_skips_null_and_replaces_arrays() {
        let target = serde_json::json!({"a": 1, "list": [1, 2, 3]});
        let source = serde_json::json!({"a": null, "list": [9]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["list"], serde_json::json!([9]));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_file_layer(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.model.model, "gpt-4o");
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"model": {"model": "qwen-max"}, "compaction": {"maxTokensForRecentMessages": 4096}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.model.model, "qwen-max");
        assert_eq!(settings.model.api_key_env, "OPENAI_API_KEY");
        assert_eq!(settings.compaction.max_tokens_for_recent_messages, 4096);
        assert_eq!(settings.compaction.max_tokens_before_summary, 131_072);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_file_layer(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn env_overrides_win() {
        let mut settings = SleuthSettings::default();
        apply_overrides_from(
            &mut settings,
            lookup(&[
                ("SLEUTH_MODEL", "deepseek-chat"),
                ("SLEUTH_COMPACTION_ENABLED", "off"),
                ("SLEUTH_MAX_TOKENS_RECENT", "8192"),
                ("SLEUTH_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(settings.model.model, "deepseek-chat");
        assert!(!settings.compaction.enabled);
        assert_eq!(settings.compaction.max_tokens_for_recent_messages, 8192);
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut settings = SleuthSettings::default();
        apply_overrides_from(
            &mut settings,
            lookup(&[
                ("SLEUTH_MAX_TOKENS_BEFORE_SUMMARY", "lots"),
                ("SLEUTH_PERSIST_EVENTS", "maybe"),
                ("SLEUTH_MODEL", ""),
            ]),
        );
        assert_eq!(settings.compaction.max_tokens_before_summary, 131_072);
        assert!(settings.events.persist);
        assert_eq!(settings.model.model, "gpt-4o");
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
        assert_eq!(parse_u64_range("5", 0, 10), Some(5));
        assert_eq!(parse_u64_range("11", 0, 10), None);
        assert_eq!(parse_usize_range("-1", 0, 10), None);
    }

    #[test]
    fn load_validates_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"compaction": {"maxTokensBeforeSummary": 1000, "maxTokensForRecentMessages": 5000}}"#)
            .unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }
}
