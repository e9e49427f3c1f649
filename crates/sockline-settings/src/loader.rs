//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ClientSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `SOCKLINE_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::ClientSettings;

/// Resolve the path to the settings file (`~/.sockline/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".sockline").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ClientSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ClientSettings> {
    let mut settings = read_layered(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

fn read_layered(path: &Path) -> Result<ClientSettings> {
    let defaults = serde_json::to_value(ClientSettings::default())?;

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
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides read through `lookup`.
///
/// Invalid values are ignored with a warning (file/default value kept).
pub fn apply_env_overrides<F>(settings: &mut ClientSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Endpoint ────────────────────────────────────────────────────
    if let Some(v) = env.string("SOCKLINE_HOST") {
        settings.endpoint.host = v;
    }
    if let Some(v) = env.u16("SOCKLINE_PORT", 1, 65535) {
        settings.endpoint.port = v;
    }

    // ── Handshake ───────────────────────────────────────────────────
    if let Some(v) = env.string("SOCKLINE_PLATFORM") {
        settings.handshake.platform = v;
    }

    // ── Timeouts ────────────────────────────────────────────────────
    if let Some(v) = env.u64("SOCKLINE_REQUEST_TIMEOUT_MS", 100, 86_400_000) {
        settings.timeouts.request_ms = v;
    }
    if let Some(v) = env.u64("SOCKLINE_HANDSHAKE_TIMEOUT_MS", 100, 600_000) {
        settings.timeouts.handshake_ms = v;
    }
    if let Some(v) = env.u64("SOCKLINE_CONNECT_TIMEOUT_MS", 100, 600_000) {
        settings.timeouts.connect_ms = v;
    }

    // ── Reconnect ───────────────────────────────────────────────────
    if let Some(v) = env.u64("SOCKLINE_RECONNECT_BASE_MS", 10, 600_000) {
        settings.reconnect.base_delay_ms = v;
    }
    if let Some(v) = env.u64("SOCKLINE_RECONNECT_MAX_MS", 10, 3_600_000) {
        settings.reconnect.max_delay_ms = v;
    }
    if let Some(v) = env.u64("SOCKLINE_REVIVE_INTERVAL_MS", 100, 600_000) {
        settings.revive_interval_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("SOCKLINE_LOG_LEVEL") {
        settings.log_level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"endpoint": {"port": 8080, "host": "localhost"}});
        let source = serde_json::json!({"endpoint": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["endpoint"]["port"], 9090);
        assert_eq!(merged["endpoint"]["host"], "localhost");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = read_layered(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.endpoint, ClientSettings::default().endpoint);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"endpoint": {"host": "wss://edge.example.com", "port": 443},
                "handshake": {"params": {"tenant": 12}},
                "timeouts": {"requestMs": 30000}}"#,
        )
        .unwrap();

        let settings = read_layered(&path).unwrap();
        assert_eq!(settings.endpoint.url(), "wss://edge.example.com:443");
        assert_eq!(settings.handshake.params["tenant"], 12);
        assert_eq!(settings.handshake.action, "connect");
        assert_eq!(settings.timeouts.request_ms, 30_000);
        assert_eq!(settings.timeouts.handshake_ms, 15_000);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"reviveIntervalMs": 0}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut settings = ClientSettings::default();
        apply_env_overrides(
            &mut settings,
            env_of(&[
                ("SOCKLINE_HOST", "wss://other.example.com"),
                ("SOCKLINE_PORT", "9443"),
                ("SOCKLINE_PLATFORM", "android"),
                ("SOCKLINE_RECONNECT_MAX_MS", "500"),
                ("SOCKLINE_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(settings.endpoint.url(), "wss://other.example.com:9443");
        assert_eq!(settings.handshake.platform, "android");
        assert_eq!(settings.reconnect.max_delay_ms, 500);
        assert_eq!(settings.log_level, "debug");
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut settings = ClientSettings::default();
        apply_env_overrides(
            &mut settings,
            env_of(&[
                ("SOCKLINE_PORT", "0"),
                ("SOCKLINE_HANDSHAKE_TIMEOUT_MS", "soon"),
                ("SOCKLINE_HOST", ""),
            ]),
        );
        let defaults = ClientSettings::default();
        assert_eq!(settings.endpoint, defaults.endpoint);
        assert_eq!(settings.timeouts.handshake_ms, defaults.timeouts.handshake_ms);
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_u16_bounds() {
        assert_eq!(parse_u16_range("9090", 1, 65535), Some(9090));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("99999", 1, 65535), None);
        assert_eq!(parse_u16_range("", 1, 65535), None);
    }

    #[test]
    fn parse_u64_bounds() {
        assert_eq!(parse_u64_range("1000", 1000, 600_000), Some(1000));
        assert_eq!(parse_u64_range("999", 1000, 600_000), None);
        assert_eq!(parse_u64_range("-1", 0, 10), None);
    }
}
