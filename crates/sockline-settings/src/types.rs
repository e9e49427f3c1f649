//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial
//! JSON is accepted and missing fields take their compiled default.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{Result, SettingsError};

/// Root settings for one client connection.
///
/// ```json
/// {
///   "endpoint": { "host": "wss://push.example.com", "port": 443 },
///   "handshake": { "platform": "linux", "params": { "tenant": 7 } },
///   "reconnect": { "maxDelayMs": 10000 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Remote endpoint.
    pub endpoint: Endpoint,
    /// Handshake exchange sent on every open.
    pub handshake: HandshakeSettings,
    /// Per-exchange timeouts.
    pub timeouts: TimeoutSettings,
    /// Reconnect backoff.
    pub reconnect: ReconnectSettings,
    /// Period of the revival check in milliseconds.
    pub revive_interval_ms: u64,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            handshake: HandshakeSettings::default(),
            timeouts: TimeoutSettings::default(),
            reconnect: ReconnectSettings::default(),
            revive_interval_ms: 1000,
            log_level: "info".to_string(),
        }
    }
}

impl ClientSettings {
    /// Reject values the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.host.trim().is_empty() {
            return Err(SettingsError::InvalidValue("endpoint host is empty".into()));
        }
        if self.endpoint.port == 0 {
            return Err(SettingsError::InvalidValue("endpoint port must be non-zero".into()));
        }
        if self.handshake.action.is_empty() {
            return Err(SettingsError::InvalidValue("handshake action is empty".into()));
        }
        if self.revive_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "reviveIntervalMs must be non-zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_factor) {
            return Err(SettingsError::InvalidValue(format!(
                "reconnect jitterFactor {} outside 0.0..=1.0",
                self.reconnect.jitter_factor
            )));
        }
        Ok(())
    }

    /// Revival check period.
    pub fn revive_interval(&self) -> Duration {
        Duration::from_millis(self.revive_interval_ms)
    }
}

/// Host and port of the remote endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Endpoint {
    /// Host, optionally with a `ws://` / `wss://` scheme.
    pub host: String,
    /// Port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Socket URL, `ws://` prepended when the host carries no scheme.
    pub fn url(&self) -> String {
        if self.host.contains("://") {
            format!("{}:{}", self.host, self.port)
        } else {
            format!("ws://{}:{}", self.host, self.port)
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("ws://127.0.0.1", 8080)
    }
}

/// Handshake exchange parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HandshakeSettings {
    /// Action name of the handshake request.
    pub action: String,
    /// Platform descriptor sent as `platform`.
    pub platform: String,
    /// Extra members merged into the handshake payload.
    pub params: Map<String, Value>,
}

impl HandshakeSettings {
    /// Handshake payload: `params` plus `platform`.
    pub fn payload(&self) -> Value {
        let mut payload = self.params.clone();
        let _ = payload.insert("platform".into(), Value::String(self.platform.clone()));
        Value::Object(payload)
    }
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            action: "connect".to_string(),
            platform: std::env::consts::OS.to_string(),
            params: Map::new(),
        }
    }
}

/// Timeouts in milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutSettings {
    /// Default time a caller waits for a reply.
    pub request_ms: u64,
    /// Time the handshake may take before the socket is torn down.
    pub handshake_ms: u64,
    /// Time a socket open may take.
    pub connect_ms: u64,
}

impl TimeoutSettings {
    /// Default request timeout.
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    /// Handshake timeout.
    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    /// Socket open timeout.
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            request_ms: 600_000,
            handshake_ms: 15_000,
            connect_ms: 10_000,
        }
    }
}

/// Reconnect backoff parameters.
///
/// `maxDelayMs == baseDelayMs` with `jitterFactor = 0` gives a fixed delay.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// First retry delay.
    pub base_delay_ms: u64,
    /// Delay cap.
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0.
    pub jitter_factor: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
        }
    }
}
