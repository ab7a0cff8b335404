//! Server and client settings with environment variable overrides.
//!
//! Resolution order:
//! 1. Compiled defaults
//! 2. Environment variables (`HOST`, `PORT`, `SERVER_URL`, `WSDRAIN_*`)
//! 3. CLI flags, applied by the binary
//!
//! Invalid environment values are logged and ignored.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8080;
/// Default WebSocket path.
pub const DEFAULT_PATH: &str = "/ws";
/// Default client target.
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8080/ws";
/// Default per-session mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Drain protocol timing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    /// Delay between successive trailing payloads.
    pub pacing_ms: u64,
    /// How long send tasks get to flush before exit.
    pub drain_window_ms: u64,
    /// Lower bound (inclusive) of the trailing payload count.
    pub trailing_min: usize,
    /// Upper bound (inclusive) of the trailing payload count.
    pub trailing_max: usize,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            pacing_ms: 100,
            drain_window_ms: 2_000,
            trailing_min: 1,
            trailing_max: 10,
        }
    }
}

impl ShutdownSettings {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn drain_window(&self) -> Duration {
        Duration::from_millis(self.drain_window_ms)
    }
}

/// Server configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Route serving the WebSocket upgrade.
    pub path: String,
    /// Interval of the per-session periodic producer.
    pub push_interval_ms: u64,
    /// Per-session outbound mailbox capacity.
    pub mailbox_capacity: usize,
    pub shutdown: ShutdownSettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.into(),
            push_interval_ms: 2_000,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            shutdown: ShutdownSettings::default(),
        }
    }
}

impl ServerSettings {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings
    }

    /// Overlay values from `lookup` (an environment-like key/value source).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = read_string(&lookup, "HOST") {
            self.host = v;
        }
        if let Some(v) = read_u64(&lookup, "PORT", 0, u64::from(u16::MAX)) {
            self.port = u16::try_from(v).unwrap_or(self.port);
        }
        if let Some(v) = read_string(&lookup, "WSDRAIN_PATH") {
            self.path = v;
        }
        if let Some(v) = read_u64(&lookup, "WSDRAIN_PUSH_INTERVAL_MS", 1, 3_600_000) {
            self.push_interval_ms = v;
        }
        if let Some(v) = read_usize(&lookup, "WSDRAIN_MAILBOX_CAPACITY", 1, 1 << 20) {
            self.mailbox_capacity = v;
        }
        if let Some(v) = read_u64(&lookup, "WSDRAIN_SHUTDOWN_PACING_MS", 0, 60_000) {
            self.shutdown.pacing_ms = v;
        }
        if let Some(v) = read_u64(&lookup, "WSDRAIN_DRAIN_WINDOW_MS", 0, 600_000) {
            self.shutdown.drain_window_ms = v;
        }
        if let Some(v) = read_usize(&lookup, "WSDRAIN_TRAILING_MIN", 1, 1_000) {
            self.shutdown.trailing_min = v;
        }
        if let Some(v) = read_usize(&lookup, "WSDRAIN_TRAILING_MAX", 1, 1_000) {
            self.shutdown.trailing_max = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.mailbox_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "mailbox capacity must be positive".into(),
            ));
        }
        if self.push_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "push interval must be positive".into(),
            ));
        }
        if !self.path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "path {:?} must start with '/'",
                self.path
            )));
        }
        let s = &self.shutdown;
        if s.trailing_min == 0 || s.trailing_min > s.trailing_max {
            return Err(SettingsError::InvalidValue(format!(
                "trailing count range {}..={} is empty or starts at zero",
                s.trailing_min, s.trailing_max
            )));
        }
        Ok(())
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_millis(self.push_interval_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Client configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// WebSocket URL of the server.
    pub server_url: String,
    /// Interval between outbound client messages.
    pub send_interval_ms: u64,
    /// Delay before reconnecting after any disconnect.
    pub reconnect_delay_ms: u64,
    /// Bound on one connect attempt, TCP and handshake together.
    pub connect_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            send_interval_ms: 3_000,
            reconnect_delay_ms: 2_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl ClientSettings {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = read_string(&lookup, "SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = read_u64(&lookup, "WSDRAIN_SEND_INTERVAL_MS", 1, 3_600_000) {
            self.send_interval_ms = v;
        }
        if let Some(v) = read_u64(&lookup, "WSDRAIN_RECONNECT_DELAY_MS", 0, 3_600_000) {
            self.reconnect_delay_ms = v;
        }
        if let Some(v) = read_u64(&lookup, "WSDRAIN_CONNECT_TIMEOUT_MS", 1, 600_000) {
            self.connect_timeout_ms = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.server_url.as_str();
        let rest = url
            .strip_prefix("ws://")
            .or_else(|| url.strip_prefix("wss://"))
            .ok_or_else(|| SettingsError::InvalidUrl {
                url: url.to_string(),
                reason: "scheme must be ws or wss".into(),
            })?;
        if rest.is_empty() || rest.starts_with('/') {
            return Err(SettingsError::InvalidUrl {
                url: url.to_string(),
                reason: "missing host".into(),
            });
        }
        if self.send_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "send interval must be positive".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "connect timeout must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// ── Env parsing helpers ─────────────────────────────────────────────────────

fn read_string(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|v| !v.is_empty())
}

fn read_u64(lookup: &impl Fn(&str) -> Option<String>, name: &str, min: u64, max: u64) -> Option<u64> {
    let val = lookup(name)?;
    let result = val
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|v| (min..=max).contains(v));
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
    }
    result
}

fn read_usize(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    min: usize,
    max: usize,
) -> Option<usize> {
    let val = lookup(name)?;
    let result = val
        .trim()
        .parse::<usize>()
        .ok()
        .filter(|v| (min..=max).contains(v));
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}
