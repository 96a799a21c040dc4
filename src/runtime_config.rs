//! # Runtime Configuration Module
//!
//! Startup configuration for the gateway, read once before the server is configured.
//!
//! ## Overview
//!
//! Three layers feed the driver map, later layers winning:
//!
//! 1. built-in defaults (`CoapBindAddr=0.0.0.0`, `SecurityMode=NoSec`, `PskKey=""`)
//! 2. the `driver:` section of the configuration file (YAML or JSON, chosen by extension)
//! 3. environment overrides
//!
//! The same file seeds the device catalog (`devices:`) and optionally names an upstream
//! HTTP endpoint (`upstream:`).
//!
//! ## Environment Variables
//!
//! | Variable | Overrides |
//! |---|---|
//! | `COAP_BIND_ADDR` | `CoapBindAddr` |
//! | `COAP_SECURITY_MODE` | `SecurityMode` |
//! | `COAP_PSK_KEY` | `PskKey` |
//! | `COAP_PORT` | `CoapPort` |
//!
//! Dispatch tuning lives in [`RuntimeConfig`]:
//!
//! - `COAP_IO_WAIT_MS` - upper bound of one wait/dispatch call (default `1000`)
//! - `COAP_MAX_DATAGRAM` - receive buffer size in bytes (default `1152`)
//!
//! ## Example
//!
//! ```yaml
//! driver:
//!   CoapBindAddr: 0.0.0.0
//!   SecurityMode: NoSec
//! devices:
//!   - name: Temp-Sensor-1
//!     profiles:
//!       - name: temperature
//!         resources:
//!           - { name: temperature, type: Float64 }
//! upstream:
//!   url: http://localhost:59880/api/v3/event
//! ```

use crate::error::{GatewayError, GatewayResult};
use crate::registry::Device;
use anyhow::Context;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const KEY_BIND_ADDR: &str = "CoapBindAddr";
pub const KEY_SECURITY_MODE: &str = "SecurityMode";
pub const KEY_PSK_KEY: &str = "PskKey";
pub const KEY_PORT: &str = "CoapPort";

/// Driver keys and the environment variables that override them.
const ENV_OVERRIDES: [(&str, &str); 4] = [
    (KEY_BIND_ADDR, "COAP_BIND_ADDR"),
    (KEY_SECURITY_MODE, "COAP_SECURITY_MODE"),
    (KEY_PSK_KEY, "COAP_PSK_KEY"),
    (KEY_PORT, "COAP_PORT"),
];

const DEFAULT_IO_WAIT_MS: u64 = 1000;
const DEFAULT_MAX_DATAGRAM: usize = 1152;

/// Dispatch-loop tuning loaded from environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Upper bound for one wait/dispatch call
    pub io_wait: Duration,
    /// Largest CoAP message accepted, in bytes; longer confirmable requests get 4.13
    pub max_datagram: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            io_wait: Duration::from_millis(DEFAULT_IO_WAIT_MS),
            max_datagram: DEFAULT_MAX_DATAGRAM,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    ///
    /// Unparseable or zero values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let io_wait_ms = lookup("COAP_IO_WAIT_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|&ms| ms > 0)
            .unwrap_or(DEFAULT_IO_WAIT_MS);
        let max_datagram = lookup("COAP_MAX_DATAGRAM")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_MAX_DATAGRAM);
        RuntimeConfig {
            io_wait: Duration::from_millis(io_wait_ms),
            max_datagram,
        }
    }
}

/// Optional upstream HTTP endpoint for readings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    #[serde(default = "default_upstream_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_upstream_timeout_ms() -> u64 {
    2000
}

/// Contents of the gateway configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    /// Raw driver map as written in the file; values may be any scalar.
    #[serde(default)]
    pub driver: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub upstream: Option<UpstreamConfig>,
}

impl GatewayConfig {
    /// Load a configuration file; `.yaml`/`.yml` is parsed as YAML, anything else as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file {}", path.display()))?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        let config: GatewayConfig = if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("invalid YAML in {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("invalid JSON in {}", path.display()))?
        };
        info!(
            path = %path.display(),
            driver_keys = config.driver.len(),
            devices = config.devices.len(),
            upstream = config.upstream.is_some(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// The effective driver map: defaults, then the file, then the process environment.
    pub fn driver_map(&self) -> BTreeMap<String, String> {
        self.driver_map_with(|k| env::var(k).ok())
    }

    /// The effective driver map with environment lookups served by `lookup`.
    pub fn driver_map_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> BTreeMap<String, String> {
        let mut map: BTreeMap<String, String> = [
            (KEY_BIND_ADDR, "0.0.0.0"),
            (KEY_SECURITY_MODE, "NoSec"),
            (KEY_PSK_KEY, ""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();

        for (key, value) in &self.driver {
            map.insert(key.clone(), scalar_to_string(value));
        }
        for (key, var) in ENV_OVERRIDES {
            if let Some(value) = lookup(var) {
                debug!(key, var, "Driver setting overridden from environment");
                map.insert(key.to_owned(), value);
            }
        }
        map
    }
}

fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The driver settings the server lifecycle consumes.
#[derive(Clone, PartialEq, Eq)]
pub struct DriverConfig {
    pub bind_addr: String,
    pub security_mode: String,
    pub psk_key: String,
    /// Explicit port; `None` selects the transport's default
    pub port: Option<u16>,
}

impl std::fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverConfig")
            .field("bind_addr", &self.bind_addr)
            .field("security_mode", &self.security_mode)
            .field("psk_key_len", &self.psk_key.len())
            .field("port", &self.port)
            .finish()
    }
}

impl DriverConfig {
    /// Extract driver settings from a string-keyed map.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if `CoapBindAddr` is missing or empty, or if
    /// `CoapPort` is set but is not a port number.
    pub fn from_map(map: &BTreeMap<String, String>) -> GatewayResult<Self> {
        let bind_addr = map
            .get(KEY_BIND_ADDR)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| GatewayError::config(format!("{KEY_BIND_ADDR} is not set")))?;
        let port = match map.get(KEY_PORT).map(|v| v.trim()) {
            None | Some("") => None,
            Some(text) => Some(text.parse::<u16>().map_err(|_| {
                GatewayError::config(format!("{KEY_PORT} {text:?} is not a valid port"))
            })?),
        };
        Ok(Self {
            bind_addr,
            security_mode: map.get(KEY_SECURITY_MODE).cloned().unwrap_or_default(),
            psk_key: map.get(KEY_PSK_KEY).cloned().unwrap_or_default(),
            port,
        })
    }
}
