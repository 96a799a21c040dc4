//! # Ingestion Forwarder
//!
//! Wraps a successfully decoded value into a [`Reading`] and hands it to the upstream
//! [`ReadingSink`].
//!
//! Submission is synchronous and single-shot: there is no retry and no backoff. The sink's
//! result is logged and counted, but never changes the response sent to the device.
//!
//! Two sinks ship with the crate:
//!
//! - [`LogSink`] emits one structured log line per reading
//! - [`HttpSink`] posts an event document to an upstream HTTP endpoint

use crate::ids::EventId;
use crate::payload::TypedValue;
use crate::registry::ValueType;
use crate::router::RouteMatch;
use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Origin timestamp passed with every reading; `0` lets the upstream stamp it.
pub const ORIGIN_UNSET: i64 = 0;

/// A typed value for one device resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub device_name: String,
    pub profile_name: String,
    pub resource_name: String,
    pub value: TypedValue,
    pub origin: i64,
}

/// Failure reported by a sink. Logged, never surfaced to the device.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upstream rejected event with status {0}")]
    Rejected(u16),
    #[error("{0}")]
    Other(String),
}

/// Upstream telemetry pipeline.
pub trait ReadingSink: Send + Sync {
    /// Submit readings for one device resource.
    fn post_readings(
        &self,
        device_name: &str,
        resource_name: &str,
        readings: &[Reading],
    ) -> Result<(), SinkError>;
}

/// Build a single reading from a routed request and submit it.
///
/// The value is consumed: it is dropped as soon as the sink returns, whatever the result.
///
/// # Returns
///
/// `true` if the sink accepted the reading. Callers must not derive the response code
/// from this.
pub fn forward(sink: &dyn ReadingSink, route: &RouteMatch, value: TypedValue) -> bool {
    let readings = [Reading {
        device_name: route.device.name.clone(),
        profile_name: route.profile_name.clone(),
        resource_name: route.resource.name.clone(),
        value,
        origin: ORIGIN_UNSET,
    }];
    match sink.post_readings(&route.device.name, &route.resource.name, &readings) {
        Ok(()) => {
            debug!(
                device = %route.device.name,
                resource = %route.resource.name,
                "Reading forwarded"
            );
            true
        }
        Err(e) => {
            warn!(
                device = %route.device.name,
                resource = %route.resource.name,
                error = %e,
                "Upstream sink failed to accept reading"
            );
            false
        }
    }
}

/// Logs each reading at INFO. Used when no upstream is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ReadingSink for LogSink {
    fn post_readings(
        &self,
        device_name: &str,
        resource_name: &str,
        readings: &[Reading],
    ) -> Result<(), SinkError> {
        for r in readings {
            info!(
                device = %device_name,
                resource = %resource_name,
                value_type = %r.value.value_type(),
                value = %r.value,
                "Reading"
            );
        }
        Ok(())
    }
}

/// Event document posted by [`HttpSink`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event<'a> {
    pub api_version: &'static str,
    pub id: EventId,
    pub device_name: &'a str,
    pub profile_name: &'a str,
    pub source_name: &'a str,
    pub origin: i64,
    pub readings: Vec<EventReading<'a>>,
}

/// One reading inside an [`Event`].
///
/// The value is carried as text. A `String` reading whose bytes are not UTF-8 has an empty
/// `value` and its raw bytes base64-encoded in `binaryValue`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReading<'a> {
    pub id: EventId,
    pub origin: i64,
    pub device_name: &'a str,
    pub resource_name: &'a str,
    pub profile_name: &'a str,
    pub value_type: ValueType,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_value: Option<String>,
}

impl<'a> EventReading<'a> {
    fn new(reading: &'a Reading) -> Self {
        let (value, binary_value) = match (&reading.value, reading.value.as_text()) {
            (_, Some(text)) => (text.into_owned(), None),
            (TypedValue::String(raw), None) => {
                (String::new(), Some(general_purpose::STANDARD.encode(raw)))
            }
            (other, None) => (other.to_string(), None),
        };
        Self {
            id: EventId::new(),
            origin: reading.origin,
            device_name: &reading.device_name,
            resource_name: &reading.resource_name,
            profile_name: &reading.profile_name,
            value_type: reading.value.value_type(),
            value,
            binary_value,
        }
    }
}

impl<'a> Event<'a> {
    /// Build an event for the readings of one device resource.
    pub fn new(device_name: &'a str, resource_name: &'a str, readings: &'a [Reading]) -> Self {
        let profile_name = readings
            .first()
            .map(|r| r.profile_name.as_str())
            .unwrap_or_default();
        Self {
            api_version: "v3",
            id: EventId::new(),
            device_name,
            profile_name,
            source_name: resource_name,
            origin: ORIGIN_UNSET,
            readings: readings.iter().map(EventReading::new).collect(),
        }
    }
}

/// Posts readings as JSON events to an upstream HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpSink {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpSink {
    /// Default request timeout when none is configured.
    pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

    /// Create a sink posting to `url` with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(url: impl Into<String>, timeout_ms: u64) -> Result<Self, SinkError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        let url = url.into();
        info!(url = %url, timeout_ms, "Upstream HTTP sink configured");
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ReadingSink for HttpSink {
    fn post_readings(
        &self,
        device_name: &str,
        resource_name: &str,
        readings: &[Reading],
    ) -> Result<(), SinkError> {
        let event = Event::new(device_name, resource_name, readings);
        let response = self.client.post(&self.url).json(&event).send()?;
        let status = response.status();
        if status.is_success() {
            debug!(event_id = %event.id, status = status.as_u16(), "Event accepted upstream");
            Ok(())
        } else {
            Err(SinkError::Rejected(status.as_u16()))
        }
    }
}
