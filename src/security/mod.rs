//! # Security Module
//!
//! Transport security bootstrap for the CoAP endpoint.
//!
//! ## Overview
//!
//! The driver configuration names one of two modes:
//!
//! - **`NoSec`** - plain UDP, default port 5683, no credentials
//! - **`PSK`** - DTLS with a pre-shared key, default port 5684
//!
//! The mode text must match exactly. Anything else is [`SecurityMode::Unknown`] and
//! aborts startup with a configuration error before any socket is opened.
//!
//! In `PSK` mode the `PskKey` value must be non-empty base64 that decodes to at least one
//! byte. The decoded key is handed to the protocol engine together with an empty identity.
//! Only the key's length is ever logged.
//!
//! ## Example
//!
//! ```rust
//! use coap_ingest::security::{bootstrap, TransportVariant};
//!
//! let sec = bootstrap("PSK", "c2VjcmV0").unwrap();
//! assert_eq!(sec.transport, TransportVariant::Dtls);
//! assert_eq!(sec.transport.default_port(), 5684);
//! ```

use crate::error::{GatewayError, GatewayResult};
use base64::{engine::general_purpose, Engine as _};
use std::fmt;
use tracing::{error, info};

/// Configured security mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityMode {
    NoSec,
    Psk,
    /// Any unrecognized mode text, kept for diagnostics.
    Unknown(String),
}

impl SecurityMode {
    pub const NOSEC_TEXT: &'static str = "NoSec";
    pub const PSK_TEXT: &'static str = "PSK";

    /// Parse a mode name; matching is exact and case-sensitive.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        match text {
            Self::NOSEC_TEXT => SecurityMode::NoSec,
            Self::PSK_TEXT => SecurityMode::Psk,
            other => SecurityMode::Unknown(other.to_owned()),
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityMode::NoSec => f.write_str(Self::NOSEC_TEXT),
            SecurityMode::Psk => f.write_str(Self::PSK_TEXT),
            SecurityMode::Unknown(s) => write!(f, "unknown ({s})"),
        }
    }
}

/// Transport the listening endpoint runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportVariant {
    Udp,
    Dtls,
}

impl TransportVariant {
    pub const COAP_PORT: u16 = 5683;
    pub const COAPS_PORT: u16 = 5684;

    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            TransportVariant::Udp => Self::COAP_PORT,
            TransportVariant::Dtls => Self::COAPS_PORT,
        }
    }

    /// Label used in the startup log line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TransportVariant::Udp => "UDP",
            TransportVariant::Dtls => "DTLS",
        }
    }
}

impl fmt::Display for TransportVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pre-shared key material for the DTLS handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct PskCredentials {
    /// Client identity hint; always empty.
    pub identity: Vec<u8>,
    pub key: Vec<u8>,
}

impl fmt::Debug for PskCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PskCredentials")
            .field("identity", &self.identity)
            .field("key_len", &self.key.len())
            .finish()
    }
}

/// Transport security applied to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityConfig {
    NoSec,
    Psk(PskCredentials),
}

/// Result of a successful bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityBootstrap {
    pub config: SecurityConfig,
    pub transport: TransportVariant,
}

impl SecurityBootstrap {
    /// PSK credentials, if the mode requires them.
    #[must_use]
    pub fn psk(&self) -> Option<&PskCredentials> {
        match &self.config {
            SecurityConfig::Psk(c) => Some(c),
            SecurityConfig::NoSec => None,
        }
    }
}

/// Resolve the transport security from the configured mode text and key.
///
/// # Arguments
///
/// * `mode_text` - Value of the `SecurityMode` configuration key
/// * `psk_key` - Value of the `PskKey` configuration key (base64)
///
/// # Errors
///
/// Returns [`GatewayError::Config`] if the mode is unknown, or if `PSK` is selected and the
/// key is empty, not base64, or decodes to zero bytes.
pub fn bootstrap(mode_text: &str, psk_key: &str) -> GatewayResult<SecurityBootstrap> {
    match SecurityMode::from_text(mode_text) {
        SecurityMode::NoSec => Ok(SecurityBootstrap {
            config: SecurityConfig::NoSec,
            transport: TransportVariant::Udp,
        }),
        SecurityMode::Psk => {
            let key = decode_psk(psk_key)?;
            info!(key_len = key.len(), "PSK key configured");
            Ok(SecurityBootstrap {
                config: SecurityConfig::Psk(PskCredentials {
                    identity: Vec::new(),
                    key,
                }),
                transport: TransportVariant::Dtls,
            })
        }
        SecurityMode::Unknown(text) => {
            error!(mode = %text, "Unknown security mode");
            Err(GatewayError::config(format!(
                "unknown security mode {text:?}, expected {:?} or {:?}",
                SecurityMode::NOSEC_TEXT,
                SecurityMode::PSK_TEXT
            )))
        }
    }
}

fn decode_psk(psk_key: &str) -> GatewayResult<Vec<u8>> {
    if psk_key.is_empty() {
        error!("PSK security mode selected but no PskKey configured");
        return Err(GatewayError::config("PSK security requires a PskKey"));
    }
    let key = general_purpose::STANDARD.decode(psk_key).map_err(|e| {
        error!(error = %e, "PskKey is not valid base64");
        GatewayError::config(format!("PskKey is not valid base64: {e}"))
    })?;
    if key.is_empty() {
        error!("PskKey decodes to an empty key");
        return Err(GatewayError::config("PskKey decodes to an empty key"));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nosec_selects_plain_udp() {
        let sec = bootstrap("NoSec", "").unwrap();
        assert_eq!(sec.config, SecurityConfig::NoSec);
        assert_eq!(sec.transport.default_port(), 5683);
        assert!(sec.psk().is_none());
    }

    #[test]
    fn psk_decodes_key_with_empty_identity() {
        let sec = bootstrap("PSK", "c2VjcmV0LWtleQ==").unwrap();
        let creds = sec.psk().unwrap();
        assert_eq!(creds.key, b"secret-key");
        assert!(creds.identity.is_empty());
        assert_eq!(sec.transport, TransportVariant::Dtls);
        assert_eq!(sec.transport.default_port(), 5684);
    }

    #[test]
    fn psk_without_key_fails() {
        let err = bootstrap("PSK", "").unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn psk_with_invalid_base64_fails() {
        assert!(matches!(
            bootstrap("PSK", "not base64!!"),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn mode_match_is_exact() {
        for text in ["Bogus", "nosec", "psk", " NoSec", ""] {
            assert!(
                matches!(bootstrap(text, "c2VjcmV0"), Err(GatewayError::Config(_))),
                "{text:?}"
            );
        }
        assert_eq!(
            SecurityMode::from_text("Bogus"),
            SecurityMode::Unknown("Bogus".into())
        );
    }

    #[test]
    fn debug_output_hides_key() {
        let creds = PskCredentials {
            identity: Vec::new(),
            key: b"hunter2".to_vec(),
        };
        let dbg = format!("{creds:?}");
        assert!(dbg.contains("key_len: 7"));
        assert!(!dbg.contains("104"));
    }
}
