//! # Response Classifier
//!
//! Maps the single [`Outcome`] of a request to the CoAP response code (and optional
//! diagnostic body) sent back to the device.
//!
//! Precedence follows the order in which the handler reaches each decision:
//!
//! 1. `PUT` → 4.05, without routing
//! 2. routing failure → 4.04
//! 3. content format rejected → 4.15
//! 4. declared type unsupported → 5.00
//! 5. decode failure → 4.00 with body `payload not valid`
//! 6. forwarded → 2.04

use crate::payload::DecodeError;
use std::fmt;

/// Diagnostic body sent with 4.00 Bad Request.
pub const INVALID_PAYLOAD_BODY: &str = "payload not valid";

/// A CoAP response code (`class.detail`, e.g. `4.04`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseCode {
    pub class: u8,
    pub detail: u8,
}

impl ResponseCode {
    pub const CHANGED: Self = Self::new(2, 4);
    pub const BAD_REQUEST: Self = Self::new(4, 0);
    pub const NOT_FOUND: Self = Self::new(4, 4);
    pub const METHOD_NOT_ALLOWED: Self = Self::new(4, 5);
    pub const REQUEST_ENTITY_TOO_LARGE: Self = Self::new(4, 13);
    pub const UNSUPPORTED_CONTENT_FORMAT: Self = Self::new(4, 15);
    pub const INTERNAL_SERVER_ERROR: Self = Self::new(5, 0);

    pub const fn new(class: u8, detail: u8) -> Self {
        Self { class, detail }
    }

    /// The single-byte wire encoding (`class << 5 | detail`).
    #[inline]
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        (self.class << 5) | (self.detail & 0x1f)
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        Self::new(raw >> 5, raw & 0x1f)
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        self.class == 2
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class, self.detail)
    }
}

/// What happened to one request. Exactly one per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    RoutingFailed,
    MethodRejected,
    FormatRejected,
    DecodeFailed,
    TypeUnsupported,
    Forwarded,
}

impl Outcome {
    pub const ALL: [Outcome; 6] = [
        Outcome::RoutingFailed,
        Outcome::MethodRejected,
        Outcome::FormatRejected,
        Outcome::DecodeFailed,
        Outcome::TypeUnsupported,
        Outcome::Forwarded,
    ];

    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Outcome::RoutingFailed => "routing_failed",
            Outcome::MethodRejected => "method_rejected",
            Outcome::FormatRejected => "format_rejected",
            Outcome::DecodeFailed => "decode_failed",
            Outcome::TypeUnsupported => "type_unsupported",
            Outcome::Forwarded => "forwarded",
        }
    }
}

impl From<&DecodeError> for Outcome {
    fn from(err: &DecodeError) -> Self {
        match err {
            DecodeError::FormatRejected { .. } => Outcome::FormatRejected,
            DecodeError::TypeUnsupported(_) => Outcome::TypeUnsupported,
            DecodeError::MissingPayload | DecodeError::TooLong { .. } | DecodeError::Invalid(_) => {
                Outcome::DecodeFailed
            }
        }
    }
}

/// Response code plus optional diagnostic body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub code: ResponseCode,
    pub body: Option<&'static str>,
}

/// Select the response for an outcome.
#[must_use]
pub const fn classify(outcome: Outcome) -> Classification {
    let (code, body) = match outcome {
        Outcome::MethodRejected => (ResponseCode::METHOD_NOT_ALLOWED, None),
        Outcome::RoutingFailed => (ResponseCode::NOT_FOUND, None),
        Outcome::FormatRejected => (ResponseCode::UNSUPPORTED_CONTENT_FORMAT, None),
        Outcome::TypeUnsupported => (ResponseCode::INTERNAL_SERVER_ERROR, None),
        Outcome::DecodeFailed => (ResponseCode::BAD_REQUEST, Some(INVALID_PAYLOAD_BODY)),
        Outcome::Forwarded => (ResponseCode::CHANGED, None),
    };
    Classification { code, body }
}
