//! # Payload Decoder
//!
//! Turns the raw bytes of a CoAP request into a [`TypedValue`] matching the resource's
//! declared [`ValueType`].
//!
//! ## Compatibility
//!
//! | Declared type | Accepted content format(s) |
//! |---|---|
//! | `Float64` | `text/plain` |
//! | `Int32` | `text/plain` |
//! | `String` | `text/plain`, `application/json` |
//! | anything else | unsupported |
//!
//! The content format is checked before any parsing. Numeric payloads longer than the
//! maximum digit count are rejected without being parsed.
//!
//! ## Numeric syntax
//!
//! Numbers follow C `strtol`/`strtod` conventions where Rust's parsers allow it:
//!
//! - leading ASCII whitespace is skipped, trailing characters of any kind are rejected
//! - `Int32` takes an optional sign and decimal digits only
//! - `Float64` rejects results out of range in either direction: a finite literal that
//!   overflows to infinity (`1e400`) and a non-zero literal that underflows to zero or a
//!   subnormal (`1e-400`); `inf`, `infinity` and `nan` literals are accepted
//! - hexadecimal floats (`0x1p3`) are not accepted
//!
//! `String` payloads are carried as the raw bytes received, without UTF-8 validation.

use crate::registry::ValueType;
use bytes::Bytes;
use std::fmt;
use tracing::{error, info};

/// CoAP content-format number for `text/plain; charset=utf-8`.
pub const TEXT_PLAIN: u16 = 0;
/// CoAP content-format number for `application/json`.
pub const APPLICATION_JSON: u16 = 50;

/// Longest accepted textual `Int32` (`-2147483648`).
pub const INT32_MAX_LEN: usize = 11;
/// Longest accepted textual `Float64`.
pub const FLOAT64_MAX_LEN: usize = 24;

/// A decoded reading value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Float64(f64),
    Int32(i32),
    /// Raw payload bytes, not necessarily UTF-8.
    String(Bytes),
}

impl TypedValue {
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            TypedValue::Float64(_) => ValueType::Float64,
            TypedValue::Int32(_) => ValueType::Int32,
            TypedValue::String(_) => ValueType::String,
        }
    }

    /// The value as text, or `None` for a `String` whose bytes are not UTF-8.
    pub fn as_text(&self) -> Option<std::borrow::Cow<'_, str>> {
        match self {
            TypedValue::String(raw) => std::str::from_utf8(raw).ok().map(Into::into),
            other => Some(other.to_string().into()),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Float64(v) => write!(f, "{}", v),
            TypedValue::Int32(v) => write!(f, "{}", v),
            TypedValue::String(v) => f.write_str(&String::from_utf8_lossy(v)),
        }
    }
}

/// Why a payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("request carries no payload")]
    MissingPayload,
    /// Content format absent or not accepted for the declared type.
    #[error("content format {content_format:?} not accepted for {value_type}")]
    FormatRejected {
        value_type: ValueType,
        content_format: Option<u16>,
    },
    #[error("value type {0} is not supported")]
    TypeUnsupported(ValueType),
    #[error("payload of {len} bytes exceeds the {max} character limit for {value_type}")]
    TooLong {
        value_type: ValueType,
        len: usize,
        max: usize,
    },
    #[error("payload is not a valid {0}")]
    Invalid(ValueType),
}

/// Decode a request payload for a resource of the given declared type.
///
/// # Arguments
///
/// * `value_type` - Declared type of the target resource
/// * `content_format` - The request's Content-Format option, if present
/// * `payload` - Request body; `None` when the request carried no payload
///
/// # Errors
///
/// - [`DecodeError::MissingPayload`] if there is no payload
/// - [`DecodeError::TypeUnsupported`] for any type other than `Float64`, `Int32`, `String`
/// - [`DecodeError::FormatRejected`] if the content format does not fit the type
/// - [`DecodeError::TooLong`] / [`DecodeError::Invalid`] if a numeric payload does not parse
pub fn decode(
    value_type: ValueType,
    content_format: Option<u16>,
    payload: Option<&[u8]>,
) -> Result<TypedValue, DecodeError> {
    let bytes = payload.ok_or_else(|| {
        info!("Request carries no payload");
        DecodeError::MissingPayload
    })?;

    match value_type {
        ValueType::Float64 => {
            require_format(value_type, content_format, &[TEXT_PLAIN])?;
            parse_float64(bytes).map(TypedValue::Float64)
        }
        ValueType::Int32 => {
            require_format(value_type, content_format, &[TEXT_PLAIN])?;
            parse_int32(bytes).map(TypedValue::Int32)
        }
        ValueType::String => {
            require_format(value_type, content_format, &[TEXT_PLAIN, APPLICATION_JSON])?;
            Ok(TypedValue::String(Bytes::copy_from_slice(bytes)))
        }
        ValueType::Bool
        | ValueType::Int8
        | ValueType::Int16
        | ValueType::Int64
        | ValueType::Uint8
        | ValueType::Uint16
        | ValueType::Uint32
        | ValueType::Uint64
        | ValueType::Float32
        | ValueType::Binary => {
            error!(value_type = %value_type, "Unsupported value type");
            Err(DecodeError::TypeUnsupported(value_type))
        }
    }
}

fn require_format(
    value_type: ValueType,
    content_format: Option<u16>,
    accepted: &[u16],
) -> Result<(), DecodeError> {
    match content_format {
        Some(cf) if accepted.contains(&cf) => Ok(()),
        _ => {
            info!(
                value_type = %value_type,
                content_format = ?content_format,
                "Content format not accepted"
            );
            Err(DecodeError::FormatRejected {
                value_type,
                content_format,
            })
        }
    }
}

fn numeric_text(value_type: ValueType, bytes: &[u8], max: usize) -> Result<&str, DecodeError> {
    if bytes.len() > max {
        info!(
            value_type = %value_type,
            len = bytes.len(),
            max,
            "Numeric payload too long"
        );
        return Err(DecodeError::TooLong {
            value_type,
            len: bytes.len(),
            max,
        });
    }
    std::str::from_utf8(bytes)
        .map(|text| text.trim_start_matches(is_c_space))
        .map_err(|_| invalid(value_type))
}

/// `isspace` in the C locale.
fn is_c_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\x0b' | '\x0c' | '\r')
}

fn invalid(value_type: ValueType) -> DecodeError {
    info!(value_type = %value_type, "Invalid payload");
    DecodeError::Invalid(value_type)
}

/// Parse a complete decimal `i32`; leading whitespace and a sign are accepted.
pub fn parse_int32(bytes: &[u8]) -> Result<i32, DecodeError> {
    numeric_text(ValueType::Int32, bytes, INT32_MAX_LEN)?
        .parse::<i32>()
        .map_err(|_| invalid(ValueType::Int32))
}

/// Parse a complete `f64`, rejecting overflow and underflow of finite literals.
pub fn parse_float64(bytes: &[u8]) -> Result<f64, DecodeError> {
    let text = numeric_text(ValueType::Float64, bytes, FLOAT64_MAX_LEN)?;
    let value = text
        .parse::<f64>()
        .map_err(|_| invalid(ValueType::Float64))?;
    let overflow = value.is_infinite() && !is_infinity_literal(text);
    let underflow = value.is_subnormal() || (value == 0.0 && has_nonzero_mantissa(text));
    if overflow || underflow {
        info!(overflow, underflow, "Float64 out of range");
        return Err(invalid(ValueType::Float64));
    }
    Ok(value)
}

fn is_infinity_literal(text: &str) -> bool {
    let unsigned = text.trim_start_matches(['+', '-']);
    unsigned.eq_ignore_ascii_case("inf") || unsigned.eq_ignore_ascii_case("infinity")
}

fn has_nonzero_mantissa(text: &str) -> bool {
    text.chars()
        .take_while(|c| !matches!(c, 'e' | 'E'))
        .any(|c| matches!(c, '1'..='9'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value_type: ValueType, s: &str) -> Result<TypedValue, DecodeError> {
        decode(value_type, Some(TEXT_PLAIN), Some(s.as_bytes()))
    }

    #[test]
    fn float64_decodes_text_plain() {
        assert_eq!(
            text(ValueType::Float64, "21.5").unwrap(),
            TypedValue::Float64(21.5)
        );
        assert_eq!(
            text(ValueType::Float64, "-1e3").unwrap(),
            TypedValue::Float64(-1000.0)
        );
    }

    #[test]
    fn float64_rejects_garbage_and_leftovers() {
        for bad in ["abc", "21.5x", "21.5 ", "", "1.2.3", "0x1p3", " "] {
            assert_eq!(
                text(ValueType::Float64, bad),
                Err(DecodeError::Invalid(ValueType::Float64)),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn float64_rejects_overflow_but_not_infinity_literal() {
        assert_eq!(
            text(ValueType::Float64, "1e400"),
            Err(DecodeError::Invalid(ValueType::Float64))
        );
        assert!(matches!(
            text(ValueType::Float64, "-inf"),
            Ok(TypedValue::Float64(v)) if v.is_infinite()
        ));
    }

    #[test]
    fn leading_whitespace_is_skipped() {
        assert_eq!(
            text(ValueType::Float64, " \t21.5").unwrap(),
            TypedValue::Float64(21.5)
        );
        assert_eq!(text(ValueType::Int32, " 42").unwrap(), TypedValue::Int32(42));
        assert_eq!(text(ValueType::Int32, "+42").unwrap(), TypedValue::Int32(42));
    }

    #[test]
    fn float64_rejects_underflow() {
        for bad in ["1e-400", "-2.5e-320", "4e-310"] {
            assert_eq!(
                text(ValueType::Float64, bad),
                Err(DecodeError::Invalid(ValueType::Float64)),
                "{bad:?}"
            );
        }
        assert_eq!(
            text(ValueType::Float64, "0.0e-400").unwrap(),
            TypedValue::Float64(0.0)
        );
        assert_eq!(
            text(ValueType::Float64, "1e-300").unwrap(),
            TypedValue::Float64(1e-300)
        );
    }

    #[test]
    fn float64_length_limit() {
        let at_limit = format!("1.{}", "0".repeat(FLOAT64_MAX_LEN - 2));
        assert!(text(ValueType::Float64, &at_limit).is_ok());

        let over = format!("{at_limit}0");
        assert!(matches!(
            text(ValueType::Float64, &over),
            Err(DecodeError::TooLong { len: 25, .. })
        ));
    }

    #[test]
    fn int32_bounds() {
        assert_eq!(
            text(ValueType::Int32, "2147483647").unwrap(),
            TypedValue::Int32(i32::MAX)
        );
        assert_eq!(
            text(ValueType::Int32, "-2147483648").unwrap(),
            TypedValue::Int32(i32::MIN)
        );
        assert_eq!(
            text(ValueType::Int32, "2147483648"),
            Err(DecodeError::Invalid(ValueType::Int32))
        );
    }

    #[test]
    fn int32_length_checked_before_parse() {
        assert!(matches!(
            text(ValueType::Int32, "000000000001"),
            Err(DecodeError::TooLong { len: 12, max: 11, .. })
        ));
        assert!(matches!(
            text(ValueType::Int32, "abcdefghijklmnop"),
            Err(DecodeError::TooLong { .. })
        ));
    }

    #[test]
    fn int32_rejects_fraction() {
        assert_eq!(
            text(ValueType::Int32, "12.5"),
            Err(DecodeError::Invalid(ValueType::Int32))
        );
    }

    #[test]
    fn numeric_types_require_text_plain() {
        for vt in [ValueType::Float64, ValueType::Int32] {
            for cf in [None, Some(APPLICATION_JSON), Some(42)] {
                assert!(matches!(
                    decode(vt, cf, Some(b"1")),
                    Err(DecodeError::FormatRejected { .. })
                ));
            }
        }
    }

    #[test]
    fn format_checked_before_parsing() {
        assert!(matches!(
            decode(ValueType::Float64, Some(APPLICATION_JSON), Some(b"abc")),
            Err(DecodeError::FormatRejected { .. })
        ));
    }

    #[test]
    fn string_accepts_text_and_json() {
        assert_eq!(
            decode(ValueType::String, Some(APPLICATION_JSON), Some(br#"{"a":1}"#)).unwrap(),
            TypedValue::String(r#"{"a":1}"#.into())
        );
        assert_eq!(
            decode(ValueType::String, Some(TEXT_PLAIN), Some(b"")).unwrap(),
            TypedValue::String(Bytes::new())
        );
        let long = "x".repeat(4096);
        assert_eq!(
            text(ValueType::String, &long).unwrap(),
            TypedValue::String(Bytes::from(long))
        );
    }

    #[test]
    fn string_keeps_raw_bytes() {
        let raw: &[u8] = &[0xff, b'A', 0x00, 0xc3];
        let value = decode(ValueType::String, Some(TEXT_PLAIN), Some(raw)).unwrap();
        assert_eq!(value, TypedValue::String(Bytes::copy_from_slice(raw)));
        assert!(value.as_text().is_none());
        assert_eq!(
            TypedValue::String(Bytes::from_static(b"lab")).as_text().as_deref(),
            Some("lab")
        );
    }

    #[test]
    fn string_rejects_other_formats() {
        assert!(matches!(
            decode(ValueType::String, Some(60), Some(b"x")),
            Err(DecodeError::FormatRejected { .. })
        ));
        assert!(matches!(
            decode(ValueType::String, None, Some(b"x")),
            Err(DecodeError::FormatRejected { .. })
        ));
    }

    #[test]
    fn unsupported_types() {
        for vt in [ValueType::Bool, ValueType::Uint64, ValueType::Float32, ValueType::Binary] {
            assert_eq!(
                text(vt, "1"),
                Err(DecodeError::TypeUnsupported(vt))
            );
        }
    }

    #[test]
    fn missing_payload_fails_first() {
        assert_eq!(
            decode(ValueType::Float64, None, None),
            Err(DecodeError::MissingPayload)
        );
        assert_eq!(
            decode(ValueType::Binary, Some(TEXT_PLAIN), None),
            Err(DecodeError::MissingPayload)
        );
    }

    #[test]
    fn display_matches_wire_text() {
        assert_eq!(TypedValue::Int32(-7).to_string(), "-7");
        assert_eq!(TypedValue::Float64(21.5).to_string(), "21.5");
        assert_eq!(TypedValue::String("on".into()).to_string(), "on");
    }
}
