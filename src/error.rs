//! # Gateway Errors
//!
//! Fatal startup and runtime failures of the gateway process.
//!
//! Per-request failures (routing, content format, decoding) never show up here: they are
//! recovered inside the handler and surface only as a CoAP response code (see
//! [`crate::classifier`]). Everything in [`GatewayError`] aborts the lifecycle and is
//! reported by the binary as an integer exit status.
//!
//! | Variant | Raised by | Exit status |
//! |---|---|---|
//! | `Config` | security bootstrap, driver map, config file | 2 |
//! | `Resolution` | address resolver | 3 |
//! | `Bind` | engine context, PSK setup, endpoint creation | 4 |
//! | `Io` | the wait/dispatch primitive after `Listening` | 5 |

use std::io;

/// Result type used by the lifecycle and bootstrap code.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Fatal gateway error.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Invalid or incomplete configuration; raised before any network resource exists.
    #[error("configuration error: {0}")]
    Config(String),

    /// The bind address could not be turned into a socket address.
    #[error("failed to resolve CoAP bind address {host}:{service}: {reason}")]
    Resolution {
        /// Configured host string
        host: String,
        /// Service / port that was resolved alongside the host
        service: String,
        /// Resolver diagnostic
        reason: String,
    },

    /// The protocol engine could not create its context, security setup or endpoint.
    #[error("bind error: {0}")]
    Bind(#[from] BindError),

    /// The wait/dispatch primitive failed irrecoverably while listening.
    #[error("I/O error in dispatch loop: {0}")]
    Io(#[source] io::Error),
}

impl GatewayError {
    /// Shorthand for a [`GatewayError::Config`].
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Stable process exit status for this error.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Resolution { .. } => 3,
            Self::Bind(_) => 4,
            Self::Io(_) => 5,
        }
    }
}

/// Failures while turning a resolved configuration into a live endpoint.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    /// The engine could not create its protocol context.
    #[error("cannot initialize context: {0}")]
    Context(String),

    /// The engine rejected the pre-shared key configuration.
    #[error("cannot initialize PSK: {0}")]
    Psk(String),

    /// The listening endpoint could not be created.
    #[error("cannot initialize listen endpoint on {addr}: {source}")]
    Endpoint {
        /// Address the endpoint was meant to listen on
        addr: std::net::SocketAddr,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(GatewayError::config("x").exit_code(), 2);
        let resolution = GatewayError::Resolution {
            host: "nowhere".into(),
            service: "5683".into(),
            reason: "unknown host".into(),
        };
        assert_eq!(resolution.exit_code(), 3);
        assert_eq!(
            GatewayError::from(BindError::Psk("DTLS context rejected".into())).exit_code(),
            4
        );
        assert_eq!(GatewayError::Io(io::Error::other("boom")).exit_code(), 5);
    }

    #[test]
    fn bind_error_message_names_the_stage() {
        let err = GatewayError::from(BindError::Context("socket table full".into()));
        assert_eq!(
            err.to_string(),
            "bind error: cannot initialize context: socket table full"
        );
    }
}
