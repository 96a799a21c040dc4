//! Bind address resolution.

use crate::error::{GatewayError, GatewayResult};
use std::net::{SocketAddr, ToSocketAddrs};
use tracing::{debug, error};

/// Size of the destination address buffer (`sockaddr_in6`).
pub const ADDRESS_BUFFER_LEN: usize = 28;

/// Encoded size of a socket address (`sockaddr_in` / `sockaddr_in6`).
#[inline]
#[must_use]
pub const fn encoded_len(addr: &SocketAddr) -> usize {
    match addr {
        SocketAddr::V4(_) => 16,
        SocketAddr::V6(_) => 28,
    }
}

/// Resolve `host` and `service` to the first internet address that fits the buffer.
///
/// # Arguments
///
/// * `host` - Host name or literal address (e.g. `0.0.0.0`, `::1`, `localhost`)
/// * `service` - Port number as text
///
/// # Errors
///
/// Returns [`GatewayError::Resolution`] with the resolver diagnostic if the service is not a
/// port number, the lookup fails, or no candidate qualifies. There is no retry.
pub fn resolve_address(host: &str, service: &str) -> GatewayResult<SocketAddr> {
    let fail = |reason: String| {
        error!(host = %host, service = %service, reason = %reason, "Address resolution failed");
        GatewayError::Resolution {
            host: host.to_owned(),
            service: service.to_owned(),
            reason,
        }
    };

    let port: u16 = service
        .parse()
        .map_err(|_| fail(format!("service {service:?} is not a port number")))?;
    let candidates = (host, port).to_socket_addrs().map_err(|e| fail(e.to_string()))?;

    let mut skipped = 0usize;
    for candidate in candidates {
        if encoded_len(&candidate) <= ADDRESS_BUFFER_LEN {
            debug!(address = %candidate, skipped, "Resolved bind address");
            return Ok(candidate);
        }
        skipped += 1;
    }
    Err(fail("no usable internet address".to_owned()))
}
