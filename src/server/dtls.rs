//! DTLS 1.2 with pre-shared keys, on top of the engine's UDP socket.
//!
//! One OpenSSL session per peer address. The socket stays non-connected: every datagram
//! read by the engine is queued on the peer's [`PeerChannel`] and the session is driven
//! until OpenSSL wants more input. Records OpenSSL writes go straight back to the peer.
//!
//! Only PSK cipher suites are offered, so no certificate is configured.

use openssl::error::ErrorStack;
use openssl::ssl::{ErrorCode, Ssl, SslContext, SslMethod, SslOptions, SslStream, SslVerifyMode};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// PSK suites of RFC 7252 §9.1.3.1 first, then common fallbacks.
pub const PSK_CIPHERS: &str = "PSK-AES128-CCM8:PSK-AES128-GCM-SHA256:PSK-AES128-CBC-SHA256";

/// Path MTU assumed for handshake fragmentation.
pub const DTLS_MTU: u32 = 1280;

/// Largest plaintext a single DTLS record can carry.
pub const MAX_RECORD_PLAINTEXT: usize = 16 * 1024;

/// Concurrent sessions kept; handshakes from further peers are dropped.
const MAX_SESSIONS: usize = 256;

/// Build the server context for the given key.
///
/// # Errors
///
/// The OpenSSL error stack if the method or cipher list is unavailable.
pub fn server_context(key: &[u8]) -> Result<SslContext, ErrorStack> {
    let mut builder = SslContext::builder(SslMethod::dtls())?;
    builder.set_cipher_list(PSK_CIPHERS)?;
    builder.set_verify(SslVerifyMode::NONE);
    builder.set_options(SslOptions::NO_QUERY_MTU);
    let key = key.to_vec();
    builder.set_psk_server_callback(move |_ssl, identity, psk| {
        debug!(
            identity = %identity.map(String::from_utf8_lossy).unwrap_or_default(),
            "PSK client identity"
        );
        if key.len() > psk.len() {
            warn!(key_len = key.len(), "PSK longer than OpenSSL accepts");
            return Ok(0);
        }
        psk[..key.len()].copy_from_slice(&key);
        Ok(key.len())
    });
    Ok(builder.build())
}

/// Datagram transport for one peer as seen by OpenSSL.
#[derive(Debug)]
struct PeerChannel {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    inbound: VecDeque<Vec<u8>>,
}

impl Read for PeerChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inbound.pop_front() {
            Some(datagram) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(n)
            }
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

impl Write for PeerChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send_to(buf, self.peer)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Session {
    stream: SslStream<PeerChannel>,
    established: bool,
}

/// Live DTLS sessions of one endpoint.
pub struct DtlsSessions {
    context: SslContext,
    socket: Arc<UdpSocket>,
    sessions: HashMap<SocketAddr, Session>,
    plaintext: Vec<u8>,
}

impl std::fmt::Debug for DtlsSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DtlsSessions")
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl DtlsSessions {
    pub fn new(context: SslContext, socket: Arc<UdpSocket>) -> Self {
        Self {
            context,
            socket,
            sessions: HashMap::new(),
            plaintext: vec![0u8; MAX_RECORD_PLAINTEXT],
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Feed one datagram from `peer` and return the application messages it completed.
    ///
    /// Handshake failures and fatal alerts end the peer's session; a retransmitted
    /// ClientHello then starts a new one.
    pub fn receive(&mut self, datagram: &[u8], peer: SocketAddr) -> Vec<Vec<u8>> {
        if !self.sessions.contains_key(&peer) {
            if self.sessions.len() >= MAX_SESSIONS {
                warn!(peer = %peer, limit = MAX_SESSIONS, "DTLS session table full, dropping datagram");
                return Vec::new();
            }
            match self.open(peer) {
                Ok(session) => {
                    debug!(peer = %peer, "DTLS session created");
                    self.sessions.insert(peer, session);
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Failed to create DTLS session");
                    return Vec::new();
                }
            }
        }

        let mut messages = Vec::new();
        let Some(session) = self.sessions.get_mut(&peer) else {
            return messages;
        };
        session.stream.get_mut().inbound.push_back(datagram.to_vec());
        if !drive(session, &mut self.plaintext, peer, &mut messages) {
            self.sessions.remove(&peer);
        }
        messages
    }

    /// Encrypt and send `message` on the peer's session.
    pub fn send(&mut self, message: &[u8], peer: SocketAddr) {
        let Some(session) = self.sessions.get_mut(&peer) else {
            debug!(peer = %peer, "No DTLS session for reply");
            return;
        };
        if let Err(e) = session.stream.ssl_write(message) {
            warn!(peer = %peer, error = %e, "DTLS write failed, closing session");
            self.sessions.remove(&peer);
        }
    }

    /// Send close_notify to every peer and forget all sessions.
    pub fn close_all(&mut self) {
        for (peer, mut session) in self.sessions.drain() {
            if session.established {
                if let Err(e) = session.stream.shutdown() {
                    debug!(peer = %peer, error = %e, "DTLS close_notify failed");
                }
            }
        }
    }

    fn open(&self, peer: SocketAddr) -> Result<Session, ErrorStack> {
        let mut ssl = Ssl::new(&self.context)?;
        ssl.set_mtu(DTLS_MTU)?;
        let channel = PeerChannel {
            socket: Arc::clone(&self.socket),
            peer,
            inbound: VecDeque::new(),
        };
        Ok(Session {
            stream: SslStream::new(ssl, channel)?,
            established: false,
        })
    }
}

/// Advance the handshake and drain decrypted records. `false` ends the session.
fn drive(
    session: &mut Session,
    plaintext: &mut [u8],
    peer: SocketAddr,
    out: &mut Vec<Vec<u8>>,
) -> bool {
    if !session.established {
        match session.stream.accept() {
            Ok(()) => {
                session.established = true;
                info!(peer = %peer, "DTLS session established");
            }
            Err(e) if e.code() == ErrorCode::WANT_READ => return true,
            Err(e) => {
                warn!(peer = %peer, error = %e, "DTLS handshake failed");
                return false;
            }
        }
    }
    loop {
        match session.stream.ssl_read(plaintext) {
            Ok(0) => return true,
            Ok(n) => out.push(plaintext[..n].to_vec()),
            Err(e) if e.code() == ErrorCode::WANT_READ => return true,
            Err(e) if e.code() == ErrorCode::ZERO_RETURN => {
                debug!(peer = %peer, "DTLS session closed by peer");
                return false;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "DTLS read failed, closing session");
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_accepts_psk_suites() {
        assert!(server_context(b"secretPSK").is_ok());
    }

    #[test]
    fn stray_record_yields_no_messages() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
        let mut sessions = DtlsSessions::new(server_context(b"secretPSK").unwrap(), socket);
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        // Content type 0x17 (application data) before any handshake.
        let record = [0x17, 0xfe, 0xfd, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0xaa];
        assert!(sessions.receive(&record, peer).is_empty());
        assert!(sessions.len() <= 1);
        sessions.close_all();
        assert!(sessions.is_empty());
    }
}
