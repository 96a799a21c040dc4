//! RFC 7252 engine over UDP, optionally secured with DTLS-PSK.
//!
//! Message semantics live in [`MessageLayer`](super::exchange::MessageLayer). This module
//! owns the socket and decides whether datagrams are CoAP messages or DTLS records: once
//! PSK credentials are configured and a DTLS endpoint is opened, every datagram goes
//! through [`DtlsSessions`] first.

use super::dtls::{self, DtlsSessions};
use super::engine::{CatchAllResource, ProtocolEngine};
use super::exchange::MessageLayer;
use crate::error::BindError;
use crate::runtime_config::RuntimeConfig;
use crate::security::{PskCredentials, TransportVariant};
use openssl::ssl::SslContext;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shortest wait passed to the socket; a zero timeout is rejected by the OS layer.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Record header, explicit IV, MAC and padding around the largest DTLS plaintext.
const DTLS_RECORD_OVERHEAD: usize = 256;

/// UDP [`ProtocolEngine`] with optional DTLS-PSK.
pub struct UdpEngine {
    socket: Option<Arc<UdpSocket>>,
    messages: MessageLayer,
    /// One byte past the message limit so oversized datagrams are detected, not cut.
    /// With DTLS it holds a whole record; the limit then applies to the plaintext.
    buf: Vec<u8>,
    psk: Option<SslContext>,
    dtls: Option<DtlsSessions>,
}

impl std::fmt::Debug for UdpEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpEngine")
            .field("local_addr", &self.local_addr())
            .field("buf_len", &self.buf.len())
            .field("messages", &self.messages)
            .field("dtls", &self.dtls)
            .finish_non_exhaustive()
    }
}

impl UdpEngine {
    /// Local address of the open endpoint, if any.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Whether the open endpoint speaks DTLS.
    pub fn is_secured(&self) -> bool {
        self.dtls.is_some()
    }

    fn handle_datagram(&mut self, len: usize, peer: SocketAddr) -> usize {
        let Some(socket) = &self.socket else {
            return 0;
        };
        if let Some(dtls) = &mut self.dtls {
            let mut handled = 0;
            for message in dtls.receive(&self.buf[..len], peer) {
                let exchange = self.messages.handle(&message, peer);
                if let Some(reply) = exchange.reply {
                    dtls.send(&reply, peer);
                }
                handled += usize::from(exchange.dispatched);
            }
            return handled;
        }

        let exchange = self.messages.handle(&self.buf[..len], peer);
        if let Some(reply) = exchange.reply {
            if let Err(e) = socket.send_to(&reply, peer) {
                warn!(peer = %peer, error = %e, "Failed to send response");
            }
        }
        usize::from(exchange.dispatched)
    }
}

impl ProtocolEngine for UdpEngine {
    fn create(runtime: &RuntimeConfig) -> Result<Self, BindError> {
        if runtime.max_datagram == 0 {
            return Err(BindError::Context("receive buffer size is zero".to_owned()));
        }
        debug!(max_datagram = runtime.max_datagram, "UDP engine context created");
        Ok(Self {
            socket: None,
            messages: MessageLayer::new(runtime.max_datagram),
            buf: vec![0u8; runtime.max_datagram + 1],
            psk: None,
            dtls: None,
        })
    }

    fn configure_psk(&mut self, credentials: &PskCredentials) -> Result<(), BindError> {
        if credentials.key.is_empty() {
            return Err(BindError::Psk("empty pre-shared key".to_owned()));
        }
        let context = dtls::server_context(&credentials.key)
            .map_err(|e| BindError::Psk(format!("DTLS context: {e}")))?;
        debug!(key_len = credentials.key.len(), "DTLS-PSK context ready");
        self.psk = Some(context);
        Ok(())
    }

    fn open_endpoint(
        &mut self,
        addr: SocketAddr,
        transport: TransportVariant,
    ) -> Result<SocketAddr, BindError> {
        let psk = match transport {
            TransportVariant::Udp => None,
            TransportVariant::Dtls => Some(self.psk.clone().ok_or_else(|| {
                BindError::Psk("DTLS endpoint requested without PSK credentials".to_owned())
            })?),
        };
        let socket =
            UdpSocket::bind(addr).map_err(|source| BindError::Endpoint { addr, source })?;
        let local = socket
            .local_addr()
            .map_err(|source| BindError::Endpoint { addr, source })?;
        let socket = Arc::new(socket);
        if let Some(context) = psk {
            self.buf
                .resize(dtls::MAX_RECORD_PLAINTEXT + DTLS_RECORD_OVERHEAD, 0);
            self.dtls = Some(DtlsSessions::new(context, Arc::clone(&socket)));
        }
        info!(address = %local, transport = %transport, "UDP endpoint open");
        self.socket = Some(socket);
        Ok(local)
    }

    fn add_resource(&mut self, resource: CatchAllResource) {
        debug!(?resource, "Catch-all resource installed");
        self.messages.install(resource);
    }

    fn process(&mut self, wait: Duration) -> io::Result<usize> {
        let socket = match &self.socket {
            Some(s) => s,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "no endpoint open",
                ))
            }
        };
        socket.set_read_timeout(Some(wait.max(MIN_WAIT)))?;
        match socket.recv_from(&mut self.buf) {
            Ok((len, peer)) => Ok(self.handle_datagram(len, peer)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::Interrupted
                        | io::ErrorKind::ConnectionReset
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn shutdown(&mut self) {
        self.messages.clear();
        if let Some(mut dtls) = self.dtls.take() {
            dtls.close_all();
        }
        self.psk = None;
        if let Some(socket) = self.socket.take() {
            debug!(address = ?socket.local_addr().ok(), "UDP endpoint closed");
        }
    }
}
