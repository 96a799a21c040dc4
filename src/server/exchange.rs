//! CoAP message layer shared by the plain and DTLS transports.
//!
//! Framing uses `coap-lite`. Behaviour per inbound message:
//!
//! - confirmable request → piggy-backed ACK carrying the response
//! - non-confirmable request → NON response with a fresh message id
//! - empty confirmable message (CoAP ping) → RST
//! - retransmitted confirmable request → the cached ACK is resent, the handler is not rerun
//! - confirmable request larger than the receive limit → ACK 4.13 with a `Size1` option
//! - ACK, RST and anything unparseable → dropped
//!
//! The layer never touches a socket. [`MessageLayer::handle`] returns the reply bytes and
//! the transport sends them.

use super::engine::{CatchAllResource, InboundRequest, Method};
use crate::classifier::ResponseCode;
use bytes::Bytes;
use coap_lite::{CoapOption, MessageClass, MessageType, Packet};
use std::collections::VecDeque;
use std::net::SocketAddr;
use tracing::{debug, trace, warn};

/// Confirmable exchanges remembered for duplicate detection.
const DEDUP_CAPACITY: usize = 64;

/// Fixed CoAP header: version/type/token length, code, message id.
const HEADER_LEN: usize = 4;

const MAX_TOKEN_LEN: usize = 8;

const TYPE_CONFIRMABLE: u8 = 0;

struct CachedReply {
    peer: SocketAddr,
    message_id: u16,
    bytes: Vec<u8>,
}

/// Result of handling one inbound message.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Exchange {
    /// Encoded reply for the sender, if any
    pub reply: Option<Vec<u8>>,
    /// Whether the catch-all resource ran
    pub dispatched: bool,
}

impl Exchange {
    fn reply(bytes: Vec<u8>) -> Self {
        Self {
            reply: Some(bytes),
            dispatched: false,
        }
    }
}

/// Per-endpoint CoAP state: the installed resource, the duplicate cache and the NON
/// message id counter.
pub struct MessageLayer {
    resource: Option<CatchAllResource>,
    replies: VecDeque<CachedReply>,
    next_message_id: u16,
    max_message: usize,
}

impl std::fmt::Debug for MessageLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLayer")
            .field("max_message", &self.max_message)
            .field("cached_replies", &self.replies.len())
            .field("has_resource", &self.resource.is_some())
            .finish()
    }
}

impl MessageLayer {
    /// `max_message` is the largest CoAP message accepted; anything longer is refused.
    pub fn new(max_message: usize) -> Self {
        Self {
            resource: None,
            replies: VecDeque::with_capacity(DEDUP_CAPACITY),
            next_message_id: ulid::Ulid::new().random() as u16,
            max_message,
        }
    }

    pub fn install(&mut self, resource: CatchAllResource) {
        self.resource = Some(resource);
    }

    /// Drop the resource and the duplicate cache.
    pub fn clear(&mut self) {
        self.resource = None;
        self.replies.clear();
    }

    /// Handle one complete CoAP message from `peer`.
    ///
    /// A `message` longer than the configured limit is treated as truncated: only its fixed
    /// header is read and the resource never runs.
    pub fn handle(&mut self, message: &[u8], peer: SocketAddr) -> Exchange {
        if message.len() > self.max_message {
            return self.refuse_oversized(message, peer);
        }

        let packet = match Packet::from_bytes(message) {
            Ok(p) => p,
            Err(e) => {
                debug!(peer = %peer, error = ?e, "Dropping malformed message");
                return Exchange::default();
            }
        };

        let message_type = packet.header.get_type();
        let raw_code = u8::from(packet.header.code);

        match message_type {
            MessageType::Acknowledgement | MessageType::Reset => {
                trace!(peer = %peer, "Ignoring ACK/RST");
                return Exchange::default();
            }
            MessageType::Confirmable | MessageType::NonConfirmable => {}
        }

        if raw_code == 0 {
            if message_type == MessageType::Confirmable {
                trace!(peer = %peer, message_id = packet.header.message_id, "CoAP ping");
                let mut rst = Packet::new();
                rst.header.set_type(MessageType::Reset);
                rst.header.message_id = packet.header.message_id;
                return encode(&rst, peer).map(Exchange::reply).unwrap_or_default();
            }
            return Exchange::default();
        }

        // Only request codes (class 0) are dispatched.
        if raw_code >> 5 != 0 {
            debug!(peer = %peer, code = raw_code, "Ignoring non-request message");
            return Exchange::default();
        }

        if message_type == MessageType::Confirmable {
            if let Some(cached) = self
                .replies
                .iter()
                .find(|r| r.peer == peer && r.message_id == packet.header.message_id)
            {
                debug!(peer = %peer, message_id = cached.message_id, "Duplicate CON, resending reply");
                return Exchange::reply(cached.bytes.clone());
            }
        }

        let request = to_inbound(&packet, raw_code, peer);
        let (code, body) = match &self.resource {
            Some(resource) => {
                let response = resource.dispatch(&request);
                (
                    response.code().unwrap_or(ResponseCode::INTERNAL_SERVER_ERROR),
                    response.body().cloned(),
                )
            }
            None => (ResponseCode::NOT_FOUND, None),
        };

        let mut reply = Packet::new();
        if message_type == MessageType::Confirmable {
            reply.header.set_type(MessageType::Acknowledgement);
            reply.header.message_id = packet.header.message_id;
        } else {
            reply.header.set_type(MessageType::NonConfirmable);
            reply.header.message_id = self.fresh_message_id();
        }
        reply.header.code = MessageClass::from(code.to_raw());
        reply.set_token(packet.get_token().to_vec());
        if let Some(body) = body {
            reply.payload = body.to_vec();
        }

        let bytes = encode(&reply, peer);
        if let (Some(bytes), MessageType::Confirmable) = (&bytes, message_type) {
            self.remember(peer, packet.header.message_id, bytes.clone());
        }
        Exchange {
            reply: bytes,
            dispatched: true,
        }
    }

    /// Answer an oversized confirmable request with 4.13; drop everything else.
    ///
    /// A datagram may have been cut by the receive buffer, so the reply is built from the
    /// fixed header and token alone.
    fn refuse_oversized(&self, message: &[u8], peer: SocketAddr) -> Exchange {
        warn!(
            peer = %peer,
            received = message.len(),
            limit = self.max_message,
            "Message exceeds receive limit"
        );
        if message.len() < HEADER_LEN {
            return Exchange::default();
        }
        let message_type = (message[0] >> 4) & 0x03;
        let token_len = usize::from(message[0] & 0x0f);
        let raw_code = message[1];
        if message_type != TYPE_CONFIRMABLE
            || raw_code == 0
            || raw_code >> 5 != 0
            || token_len > MAX_TOKEN_LEN
            || message.len() < HEADER_LEN + token_len
        {
            return Exchange::default();
        }

        let mut reply = Packet::new();
        reply.header.set_type(MessageType::Acknowledgement);
        reply.header.message_id = u16::from_be_bytes([message[2], message[3]]);
        reply.header.code = MessageClass::from(ResponseCode::REQUEST_ENTITY_TOO_LARGE.to_raw());
        reply.set_token(message[HEADER_LEN..HEADER_LEN + token_len].to_vec());
        reply.add_option(CoapOption::Size1, encode_uint(self.max_message));
        encode(&reply, peer).map(Exchange::reply).unwrap_or_default()
    }

    fn fresh_message_id(&mut self) -> u16 {
        self.next_message_id = self.next_message_id.wrapping_add(1);
        self.next_message_id
    }

    fn remember(&mut self, peer: SocketAddr, message_id: u16, bytes: Vec<u8>) {
        if self.replies.len() == DEDUP_CAPACITY {
            self.replies.pop_front();
        }
        self.replies.push_back(CachedReply {
            peer,
            message_id,
            bytes,
        });
    }
}

fn encode(packet: &Packet, peer: SocketAddr) -> Option<Vec<u8>> {
    match packet.to_bytes() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(peer = %peer, error = ?e, "Failed to encode message");
            None
        }
    }
}

fn to_inbound(packet: &Packet, raw_code: u8, peer: SocketAddr) -> InboundRequest {
    let path = packet
        .get_option(CoapOption::UriPath)
        .map(|segments| {
            segments
                .iter()
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .collect()
        })
        .unwrap_or_default();
    let content_format = packet
        .get_option(CoapOption::ContentFormat)
        .and_then(|values| values.front())
        .map(|v| decode_uint(v));
    let payload = if packet.payload.is_empty() {
        None
    } else {
        Some(Bytes::copy_from_slice(&packet.payload))
    };
    InboundRequest {
        method: Method::from_code_detail(raw_code & 0x1f),
        path,
        content_format,
        payload,
        peer,
    }
}

/// Decode a CoAP variable-length unsigned option value.
fn decode_uint(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
        .min(u32::from(u16::MAX)) as u16
}

/// Encode an unsigned option value in its shortest form.
fn encode_uint(value: usize) -> Vec<u8> {
    let bytes = (value.min(u32::MAX as usize) as u32).to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:5683".parse().unwrap()
    }

    fn post(message_type: MessageType, payload_len: usize) -> Vec<u8> {
        let mut packet = Packet::new();
        packet.header.set_type(message_type);
        packet.header.message_id = 0x4242;
        packet.header.code = MessageClass::from(0x02);
        packet.set_token(vec![0xbe, 0xef]);
        packet.add_option(CoapOption::UriPath, b"a1r".to_vec());
        packet.payload = vec![b'x'; payload_len];
        packet.to_bytes().unwrap()
    }

    #[test]
    fn uint_option_decoding() {
        assert_eq!(decode_uint(&[]), 0);
        assert_eq!(decode_uint(&[50]), 50);
        assert_eq!(decode_uint(&[0x01, 0x00]), 256);
        assert_eq!(decode_uint(&[0xff, 0xff, 0xff]), u16::MAX);
    }

    #[test]
    fn uint_option_encoding() {
        assert_eq!(encode_uint(0), Vec::<u8>::new());
        assert_eq!(encode_uint(50), vec![50]);
        assert_eq!(encode_uint(1152), vec![0x04, 0x80]);
    }

    #[test]
    fn oversized_con_request_gets_4_13() {
        let mut layer = MessageLayer::new(64);
        let exchange = layer.handle(&post(MessageType::Confirmable, 200), peer());
        assert!(!exchange.dispatched);

        let reply = Packet::from_bytes(&exchange.reply.unwrap()).unwrap();
        assert_eq!(reply.header.get_type(), MessageType::Acknowledgement);
        assert_eq!(reply.header.message_id, 0x4242);
        assert_eq!(reply.get_token(), &[0xbe, 0xef]);
        assert_eq!(
            ResponseCode::from_raw(u8::from(reply.header.code)),
            ResponseCode::REQUEST_ENTITY_TOO_LARGE
        );
        let size1 = reply.get_option(CoapOption::Size1).unwrap();
        assert_eq!(decode_uint(size1.front().unwrap()), 64);
    }

    #[test]
    fn oversized_non_request_is_dropped() {
        let mut layer = MessageLayer::new(64);
        let exchange = layer.handle(&post(MessageType::NonConfirmable, 200), peer());
        assert_eq!(exchange, Exchange::default());
    }

    #[test]
    fn message_at_the_limit_is_dispatched() {
        let message = post(MessageType::Confirmable, 10);
        let mut layer = MessageLayer::new(message.len());
        let exchange = layer.handle(&message, peer());
        assert!(exchange.dispatched);
        let reply = Packet::from_bytes(&exchange.reply.unwrap()).unwrap();
        // no resource installed
        assert_eq!(
            ResponseCode::from_raw(u8::from(reply.header.code)),
            ResponseCode::NOT_FOUND
        );
    }

    #[test]
    fn duplicate_con_replays_cached_reply() {
        let message = post(MessageType::Confirmable, 4);
        let mut layer = MessageLayer::new(1152);
        let first = layer.handle(&message, peer());
        let second = layer.handle(&message, peer());
        assert!(first.dispatched);
        assert!(!second.dispatched);
        assert_eq!(first.reply, second.reply);
    }

    #[test]
    fn ping_gets_reset() {
        let mut ping = Packet::new();
        ping.header.set_type(MessageType::Confirmable);
        ping.header.message_id = 0x1234;
        let mut layer = MessageLayer::new(1152);
        let exchange = layer.handle(&ping.to_bytes().unwrap(), peer());
        let rst = Packet::from_bytes(&exchange.reply.unwrap()).unwrap();
        assert_eq!(rst.header.get_type(), MessageType::Reset);
        assert_eq!(rst.header.message_id, 0x1234);
    }
}
