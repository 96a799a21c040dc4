//! # Server Module
//!
//! The CoAP endpoint and its lifecycle.
//!
//! ## Overview
//!
//! - [`resolve`] turns the configured host into a bindable socket address
//! - [`engine`] defines the [`ProtocolEngine`] seam and the catch-all resource
//! - [`exchange`] is the CoAP message layer: acknowledgement, deduplication, size limit
//! - [`dtls`] keeps per-peer DTLS-PSK sessions
//! - [`udp_engine`] is the bundled RFC 7252 engine over UDP, optionally secured by [`dtls`]
//! - [`handler`] runs each request through router, decoder, forwarder and classifier
//! - [`shutdown`] wires SIGINT/SIGTERM to a cooperative stop flag
//! - [`lifecycle`] drives `Created → Configured → Bound → Listening → Draining → Stopped`

pub mod dtls;
pub mod engine;
pub mod exchange;
pub mod handler;
pub mod lifecycle;
pub mod resolve;
pub mod shutdown;
pub mod udp_engine;

pub use engine::{
    CatchAllResource, InboundRequest, Method, OutboundResponse, ProtocolEngine, RequestHandler,
};
pub use handler::{data_handler, HandlerContext};
pub use lifecycle::{run_server, CoapServer, LifecycleState};
pub use resolve::resolve_address;
pub use shutdown::{ShutdownSignal, SignalRegistration};
pub use udp_engine::UdpEngine;
