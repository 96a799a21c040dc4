//! Protocol engine seam and the catch-all resource.
//!
//! The engine owns framing, acknowledgement and (when supported) the secure transport.
//! The gateway gives it one [`CatchAllResource`] and then repeatedly calls
//! [`ProtocolEngine::process`], which blocks for at most the given wait and dispatches any
//! requests that arrived.

use super::handler::HandlerContext;
use crate::classifier::{Classification, ResponseCode};
use crate::error::BindError;
use crate::runtime_config::RuntimeConfig;
use crate::security::{PskCredentials, TransportVariant};
use bytes::Bytes;
use smallvec::SmallVec;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;

/// CoAP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    /// Any other request code detail (FETCH, PATCH, ...)
    Other(u8),
}

impl Method {
    /// Map a request code detail (`0.01`–`0.31`) to a method.
    #[must_use]
    pub const fn from_code_detail(detail: u8) -> Self {
        match detail {
            1 => Method::Get,
            2 => Method::Post,
            3 => Method::Put,
            4 => Method::Delete,
            other => Method::Other(other),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
            Method::Put => f.write_str("PUT"),
            Method::Delete => f.write_str("DELETE"),
            Method::Other(d) => write!(f, "0.{d:02}"),
        }
    }
}

/// A decoded inbound request, independent of the wire format.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Uri-Path segments in order
    pub path: SmallVec<[String; 4]>,
    pub content_format: Option<u16>,
    /// Request body; `None` when the message carried no payload
    pub payload: Option<Bytes>,
    pub peer: SocketAddr,
}

impl InboundRequest {
    /// Path as `/seg/seg/...` for logging.
    pub fn path_display(&self) -> String {
        let mut out = String::new();
        for seg in &self.path {
            out.push('/');
            out.push_str(seg);
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }
}

/// Response under construction. The code can be set once; later attempts are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundResponse {
    code: Option<ResponseCode>,
    body: Option<Bytes>,
}

impl OutboundResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the response code and body.
    ///
    /// # Returns
    ///
    /// `false` if a code was already set; the response is left unchanged.
    pub fn set(&mut self, classification: Classification) -> bool {
        if self.code.is_some() {
            debug!(
                existing = ?self.code,
                attempted = %classification.code,
                "Response code already set"
            );
            return false;
        }
        self.code = Some(classification.code);
        self.body = classification.body.map(Bytes::from);
        true
    }

    pub fn code(&self) -> Option<ResponseCode> {
        self.code
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

/// Handler invoked for one request with the explicit gateway context.
pub type RequestHandler = fn(&HandlerContext, &InboundRequest, &mut OutboundResponse);

/// The single resource that receives requests for every path.
///
/// The default handler serves `PUT`; further handlers are registered per method. A method
/// with no handler is answered 4.04.
#[derive(Clone)]
pub struct CatchAllResource {
    context: HandlerContext,
    default_handler: RequestHandler,
    handlers: SmallVec<[(Method, RequestHandler); 2]>,
}

impl fmt::Debug for CatchAllResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let methods: Vec<Method> = self.handlers.iter().map(|(m, _)| *m).collect();
        f.debug_struct("CatchAllResource")
            .field("methods", &methods)
            .finish_non_exhaustive()
    }
}

impl CatchAllResource {
    /// Create the catch-all resource with its default (`PUT`) handler.
    pub fn new(context: HandlerContext, default_handler: RequestHandler) -> Self {
        Self {
            context,
            default_handler,
            handlers: SmallVec::new(),
        }
    }

    /// Register a handler for `method`, replacing any earlier one.
    #[must_use]
    pub fn register(mut self, method: Method, handler: RequestHandler) -> Self {
        self.handlers.retain(|(m, _)| *m != method);
        self.handlers.push((method, handler));
        self
    }

    fn handler_for(&self, method: Method) -> Option<RequestHandler> {
        if method == Method::Put {
            return Some(self.default_handler);
        }
        self.handlers
            .iter()
            .find(|(m, _)| *m == method)
            .map(|(_, h)| *h)
    }

    /// Run the handler for the request's method and return the finished response.
    pub fn dispatch(&self, request: &InboundRequest) -> OutboundResponse {
        let mut response = OutboundResponse::new();
        match self.handler_for(request.method) {
            Some(handler) => handler(&self.context, request, &mut response),
            None => {
                debug!(method = %request.method, "No handler for method");
                response.set(Classification {
                    code: ResponseCode::NOT_FOUND,
                    body: None,
                });
            }
        }
        response
    }
}

/// Framing, acknowledgement and transport security for one listening endpoint.
pub trait ProtocolEngine: Send {
    /// Create the engine context.
    ///
    /// # Errors
    ///
    /// [`BindError::Context`] if the context cannot be created.
    fn create(runtime: &RuntimeConfig) -> Result<Self, BindError>
    where
        Self: Sized;

    /// Apply pre-shared key credentials for the secured transport.
    ///
    /// # Errors
    ///
    /// [`BindError::Psk`] if the credentials are rejected or DTLS is unavailable.
    fn configure_psk(&mut self, credentials: &PskCredentials) -> Result<(), BindError>;

    /// Open the listening endpoint and return its actual local address.
    ///
    /// # Errors
    ///
    /// [`BindError::Endpoint`] if the socket cannot be bound.
    fn open_endpoint(
        &mut self,
        addr: SocketAddr,
        transport: TransportVariant,
    ) -> Result<SocketAddr, BindError>;

    /// Install the catch-all resource.
    fn add_resource(&mut self, resource: CatchAllResource);

    /// Wait up to `wait` for traffic and dispatch whatever arrived.
    ///
    /// Returns the number of requests handled. Timeouts and interrupted waits return `Ok(0)`.
    ///
    /// # Errors
    ///
    /// An unrecoverable I/O error of the endpoint.
    fn process(&mut self, wait: Duration) -> io::Result<usize>;

    /// Release the endpoint and every engine resource.
    fn shutdown(&mut self);
}
