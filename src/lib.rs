//! # coap-ingest
//!
//! A push-model CoAP ingestion gateway. Constrained devices send unsolicited CoAP requests
//! carrying sensor readings; the gateway validates and decodes each payload against the
//! target resource's declared type, forwards the reading upstream, and answers with a
//! protocol-correct response code.
//!
//! ## Architecture
//!
//! - **[`router`]** - `/a1r/<device>/<resource>` path resolution against the [`registry`]
//! - **[`payload`]** - content-format-aware decoding into [`payload::TypedValue`]
//! - **[`classifier`]** - outcome to CoAP response code
//! - **[`forwarder`]** - reading records and upstream sinks
//! - **[`security`]** - `NoSec` / `PSK` transport bootstrap
//! - **[`server`]** - protocol engine seam, UDP engine, request handler and lifecycle
//! - **[`runtime_config`]** - configuration file, driver map and environment overrides
//! - **[`logging`]** - structured `tracing` setup
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Device
//!     participant Engine as UdpEngine
//!     participant Handler as data_handler
//!     participant Router as ResourceRouter
//!     participant Decoder as payload::decode
//!     participant Sink as ReadingSink
//!     Device->>Engine: CON POST /a1r/dev/temp "21.5"
//!     Engine->>Handler: InboundRequest
//!     alt PUT
//!         Handler-->>Engine: 4.05
//!     end
//!     Handler->>Router: route(segments)
//!     alt unknown device / resource / extra segment
//!         Handler-->>Engine: 4.04
//!     end
//!     Handler->>Decoder: decode(type, content format, payload)
//!     alt format rejected / unsupported / invalid
//!         Handler-->>Engine: 4.15 / 5.00 / 4.00
//!     end
//!     Handler->>Sink: post_readings
//!     Handler-->>Engine: 2.04
//!     Engine-->>Device: ACK 2.04
//! ```
//!
//! The dispatch loop is single-threaded: each request runs to completion before the next
//! wait, and SIGINT/SIGTERM only set a stop flag checked between waits.

pub mod classifier;
pub mod cli;
pub mod error;
pub mod forwarder;
pub mod ids;
pub mod logging;
pub mod metrics;
pub mod payload;
pub mod registry;
pub mod router;
pub mod runtime_config;
pub mod security;
pub mod server;

pub use error::{BindError, GatewayError, GatewayResult};
pub use registry::{Device, DeviceCatalog, DeviceRegistry, Profile, ResourceDescriptor, ValueType};
pub use server::{CoapServer, HandlerContext, LifecycleState, ShutdownSignal};
