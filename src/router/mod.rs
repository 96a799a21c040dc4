//! # Router Module
//!
//! Resolves the URI path of an inbound CoAP request to a device and one of its resources.
//!
//! ## Overview
//!
//! Every accepted request follows a fixed three-segment scheme:
//!
//! ```text
//! /a1r/<device-name>/<resource-name>
//! ```
//!
//! - segment 0 must equal the literal [`RESOURCE_SEGMENT`]
//! - segment 1 names a device known to the [`DeviceRegistry`](crate::registry::DeviceRegistry)
//! - segment 2 names a resource in any profile of that device
//!
//! A fourth segment fails the route even when the first three resolve. Empty segments
//! (from `//` in a textual path, or empty Uri-Path options) are skipped.
//!
//! ## Example
//!
//! ```rust,ignore
//! use coap_ingest::router::ResourceRouter;
//!
//! let router = ResourceRouter::new(registry);
//! match router.route_path("/a1r/Temp-Sensor-1/temperature") {
//!     Ok(m) => println!("{} / {}", m.device.name, m.resource.name),
//!     Err(e) => println!("no route: {e}"),
//! }
//! ```

mod core;

pub use core::{
    split_path, PathSegments, ResourceRouter, RouteError, RouteMatch, MAX_INLINE_SEGMENTS,
    RESOURCE_SEGMENT,
};
