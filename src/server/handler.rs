//! Request pipeline: router → decoder → forwarder → classifier.

use super::engine::{InboundRequest, Method, OutboundResponse};
use crate::classifier::{classify, Outcome};
use crate::forwarder::{forward, ReadingSink};
use crate::ids::RequestId;
use crate::metrics::GatewayMetrics;
use crate::payload::decode;
use crate::router::{PathSegments, ResourceRouter};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info_span};

/// Everything a handler needs, passed explicitly into every invocation.
#[derive(Clone)]
pub struct HandlerContext {
    pub router: ResourceRouter,
    pub sink: Arc<dyn ReadingSink>,
    pub metrics: Arc<GatewayMetrics>,
}

impl HandlerContext {
    pub fn new(
        router: ResourceRouter,
        sink: Arc<dyn ReadingSink>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            router,
            sink,
            metrics,
        }
    }
}

/// Handle one data request and set exactly one response code.
///
/// Registered as both the catch-all default (`PUT`) handler and the `POST` handler.
pub fn data_handler(ctx: &HandlerContext, req: &InboundRequest, resp: &mut OutboundResponse) {
    let span = info_span!(
        "coap_request",
        request_id = %RequestId::new(),
        method = %req.method,
        path = %req.path_display(),
        peer = %req.peer,
    );
    let _enter = span.enter();
    let start = Instant::now();

    let outcome = process(ctx, req);
    resp.set(classify(outcome));

    ctx.metrics.record(outcome, start.elapsed());
    debug!(outcome = outcome.as_str(), code = ?resp.code(), "Request handled");
}

fn process(ctx: &HandlerContext, req: &InboundRequest) -> Outcome {
    if req.method == Method::Put {
        debug!("PUT is not accepted");
        return Outcome::MethodRejected;
    }

    let segments: PathSegments<'_> = req.path.iter().map(String::as_str).collect();
    let route = match ctx.router.route(&segments) {
        Ok(route) => route,
        Err(_) => return Outcome::RoutingFailed,
    };

    match decode(
        route.resource.value_type,
        req.content_format,
        req.payload.as_deref(),
    ) {
        Ok(value) => {
            if !forward(ctx.sink.as_ref(), &route, value) {
                ctx.metrics.inc_sink_failure();
            }
            Outcome::Forwarded
        }
        Err(e) => Outcome::from(&e),
    }
}
