//! Request counters for the dispatch loop.
//!
//! All counters are atomics updated with `Ordering::Relaxed`; the values are eventually
//! consistent and cheap to record on every request.

use crate::classifier::Outcome;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;

/// Per-outcome request statistics.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    request_count: AtomicUsize,
    total_latency_ns: AtomicU64,
    routing_failed: AtomicUsize,
    method_rejected: AtomicUsize,
    format_rejected: AtomicUsize,
    decode_failed: AtomicUsize,
    type_unsupported: AtomicUsize,
    forwarded: AtomicUsize,
    sink_failures: AtomicUsize,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, outcome: Outcome) -> &AtomicUsize {
        match outcome {
            Outcome::RoutingFailed => &self.routing_failed,
            Outcome::MethodRejected => &self.method_rejected,
            Outcome::FormatRejected => &self.format_rejected,
            Outcome::DecodeFailed => &self.decode_failed,
            Outcome::TypeUnsupported => &self.type_unsupported,
            Outcome::Forwarded => &self.forwarded,
        }
    }

    /// Record one handled request.
    pub fn record(&self, outcome: Outcome, latency: Duration) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.counter(outcome).fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns.fetch_add(
            u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    /// Record a reading the upstream sink did not accept.
    pub fn inc_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn outcome_count(&self, outcome: Outcome) -> usize {
        self.counter(outcome).load(Ordering::Relaxed)
    }

    pub fn sink_failures(&self) -> usize {
        self.sink_failures.load(Ordering::Relaxed)
    }

    /// Mean handling time; zero before the first request.
    pub fn average_latency(&self) -> Duration {
        let count = self.request_count.load(Ordering::Relaxed) as u64;
        if count == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }

    /// Emit one INFO line with every counter.
    pub fn log_summary(&self) {
        info!(
            requests = self.request_count(),
            forwarded = self.outcome_count(Outcome::Forwarded),
            routing_failed = self.outcome_count(Outcome::RoutingFailed),
            method_rejected = self.outcome_count(Outcome::MethodRejected),
            format_rejected = self.outcome_count(Outcome::FormatRejected),
            decode_failed = self.outcome_count(Outcome::DecodeFailed),
            type_unsupported = self.outcome_count(Outcome::TypeUnsupported),
            sink_failures = self.sink_failures(),
            avg_latency_us = self.average_latency().as_micros() as u64,
            "Request summary"
        );
    }
}
