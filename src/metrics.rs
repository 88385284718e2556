//! Metrics instrumentation for chaos-dns.
//!
//! All metrics are prefixed with `chaos_dns.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// How a DNS query left the chaos handler.
#[derive(Debug, Clone, Copy)]
pub enum QueryOutcome {
    /// A fault was injected (error or random answer).
    Injected,
    /// The query fell through to the next handler.
    Forwarded,
    /// Handling failed (no next handler, malformed query, write error).
    Failed,
}

/// Record one handled DNS query.
pub fn record_query(outcome: QueryOutcome) {
    let outcome_str = match outcome {
        QueryOutcome::Injected => "injected",
        QueryOutcome::Forwarded => "forwarded",
        QueryOutcome::Failed => "failed",
    };
    counter!("chaos_dns.query.count", "outcome" => outcome_str).increment(1);
}

/// Record the end-to-end handling duration of one query.
pub fn record_query_duration(duration: std::time::Duration) {
    histogram!("chaos_dns.query.duration.seconds").record(duration.as_secs_f64());
}

/// Record one injected fault, labelled by action.
pub fn record_injection(action: &'static str) {
    counter!("chaos_dns.injection.count", "action" => action).increment(1);
}

/// Result of a lazy pod IP refresh.
#[derive(Debug, Clone, Copy)]
pub enum RefreshOutcome {
    /// The pod moved; the binding was re-indexed.
    Updated,
    /// The IP was unchanged; only the timestamp advanced.
    Unchanged,
    /// The resolver failed; the stale binding was kept.
    Failed,
}

/// Record one refresh attempt.
pub fn record_refresh(outcome: RefreshOutcome) {
    let outcome_str = match outcome {
        RefreshOutcome::Updated => "updated",
        RefreshOutcome::Unchanged => "unchanged",
        RefreshOutcome::Failed => "failed",
    };
    counter!("chaos_dns.refresh.count", "outcome" => outcome_str).increment(1);
}

/// Record one control-plane request.
pub fn record_control_request(op: &'static str, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    counter!("chaos_dns.control.request.count", "op" => op, "result" => result).increment(1);
}

/// Record registry gauges (call periodically or on change).
pub fn record_registry_counts(rules: usize, bindings: usize) {
    gauge!("chaos_dns.registry.rules.count").set(rules as f64);
    gauge!("chaos_dns.registry.bindings.count").set(bindings as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
