//! ABOUTME: Sink counters for log persistence and alert delivery
//! ABOUTME: Tracks accepted, dropped, flushed, and failed records

use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;

/// Metrics for the log sink pipeline
#[derive(Debug, Clone, Default)]
pub struct SinkMetrics {
    /// Logs accepted onto the ingress channel
    pub logs_accepted: Counter,
    /// Logs dropped because the ingress channel was full
    pub logs_dropped: Counter,
    /// Logs written to the log store
    pub logs_flushed: Counter,
    /// Batches written to the log store
    pub batches_flushed: Counter,
    /// Batch writes that failed (swallowed, best-effort sink)
    pub flush_errors: Counter,
    /// Alert mails handed to the transport successfully
    pub alerts_sent: Counter,
    /// Alert mails that failed to send
    pub alert_errors: Counter,
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register all counters with a Prometheus registry
    pub fn register(&self, registry: &mut Registry) {
        registry.register(
            "joblog_accepted",
            "Logs accepted onto the ingress channel",
            self.logs_accepted.clone(),
        );
        registry.register(
            "joblog_dropped",
            "Logs dropped on ingress overflow",
            self.logs_dropped.clone(),
        );
        registry.register(
            "joblog_flushed",
            "Logs written to the log store",
            self.logs_flushed.clone(),
        );
        registry.register(
            "joblog_batches_flushed",
            "Batches written to the log store",
            self.batches_flushed.clone(),
        );
        registry.register(
            "joblog_flush_errors",
            "Failed batch writes",
            self.flush_errors.clone(),
        );
        registry.register(
            "joblog_alerts_sent",
            "Alert mails sent",
            self.alerts_sent.clone(),
        );
        registry.register(
            "joblog_alert_errors",
            "Alert mails that failed",
            self.alert_errors.clone(),
        );
    }
}
