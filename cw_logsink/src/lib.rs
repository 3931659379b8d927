//! ABOUTME: Asynchronous execution-log sink with batch flush and alert mail
//! ABOUTME: Bounded ingress, size/timeout batching, best-effort store writes

use cw_core::{is_valid_email, JobLog};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod mailer;
pub mod metrics;
pub mod store;

pub use mailer::{alert_body, alert_subject, AlertSender, SmtpMailer};
pub use metrics::SinkMetrics;
pub use store::{LogStore, MongoLogStore};

/// Batching knobs for the sink.
#[derive(Debug, Clone)]
pub struct SinkOptions {
    /// Flush once a batch holds this many entries.
    pub batch_size: usize,
    /// Flush a partial batch this long after its first entry.
    pub commit_timeout: Duration,
    /// Bounded ingress capacity; appends beyond it are dropped.
    pub channel_capacity: usize,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            commit_timeout: Duration::from_millis(1000),
            channel_capacity: 1000,
        }
    }
}

/// Non-blocking ingress handle held by the scheduler.
///
/// Appends never block: when the channel is full the entry is dropped and
/// counted, so log persistence can never stall scheduling.
#[derive(Clone)]
pub struct LogAppender {
    tx: mpsc::Sender<JobLog>,
    metrics: SinkMetrics,
}

impl LogAppender {
    pub fn new(tx: mpsc::Sender<JobLog>, metrics: SinkMetrics) -> Self {
        Self { tx, metrics }
    }

    pub fn append(&self, log: JobLog) {
        match self.tx.try_send(log) {
            Ok(()) => {
                self.metrics.logs_accepted.inc();
            }
            Err(_) => {
                self.metrics.logs_dropped.inc();
                debug!("log channel full, dropping entry");
            }
        }
    }
}

/// An open batch awaiting its size threshold or commit timeout.
struct Batch {
    seq: u64,
    logs: Vec<JobLog>,
    timer: JoinHandle<()>,
}

/// Batches execution records into the log store and fires alert mail for
/// failed executions.
pub struct LogSink {
    store: Arc<dyn LogStore>,
    mailer: Option<Arc<dyn AlertSender>>,
    options: SinkOptions,
    metrics: SinkMetrics,
}

impl LogSink {
    pub fn new(
        store: Arc<dyn LogStore>,
        mailer: Option<Arc<dyn AlertSender>>,
        options: SinkOptions,
    ) -> Self {
        Self {
            store,
            mailer,
            options,
            metrics: SinkMetrics::new(),
        }
    }

    pub fn metrics(&self) -> SinkMetrics {
        self.metrics.clone()
    }

    /// Spawn the write loop and return the ingress handle.
    pub fn start(self, shutdown: CancellationToken) -> LogAppender {
        let (tx, rx) = mpsc::channel(self.options.channel_capacity);
        let appender = LogAppender::new(tx, self.metrics.clone());
        info!(
            batch_size = self.options.batch_size,
            commit_timeout_ms = self.options.commit_timeout.as_millis() as u64,
            "log sink started"
        );
        tokio::spawn(self.write_loop(rx, shutdown));
        appender
    }

    /// Sole owner of the current batch. Every accepted log lands in exactly
    /// one flush; a batch is sealed by size or by its commit timer,
    /// whichever fires first.
    async fn write_loop(self, mut rx: mpsc::Receiver<JobLog>, shutdown: CancellationToken) {
        let (commit_tx, mut commit_rx) = mpsc::channel::<u64>(16);
        let mut batch: Option<Batch> = None;
        let mut next_seq: u64 = 0;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    if let Some(open) = batch.take() {
                        open.timer.abort();
                        self.flush(open.logs).await;
                    }
                    info!("log sink stopped");
                    return;
                }
                maybe = rx.recv() => {
                    let Some(log) = maybe else {
                        if let Some(open) = batch.take() {
                            open.timer.abort();
                            self.flush(open.logs).await;
                        }
                        return;
                    };

                    if !log.err.is_empty() {
                        self.spawn_alert(&log);
                    }

                    if batch.is_none() {
                        next_seq += 1;
                        let seq = next_seq;
                        let tx = commit_tx.clone();
                        let timeout = self.options.commit_timeout;
                        let timer = tokio::spawn(async move {
                            tokio::time::sleep(timeout).await;
                            let _ = tx.send(seq).await;
                        });
                        batch = Some(Batch { seq, logs: Vec::new(), timer });
                    }

                    if let Some(open) = batch.as_mut() {
                        open.logs.push(log);
                    }
                    let full_batch = batch
                        .as_ref()
                        .map(|open| open.logs.len() >= self.options.batch_size)
                        .unwrap_or(false);
                    if full_batch {
                        if let Some(full) = batch.take() {
                            full.timer.abort();
                            self.flush(full.logs).await;
                        }
                    }
                }
                Some(seq) = commit_rx.recv() => {
                    match batch.take() {
                        Some(open) if open.seq == seq => self.flush(open.logs).await,
                        // A stale timeout for a batch already flushed by size.
                        other => batch = other,
                    }
                }
            }
        }
    }

    async fn flush(&self, logs: Vec<JobLog>) {
        if logs.is_empty() {
            return;
        }
        let count = logs.len();
        match self.store.insert_many(logs).await {
            Ok(()) => {
                self.metrics.batches_flushed.inc();
                self.metrics.logs_flushed.inc_by(count as u64);
                debug!(count, "flushed log batch");
            }
            Err(e) => {
                self.metrics.flush_errors.inc();
                warn!(error = %e, count, "failed to flush log batch");
            }
        }
    }

    /// Alert dispatch runs on a sibling task so SMTP latency never holds
    /// up batching.
    fn spawn_alert(&self, log: &JobLog) {
        let Some(mailer) = self.mailer.clone() else {
            debug!(job = %log.job_name, "no mailer configured, skipping alert");
            return;
        };
        if !is_valid_email(&log.email) {
            warn!(job = %log.job_name, email = %log.email, "invalid alert address, skipping alert");
            return;
        }

        let to = log.email.clone();
        let subject = alert_subject(log);
        let body = alert_body(log);
        let job = log.job_name.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            match mailer.send(&to, &subject, &body).await {
                Ok(()) => {
                    metrics.alerts_sent.inc();
                }
                Err(e) => {
                    metrics.alert_errors.inc();
                    warn!(job = %job, error = %e, "alert mail failed");
                }
            }
        });
    }
}
