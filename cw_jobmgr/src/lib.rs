//! ABOUTME: Job manager materializing the store's job catalog and control signals
//! ABOUTME: Bootstrap load plus prefix watches translated into a typed event stream

use cw_core::{keys, Error, Job, JobEvent, Result};
use etcd_client::{Client, EventType, GetOptions, WatchOptions};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Subscribes to the jobs, killer, and once prefixes and produces
/// [`JobEvent`]s for the scheduler.
pub struct JobManager {
    client: Client,
    events: mpsc::Sender<JobEvent>,
}

impl JobManager {
    pub fn new(client: Client, events: mpsc::Sender<JobEvent>) -> Self {
        Self { client, events }
    }

    /// Load the current catalog, emit one `Save` per job, then keep the
    /// three prefix watches running until `shutdown` fires.
    ///
    /// Returns once the bootstrap load has completed; a bootstrap failure
    /// is an init error and bubbles up to the caller.
    pub async fn start(self, shutdown: CancellationToken) -> Result<()> {
        let revision = self.bootstrap().await?;

        for prefix in [keys::JOBS_PREFIX, keys::KILLER_PREFIX, keys::ONCE_PREFIX] {
            tokio::spawn(watch_loop(
                self.client.clone(),
                prefix,
                revision + 1,
                self.events.clone(),
                shutdown.clone(),
            ));
        }

        Ok(())
    }

    /// Read the whole jobs prefix, emit a `Save` per entry, and return the
    /// store revision the read was served at.
    async fn bootstrap(&self) -> Result<i64> {
        let mut client = self.client.clone();
        let resp = client
            .get(keys::JOBS_PREFIX, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| Error::Store(format!("job catalog load failed: {}", e)))?;

        let revision = resp.header().map(|h| h.revision()).unwrap_or(0);

        let mut loaded = 0usize;
        for kv in resp.kvs() {
            match serde_json::from_slice::<Job>(kv.value()) {
                Ok(job) => {
                    loaded += 1;
                    if self.events.send(JobEvent::Save(job)).await.is_err() {
                        return Err(Error::Store("scheduler event channel closed".into()));
                    }
                }
                Err(e) => {
                    warn!(
                        key = %String::from_utf8_lossy(kv.key()),
                        error = %e,
                        "skipping undecodable job entry"
                    );
                }
            }
        }

        info!(jobs = loaded, revision, "job catalog loaded");
        Ok(revision)
    }
}

/// Watch one prefix forever, translating notifications into events.
///
/// A broken or closed watch stream is reopened from the last observed
/// revision + 1 with exponential backoff.
async fn watch_loop(
    mut client: Client,
    prefix: &'static str,
    mut from_revision: i64,
    events: mpsc::Sender<JobEvent>,
    shutdown: CancellationToken,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if shutdown.is_cancelled() {
            return;
        }

        let options = WatchOptions::new()
            .with_prefix()
            .with_start_revision(from_revision);

        let (_watcher, mut stream) = match client.watch(prefix, Some(options)).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(prefix, error = %e, "failed to open watch, retrying");
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };
        debug!(prefix, from_revision, "watch opened");
        backoff = INITIAL_BACKOFF;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                msg = stream.message() => match msg {
                    Ok(Some(resp)) => {
                        for event in resp.events() {
                            let Some(kv) = event.kv() else { continue };
                            from_revision = from_revision.max(kv.mod_revision() + 1);
                            let key = String::from_utf8_lossy(kv.key());
                            let Some(job_event) =
                                translate(prefix, event.event_type(), &key, kv.value())
                            else {
                                continue;
                            };
                            if events.send(job_event).await.is_err() {
                                warn!(prefix, "scheduler event channel closed, stopping watch");
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        warn!(prefix, "watch stream closed, reopening");
                        break;
                    }
                    Err(e) => {
                        warn!(prefix, error = %e, "watch stream error, reopening");
                        break;
                    }
                },
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Translate one store notification into a scheduler event.
///
/// Undecodable job payloads are logged and skipped so a single bad key
/// never stalls the stream. Deletes of the transient killer/once keys
/// carry no meaning and are dropped.
fn translate(prefix: &str, event_type: EventType, key: &str, value: &[u8]) -> Option<JobEvent> {
    match (prefix, event_type) {
        (keys::JOBS_PREFIX, EventType::Put) => match serde_json::from_slice::<Job>(value) {
            Ok(job) => Some(JobEvent::Save(job)),
            Err(e) => {
                warn!(key, error = %e, "skipping undecodable job entry");
                None
            }
        },
        (keys::JOBS_PREFIX, EventType::Delete) => {
            Some(JobEvent::Delete(keys::job_name(key).to_string()))
        }
        (keys::KILLER_PREFIX, EventType::Put) => {
            Some(JobEvent::Kill(keys::killer_name(key).to_string()))
        }
        (keys::ONCE_PREFIX, EventType::Put) => {
            Some(JobEvent::Once(keys::once_name(key).to_string()))
        }
        // Transient signal keys expire on their own; nothing to do.
        (keys::KILLER_PREFIX | keys::ONCE_PREFIX, EventType::Delete) => None,
        _ => None,
    }
}
