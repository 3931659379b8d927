//! ABOUTME: Per-job distributed lock over the coordination store
//! ABOUTME: Lease grant, keep-alive, and create-revision CAS; revoke on release

use cw_core::{keys, ExecError};
use etcd_client::{Client, Compare, CompareOp, PutOptions, Txn, TxnOp};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Mutual exclusion for one job name, backed by a leased key created via
/// compare-and-swap on `create_revision == 0`.
///
/// While held, a keep-alive task renews the lease; if the worker dies the
/// lease expires and the store removes the key, bounding the window of
/// false exclusion to the lease TTL.
pub struct JobLock {
    client: Client,
    key: String,
    ttl_secs: i64,
    lease_id: Option<i64>,
    keep_alive: Option<CancellationToken>,
}

impl JobLock {
    pub fn new(client: Client, job_name: &str, ttl_secs: i64) -> Self {
        Self {
            client,
            key: keys::lock_key(job_name),
            ttl_secs,
            lease_id: None,
            keep_alive: None,
        }
    }

    /// One acquisition attempt; no queuing, losers fail fast with
    /// [`ExecError::LockBusy`].
    pub async fn try_lock(&mut self) -> Result<(), ExecError> {
        let lease = self
            .client
            .lease_grant(self.ttl_secs, None)
            .await
            .map_err(|e| ExecError::Store(format!("lease grant failed: {}", e)))?;
        let lease_id = lease.id();

        let (mut keeper, _responses) = match self.client.lease_keep_alive(lease_id).await {
            Ok(pair) => pair,
            Err(e) => {
                let _ = self.client.lease_revoke(lease_id).await;
                return Err(ExecError::Store(format!("keep-alive open failed: {}", e)));
            }
        };

        // Renew well inside the TTL for as long as this attempt lives.
        let cancel = CancellationToken::new();
        let keep_alive_cancel = cancel.clone();
        let interval = Duration::from_secs((self.ttl_secs as u64 / 3).max(1));
        let key = self.key.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = keep_alive_cancel.cancelled() => return,
                    _ = tick.tick() => {
                        if let Err(e) = keeper.keep_alive().await {
                            warn!(key = %key, error = %e, "lock keep-alive failed");
                            return;
                        }
                    }
                }
            }
        });

        let txn = Txn::new()
            .when([Compare::create_revision(
                self.key.as_str(),
                CompareOp::Equal,
                0,
            )])
            .and_then([TxnOp::put(
                self.key.as_str(),
                Vec::new(),
                Some(PutOptions::new().with_lease(lease_id)),
            )]);

        match self.client.txn(txn).await {
            Ok(resp) if resp.succeeded() => {
                debug!(key = %self.key, "lock acquired");
                self.lease_id = Some(lease_id);
                self.keep_alive = Some(cancel);
                Ok(())
            }
            Ok(_) => {
                cancel.cancel();
                let _ = self.client.lease_revoke(lease_id).await;
                Err(ExecError::LockBusy)
            }
            Err(e) => {
                cancel.cancel();
                let _ = self.client.lease_revoke(lease_id).await;
                Err(ExecError::Store(format!("lock transaction failed: {}", e)))
            }
        }
    }

    /// Stop renewing and revoke the lease; the store deletes the key.
    pub async fn unlock(&mut self) {
        if let Some(cancel) = self.keep_alive.take() {
            cancel.cancel();
        }
        if let Some(lease_id) = self.lease_id.take() {
            if let Err(e) = self.client.lease_revoke(lease_id).await {
                warn!(key = %self.key, error = %e, "lease revoke failed");
            } else {
                debug!(key = %self.key, "lock released");
            }
        }
    }
}
