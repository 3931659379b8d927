//! ABOUTME: Worker liveness registration in the coordination store
//! ABOUTME: Advertises the worker's primary IP under a kept-alive lease

use cw_core::{keys, Error, Result};
use etcd_client::{Client, PutOptions};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Registers this worker under the workers prefix and keeps the lease
/// alive; the master's liveness listing is a plain prefix scan.
pub struct WorkerRegistry {
    client: Client,
    local_ip: String,
    lease_ttl_secs: i64,
}

impl WorkerRegistry {
    /// Discover the primary non-loopback IP and prepare the registration.
    pub fn new(client: Client, lease_ttl_secs: i64) -> Result<Self> {
        let local_ip = discover_local_ip()?;
        Ok(Self {
            client,
            local_ip,
            lease_ttl_secs,
        })
    }

    /// The IP this worker advertises (also recorded on job logs).
    pub fn local_ip(&self) -> &str {
        &self.local_ip
    }

    /// Put the leased liveness key and start renewing it until `shutdown`.
    ///
    /// Failure here is an init failure: a worker that cannot register must
    /// not run jobs.
    pub async fn register(&self, shutdown: CancellationToken) -> Result<()> {
        let mut client = self.client.clone();

        let lease = client
            .lease_grant(self.lease_ttl_secs, None)
            .await
            .map_err(|e| Error::Store(format!("registration lease grant failed: {}", e)))?;
        let lease_id = lease.id();

        let (mut keeper, _responses) = client
            .lease_keep_alive(lease_id)
            .await
            .map_err(|e| Error::Store(format!("registration keep-alive failed: {}", e)))?;

        let key = keys::worker_key(&self.local_ip);
        client
            .put(
                key.as_str(),
                Vec::new(),
                Some(PutOptions::new().with_lease(lease_id)),
            )
            .await
            .map_err(|e| Error::Store(format!("registration put failed: {}", e)))?;

        info!(ip = %self.local_ip, lease_id, "worker registered");

        let interval = Duration::from_secs((self.lease_ttl_secs as u64 / 3).max(1));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        if let Err(e) = client.lease_revoke(lease_id).await {
                            warn!(error = %e, "deregistration failed");
                        }
                        return;
                    }
                    _ = tick.tick() => {
                        if let Err(e) = keeper.keep_alive().await {
                            warn!(error = %e, "registration keep-alive failed");
                            return;
                        }
                    }
                }
            }
        });

        Ok(())
    }
}

/// First non-loopback address of this host.
fn discover_local_ip() -> Result<String> {
    let ip = local_ip_address::local_ip()
        .map_err(|e| Error::Config(format!("local IP discovery failed: {}", e)))?;
    Ok(ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovered_ip_is_routable() {
        // Hosts without a non-loopback interface legitimately error out.
        let Ok(ip) = discover_local_ip() else {
            return;
        };
        let parsed: std::net::IpAddr = ip.parse().expect("discovered IP parses");
        assert!(!parsed.is_loopback());
    }

    #[test]
    fn test_registration_key_shape() {
        assert_eq!(keys::worker_key("192.168.1.2"), "/cron/workers/192.168.1.2");
    }
}
