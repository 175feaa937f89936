//! Pool refresher — background task that keeps node snapshots current.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::client::NodeClient;
use crate::pool::NodePool;

/// Default refresh cadence.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically refreshes every node in a pool.
pub struct PoolRefresher {
    pool: NodePool,
    client: NodeClient,
    interval: Duration,
}

impl PoolRefresher {
    pub fn new(pool: NodePool, client: NodeClient) -> Self {
        Self {
            pool,
            client,
            interval: DEFAULT_REFRESH_INTERVAL,
        }
    }

    /// Set the refresh cadence.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Refresh once immediately, then every interval until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "pool refresher started");
        self.pool.refresh_all(&self.client).await;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let stats = self.pool.refresh_all(&self.client).await;
                    debug!(refreshed = stats.refreshed, failed = stats.failed, "refresh tick");
                }
                _ = shutdown.changed() => {
                    info!("pool refresher shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refresher_stops_on_shutdown() {
        let pool = NodePool::in_memory();
        let refresher = PoolRefresher::new(pool, NodeClient::new())
            .with_interval(Duration::from_millis(10));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { refresher.run(rx).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
