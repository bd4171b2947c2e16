//! Destination flush before migration.

use std::sync::Arc;

use tracing::{info, warn};

use super::client::ClientFactory;
use super::{ClusterEndpoint, MigrationError, Result};

/// Deletes every key on a destination cluster with `FLUSHALL`.
#[derive(Clone)]
pub struct Cleaner {
    factory: Arc<dyn ClientFactory>,
}

impl Cleaner {
    /// Create a cleaner that opens clients through `factory`.
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self { factory }
    }

    /// Flush all data at `endpoint`. Irreversible.
    pub async fn cleanup(&self, endpoint: &ClusterEndpoint) -> Result<()> {
        let failed = |reason: String| {
            warn!(%endpoint, error = %reason, "failed to clean up destination");
            MigrationError::Cleanup {
                endpoint: endpoint.clone(),
                reason,
            }
        };

        let mut client = self
            .factory
            .connect(endpoint)
            .await
            .map_err(|e| failed(e.to_string()))?;

        info!(%endpoint, "cleaning up destination (FLUSHALL)");
        client.flush_all().await.map_err(|e| failed(e.to_string()))?;
        info!(%endpoint, "destination cleanup complete");
        Ok(())
    }
}
