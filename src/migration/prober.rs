//! Connectivity probe run before touching a cluster.

use std::sync::Arc;

use tracing::{debug, warn};

use super::client::ClientFactory;
use super::{ClusterEndpoint, MigrationError};

/// Checks that a cluster endpoint accepts connections and answers `PING`.
#[derive(Clone)]
pub struct Prober {
    factory: Arc<dyn ClientFactory>,
}

impl Prober {
    /// Create a prober that opens clients through `factory`.
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self { factory }
    }

    /// Whether `endpoint` is reachable. Failures are logged, never returned.
    pub async fn can_connect(&self, endpoint: &ClusterEndpoint) -> bool {
        match self.check(endpoint).await {
            Ok(()) => {
                debug!(%endpoint, "endpoint reachable");
                true
            }
            Err(e) => {
                warn!(%endpoint, error = %e, "cannot connect");
                false
            }
        }
    }

    /// Connect and `PING`, reporting why the endpoint is unreachable.
    pub async fn check(&self, endpoint: &ClusterEndpoint) -> Result<(), MigrationError> {
        let unreachable = |reason: String| MigrationError::Unreachable {
            endpoint: endpoint.clone(),
            reason,
        };
        let mut client = self
            .factory
            .connect(endpoint)
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        client.ping().await.map_err(|e| unreachable(e.to_string()))
    }
}
