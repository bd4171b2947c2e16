//! Shared test utilities for failover-migrate integration tests.
//!
//! Import via `mod common;` in integration test files:
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

use std::sync::Arc;

use failover_migrate::migration::{
    ClusterEndpoint, ClusterEntry, MemoryCluster, MemoryClusterFactory, Orchestrator,
};

// ============================================================================
// Topology helpers
// ============================================================================

/// Active and failover clusters of one configured entry.
#[allow(dead_code)]
pub struct ClusterPair {
    pub entry: ClusterEntry,
    pub active: MemoryCluster,
    pub failover: MemoryCluster,
}

/// Build the `n`th entry's endpoints (`active-n:6379`, `failover-n:6379`).
#[allow(dead_code)]
pub fn entry(n: usize) -> ClusterEntry {
    ClusterEntry {
        active_server: ClusterEndpoint::new(format!("active-{}.cache.local", n), 6379),
        failover_server: ClusterEndpoint::new(format!("failover-{}.cache.local", n), 6379),
    }
}

/// Create `count` entries, each backed by a fresh pair of in-memory clusters,
/// and a factory that knows about all of them.
#[allow(dead_code)]
pub fn topology(count: usize) -> (Vec<ClusterPair>, MemoryClusterFactory) {
    let mut factory = MemoryClusterFactory::new();
    let pairs: Vec<ClusterPair> = (1..=count)
        .map(|n| {
            let pair = ClusterPair {
                entry: entry(n),
                active: MemoryCluster::new(),
                failover: MemoryCluster::new(),
            };
            factory.register(pair.entry.active_server.clone(), pair.active.clone());
            factory.register(pair.entry.failover_server.clone(), pair.failover.clone());
            pair
        })
        .collect();
    (pairs, factory)
}

/// Configured entries of a topology, in order.
#[allow(dead_code)]
pub fn entries(pairs: &[ClusterPair]) -> Vec<ClusterEntry> {
    pairs.iter().map(|p| p.entry.clone()).collect()
}

/// Orchestrator over an in-memory factory.
#[allow(dead_code)]
pub fn orchestrator(factory: MemoryClusterFactory) -> Orchestrator {
    Orchestrator::new(Arc::new(factory))
}

// ============================================================================
// Data helpers
// ============================================================================

/// Fill `cluster` with `count` keys named `{prefix}:{i}`, every third one
/// expiring after `i + 1` seconds.
#[allow(dead_code)]
pub fn seed(cluster: &MemoryCluster, prefix: &str, count: usize) {
    for i in 0..count {
        let ttl = (i % 3 == 0).then_some(i as u64 + 1);
        cluster.insert(format!("{}:{}", prefix, i), format!("value-{}", i), ttl);
    }
}
