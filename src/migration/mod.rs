//! Cluster-to-cluster migration
//!
//! Copies every key of a source Redis cluster, together with its remaining
//! TTL, into a destination cluster using `DUMP` / `RESTORE ... REPLACE`.
//!
//! # Pipeline
//!
//! - [`Prober`] checks that an endpoint answers `PING`
//! - [`Cleaner`] flushes the destination when asked to
//! - [`MigrationEngine`] scans the source and restores each key
//! - [`Orchestrator`] drives the three over every configured entry
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use failover_migrate::migration::{Direction, Orchestrator, RedisClusterFactory};
//!
//! let factory = Arc::new(RedisClusterFactory::new(config.connection.clone()));
//! let report = Orchestrator::new(factory)
//!     .run(&config.redis, Direction::Failover, false)
//!     .await;
//! ```

pub mod cleaner;
pub mod client;
pub mod engine;
pub mod memory;
pub mod orchestrator;
pub mod prober;
pub mod redis_client;

pub use cleaner::Cleaner;
pub use client::{ClientError, ClientFactory, ClusterClient, ScanCursor};
pub use engine::{MigrationEngine, SCAN_BATCH_SIZE};
pub use memory::{MemoryCluster, MemoryClusterFactory};
pub use orchestrator::{CleanupStatus, Orchestrator, PairOutcome, PairReport, RunReport};
pub use prober::Prober;
pub use redis_client::RedisClusterFactory;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Migration error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MigrationError {
    /// Endpoint did not answer a liveness check
    #[error("endpoint {endpoint} unreachable: {reason}")]
    Unreachable {
        /// Endpoint that was probed
        endpoint: ClusterEndpoint,
        /// Underlying client error
        reason: String,
    },

    /// Client could not be established
    #[error("connection error: {0}")]
    Connection(String),

    /// Destination flush failed
    #[error("cleanup of {endpoint} failed: {reason}")]
    Cleanup {
        /// Destination that was being flushed
        endpoint: ClusterEndpoint,
        /// Underlying client error
        reason: String,
    },

    /// A single key could not be read or written
    #[error("key transfer failed: {0}")]
    KeyTransfer(String),

    /// Key disappeared between SCAN and DUMP
    #[error("key no longer exists on source")]
    KeyVanished,

    /// Keyspace iteration failed
    #[error("scan failed: {0}")]
    Scan(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),
}

/// Migration result type
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Address of one cluster's seed node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterEndpoint {
    /// Hostname or IP address
    #[serde(rename = "endpoint")]
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl ClusterEndpoint {
    /// Create an endpoint from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ClusterEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One configured active/failover cluster pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEntry {
    /// Cluster that normally serves traffic
    pub active_server: ClusterEndpoint,
    /// Standby cluster
    pub failover_server: ClusterEndpoint,
}

/// Which cluster traffic is being switched to.
///
/// Switching to a cluster makes it the destination; the other cluster of the
/// entry is the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Failover cluster becomes the source, active cluster the destination
    Active,
    /// Active cluster becomes the source, failover cluster the destination
    Failover,
}

impl Direction {
    /// Resolve an entry into the source/destination pair for this direction.
    pub fn select(&self, entry: &ClusterEntry) -> MigrationPair {
        match self {
            Direction::Failover => MigrationPair {
                source: entry.active_server.clone(),
                destination: entry.failover_server.clone(),
            },
            Direction::Active => MigrationPair {
                source: entry.failover_server.clone(),
                destination: entry.active_server.clone(),
            },
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Active => write!(f, "active"),
            Direction::Failover => write!(f, "failover"),
        }
    }
}

/// Source and destination of one migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPair {
    /// Cluster keys are read from
    pub source: ClusterEndpoint,
    /// Cluster keys are restored into
    pub destination: ClusterEndpoint,
}

impl fmt::Display for MigrationPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}

/// A key read from the source, ready to be restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    /// Raw key bytes
    pub key: Vec<u8>,
    /// Opaque `DUMP` payload
    pub serialized_value: Vec<u8>,
    /// Remaining TTL in seconds, 0 when the key does not expire
    pub ttl_seconds: u64,
}

impl KeyRecord {
    /// Build a record from a raw `TTL` reply, clamping the negative
    /// sentinels (-1 persistent, -2 missing) to 0.
    ///
    /// A reply of 0 is a live key with under a second left. It keeps a one
    /// second expiry so that it is not restored as persistent.
    pub fn new(key: Vec<u8>, serialized_value: Vec<u8>, raw_ttl: i64) -> Self {
        let ttl_seconds = match raw_ttl {
            0 => 1,
            t => t.max(0) as u64,
        };
        Self {
            key,
            serialized_value,
            ttl_seconds,
        }
    }

    /// TTL as passed to `RESTORE`.
    pub fn ttl_millis(&self) -> u64 {
        self.ttl_seconds.saturating_mul(1000)
    }
}

/// A key that could not be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFailure {
    /// Raw key bytes
    pub key: Vec<u8>,
    /// Error message
    pub error: String,
}

impl KeyFailure {
    /// Key rendered for display; invalid UTF-8 is replaced.
    pub fn key_lossy(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

/// Outcome of migrating one source cluster into one destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// 1-based position of the entry in the configuration
    pub pair_index: usize,
    /// Source cluster
    pub source: ClusterEndpoint,
    /// Destination cluster
    pub destination: ClusterEndpoint,
    /// Keys restored successfully
    pub migrated_count: u64,
    /// Keys that failed, in scan order
    pub failures: Vec<KeyFailure>,
    /// Set when the scan stopped before the keyspace was exhausted
    pub scan_error: Option<String>,
    /// When the migration started
    pub started_at: DateTime<Utc>,
    /// Wall time spent
    pub duration: Duration,
}

impl MigrationResult {
    pub(crate) fn new(
        pair_index: usize,
        source: &ClusterEndpoint,
        destination: &ClusterEndpoint,
    ) -> Self {
        Self {
            pair_index,
            source: source.clone(),
            destination: destination.clone(),
            migrated_count: 0,
            failures: Vec::new(),
            scan_error: None,
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    /// Number of keys that failed.
    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    /// Whether every scanned key was migrated and the scan ran to the end.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.scan_error.is_none()
    }
}
