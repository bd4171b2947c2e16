//! Cluster client abstraction.
//!
//! The migration components only talk to a cluster through
//! [`ClusterClient`], obtained from a [`ClientFactory`]. Each call site opens
//! its own client and drops it when done, which releases the underlying
//! connections.

#![forbid(unsafe_code)]

use super::ClusterEndpoint;

/// Error type for client operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The cluster could not be reached or the connection dropped.
    #[error("connection error: {0}")]
    Connection(String),
    /// The server rejected a command.
    #[error("command error: {0}")]
    Command(String),
    /// A reply had an unexpected shape.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Position of a cluster-wide `SCAN`.
///
/// A cluster keyspace is spread over several primaries, so the position is
/// the index of the primary being scanned plus that node's own cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanCursor {
    /// Scan is in progress at `cursor` on the `node`th primary.
    At {
        /// Index of the primary being scanned
        node: usize,
        /// Server-side SCAN cursor on that primary
        cursor: u64,
    },
    /// Every primary has been scanned.
    Exhausted,
}

impl ScanCursor {
    /// Cursor that starts a fresh scan.
    pub const START: ScanCursor = ScanCursor::At { node: 0, cursor: 0 };

    /// Whether the scan has covered the whole keyspace.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, ScanCursor::Exhausted)
    }
}

/// Capability set the migration needs from a cluster.
///
/// Every method maps onto exactly one Redis command.
#[async_trait::async_trait]
pub trait ClusterClient: Send {
    /// `PING`
    async fn ping(&mut self) -> Result<()>;

    /// `FLUSHALL` on every primary.
    async fn flush_all(&mut self) -> Result<()>;

    /// `SCAN cursor COUNT count`, returning the next position and a batch of
    /// keys.
    async fn scan(&mut self, cursor: ScanCursor, count: usize)
        -> Result<(ScanCursor, Vec<Vec<u8>>)>;

    /// `TTL key` in seconds; -1 for persistent keys, -2 for missing ones.
    async fn ttl(&mut self, key: &[u8]) -> Result<i64>;

    /// `DUMP key`; `None` when the key does not exist.
    async fn dump(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// `RESTORE key ttl_ms payload [REPLACE]`; a TTL of 0 means no expiry.
    async fn restore(&mut self, key: &[u8], ttl_ms: u64, payload: &[u8], replace: bool)
        -> Result<()>;
}

/// Opens clients to cluster endpoints.
#[async_trait::async_trait]
pub trait ClientFactory: Send + Sync {
    /// Establish a client to the cluster seeded at `endpoint`.
    async fn connect(&self, endpoint: &ClusterEndpoint) -> Result<Box<dyn ClusterClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_cursor() {
        assert_eq!(ScanCursor::START, ScanCursor::At { node: 0, cursor: 0 });
        assert!(!ScanCursor::START.is_exhausted());
        assert!(ScanCursor::Exhausted.is_exhausted());
    }

    #[test]
    fn test_error_display() {
        let err = ClientError::Connection("refused".into());
        assert_eq!(err.to_string(), "connection error: refused");
    }
}
