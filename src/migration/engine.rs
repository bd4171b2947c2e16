//! Migration engine: scan the source, `DUMP` every key, `RESTORE` it on the
//! destination.
//!
//! A failure on one key is recorded and the scan moves on. A failure of the
//! scan itself ends the run for the pair, keeping whatever was migrated.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::client::{ClientFactory, ClusterClient, ScanCursor};
use super::{ClusterEndpoint, KeyFailure, KeyRecord, MigrationError, MigrationResult, Result};

/// Keys requested per `SCAN` round-trip.
pub const SCAN_BATCH_SIZE: usize = 1000;

/// Copies the keyspace of one cluster into another.
#[derive(Clone)]
pub struct MigrationEngine {
    factory: Arc<dyn ClientFactory>,
}

impl MigrationEngine {
    /// Create an engine that opens clients through `factory`.
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self { factory }
    }

    /// Migrate every key of `source` into `destination`.
    ///
    /// Returns `Err` only when a client cannot be established. Per-key and
    /// scan failures are reported inside the [`MigrationResult`].
    pub async fn migrate(
        &self,
        pair_index: usize,
        source: &ClusterEndpoint,
        destination: &ClusterEndpoint,
    ) -> Result<MigrationResult> {
        info!(%source, %destination, "starting migration");

        let connect_failed = |endpoint: &ClusterEndpoint, e: String| {
            warn!(%source, %destination, error = %e, "skipping migration");
            MigrationError::Connection(format!("{}: {}", endpoint, e))
        };
        let mut src = self
            .factory
            .connect(source)
            .await
            .map_err(|e| connect_failed(source, e.to_string()))?;
        let mut dst = self
            .factory
            .connect(destination)
            .await
            .map_err(|e| connect_failed(destination, e.to_string()))?;

        let started = Instant::now();
        let mut result = MigrationResult::new(pair_index, source, destination);

        if let Err(e) = self.copy_keyspace(src.as_mut(), dst.as_mut(), &mut result).await {
            error!(
                error = %e,
                migrated = result.migrated_count,
                "error during scan/restore loop"
            );
            result.scan_error = Some(e.to_string());
        }

        result.duration = started.elapsed();
        info!(
            migrated = result.migrated_count,
            failed = result.failed_count(),
            elapsed_ms = result.duration.as_millis() as u64,
            "migration finished"
        );
        Ok(result)
    }

    /// Walk the source keyspace, transferring each key. Only a scan failure
    /// is returned; key failures are pushed onto `result`.
    async fn copy_keyspace(
        &self,
        src: &mut dyn ClusterClient,
        dst: &mut dyn ClusterClient,
        result: &mut MigrationResult,
    ) -> Result<()> {
        let mut cursor = ScanCursor::START;
        loop {
            let (next, keys) = src
                .scan(cursor, SCAN_BATCH_SIZE)
                .await
                .map_err(|e| MigrationError::Scan(e.to_string()))?;
            debug!(batch = keys.len(), ?next, "scanned batch");

            for key in keys {
                match transfer_key(src, dst, &key).await {
                    Ok(()) => result.migrated_count += 1,
                    Err(e) => {
                        warn!(
                            key = %String::from_utf8_lossy(&key),
                            error = %e,
                            "failed to restore key"
                        );
                        result.failures.push(KeyFailure {
                            key,
                            error: e.to_string(),
                        });
                    }
                }
            }

            if next.is_exhausted() {
                return Ok(());
            }
            cursor = next;
        }
    }
}

/// Read `key` from the source as a [`KeyRecord`].
pub async fn read_key(src: &mut dyn ClusterClient, key: &[u8]) -> Result<KeyRecord> {
    let ttl = src
        .ttl(key)
        .await
        .map_err(|e| MigrationError::KeyTransfer(format!("TTL: {}", e)))?;
    let payload = src
        .dump(key)
        .await
        .map_err(|e| MigrationError::KeyTransfer(format!("DUMP: {}", e)))?
        .ok_or(MigrationError::KeyVanished)?;
    Ok(KeyRecord::new(key.to_vec(), payload, ttl))
}

/// Restore `record` on the destination, replacing any existing value.
pub async fn write_key(dst: &mut dyn ClusterClient, record: &KeyRecord) -> Result<()> {
    dst.restore(
        &record.key,
        record.ttl_millis(),
        &record.serialized_value,
        true,
    )
    .await
    .map_err(|e| MigrationError::KeyTransfer(format!("RESTORE: {}", e)))
}

async fn transfer_key(
    src: &mut dyn ClusterClient,
    dst: &mut dyn ClusterClient,
    key: &[u8],
) -> Result<()> {
    let record = read_key(src, key).await?;
    write_key(dst, &record).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::memory::{MemoryCluster, MemoryClusterFactory};

    struct Fixture {
        source: MemoryCluster,
        destination: MemoryCluster,
        engine: MigrationEngine,
    }

    fn src_ep() -> ClusterEndpoint {
        ClusterEndpoint::new("active.local", 6379)
    }

    fn dst_ep() -> ClusterEndpoint {
        ClusterEndpoint::new("failover.local", 6379)
    }

    fn fixture() -> Fixture {
        let source = MemoryCluster::new();
        let destination = MemoryCluster::new();
        let factory = MemoryClusterFactory::new()
            .with_cluster(src_ep(), source.clone())
            .with_cluster(dst_ep(), destination.clone());
        Fixture {
            source,
            destination,
            engine: MigrationEngine::new(Arc::new(factory)),
        }
    }

    impl Fixture {
        async fn run(&self) -> MigrationResult {
            self.engine.migrate(1, &src_ep(), &dst_ep()).await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_copies_values_and_ttls() {
        let f = fixture();
        f.source.insert("user:1", "alice", Some(120));
        f.source.insert("user:2", "bob", None);

        let result = f.run().await;

        assert_eq!(result.migrated_count, 2);
        assert!(result.is_complete());
        assert_eq!(f.destination.get("user:1"), Some(b"alice".to_vec()));
        assert_eq!(f.destination.ttl_ms("user:1"), Some(Some(120_000)));
        assert_eq!(f.destination.get("user:2"), Some(b"bob".to_vec()));
        assert_eq!(f.destination.ttl_ms("user:2"), Some(None));
    }

    #[tokio::test]
    async fn test_empty_source() {
        let f = fixture();
        let result = f.run().await;
        assert_eq!(result.migrated_count, 0);
        assert!(result.is_complete());
        assert_eq!(result.pair_index, 1);
    }

    #[tokio::test]
    async fn test_spans_multiple_scan_batches() {
        let f = fixture();
        for i in 0..(SCAN_BATCH_SIZE * 2 + 17) {
            f.source.insert(format!("k:{}", i), i.to_string(), None);
        }
        let result = f.run().await;
        assert_eq!(result.migrated_count as usize, SCAN_BATCH_SIZE * 2 + 17);
        assert_eq!(f.destination.len(), f.source.len());
    }

    #[tokio::test]
    async fn test_dump_failure_is_isolated() {
        let f = fixture();
        f.source.insert("a", "1", None);
        f.source.insert("b", "2", None);
        f.source.insert("c", "3", None);
        f.source.fail_dump_for("b");

        let result = f.run().await;

        assert_eq!(result.migrated_count, 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].key, b"b".to_vec());
        assert!(result.failures[0].error.contains("DUMP"));
        assert!(result.scan_error.is_none());
        assert!(f.destination.contains("a"));
        assert!(!f.destination.contains("b"));
        assert!(f.destination.contains("c"));
    }

    #[tokio::test]
    async fn test_restore_failure_is_isolated() {
        let f = fixture();
        f.source.insert("a", "1", None);
        f.source.insert("b", "2", None);
        f.destination.fail_restore_for("a");

        let result = f.run().await;

        assert_eq!(result.migrated_count, 1);
        assert_eq!(result.failures[0].key_lossy(), "a");
        assert!(result.failures[0].error.contains("RESTORE"));
        assert!(f.destination.contains("b"));
    }

    #[tokio::test]
    async fn test_ttl_failure_is_isolated() {
        let f = fixture();
        f.source.insert("a", "1", None);
        f.source.insert("b", "2", None);
        f.source.fail_ttl_for("a");

        let result = f.run().await;
        assert_eq!(result.migrated_count, 1);
        assert_eq!(result.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_vanished_key_is_recorded() {
        let f = fixture();
        f.source.insert("gone", "1", Some(1));
        f.source.insert("stays", "2", None);
        f.source.vanish_on_dump("gone");

        let result = f.run().await;
        assert_eq!(result.migrated_count, 1);
        assert_eq!(
            result.failures[0].error,
            MigrationError::KeyVanished.to_string()
        );
    }

    #[tokio::test]
    async fn test_vanished_key_does_not_hide_later_keys() {
        let f = fixture();
        for i in 0..(SCAN_BATCH_SIZE + 5) {
            f.source.insert(format!("k:{:05}", i), "v", None);
        }
        f.source.vanish_on_dump("k:00003");

        let result = f.run().await;

        assert_eq!(result.migrated_count as usize, SCAN_BATCH_SIZE + 4);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].key_lossy(), "k:00003");
        for key in f.source.keys() {
            assert!(
                f.destination.contains(&key),
                "missing {}",
                String::from_utf8_lossy(&key)
            );
        }
        assert!(f.destination.contains(format!("k:{:05}", SCAN_BATCH_SIZE)));
    }

    #[tokio::test]
    async fn test_key_about_to_expire_is_not_made_persistent() {
        let f = fixture();
        f.source.insert("flash", "v", Some(0));

        let result = f.run().await;
        assert!(result.is_complete());
        assert_eq!(f.destination.ttl_ms("flash"), Some(Some(1_000)));
    }

    #[tokio::test]
    async fn test_scan_failure_keeps_partial_progress() {
        let f = fixture();
        for i in 0..(SCAN_BATCH_SIZE + 10) {
            f.source.insert(format!("k:{:05}", i), "v", None);
        }
        f.source.fail_scan_after(1);

        let result = f.run().await;

        assert_eq!(result.migrated_count as usize, SCAN_BATCH_SIZE);
        assert!(result.scan_error.is_some());
        assert!(!result.is_complete());
        assert_eq!(f.source.open_clients(), 0);
        assert_eq!(f.destination.open_clients(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_destination_skips_pair() {
        let f = fixture();
        f.source.insert("a", "1", None);
        f.destination.set_unreachable(true);

        let err = f.engine.migrate(1, &src_ep(), &dst_ep()).await.unwrap_err();
        assert!(matches!(err, MigrationError::Connection(_)));
        assert_eq!(f.source.open_clients(), 0);
    }

    #[tokio::test]
    async fn test_replace_overwrites_existing_destination_keys() {
        let f = fixture();
        f.source.insert("k", "new", None);
        f.destination.insert("k", "old", Some(5));

        let result = f.run().await;
        assert!(result.is_complete());
        assert_eq!(f.destination.get("k"), Some(b"new".to_vec()));
        assert_eq!(f.destination.ttl_ms("k"), Some(None));
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let f = fixture();
        for i in 0..50 {
            f.source.insert(format!("k{}", i), "v", Some(i));
        }
        let first = f.run().await;
        let second = f.run().await;
        assert_eq!(first.migrated_count, second.migrated_count);
        assert!(second.failures.is_empty());
        assert_eq!(f.destination.len(), 50);
    }

    #[tokio::test]
    async fn test_read_key_normalizes_persistent_ttl() {
        let cluster = MemoryCluster::new();
        cluster.insert("k", "v", None);
        let factory = MemoryClusterFactory::new().with_cluster(src_ep(), cluster);
        let mut client = factory.connect(&src_ep()).await.unwrap();

        let record = read_key(client.as_mut(), b"k").await.unwrap();
        assert_eq!(record.ttl_seconds, 0);
        assert_eq!(record.ttl_millis(), 0);
    }
}
