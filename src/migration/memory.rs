//! In-process cluster backend.
//!
//! [`MemoryCluster`] keeps a keyspace in memory and answers the same
//! commands as a real cluster, including the `DUMP` payload check and the
//! `BUSYKEY` rejection of `RESTORE` without `REPLACE`. Failures can be
//! injected per command or per key, which makes it useful for rehearsing a
//! run and for tests.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::Mutex;

use super::client::{ClientError, ClientFactory, ClusterClient, Result, ScanCursor};
use super::ClusterEndpoint;

/// Header prepended to every payload produced by [`MemoryCluster`]'s `DUMP`.
const DUMP_MAGIC: &[u8] = b"MEMDUMP\x01";

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    ttl_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct ClusterState {
    data: BTreeMap<Vec<u8>, Entry>,
    unreachable: bool,
    fail_ping: bool,
    fail_flush: bool,
    fail_ttl: HashSet<Vec<u8>>,
    fail_dump: HashSet<Vec<u8>>,
    fail_restore: HashSet<Vec<u8>>,
    vanish_on_dump: HashSet<Vec<u8>>,
    scans_before_failure: Option<usize>,
    scan_calls: usize,
    open_clients: usize,
    connections_opened: usize,
}

/// An in-memory cluster. Clones share the same keyspace.
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MemoryCluster {
    /// Create an empty, reachable cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, expiring after `ttl_secs` if given.
    pub fn insert(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>, ttl_secs: Option<u64>) {
        self.state.lock().data.insert(
            key.as_ref().to_vec(),
            Entry {
                value: value.as_ref().to_vec(),
                ttl_ms: ttl_secs.map(|s| s * 1000),
            },
        );
    }

    /// Value stored under `key`.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Option<Vec<u8>> {
        self.state
            .lock()
            .data
            .get(key.as_ref())
            .map(|e| e.value.clone())
    }

    /// TTL of `key` in milliseconds: `None` if missing, `Some(None)` if it
    /// does not expire.
    pub fn ttl_ms(&self, key: impl AsRef<[u8]>) -> Option<Option<u64>> {
        self.state.lock().data.get(key.as_ref()).map(|e| e.ttl_ms)
    }

    /// Whether `key` exists.
    pub fn contains(&self, key: impl AsRef<[u8]>) -> bool {
        self.state.lock().data.contains_key(key.as_ref())
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    /// Whether the keyspace is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys in scan order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.state.lock().data.keys().cloned().collect()
    }

    /// Refuse new connections.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Make `PING` fail.
    pub fn fail_ping(&self, fail: bool) {
        self.state.lock().fail_ping = fail;
    }

    /// Make `FLUSHALL` fail.
    pub fn fail_flush(&self, fail: bool) {
        self.state.lock().fail_flush = fail;
    }

    /// Make `TTL` fail for `key`.
    pub fn fail_ttl_for(&self, key: impl AsRef<[u8]>) {
        self.state.lock().fail_ttl.insert(key.as_ref().to_vec());
    }

    /// Make `DUMP` fail for `key`.
    pub fn fail_dump_for(&self, key: impl AsRef<[u8]>) {
        self.state.lock().fail_dump.insert(key.as_ref().to_vec());
    }

    /// Make `RESTORE` fail for `key`.
    pub fn fail_restore_for(&self, key: impl AsRef<[u8]>) {
        self.state.lock().fail_restore.insert(key.as_ref().to_vec());
    }

    /// Delete `key` right before it is dumped, as if it expired mid-scan.
    pub fn vanish_on_dump(&self, key: impl AsRef<[u8]>) {
        self.state.lock().vanish_on_dump.insert(key.as_ref().to_vec());
    }

    /// Let `n` `SCAN` calls succeed, then fail every following one.
    pub fn fail_scan_after(&self, n: usize) {
        self.state.lock().scans_before_failure = Some(n);
    }

    /// Clients currently open against this cluster.
    pub fn open_clients(&self) -> usize {
        self.state.lock().open_clients
    }

    /// Clients opened since creation.
    pub fn connections_opened(&self) -> usize {
        self.state.lock().connections_opened
    }

    fn open_client(&self) -> Result<MemoryClient> {
        let mut state = self.state.lock();
        if state.unreachable {
            return Err(ClientError::Connection("connection refused".into()));
        }
        state.open_clients += 1;
        state.connections_opened += 1;
        Ok(MemoryClient {
            state: Arc::clone(&self.state),
            scan_after: None,
            scan_token: 0,
        })
    }
}

/// Client handle to a [`MemoryCluster`]; releases its slot on drop.
///
/// A scan resumes after the last key it returned, so a key that exists for
/// the whole scan is returned even if other keys are removed meanwhile.
#[derive(Debug)]
pub struct MemoryClient {
    state: Arc<Mutex<ClusterState>>,
    scan_after: Option<Vec<u8>>,
    scan_token: u64,
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.open_clients = state.open_clients.saturating_sub(1);
    }
}

fn encode_dump(value: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(DUMP_MAGIC.len() + value.len());
    payload.extend_from_slice(DUMP_MAGIC);
    payload.extend_from_slice(value);
    payload
}

fn decode_dump(payload: &[u8]) -> Result<Vec<u8>> {
    payload
        .strip_prefix(DUMP_MAGIC)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| ClientError::Command("ERR DUMP payload version or checksum are wrong".into()))
}

#[async_trait::async_trait]
impl ClusterClient for MemoryClient {
    async fn ping(&mut self) -> Result<()> {
        let state = self.state.lock();
        if state.unreachable {
            return Err(ClientError::Connection("connection reset by peer".into()));
        }
        if state.fail_ping {
            return Err(ClientError::Command("ERR injected PING failure".into()));
        }
        Ok(())
    }

    async fn flush_all(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_flush {
            return Err(ClientError::Command("ERR injected FLUSHALL failure".into()));
        }
        state.data.clear();
        Ok(())
    }

    async fn scan(
        &mut self,
        cursor: ScanCursor,
        count: usize,
    ) -> Result<(ScanCursor, Vec<Vec<u8>>)> {
        let start = match cursor {
            ScanCursor::At { cursor: 0, .. } => Bound::Unbounded,
            ScanCursor::At { cursor, .. } if cursor == self.scan_token => match &self.scan_after {
                Some(last) => Bound::Excluded(last.clone()),
                None => return Err(ClientError::Command("ERR invalid cursor".into())),
            },
            ScanCursor::At { .. } => return Err(ClientError::Command("ERR invalid cursor".into())),
            ScanCursor::Exhausted => return Ok((ScanCursor::Exhausted, Vec::new())),
        };

        let mut state = self.state.lock();
        if let Some(limit) = state.scans_before_failure {
            if state.scan_calls >= limit {
                return Err(ClientError::Connection("connection lost during SCAN".into()));
            }
        }
        state.scan_calls += 1;

        let mut remaining = state
            .data
            .range::<Vec<u8>, _>((start, Bound::Unbounded))
            .map(|(k, _)| k.clone());
        let keys: Vec<Vec<u8>> = remaining.by_ref().take(count.max(1)).collect();
        let more = remaining.next().is_some();
        drop(state);

        if !more {
            self.scan_after = None;
            return Ok((ScanCursor::Exhausted, keys));
        }
        self.scan_token += 1;
        self.scan_after = keys.last().cloned();
        Ok((
            ScanCursor::At {
                node: 0,
                cursor: self.scan_token,
            },
            keys,
        ))
    }

    async fn ttl(&mut self, key: &[u8]) -> Result<i64> {
        let state = self.state.lock();
        if state.fail_ttl.contains(key) {
            return Err(ClientError::Command("ERR injected TTL failure".into()));
        }
        Ok(match state.data.get(key) {
            None => -2,
            Some(Entry { ttl_ms: None, .. }) => -1,
            Some(Entry {
                ttl_ms: Some(ms), ..
            }) => (*ms / 1000) as i64,
        })
    }

    async fn dump(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock();
        if state.fail_dump.contains(key) {
            return Err(ClientError::Command("ERR injected DUMP failure".into()));
        }
        if state.vanish_on_dump.remove(key) {
            state.data.remove(key);
        }
        Ok(state.data.get(key).map(|e| encode_dump(&e.value)))
    }

    async fn restore(
        &mut self,
        key: &[u8],
        ttl_ms: u64,
        payload: &[u8],
        replace: bool,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_restore.contains(key) {
            return Err(ClientError::Command("ERR injected RESTORE failure".into()));
        }
        if !replace && state.data.contains_key(key) {
            return Err(ClientError::Command(
                "BUSYKEY Target key name already exists.".into(),
            ));
        }
        let value = decode_dump(payload)?;
        state.data.insert(
            key.to_vec(),
            Entry {
                value,
                ttl_ms: (ttl_ms > 0).then_some(ttl_ms),
            },
        );
        Ok(())
    }
}

/// Resolves endpoints to registered [`MemoryCluster`]s.
///
/// Connecting to an endpoint that was never registered fails the way a
/// closed port does.
#[derive(Debug, Clone, Default)]
pub struct MemoryClusterFactory {
    clusters: HashMap<ClusterEndpoint, MemoryCluster>,
}

impl MemoryClusterFactory {
    /// Create a factory with no clusters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `cluster` at `endpoint`.
    pub fn register(&mut self, endpoint: ClusterEndpoint, cluster: MemoryCluster) {
        self.clusters.insert(endpoint, cluster);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_cluster(mut self, endpoint: ClusterEndpoint, cluster: MemoryCluster) -> Self {
        self.register(endpoint, cluster);
        self
    }

}

#[async_trait::async_trait]
impl ClientFactory for MemoryClusterFactory {
    async fn connect(&self, endpoint: &ClusterEndpoint) -> Result<Box<dyn ClusterClient>> {
        let cluster = self.clusters.get(endpoint).ok_or_else(|| {
            ClientError::Connection(format!("{}: connection refused", endpoint))
        })?;
        Ok(Box::new(cluster.open_client()?))
    }
}
