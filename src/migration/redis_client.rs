//! Redis cluster backend built on the `redis` crate's async cluster client.
//!
//! Keyed commands (`TTL`, `DUMP`, `RESTORE`) are routed by the client's slot
//! map. `SCAN` and `FLUSHALL` act on a single node, so they are sent to every
//! primary by address, using the topology reported by `CLUSTER SLOTS`.

#![forbid(unsafe_code)]

use std::fmt;
use std::time::Duration;

use redis::cluster::ClusterClientBuilder;
use redis::cluster_async::ClusterConnection;
use redis::cluster_routing::{RoutingInfo, SingleNodeRoutingInfo};
use redis::{RedisError, Value};
use tracing::debug;

use super::client::{ClientError, ClientFactory, ClusterClient, Result, ScanCursor};
use super::ClusterEndpoint;
use crate::config::ConnectionSettings;

impl From<RedisError> for ClientError {
    fn from(e: RedisError) -> Self {
        if e.is_io_error()
            || e.is_connection_refusal()
            || e.is_connection_dropped()
            || e.is_timeout()
        {
            ClientError::Connection(e.to_string())
        } else if e.kind() == redis::ErrorKind::TypeError {
            ClientError::Protocol(e.to_string())
        } else {
            ClientError::Command(e.to_string())
        }
    }
}

/// Opens [`RedisCluster`] clients using shared connection settings.
#[derive(Debug, Clone)]
pub struct RedisClusterFactory {
    settings: ConnectionSettings,
}

impl RedisClusterFactory {
    /// Create a factory for the given settings.
    pub fn new(settings: ConnectionSettings) -> Self {
        Self { settings }
    }

    /// Seed URL for an endpoint.
    ///
    /// `rediss://` is used when TLS is on, with `#insecure` appended when
    /// certificates are not verified.
    pub fn node_url(&self, endpoint: &ClusterEndpoint) -> String {
        let scheme = if self.settings.tls { "rediss" } else { "redis" };
        let mut url = format!("{}://{}:{}", scheme, endpoint.host, endpoint.port);
        if self.settings.tls && !self.settings.verify_certificates {
            url.push_str("/#insecure");
        }
        url
    }
}

#[async_trait::async_trait]
impl ClientFactory for RedisClusterFactory {
    async fn connect(&self, endpoint: &ClusterEndpoint) -> Result<Box<dyn ClusterClient>> {
        debug!(%endpoint, tls = self.settings.tls, "connecting to cluster");

        let client = ClusterClientBuilder::new(vec![self.node_url(endpoint)])
            .connection_timeout(Duration::from_millis(self.settings.connection_timeout_ms))
            .response_timeout(Duration::from_millis(self.settings.response_timeout_ms))
            .build()
            .map_err(|e| {
                ClientError::Connection(format!("invalid cluster address {}: {}", endpoint, e))
            })?;

        let conn = client.get_async_connection().await.map_err(|e| {
            ClientError::Connection(format!("failed to connect to {}: {}", endpoint, e))
        })?;

        Ok(Box::new(RedisCluster {
            seed: endpoint.clone(),
            conn,
            primaries: None,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NodeAddress {
    host: String,
    port: u16,
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A live connection to one Redis cluster.
pub struct RedisCluster {
    seed: ClusterEndpoint,
    conn: ClusterConnection,
    primaries: Option<Vec<NodeAddress>>,
}

impl fmt::Debug for RedisCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCluster")
            .field("seed", &self.seed)
            .field("primaries", &self.primaries)
            .finish()
    }
}

impl RedisCluster {
    async fn primaries(&mut self) -> Result<Vec<NodeAddress>> {
        if let Some(primaries) = &self.primaries {
            return Ok(primaries.clone());
        }
        let primaries = discover_primaries(&mut self.conn, &self.seed).await?;
        debug!(seed = %self.seed, count = primaries.len(), "discovered cluster primaries");
        self.primaries = Some(primaries.clone());
        Ok(primaries)
    }

    async fn on_node(&mut self, node: &NodeAddress, cmd: &redis::Cmd) -> Result<Value> {
        let routing = RoutingInfo::SingleNode(SingleNodeRoutingInfo::ByAddress {
            host: node.host.clone(),
            port: node.port,
        });
        Ok(self.conn.route_command(cmd, routing).await?)
    }
}

#[async_trait::async_trait]
impl ClusterClient for RedisCluster {
    async fn ping(&mut self) -> Result<()> {
        let _: () = redis::cmd("PING").query_async(&mut self.conn).await?;
        Ok(())
    }

    async fn flush_all(&mut self) -> Result<()> {
        let flush = redis::cmd("FLUSHALL");
        for node in self.primaries().await? {
            debug!(%node, "FLUSHALL");
            self.on_node(&node, &flush).await?;
        }
        Ok(())
    }

    async fn scan(
        &mut self,
        cursor: ScanCursor,
        count: usize,
    ) -> Result<(ScanCursor, Vec<Vec<u8>>)> {
        let (node_index, position) = match cursor {
            ScanCursor::At { node, cursor } => (node, cursor),
            ScanCursor::Exhausted => return Ok((ScanCursor::Exhausted, Vec::new())),
        };

        let primaries = self.primaries().await?;
        let Some(node) = primaries.get(node_index) else {
            return Ok((ScanCursor::Exhausted, Vec::new()));
        };

        let mut scan = redis::cmd("SCAN");
        scan.arg(position).arg("COUNT").arg(count);
        let reply = self.on_node(node, &scan).await?;
        let (next, keys): (u64, Vec<Vec<u8>>) = redis::from_redis_value(&reply)?;

        let next_cursor = advance(node_index, next, primaries.len());
        Ok((next_cursor, keys))
    }

    async fn ttl(&mut self, key: &[u8]) -> Result<i64> {
        let ttl: i64 = redis::cmd("TTL").arg(key).query_async(&mut self.conn).await?;
        Ok(ttl)
    }

    async fn dump(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let payload: Option<Vec<u8>> =
            redis::cmd("DUMP").arg(key).query_async(&mut self.conn).await?;
        Ok(payload)
    }

    async fn restore(
        &mut self,
        key: &[u8],
        ttl_ms: u64,
        payload: &[u8],
        replace: bool,
    ) -> Result<()> {
        let mut restore = redis::cmd("RESTORE");
        restore.arg(key).arg(ttl_ms).arg(payload);
        if replace {
            restore.arg("REPLACE");
        }
        let _: () = restore.query_async(&mut self.conn).await?;
        Ok(())
    }
}

/// Read the primary of every slot range from `CLUSTER SLOTS`.
async fn discover_primaries(
    conn: &mut ClusterConnection,
    seed: &ClusterEndpoint,
) -> Result<Vec<NodeAddress>> {
    let ranges: Vec<Vec<Value>> = redis::cmd("CLUSTER").arg("SLOTS").query_async(conn).await?;
    parse_primaries(&ranges, seed)
}

/// Distinct primaries of a `CLUSTER SLOTS` reply, in reply order.
///
/// Each range is `[start, end, [host, port, id, ...], replicas...]`. An empty
/// or `?` host means "the node you are talking to", which is the seed.
fn parse_primaries(ranges: &[Vec<Value>], seed: &ClusterEndpoint) -> Result<Vec<NodeAddress>> {
    let mut primaries: Vec<NodeAddress> = Vec::new();
    for range in ranges {
        let node: Vec<Value> = match range.get(2) {
            Some(v) => redis::from_redis_value(v)?,
            None => {
                return Err(ClientError::Protocol(
                    "CLUSTER SLOTS range without a primary".into(),
                ))
            }
        };
        let (host, port) = match (node.first(), node.get(1)) {
            (Some(h), Some(p)) => (
                redis::from_redis_value::<String>(h)?,
                redis::from_redis_value::<u16>(p)?,
            ),
            _ => {
                return Err(ClientError::Protocol(
                    "CLUSTER SLOTS primary without host and port".into(),
                ))
            }
        };
        let host = if host.is_empty() || host == "?" {
            seed.host.clone()
        } else {
            host
        };
        let addr = NodeAddress { host, port };
        if !primaries.contains(&addr) {
            primaries.push(addr);
        }
    }

    if primaries.is_empty() {
        return Err(ClientError::Protocol(format!(
            "cluster at {} reported no primaries",
            seed
        )));
    }
    Ok(primaries)
}

/// Cursor following a `SCAN` reply of `next` from the `node`th of
/// `node_count` primaries.
fn advance(node: usize, next: u64, node_count: usize) -> ScanCursor {
    if next != 0 {
        ScanCursor::At { node, cursor: next }
    } else if node + 1 < node_count {
        ScanCursor::At {
            node: node + 1,
            cursor: 0,
        }
    } else {
        ScanCursor::Exhausted
    }
}
