/*!
Key-space access used by logical capture.

[`KeyspaceSource`] is the narrow set of commands a logical capture issues.
[`RedisSource`] implements it over a multiplexed `redis` connection; tests
substitute an in-memory key space.
*/

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::collections::BTreeMap;
use tracing::debug;

use super::address::endpoint_url;
use crate::config::EndpointConfig;
use crate::{Result, SnapshotError};

/// Cursor value that starts and ends a full key-space traversal
pub const START_CURSOR: u64 = 0;

/// Commands a logical capture needs from a key-value store
#[async_trait]
pub trait KeyspaceSource: Send {
    /// One `SCAN` page: the next cursor and up to roughly `count` keys.
    ///
    /// Keys are binary safe in the store, so they come back undecoded.
    async fn scan(&mut self, cursor: u64, count: usize) -> Result<(u64, Vec<Vec<u8>>)>;

    /// Raw `TYPE` reply (`none` when the key no longer exists)
    async fn key_type(&mut self, key: &str) -> Result<String>;

    /// Raw `TTL` reply in seconds (`-1` no expiry, `-2` missing key)
    async fn ttl(&mut self, key: &str) -> Result<i64>;

    async fn get(&mut self, key: &str) -> Result<String>;

    async fn hgetall(&mut self, key: &str) -> Result<BTreeMap<String, String>>;

    async fn lrange_all(&mut self, key: &str) -> Result<Vec<String>>;

    async fn smembers(&mut self, key: &str) -> Result<Vec<String>>;

    /// Members in ascending score order with their scores
    async fn zrange_all_with_scores(&mut self, key: &str) -> Result<Vec<(String, f64)>>;
}

/// [`KeyspaceSource`] backed by a live store connection
pub struct RedisSource {
    conn: MultiplexedConnection,
}

impl RedisSource {
    /// Open a connection to the endpoint, bounded by its connect timeout
    pub async fn connect(endpoint: &EndpointConfig) -> Result<Self> {
        let url = endpoint_url(endpoint)?;
        let client = redis::Client::open(url.as_str())
            .map_err(|e| SnapshotError::connect(&endpoint.name, e.to_string()))?;

        let conn = tokio::time::timeout(
            endpoint.connect_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            SnapshotError::connect(
                &endpoint.name,
                format!("timed out after {:?}", endpoint.connect_timeout),
            )
        })?
        .map_err(|e| SnapshotError::connect(&endpoint.name, e.to_string()))?;

        debug!(endpoint = %endpoint.name, database = endpoint.database, "Connected to endpoint");
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyspaceSource for RedisSource {
    async fn scan(&mut self, cursor: u64, count: usize) -> Result<(u64, Vec<Vec<u8>>)> {
        let page: (u64, Vec<Vec<u8>>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut self.conn)
            .await?;
        Ok(page)
    }

    async fn key_type(&mut self, key: &str) -> Result<String> {
        Ok(redis::cmd("TYPE").arg(key).query_async(&mut self.conn).await?)
    }

    async fn ttl(&mut self, key: &str) -> Result<i64> {
        Ok(redis::cmd("TTL").arg(key).query_async(&mut self.conn).await?)
    }

    async fn get(&mut self, key: &str) -> Result<String> {
        Ok(redis::cmd("GET").arg(key).query_async(&mut self.conn).await?)
    }

    async fn hgetall(&mut self, key: &str) -> Result<BTreeMap<String, String>> {
        Ok(redis::cmd("HGETALL").arg(key).query_async(&mut self.conn).await?)
    }

    async fn lrange_all(&mut self, key: &str) -> Result<Vec<String>> {
        Ok(redis::cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query_async(&mut self.conn)
            .await?)
    }

    async fn smembers(&mut self, key: &str) -> Result<Vec<String>> {
        Ok(redis::cmd("SMEMBERS").arg(key).query_async(&mut self.conn).await?)
    }

    async fn zrange_all_with_scores(&mut self, key: &str) -> Result<Vec<(String, f64)>> {
        Ok(redis::cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut self.conn)
            .await?)
    }
}
