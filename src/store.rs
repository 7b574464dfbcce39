//! Key-value store access.
//!
//! The index lives in eight logical keyspaces of a remote store. Everything
//! the loader and the executor do goes through the batched primitives of
//! `KvStore`: one call is one pipelined round trip, never N.
//!
//! - `RedisStore`: one multiplexed connection per logical database
//! - `MemoryStore`: in-process maps, for tests and embedded use
//! - `WriteBatch`: single-writer accumulation buffer, drained into a store

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::FromRedisValue;

use crate::config::StoreConfig;
use crate::error::{PfError, Result};

/// Logical keyspaces, one per Redis database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Keyspace {
    /// text id -> node int id
    NodeId,
    /// node int id -> node JSON
    NodePayload,
    /// category -> category int id
    Category,
    /// canonical signature -> signature int id
    Signature,
    /// edge int id -> edge JSON
    EdgePayload,
    /// "a,b,c" -> [edge, neighbor, edge, neighbor, ...]
    Pattern,
    /// node int id -> subclass node int ids
    Subclass,
    /// closure snapshot blobs
    Meta,
}

impl Keyspace {
    pub const ALL: [Keyspace; 8] = [
        Keyspace::NodeId,
        Keyspace::NodePayload,
        Keyspace::Category,
        Keyspace::Signature,
        Keyspace::EdgePayload,
        Keyspace::Pattern,
        Keyspace::Subclass,
        Keyspace::Meta,
    ];

    pub fn db(self) -> usize {
        match self {
            Keyspace::NodeId => 0,
            Keyspace::NodePayload => 1,
            Keyspace::Category => 2,
            Keyspace::Signature => 3,
            Keyspace::EdgePayload => 4,
            Keyspace::Pattern => 5,
            Keyspace::Subclass => 6,
            Keyspace::Meta => 7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Keyspace::NodeId => "node_id",
            Keyspace::NodePayload => "node_payload",
            Keyspace::Category => "category",
            Keyspace::Signature => "signature",
            Keyspace::EdgePayload => "edge_payload",
            Keyspace::Pattern => "pattern",
            Keyspace::Subclass => "subclass",
            Keyspace::Meta => "meta",
        }
    }
}

/// Batched access to the keyspaces.
///
/// Every `*_many` call is one logical round trip. Results are positional:
/// the i-th output belongs to the i-th key. A missing key yields `None`
/// from `get_many` and an empty list from `range_many`.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get_many(&self, ks: Keyspace, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Last write wins.
    async fn set_many(&self, ks: Keyspace, entries: Vec<(String, String)>) -> Result<()>;

    /// Append each value list to the end of its key's list.
    async fn append_many(&self, ks: Keyspace, entries: Vec<(String, Vec<i64>)>) -> Result<()>;

    /// Full contents (`0..-1`) of each list.
    async fn range_many(&self, ks: Keyspace, keys: &[String]) -> Result<Vec<Vec<i64>>>;

    async fn get(&self, ks: Keyspace, key: &str) -> Result<Option<String>> {
        let mut values = self.get_many(ks, &[key.to_string()]).await?;
        Ok(values.pop().flatten())
    }

    async fn set(&self, ks: Keyspace, key: &str, value: &str) -> Result<()> {
        self.set_many(ks, vec![(key.to_string(), value.to_string())]).await
    }

    async fn append(&self, ks: Keyspace, key: &str, values: &[i64]) -> Result<()> {
        self.append_many(ks, vec![(key.to_string(), values.to_vec())]).await
    }

    async fn range(&self, ks: Keyspace, key: &str) -> Result<Vec<i64>> {
        let mut lists = self.range_many(ks, &[key.to_string()]).await?;
        Ok(lists.pop().unwrap_or_default())
    }
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Default)]
struct MemorySpace {
    strings: HashMap<String, String>,
    lists: HashMap<String, Vec<i64>>,
}

/// In-process store with the same semantics as the remote one.
#[derive(Default)]
pub struct MemoryStore {
    spaces: RwLock<HashMap<Keyspace, MemorySpace>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of string and list keys in a keyspace.
    pub fn key_count(&self, ks: Keyspace) -> usize {
        let spaces = self.spaces.read().unwrap_or_else(|e| e.into_inner());
        spaces
            .get(&ks)
            .map(|s| s.strings.len() + s.lists.len())
            .unwrap_or(0)
    }
}

fn poisoned<T>(_: T) -> PfError {
    PfError::Store("memory store lock poisoned".to_string())
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get_many(&self, ks: Keyspace, keys: &[String]) -> Result<Vec<Option<String>>> {
        let spaces = self.spaces.read().map_err(poisoned)?;
        let space = spaces.get(&ks);
        Ok(keys
            .iter()
            .map(|k| space.and_then(|s| s.strings.get(k).cloned()))
            .collect())
    }

    async fn set_many(&self, ks: Keyspace, entries: Vec<(String, String)>) -> Result<()> {
        let mut spaces = self.spaces.write().map_err(poisoned)?;
        let space = spaces.entry(ks).or_default();
        space.strings.extend(entries);
        Ok(())
    }

    async fn append_many(&self, ks: Keyspace, entries: Vec<(String, Vec<i64>)>) -> Result<()> {
        let mut spaces = self.spaces.write().map_err(poisoned)?;
        let space = spaces.entry(ks).or_default();
        for (key, values) in entries {
            space.lists.entry(key).or_default().extend(values);
        }
        Ok(())
    }

    async fn range_many(&self, ks: Keyspace, keys: &[String]) -> Result<Vec<Vec<i64>>> {
        let spaces = self.spaces.read().map_err(poisoned)?;
        let space = spaces.get(&ks);
        Ok(keys
            .iter()
            .map(|k| space.and_then(|s| s.lists.get(k).cloned()).unwrap_or_default())
            .collect())
    }
}

// ============================================================================
// RedisStore
// ============================================================================

/// Redis-backed store. Keyspace `ks` lives in database `ks.db()`.
pub struct RedisStore {
    connections: Vec<MultiplexedConnection>,
    op_timeout: Duration,
}

impl RedisStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        let mut connections = Vec::with_capacity(Keyspace::ALL.len());

        for ks in Keyspace::ALL {
            let client = redis::Client::open(config.connection_info(ks.db()))?;
            let connection = tokio::time::timeout(
                connect_timeout,
                client.get_multiplexed_async_connection(),
            )
            .await
            .map_err(|_| {
                PfError::Timeout(format!(
                    "connecting to {}:{} db {}",
                    config.host,
                    config.port,
                    ks.db()
                ))
            })??;
            connections.push(connection);
        }

        tracing::info!(host = %config.host, port = config.port, "connected to redis");
        Ok(Self {
            connections,
            op_timeout: Duration::from_millis(config.op_timeout_ms),
        })
    }

    async fn run<T: FromRedisValue>(&self, ks: Keyspace, pipe: &redis::Pipeline) -> Result<T> {
        let mut connection = self.connections[ks.db()].clone();
        match tokio::time::timeout(self.op_timeout, pipe.query_async(&mut connection)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(PfError::Timeout(format!("pipeline on {}", ks.name()))),
        }
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get_many(&self, ks: Keyspace, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("GET").arg(key);
        }
        self.run(ks, &pipe).await
    }

    async fn set_many(&self, ks: Keyspace, entries: Vec<(String, String)>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for (key, value) in &entries {
            pipe.cmd("SET").arg(key).arg(value).ignore();
        }
        self.run(ks, &pipe).await
    }

    async fn append_many(&self, ks: Keyspace, entries: Vec<(String, Vec<i64>)>) -> Result<()> {
        let mut pipe = redis::pipe();
        let mut queued = 0usize;
        for (key, values) in &entries {
            if values.is_empty() {
                continue;
            }
            pipe.cmd("RPUSH").arg(key).arg(values.as_slice()).ignore();
            queued += 1;
        }
        if queued == 0 {
            return Ok(());
        }
        self.run(ks, &pipe).await
    }

    async fn range_many(&self, ks: Keyspace, keys: &[String]) -> Result<Vec<Vec<i64>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("LRANGE").arg(key).arg(0).arg(-1);
        }
        self.run(ks, &pipe).await
    }
}

// ============================================================================
// WriteBatch
// ============================================================================

/// Accumulates writes before a flush.
///
/// NOT Send+Sync in spirit: single-writer access assumed. Per-key append
/// order is preserved across the flush.
#[derive(Debug, Default)]
pub struct WriteBatch {
    sets: BTreeMap<Keyspace, Vec<(String, String)>>,
    appends: BTreeMap<Keyspace, Vec<(String, Vec<i64>)>>,
    pending: usize,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, ks: Keyspace, key: impl Into<String>, value: impl Into<String>) {
        self.sets.entry(ks).or_default().push((key.into(), value.into()));
        self.pending += 1;
    }

    pub fn append(&mut self, ks: Keyspace, key: impl Into<String>, values: Vec<i64>) {
        self.appends.entry(ks).or_default().push((key.into(), values));
        self.pending += 1;
    }

    /// Number of buffered operations.
    pub fn len(&self) -> usize {
        self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }

    /// Send every buffered write, one round trip per keyspace and kind,
    /// leaving the batch empty. Returns the number of operations sent.
    pub async fn flush<S: KvStore + ?Sized>(&mut self, store: &S) -> Result<usize> {
        let sent = self.pending;
        for (ks, entries) in std::mem::take(&mut self.sets) {
            store.set_many(ks, entries).await?;
        }
        for (ks, entries) in std::mem::take(&mut self.appends) {
            store.append_many(ks, entries).await?;
        }
        self.pending = 0;
        Ok(sent)
    }
}
