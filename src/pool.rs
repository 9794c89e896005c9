//! Memoized standalone connection pools
//!
//! Pools are keyed by (address, database, max-idle, idle-timeout): a
//! second request with the same key returns the cached handle without
//! creating a new network pool. Acquire is bounded by the wait timeout,
//! and the deadpool-redis manager pings connections on recycle, so broken
//! connections are discarded at borrow time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use deadpool_redis::{Config, Pool, Runtime};
use tracing::{debug, warn};

use crate::config::{NodeDescriptor, PoolSettings};
use crate::error::{RouteError, RouteResult};

/// Cache key for a standalone pool
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    addr: String,
    db: i64,
    max_idle: usize,
    idle_timeout: Duration,
}

impl PoolKey {
    pub fn for_node(node: &NodeDescriptor, settings: &PoolSettings) -> Self {
        Self {
            addr: node.addr.clone(),
            db: node.db,
            max_idle: settings.max_idle,
            idle_timeout: settings.idle_timeout,
        }
    }
}

/// Shared reference to a standalone pool
///
/// The `id` is a process monotone counter: two handles with the same id
/// are the same pool, and a rebuilt pool always carries a new id.
#[derive(Clone, Debug)]
pub struct PoolHandle {
    id: u64,
    pool: Pool,
}

impl PoolHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// True once the pool has been retired; borrowed connections keep
    /// working until dropped
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

/// Factory that creates and memoizes standalone pools
#[derive(Default)]
pub struct PoolFactory {
    pools: DashMap<PoolKey, PoolHandle>,
    next_id: AtomicU64,
}

impl PoolFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the pool for a node under the given settings
    ///
    /// Concurrent first-uses of the same key create exactly one pool;
    /// lookups of an already-cached key do not contend.
    pub fn get(&self, node: &NodeDescriptor, settings: &PoolSettings) -> RouteResult<PoolHandle> {
        let key = PoolKey::for_node(node, settings);
        if let Some(handle) = self.pools.get(&key) {
            return Ok(handle.clone());
        }

        let handle = self
            .pools
            .entry(key)
            .or_try_insert_with(|| self.build(node, settings))?
            .clone();
        Ok(handle)
    }

    fn build(&self, node: &NodeDescriptor, settings: &PoolSettings) -> RouteResult<PoolHandle> {
        let url = node.url();
        let pool = Config::from_url(&url)
            .builder()
            .map_err(|e| RouteError::PoolUnavailable {
                target: url.clone(),
                reason: e.to_string(),
            })?
            .max_size(settings.max_idle)
            .wait_timeout(Some(settings.acquire_timeout))
            .create_timeout(Some(settings.connect_timeout))
            // The recycle step is a borrow-time PING; bound it like a
            // connect so a black-holed node cannot stall an acquire.
            // `idle_timeout` stays part of the pool key only.
            .recycle_timeout(Some(settings.connect_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| RouteError::PoolUnavailable {
                target: url.clone(),
                reason: e.to_string(),
            })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(url = %url, pool_id = id, "created standalone pool");
        Ok(PoolHandle { id, pool })
    }

    /// Retire the cached pool for `key`, but only if it is still the
    /// handle identified by `id`
    ///
    /// The id guard keeps two facades racing through the same refresh from
    /// closing the pool the other one just rebuilt. Closing stops new
    /// acquires; connections borrowed before the close finish naturally
    /// rather than being aborted (deliberate stale-pool grace during
    /// topology cut-over).
    pub fn retire(&self, key: &PoolKey, id: u64) {
        if let Some((_, handle)) = self.pools.remove_if(key, |_, h| h.id == id) {
            warn!(addr = %key.addr, db = key.db, pool_id = id, "retiring standalone pool");
            handle.pool.close();
        }
    }

    /// Number of live pools in the cache
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
