//! The access facade application code holds
//!
//! A `Structure` routes every command to the correct pool (standalone
//! master, standalone slave, or cluster), materializing pools lazily and
//! discarding them when the registry generation moves past the one they
//! were built under. Pool references are swapped only under the
//! Structure's own lock; the hot path takes that lock just long enough to
//! clone a handle out and never holds it across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use redis::aio::ConnectionLike;
use redis::cluster_async::ClusterConnection;
use redis::{Cmd, FromRedisValue, Script, ToRedisArgs};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::cluster::{ClusterHandle, with_redirect_retry};
use crate::config::{
    CLUSTER_RETRY_ATTEMPTS, CLUSTER_RETRY_DELAY, PoolSettings, Role, SCAN_PAGE_SIZE,
};
use crate::error::{RouteError, RouteResult};
use crate::pool::{PoolHandle, PoolKey};
use crate::runtime::RouteRuntime;

struct StandaloneCache {
    generation: u64,
    write: PoolHandle,
    read: PoolHandle,
    write_key: PoolKey,
    read_key: PoolKey,
}

struct ClusterCache {
    generation: u64,
    handle: ClusterHandle,
    conn: ClusterConnection,
}

/// Typed command access to one logical Redis instance
///
/// Many `Structure`s may point at the same instance name; each caches its
/// own pool references but consults the same factory caches underneath,
/// so rebuilds after a topology change converge globally.
pub struct Structure {
    instance: String,
    key_prefix_fmt: String,
    settings: PoolSettings,
    runtime: Arc<RouteRuntime>,
    standalone: Mutex<Option<StandaloneCache>>,
    cluster: AsyncMutex<Option<ClusterCache>>,
}

impl Structure {
    /// Create a facade for `instance` with the given key-prefix format
    ///
    /// The format uses a `{}` placeholder for the suffix, e.g.
    /// `"orders:{}"`.
    pub fn new(
        runtime: Arc<RouteRuntime>,
        instance: impl Into<String>,
        key_prefix_fmt: impl Into<String>,
    ) -> Self {
        Self {
            instance: instance.into(),
            key_prefix_fmt: key_prefix_fmt.into(),
            settings: PoolSettings::default(),
            runtime,
            standalone: Mutex::new(None),
            cluster: AsyncMutex::new(None),
        }
    }

    /// Tune the maximum idle connections; call before first use
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.settings.max_idle = max_idle;
        self
    }

    /// Tune the idle timeout; call before first use
    pub fn with_idle_timeout(mut self, idle_timeout: std::time::Duration) -> Self {
        self.settings.idle_timeout = idle_timeout;
        self
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Build a full key from the prefix format and a suffix
    ///
    /// An empty suffix returns the prefix verbatim.
    pub fn key(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            return self.key_prefix_fmt.clone();
        }
        self.key_prefix_fmt.replacen("{}", suffix, 1)
    }

    /// Execute a command and decode the reply into `T`
    ///
    /// This is the generic entry point behind the typed getters; the
    /// connection is acquired for this call only and released on every
    /// path, success or error.
    pub async fn query<T: FromRedisValue>(
        &self,
        role: Role,
        cmd: &str,
        args: impl ToRedisArgs,
    ) -> RouteResult<T> {
        let topology = self.runtime.registry().topology(&self.instance).ok_or_else(|| {
            RouteError::ConfigurationAbsent {
                instance: self.instance.clone(),
                role,
            }
        })?;

        let mut command = redis::cmd(cmd);
        command.arg(args);

        if topology.cluster {
            self.query_cluster(&command).await
        } else {
            self.query_standalone(role, &command).await
        }
    }

    /// Boolean reply
    pub async fn get_bool(
        &self,
        role: Role,
        cmd: &str,
        args: impl ToRedisArgs,
    ) -> RouteResult<bool> {
        self.query(role, cmd, args).await
    }

    /// String reply
    pub async fn get_string(
        &self,
        role: Role,
        cmd: &str,
        args: impl ToRedisArgs,
    ) -> RouteResult<String> {
        self.query(role, cmd, args).await
    }

    /// String-collection reply
    pub async fn get_strings(
        &self,
        role: Role,
        cmd: &str,
        args: impl ToRedisArgs,
    ) -> RouteResult<Vec<String>> {
        self.query(role, cmd, args).await
    }

    /// Integer reply
    pub async fn get_int(
        &self,
        role: Role,
        cmd: &str,
        args: impl ToRedisArgs,
    ) -> RouteResult<i32> {
        self.query(role, cmd, args).await
    }

    /// Integer-collection reply
    pub async fn get_ints(
        &self,
        role: Role,
        cmd: &str,
        args: impl ToRedisArgs,
    ) -> RouteResult<Vec<i32>> {
        self.query(role, cmd, args).await
    }

    /// 64-bit integer reply
    pub async fn get_int64(
        &self,
        role: Role,
        cmd: &str,
        args: impl ToRedisArgs,
    ) -> RouteResult<i64> {
        self.query(role, cmd, args).await
    }

    /// Scan an entire structure into a map through a server-side script
    ///
    /// The script is invoked with (key, cursor, page size) and must reply
    /// with a flat sequence: next cursor first, then alternating
    /// field/value pairs. Pages are 500 entries; the scan terminates when
    /// the cursor returns to 0. One read-role connection carries the
    /// whole loop. Any mid-scan failure aborts with `ScanAborted` and no
    /// partial result.
    pub async fn scan_all_map(
        &self,
        key: &str,
        script_body: &str,
    ) -> RouteResult<HashMap<String, String>> {
        let topology = self.runtime.registry().topology(&self.instance).ok_or_else(|| {
            RouteError::ConfigurationAbsent {
                instance: self.instance.clone(),
                role: Role::Read,
            }
        })?;

        // Scripts are cached against the read-role connection target
        let script = self
            .runtime
            .scripts()
            .get(&topology.slave.url(), script_body);

        if topology.cluster {
            let mut conn = self.cluster_connection().await?;
            scan_loop(&script, key, &mut conn).await
        } else {
            let handle = self.standalone_handle(Role::Read)?;
            let mut conn =
                handle
                    .pool()
                    .get()
                    .await
                    .map_err(|e| RouteError::PoolUnavailable {
                        target: self.instance.clone(),
                        reason: e.to_string(),
                    })?;
            scan_loop(&script, key, &mut *conn).await
        }
    }

    async fn query_standalone<T: FromRedisValue>(
        &self,
        role: Role,
        command: &Cmd,
    ) -> RouteResult<T> {
        let handle = self.standalone_handle(role)?;
        let mut conn = handle
            .pool()
            .get()
            .await
            .map_err(|e| RouteError::PoolUnavailable {
                target: self.instance.clone(),
                reason: e.to_string(),
            })?;

        let value = command.query_async(&mut *conn).await?;
        Ok(value)
    }

    async fn query_cluster<T: FromRedisValue>(&self, command: &Cmd) -> RouteResult<T> {
        let conn = self.cluster_connection().await?;
        let value = with_redirect_retry(CLUSTER_RETRY_ATTEMPTS, CLUSTER_RETRY_DELAY, || {
            let mut conn = conn.clone();
            async move { command.query_async(&mut conn).await }
        })
        .await?;
        Ok(value)
    }

    /// Cached pool for `role`, rebuilding both roles together when the
    /// registry generation has moved on
    ///
    /// Both roles resolve as a pair; a `NotFound` on either leaves
    /// nothing cached.
    fn standalone_handle(&self, role: Role) -> RouteResult<PoolHandle> {
        let current = self.runtime.registry().generation(&self.instance);

        let mut cache = self
            .standalone
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(entry) = cache.as_ref() {
            if entry.generation == current {
                return Ok(match role {
                    Role::Write => entry.write.clone(),
                    Role::Read => entry.read.clone(),
                });
            }
        }

        if let Some(stale) = cache.take() {
            debug!(instance = %self.instance, "topology moved, discarding cached pools");
            self.runtime.pools().retire(&stale.write_key, stale.write.id());
            self.runtime.pools().retire(&stale.read_key, stale.read.id());
        }

        let master = self.runtime.registry().resolve(&self.instance, Role::Write)?;
        let replica = self.runtime.registry().resolve(&self.instance, Role::Read)?;

        let write = self.runtime.pools().get(&master, &self.settings)?;
        let read = self.runtime.pools().get(&replica, &self.settings)?;

        let handle = match role {
            Role::Write => write.clone(),
            Role::Read => read.clone(),
        };

        *cache = Some(StandaloneCache {
            generation: current,
            write_key: PoolKey::for_node(&master, &self.settings),
            read_key: PoolKey::for_node(&replica, &self.settings),
            write,
            read,
        });

        Ok(handle)
    }

    /// Cached cluster connection, rebuilt when the generation moves on
    async fn cluster_connection(&self) -> RouteResult<ClusterConnection> {
        let current = self.runtime.registry().generation(&self.instance);

        let mut cache = self.cluster.lock().await;

        if let Some(entry) = cache.as_ref() {
            if entry.generation == current {
                return Ok(entry.conn.clone());
            }
        }

        if let Some(stale) = cache.take() {
            debug!(instance = %self.instance, "topology moved, discarding cluster handle");
            self.runtime.clusters().retire(&self.instance, stale.handle.id());
        }

        let topology = self.runtime.registry().topology(&self.instance).ok_or_else(|| {
            RouteError::ConfigurationAbsent {
                instance: self.instance.clone(),
                role: Role::Write,
            }
        })?;

        let mut nodes = vec![topology.master.url()];
        let slave_url = topology.slave.url();
        if slave_url != nodes[0] {
            nodes.push(slave_url);
        }

        let handle = self
            .runtime
            .clusters()
            .get(&self.instance, &nodes, &self.settings)?;
        let conn = handle.connect().await?;

        *cache = Some(ClusterCache {
            generation: current,
            handle,
            conn: conn.clone(),
        });

        Ok(conn)
    }
}

async fn scan_loop<C>(
    script: &Script,
    key: &str,
    conn: &mut C,
) -> RouteResult<HashMap<String, String>>
where
    C: ConnectionLike + Send,
{
    let mut merged = HashMap::new();
    let mut cursor: u64 = 0;
    loop {
        let page: Vec<String> = script
            .arg(key)
            .arg(cursor)
            .arg(SCAN_PAGE_SIZE)
            .invoke_async(conn)
            .await
            .map_err(|e| RouteError::ScanAborted(e.to_string()))?;

        cursor = merge_scan_page(&page, &mut merged)?;
        if cursor == 0 {
            break;
        }
    }
    Ok(merged)
}

/// Fold one scan page into the result map and return the next cursor
///
/// The page is the script's flat reply: cursor first, then alternating
/// field/value pairs. Last value wins on a duplicate field.
fn merge_scan_page(page: &[String], into: &mut HashMap<String, String>) -> RouteResult<u64> {
    let (next, pairs) = page
        .split_first()
        .ok_or_else(|| RouteError::ScanAborted("empty scan reply".to_string()))?;

    let cursor = next
        .parse::<u64>()
        .map_err(|_| RouteError::ScanAborted(format!("non-numeric cursor {next:?}")))?;

    if pairs.len() % 2 != 0 {
        return Err(RouteError::ScanAborted(format!(
            "dangling field in {}-element page",
            pairs.len()
        )));
    }

    for pair in pairs.chunks_exact(2) {
        into.insert(pair[0].clone(), pair[1].clone());
    }

    Ok(cursor)
}
