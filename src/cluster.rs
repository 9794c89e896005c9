//! Memoized cluster clients and bounded slot-redirect retry
//!
//! Cluster handles are keyed by instance name only; the cluster client
//! resolves node topology internally. A command against a cluster may be
//! answered with MOVED/ASK when the key's slot lives elsewhere; such
//! commands are retried against the refreshed routing up to a fixed
//! budget, so a persistently broken cluster surfaces an error instead of
//! looping forever.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use redis::cluster::{ClusterClient, ClusterClientBuilder};
use redis::cluster_async::ClusterConnection;
use redis::{ErrorKind, RedisError, RedisResult};
use tracing::{debug, warn};

use crate::config::PoolSettings;
use crate::error::{RouteError, RouteResult};

/// Shared reference to a cluster client
///
/// Like `PoolHandle`, the `id` is a process monotone counter so a rebuilt
/// handle is distinguishable from the one it replaced.
#[derive(Clone)]
pub struct ClusterHandle {
    id: u64,
    client: Arc<ClusterClient>,
}

impl ClusterHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Establish an async connection through the cluster client
    pub async fn connect(&self) -> RedisResult<ClusterConnection> {
        self.client.get_async_connection().await
    }
}

/// Factory that creates and memoizes cluster handles per instance name
#[derive(Default)]
pub struct ClusterFactory {
    clusters: DashMap<String, ClusterHandle>,
    next_id: AtomicU64,
}

impl ClusterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the cluster handle for an instance
    ///
    /// `nodes` seeds topology discovery; the client learns the full slot
    /// map from the cluster itself.
    pub fn get(
        &self,
        instance: &str,
        nodes: &[String],
        settings: &PoolSettings,
    ) -> RouteResult<ClusterHandle> {
        if let Some(handle) = self.clusters.get(instance) {
            return Ok(handle.clone());
        }

        let handle = self
            .clusters
            .entry(instance.to_string())
            .or_try_insert_with(|| self.build(instance, nodes, settings))?
            .clone();
        Ok(handle)
    }

    fn build(
        &self,
        instance: &str,
        nodes: &[String],
        settings: &PoolSettings,
    ) -> RouteResult<ClusterHandle> {
        let client = ClusterClientBuilder::new(nodes.to_vec())
            .connection_timeout(settings.connect_timeout)
            .build()
            .map_err(|e| RouteError::PoolUnavailable {
                target: instance.to_string(),
                reason: e.to_string(),
            })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(instance = %instance, cluster_id = id, "created cluster client");
        Ok(ClusterHandle {
            id,
            client: Arc::new(client),
        })
    }

    /// Drop the cached handle for `instance` if it still carries `id`
    ///
    /// The underlying client is freed once the last clone goes away;
    /// connections already established keep working until dropped.
    pub fn retire(&self, instance: &str, id: u64) {
        if self
            .clusters
            .remove_if(instance, |_, h| h.id == id)
            .is_some()
        {
            warn!(instance = %instance, cluster_id = id, "retiring cluster client");
        }
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

fn is_slot_redirect(err: &RedisError) -> bool {
    matches!(err.kind(), ErrorKind::Moved | ErrorKind::Ask)
}

/// Run `op`, retrying on MOVED/ASK up to `attempts` total tries with
/// `delay` between them
///
/// Any non-redirect error returns immediately; exhausting the budget
/// returns the last redirect error.
pub async fn with_redirect_retry<T, F, Fut>(
    attempts: usize,
    delay: Duration,
    mut op: F,
) -> RedisResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RedisResult<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_slot_redirect(&err) && attempt < attempts => {
                warn!(attempt, "slot redirect, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn moved() -> RedisError {
        RedisError::from((ErrorKind::Moved, "slot moved"))
    }

    #[tokio::test]
    async fn first_try_success_does_not_retry() {
        let calls = AtomicUsize::new(0);
        let result = with_redirect_retry(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, RedisError>(42) }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn redirect_is_retried_until_success() {
        let calls = AtomicUsize::new(0);
        let result = with_redirect_retry(3, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(moved())
                } else {
                    Ok("hit the right node")
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, "hit the right node");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn budget_exhaustion_surfaces_redirect_error() {
        let calls = AtomicUsize::new(0);
        let err = with_redirect_retry(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(moved()) }
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Moved);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_redirect_error_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let err = with_redirect_retry(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(RedisError::from((ErrorKind::TypeError, "bad reply"))) }
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeError);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn factory_memoizes_per_instance() {
        let factory = ClusterFactory::new();
        let settings = PoolSettings::default();
        let nodes = vec!["redis://10.0.0.1:7000/0".to_string()];

        let a = factory.get("Orders", &nodes, &settings).unwrap();
        let b = factory.get("Orders", &nodes, &settings).unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(factory.len(), 1);
    }

    #[test]
    fn retire_then_get_rebuilds() {
        let factory = ClusterFactory::new();
        let settings = PoolSettings::default();
        let nodes = vec!["redis://10.0.0.1:7000/0".to_string()];

        let old = factory.get("Orders", &nodes, &settings).unwrap();
        factory.retire("Orders", old.id());
        assert!(factory.is_empty());

        let rebuilt = factory.get("Orders", &nodes, &settings).unwrap();
        assert_ne!(rebuilt.id(), old.id());

        // Stale id no longer matches; the rebuilt handle stays cached
        factory.retire("Orders", old.id());
        assert_eq!(factory.len(), 1);
    }
}
