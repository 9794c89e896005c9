//! Shared service bundle
//!
//! The registry and the three factories are process-wide shared state.
//! They are built once at startup and passed by reference to every
//! `Structure` instead of living behind ambient globals, so tests can
//! construct a fresh runtime per case.

use std::sync::Arc;

use crate::cluster::ClusterFactory;
use crate::pool::PoolFactory;
use crate::registry::TopologyRegistry;
use crate::script::ScriptCache;

/// Registry plus pool, cluster, and script caches, shared by `Arc`
#[derive(Default)]
pub struct RouteRuntime {
    registry: TopologyRegistry,
    pools: PoolFactory,
    clusters: ClusterFactory,
    scripts: ScriptCache,
}

impl RouteRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn registry(&self) -> &TopologyRegistry {
        &self.registry
    }

    pub fn pools(&self) -> &PoolFactory {
        &self.pools
    }

    pub fn clusters(&self) -> &ClusterFactory {
        &self.clusters
    }

    pub fn scripts(&self) -> &ScriptCache {
        &self.scripts
    }
}
