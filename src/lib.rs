//! # redroute
//!
//! Topology-aware Redis routing for application code that should not care
//! whether an instance is a standalone primary with replicas or a sharded
//! cluster, and that must survive live topology changes (failover,
//! rebalancing, config updates) without a restart.
//!
//! ## What it provides
//!
//! - **Topology registry**: per-instance master/slave descriptors with a
//!   generation counter that signals when cached pools are stale
//! - **Pool factories**: memoized standalone pools (deadpool-redis) and
//!   cluster clients, rebuilt on refresh with no leaked handles
//! - **Script cache**: server-side scripts compiled once per connection
//!   target, invoked evaluate-or-load
//! - **`Structure`**: the facade application code holds, with typed
//!   command getters routed by role plus a script-driven cursor scan
//!
//! ## Example
//!
//! ```rust,no_run
//! use redroute::{Role, RouteRuntime, Structure, source};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = RouteRuntime::new();
//!
//!     // Topology normally arrives from the configuration source:
//!     source::apply_update(
//!         runtime.registry(),
//!         "Orders",
//!         r#"{"Master": [{"DB": "0", "IP": "10.0.0.1", "Port": "6379"}],
//!             "Slave":  [{"DB": "0", "IP": "10.0.0.2", "Port": "6379"}]}"#,
//!     )?;
//!
//!     let orders = Structure::new(runtime, "Orders", "orders:{}");
//!     let count: i64 = orders
//!         .get_int64(Role::Write, "INCR", orders.key("counter"))
//!         .await?;
//!     println!("counter = {count}");
//!     Ok(())
//! }
//! ```

pub mod cluster;
pub mod config;
pub mod error;
pub mod pool;
pub mod registry;
pub mod runtime;
pub mod script;
pub mod source;
pub mod structure;

pub use cluster::{ClusterFactory, ClusterHandle, with_redirect_retry};
pub use config::{
    CLUSTER_RETRY_ATTEMPTS, CLUSTER_RETRY_DELAY, InstanceTopology, NodeDescriptor, PoolSettings,
    Role, SCAN_PAGE_SIZE,
};
pub use error::{RouteError, RouteResult};
pub use pool::{PoolFactory, PoolHandle, PoolKey};
pub use registry::TopologyRegistry;
pub use runtime::RouteRuntime;
pub use script::ScriptCache;
pub use source::{TopologySource, apply_update, load_instances, parse_topology};
pub use structure::Structure;
