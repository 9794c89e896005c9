//! Node descriptors, instance topology, and pool tuning
//!
//! A topology is resolved as a consistent snapshot: descriptors are
//! immutable once built and replaced wholesale on refresh, never mutated
//! field by field.

use std::fmt;
use std::time::Duration;

/// Page size for cursor scans
pub const SCAN_PAGE_SIZE: usize = 500;

/// Default maximum idle connections per pool
pub const DEFAULT_MAX_IDLE: usize = 50;

/// Default idle timeout before a pooled connection is recycled
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(240);

/// Total attempts for a cluster command hitting slot redirects
pub const CLUSTER_RETRY_ATTEMPTS: usize = 3;

/// Delay between cluster redirect retries
pub const CLUSTER_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Which pool a command is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Master: read and write
    Write,
    /// Slave/replica: read only
    Read,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Write => write!(f, "master"),
            Role::Read => write!(f, "slave"),
        }
    }
}

/// Resolved connection descriptor for one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    /// host:port of the node
    pub addr: String,
    /// Logical database index (always 0 in cluster mode)
    pub db: i64,
    /// Pool-size hint from the configuration source
    pub pool_size_hint: usize,
    /// True when the node belongs to a sharded cluster
    pub cluster: bool,
    /// Role this descriptor was registered under
    pub role: Role,
}

impl NodeDescriptor {
    /// Connection URL for this node
    pub fn url(&self) -> String {
        format!("redis://{}/{}", self.addr, self.db)
    }
}

/// Consistent topology snapshot for one logical instance
#[derive(Debug, Clone)]
pub struct InstanceTopology {
    /// Logical instance name, e.g. "Orders"
    pub instance: String,
    pub master: NodeDescriptor,
    pub slave: NodeDescriptor,
    /// True when the instance is a sharded cluster
    pub cluster: bool,
}

impl InstanceTopology {
    /// Descriptor for the given role
    pub fn node(&self, role: Role) -> &NodeDescriptor {
        match role {
            Role::Write => &self.master,
            Role::Read => &self.slave,
        }
    }
}

/// Pool tuning applied when a `Structure` materializes its pools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum idle connections kept per pool
    pub max_idle: usize,
    /// Idle tolerance for pooled connections
    ///
    /// Approximated rather than enforced by a reaper: connections are
    /// liveness-checked at borrow time, and this value participates in
    /// pool identity so facades tuned differently get distinct pools.
    pub idle_timeout: Duration,
    /// Bound on waiting for a free connection from a saturated pool
    pub acquire_timeout: Duration,
    /// Bound on establishing a new connection
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_idle: DEFAULT_MAX_IDLE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            acquire_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_renders_master_slave() {
        assert_eq!(Role::Write.to_string(), "master");
        assert_eq!(Role::Read.to_string(), "slave");
    }

    #[test]
    fn node_url_includes_database() {
        let node = NodeDescriptor {
            addr: "10.0.0.1:6379".to_string(),
            db: 3,
            pool_size_hint: 10,
            cluster: false,
            role: Role::Write,
        };
        assert_eq!(node.url(), "redis://10.0.0.1:6379/3");
    }

    #[test]
    fn topology_node_selects_by_role() {
        let master = NodeDescriptor {
            addr: "10.0.0.1:6379".to_string(),
            db: 0,
            pool_size_hint: 10,
            cluster: false,
            role: Role::Write,
        };
        let slave = NodeDescriptor {
            addr: "10.0.0.2:6379".to_string(),
            role: Role::Read,
            ..master.clone()
        };
        let topology = InstanceTopology {
            instance: "Orders".to_string(),
            master,
            slave,
            cluster: false,
        };
        assert_eq!(topology.node(Role::Write).addr, "10.0.0.1:6379");
        assert_eq!(topology.node(Role::Read).addr, "10.0.0.2:6379");
    }

    #[test]
    fn default_settings_match_tuning_constants() {
        let settings = PoolSettings::default();
        assert_eq!(settings.max_idle, DEFAULT_MAX_IDLE);
        assert_eq!(settings.idle_timeout, DEFAULT_IDLE_TIMEOUT);
    }
}
