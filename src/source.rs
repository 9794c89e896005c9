//! External configuration interface
//!
//! Topology is discovered by an external configuration/watch service.
//! This module owns only the seam: the `TopologySource` trait, the
//! serialized document shape, and the loaders that turn documents into
//! registry snapshots. A watcher pushes changed payloads through
//! `apply_update`, which installs the new snapshot and thereby signals
//! every facade to rebuild.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{DEFAULT_MAX_IDLE, InstanceTopology, NodeDescriptor, Role};
use crate::error::{RouteError, RouteResult};
use crate::registry::TopologyRegistry;

/// Access to the external topology store
#[async_trait]
pub trait TopologySource: Send + Sync {
    /// Instance names registered under `prefix`, in store order
    async fn list_instance_names(&self, prefix: &str) -> RouteResult<Vec<String>>;

    /// Serialized topology document for one instance
    async fn get_topology(&self, instance: &str) -> RouteResult<String>;
}

#[derive(Debug, Deserialize)]
struct NodeDoc {
    #[serde(rename = "DB")]
    db: String,
    #[serde(rename = "IP")]
    ip: String,
    #[serde(rename = "Port")]
    port: String,
    #[serde(rename = "PoolSize", default)]
    pool_size: usize,
    #[serde(rename = "IsCluster", default)]
    is_cluster: bool,
    #[serde(rename = "IsMaster", default)]
    is_master: bool,
}

/// Wire shape of a topology document: master and slave node lists
#[derive(Debug, Deserialize)]
struct TopologyDoc {
    #[serde(rename = "Master")]
    master: Vec<NodeDoc>,
    #[serde(rename = "Slave", default)]
    slave: Vec<NodeDoc>,
}

impl NodeDoc {
    fn into_descriptor(self, instance: &str, role: Role) -> RouteResult<NodeDescriptor> {
        let db = self
            .db
            .parse::<i64>()
            .map_err(|_| RouteError::InvalidTopology {
                instance: instance.to_string(),
                reason: format!("non-numeric DB {:?}", self.db),
            })?;

        if self.ip.is_empty() || self.port.is_empty() {
            return Err(RouteError::InvalidTopology {
                instance: instance.to_string(),
                reason: format!("{role} node is missing IP or Port"),
            });
        }

        let pool_size_hint = if self.pool_size == 0 {
            DEFAULT_MAX_IDLE
        } else {
            self.pool_size
        };

        Ok(NodeDescriptor {
            addr: format!("{}:{}", self.ip, self.port),
            db,
            pool_size_hint,
            cluster: self.is_cluster,
            role,
        })
    }
}

/// Deserialize a topology document into a registry snapshot
///
/// A master node is required. A missing slave falls back to the master
/// address re-tagged as read, so single-node instances still serve both
/// roles.
pub fn parse_topology(instance: &str, payload: &str) -> RouteResult<InstanceTopology> {
    let doc: TopologyDoc =
        serde_json::from_str(payload).map_err(|e| RouteError::InvalidTopology {
            instance: instance.to_string(),
            reason: e.to_string(),
        })?;

    let master_doc = doc
        .master
        .into_iter()
        .next()
        .ok_or_else(|| RouteError::InvalidTopology {
            instance: instance.to_string(),
            reason: "no master node".to_string(),
        })?;
    let master = master_doc.into_descriptor(instance, Role::Write)?;

    let slave = match doc.slave.into_iter().next() {
        Some(slave_doc) => slave_doc.into_descriptor(instance, Role::Read)?,
        None => NodeDescriptor {
            role: Role::Read,
            ..master.clone()
        },
    };

    let cluster = master.cluster;
    Ok(InstanceTopology {
        instance: instance.to_string(),
        master,
        slave,
        cluster,
    })
}

/// Load every instance under `prefix` from the source into the registry
///
/// Returns the instance names loaded. Fails on the first instance whose
/// document is absent or malformed; partially loaded instances stay
/// installed.
pub async fn load_instances(
    source: &dyn TopologySource,
    registry: &TopologyRegistry,
    prefix: &str,
) -> RouteResult<Vec<String>> {
    let names = source.list_instance_names(prefix).await?;
    for name in &names {
        let payload = source.get_topology(name).await?;
        registry.install(parse_topology(name, &payload)?);
        debug!(instance = %name, "loaded topology");
    }
    info!(prefix = %prefix, count = names.len(), "topology load complete");
    Ok(names)
}

/// Apply one watcher-delivered topology change
///
/// Installing the snapshot bumps the instance generation, which is the
/// refresh signal every facade checks before acquiring.
pub fn apply_update(
    registry: &TopologyRegistry,
    instance: &str,
    payload: &str,
) -> RouteResult<()> {
    registry.install(parse_topology(instance, payload)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS_DOC: &str = r#"{
        "Master": [{"DB": "0", "IP": "10.0.0.1", "Port": "6379", "PoolSize": 20}],
        "Slave":  [{"DB": "0", "IP": "10.0.0.2", "Port": "6379", "PoolSize": 20}]
    }"#;

    #[test]
    fn parses_master_and_slave() {
        let topology = parse_topology("Orders", ORDERS_DOC).unwrap();
        assert_eq!(topology.master.addr, "10.0.0.1:6379");
        assert_eq!(topology.slave.addr, "10.0.0.2:6379");
        assert_eq!(topology.master.db, 0);
        assert_eq!(topology.master.pool_size_hint, 20);
        assert!(!topology.cluster);
    }

    #[test]
    fn missing_slave_falls_back_to_master() {
        let doc = r#"{"Master": [{"DB": "3", "IP": "10.0.0.1", "Port": "6379"}]}"#;
        let topology = parse_topology("Orders", doc).unwrap();
        assert_eq!(topology.slave.addr, "10.0.0.1:6379");
        assert_eq!(topology.slave.db, 3);
        assert_eq!(topology.slave.role, Role::Read);
        // Zero pool size takes the default hint
        assert_eq!(topology.master.pool_size_hint, DEFAULT_MAX_IDLE);
    }

    #[test]
    fn missing_master_is_invalid() {
        let doc = r#"{"Master": [], "Slave": [{"DB": "0", "IP": "10.0.0.2", "Port": "6379"}]}"#;
        let err = parse_topology("Orders", doc).unwrap_err();
        assert!(matches!(err, RouteError::InvalidTopology { .. }));
    }

    #[test]
    fn non_numeric_db_is_invalid() {
        let doc = r#"{"Master": [{"DB": "zero", "IP": "10.0.0.1", "Port": "6379"}]}"#;
        let err = parse_topology("Orders", doc).unwrap_err();
        assert!(matches!(err, RouteError::InvalidTopology { .. }));
    }

    #[test]
    fn cluster_flag_propagates() {
        let doc = r#"{"Master": [{"DB": "0", "IP": "10.0.0.1", "Port": "7000", "IsCluster": true, "IsMaster": true}]}"#;
        let topology = parse_topology("Orders", doc).unwrap();
        assert!(topology.cluster);
        assert!(topology.master.cluster);
    }

    #[test]
    fn malformed_json_is_invalid() {
        let err = parse_topology("Orders", "{not json").unwrap_err();
        assert!(matches!(err, RouteError::InvalidTopology { .. }));
    }
}
