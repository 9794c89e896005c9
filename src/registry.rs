//! Topology registry with per-instance generation counters
//!
//! The registry holds the resolved topology snapshot for every logical
//! instance name, plus a generation counter that stands in for a "needs
//! refresh" flag. Consumers capture the generation they built their pools
//! under and rebuild when the registry has moved past it, so racing
//! consumers each converge without consuming a shared one-shot flag.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use crate::config::{InstanceTopology, NodeDescriptor, Role};
use crate::error::{RouteError, RouteResult};

struct Registered {
    topology: InstanceTopology,
    generation: u64,
}

/// Process-wide registry of instance topologies
///
/// Populated at service start from the configuration source and kept
/// current by its watcher for the life of the process.
#[derive(Default)]
pub struct TopologyRegistry {
    instances: DashMap<String, Registered>,
}

impl TopologyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a topology snapshot, replacing any previous one and
    /// bumping the instance generation
    pub fn install(&self, topology: InstanceTopology) {
        let instance = topology.instance.clone();
        let generation = match self.instances.entry(instance.clone()) {
            Entry::Occupied(mut entry) => {
                let generation = entry.get().generation + 1;
                entry.insert(Registered {
                    topology,
                    generation,
                });
                generation
            }
            Entry::Vacant(entry) => {
                entry.insert(Registered {
                    topology,
                    generation: 1,
                });
                1
            }
        };
        info!(instance = %instance, generation, "installed topology");
    }

    /// Signal that cached pools for the instance are stale without
    /// replacing its topology
    pub fn mark_refresh(&self, instance: &str) {
        if let Some(mut entry) = self.instances.get_mut(instance) {
            entry.generation += 1;
            debug!(instance = %instance, generation = entry.generation, "marked for refresh");
        }
    }

    /// Current generation for the instance; 0 when unregistered
    pub fn generation(&self, instance: &str) -> u64 {
        self.instances
            .get(instance)
            .map(|entry| entry.generation)
            .unwrap_or(0)
    }

    /// Resolve the descriptor for an instance/role pair
    pub fn resolve(&self, instance: &str, role: Role) -> RouteResult<NodeDescriptor> {
        self.instances
            .get(instance)
            .map(|entry| entry.topology.node(role).clone())
            .ok_or_else(|| RouteError::ConfigurationAbsent {
                instance: instance.to_string(),
                role,
            })
    }

    /// Consistent snapshot of the instance topology
    pub fn topology(&self, instance: &str) -> Option<InstanceTopology> {
        self.instances
            .get(instance)
            .map(|entry| entry.topology.clone())
    }

    /// True if the instance has a registered topology
    pub fn contains(&self, instance: &str) -> bool {
        self.instances.contains_key(instance)
    }
}
