//! The pool of nodes available to the planner, with slot accounting.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::PlannerError;
use crate::topology::Topology;

/// Scratch and lifecycle flags carried on a [`Node`].
///
/// Modeled as an explicit struct of booleans rather than a bitfield: each
/// flag is independently meaningful and none of them are ever tested in
/// combination via bitwise masks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFlags {
    /// Set once this job's mapping has pushed `slots_in_use` past
    /// `slots_total`.
    pub oversubscribed: bool,
    /// Scratch bit: set while a node is touched by the mapper currently
    /// running, cleared by the driver once a job finishes planning.
    pub mapped: bool,
    /// Operator-controlled: nodes marked unusable are never offered to the
    /// target selector.
    pub usable: bool,
}

impl NodeFlags {
    pub fn new_usable() -> Self {
        NodeFlags {
            oversubscribed: false,
            mapped: false,
            usable: true,
        }
    }
}

/// A single compute node: its hardware hierarchy plus slot accounting.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    topology: Option<Arc<Topology>>,
    slots_total: u32,
    slots_in_use: u32,
    /// `None` means no hard cap beyond `slots_total` plus oversubscription.
    slots_max: Option<u32>,
    flags: NodeFlags,
    /// Persists across jobs for the lifetime of the pool: backs
    /// `node_rank`, which must stay unique among all processes a node has
    /// ever hosted, not just the current job's.
    resident_counter: u32,
}

impl Node {
    pub fn new(name: impl Into<String>, slots_total: u32, topology: Arc<Topology>) -> Self {
        Node {
            name: name.into(),
            topology: Some(topology),
            slots_total,
            slots_in_use: 0,
            slots_max: None,
            flags: NodeFlags::new_usable(),
            resident_counter: 0,
        }
    }

    /// A node whose topology hasn't been discovered yet (do-not-launch
    /// planning mode before a stand-in topology is assigned).
    pub fn without_topology(name: impl Into<String>, slots_total: u32) -> Self {
        Node {
            name: name.into(),
            topology: None,
            slots_total,
            slots_in_use: 0,
            slots_max: None,
            flags: NodeFlags::new_usable(),
            resident_counter: 0,
        }
    }

    pub fn with_slots_max(mut self, slots_max: u32) -> Self {
        self.slots_max = Some(slots_max);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topology(&self) -> Option<&Arc<Topology>> {
        self.topology.as_ref()
    }

    pub fn set_topology(&mut self, topology: Arc<Topology>) {
        self.topology = Some(topology);
    }

    pub fn slots_total(&self) -> u32 {
        self.slots_total
    }

    pub fn slots_in_use(&self) -> u32 {
        self.slots_in_use
    }

    pub fn slots_max(&self) -> Option<u32> {
        self.slots_max
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    pub fn is_usable(&self) -> bool {
        self.flags.usable
    }

    pub fn is_oversubscribed(&self) -> bool {
        self.flags.oversubscribed
    }

    pub fn is_at_capacity(&self, allow_oversubscribe: bool) -> bool {
        if !allow_oversubscribe && self.slots_in_use >= self.slots_total {
            return true;
        }
        if let Some(max) = self.slots_max {
            if self.slots_in_use >= max {
                return true;
            }
        }
        false
    }

    /// Free slots before hitting `slots_total` (ignoring `slots_max` and
    /// oversubscription, which callers check separately via
    /// [`Node::is_at_capacity`]).
    pub fn free_slots(&self) -> u32 {
        self.slots_total.saturating_sub(self.slots_in_use)
    }

    /// Reserve `count` slots on this node. Fails with
    /// [`PlannerError::ResourceBusy`] if doing so would oversubscribe and
    /// `allow_oversubscribe` is false, or would exceed `slots_max`.
    pub fn reserve(&mut self, count: u32, allow_oversubscribe: bool) -> Result<(), PlannerError> {
        let would_use = self.slots_in_use + count;
        if let Some(max) = self.slots_max {
            if would_use > max {
                return Err(PlannerError::ResourceBusy {
                    node: self.name.clone(),
                });
            }
        }
        if would_use > self.slots_total && !allow_oversubscribe {
            return Err(PlannerError::ResourceBusy {
                node: self.name.clone(),
            });
        }
        self.slots_in_use = would_use;
        if self.slots_in_use > self.slots_total {
            self.flags.oversubscribed = true;
        }
        self.flags.mapped = true;
        Ok(())
    }

    pub fn clear_mapped_flag(&mut self) {
        self.flags.mapped = false;
    }

    /// The next `node_rank` to hand out on this node, advancing the
    /// counter. Never reset between jobs.
    pub fn next_node_rank(&mut self) -> u32 {
        let r = self.resident_counter;
        self.resident_counter += 1;
        r
    }
}

/// The process-wide set of nodes available for mapping.
///
/// Dense by construction (an [`IndexMap`] rather than a pointer array with
/// holes): nodes are only ever appended or looked up by name, never
/// compacted mid-array, so there's no stable-index requirement to preserve.
#[derive(Debug, Clone, Default)]
pub struct NodePool {
    nodes: IndexMap<String, Node>,
}

impl NodePool {
    pub fn new() -> Self {
        NodePool::default()
    }

    pub fn insert(&mut self, node: Node) {
        self.nodes.insert(node.name().to_string(), node);
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Stable node-name ordering, as used for tie-breaking in the target
    /// selector.
    pub fn names_sorted(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Clear the `mapped` scratch flag on every node, run by the driver
    /// during cleanup so the next job starts with a clean slate.
    pub fn clear_all_mapped_flags(&mut self) {
        for node in self.nodes.values_mut() {
            node.clear_mapped_flag();
        }
    }

    /// Copy node 0's (by insertion order) topology onto any node missing
    /// one. Used only in do-not-launch planning mode.
    pub fn fill_missing_topologies_from_first(&mut self) -> Result<(), PlannerError> {
        let stand_in = self
            .nodes
            .values()
            .next()
            .and_then(|n| n.topology().cloned())
            .ok_or(PlannerError::NotFound)?;
        for node in self.nodes.values_mut() {
            if node.topology().is_none() {
                node.set_topology(stand_in.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::SyntheticTopology;

    fn topo() -> Arc<Topology> {
        Arc::new(SyntheticTopology::simple(1, 2, 1).build())
    }

    #[test]
    fn reserve_refuses_oversubscription_by_default() {
        let mut n = Node::new("a", 4, topo());
        assert!(n.reserve(4, false).is_ok());
        assert!(n.reserve(1, false).is_err());
        assert!(n.reserve(1, true).is_ok());
        assert!(n.is_oversubscribed());
    }

    #[test]
    fn slots_max_caps_even_with_oversubscribe_allowed() {
        let mut n = Node::new("a", 2, topo()).with_slots_max(3);
        assert!(n.reserve(3, true).is_ok());
        assert!(n.reserve(1, true).is_err());
    }

    #[test]
    fn pool_fills_missing_topology_from_first_node() {
        let mut pool = NodePool::new();
        pool.insert(Node::new("a", 4, topo()));
        pool.insert(Node::without_topology("b", 4));
        pool.fill_missing_topologies_from_first().unwrap();
        assert!(pool.get("b").unwrap().topology().is_some());
    }
}
