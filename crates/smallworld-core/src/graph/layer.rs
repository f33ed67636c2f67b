//! A single layer of the hierarchical graph.
//!
//! Adjacency is stored as an arena indexed by dense node id, with one
//! `RwLock` per node so that parallel construction serializes mutation per
//! adjacency list instead of per layer.

use super::NodeId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Adjacency lists for one layer of the hierarchy.
#[derive(Debug, Default)]
pub(crate) struct Layer {
    /// node_id -> neighbor ids at this layer.
    neighbors: Vec<RwLock<Vec<NodeId>>>,
}

impl Layer {
    /// Creates a layer with adjacency slots for `capacity` nodes.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            neighbors: (0..capacity).map(|_| RwLock::new(Vec::new())).collect(),
        }
    }

    /// Ensures adjacency slots exist up to and including `node_id`.
    pub(crate) fn ensure_capacity(&mut self, node_id: NodeId) {
        while self.neighbors.len() <= node_id {
            self.neighbors.push(RwLock::new(Vec::new()));
        }
    }

    /// Number of adjacency slots.
    pub(crate) fn slots(&self) -> usize {
        self.neighbors.len()
    }

    /// Returns a copy of a node's neighbor list.
    pub(crate) fn get(&self, node_id: NodeId) -> Vec<NodeId> {
        if node_id < self.neighbors.len() {
            self.neighbors[node_id].read().clone()
        } else {
            Vec::new()
        }
    }

    /// Replaces a node's neighbor list.
    pub(crate) fn set(&self, node_id: NodeId, neighbors: Vec<NodeId>) {
        if node_id < self.neighbors.len() {
            *self.neighbors[node_id].write() = neighbors;
        }
    }

    /// Current degree of a node.
    pub(crate) fn degree(&self, node_id: NodeId) -> usize {
        if node_id < self.neighbors.len() {
            self.neighbors[node_id].read().len()
        } else {
            0
        }
    }

    /// Appends `neighbor` to `node_id`'s list if not already present and the
    /// list holds fewer than `cap` entries. Returns true when the edge was
    /// added.
    pub(crate) fn try_add(&self, node_id: NodeId, neighbor: NodeId, cap: usize) -> bool {
        if node_id >= self.neighbors.len() {
            return false;
        }
        let mut list = self.neighbors[node_id].write();
        if list.len() < cap && !list.contains(&neighbor) {
            list.push(neighbor);
            true
        } else {
            false
        }
    }

    /// Removes `neighbor` from `node_id`'s list. Returns true when removed.
    pub(crate) fn remove(&self, node_id: NodeId, neighbor: NodeId) -> bool {
        if node_id >= self.neighbors.len() {
            return false;
        }
        let mut list = self.neighbors[node_id].write();
        if let Some(pos) = list.iter().position(|&n| n == neighbor) {
            list.swap_remove(pos);
            true
        } else {
            false
        }
    }

    /// Removes `id` from every adjacency list in this layer.
    ///
    /// Cap-driven pruning can leave directed references to a node that no
    /// longer lists the referrer, so deletion sweeps the whole layer.
    pub(crate) fn purge(&self, id: NodeId) {
        for slot in &self.neighbors {
            let mut list = slot.write();
            if let Some(pos) = list.iter().position(|&n| n == id) {
                list.swap_remove(pos);
            }
        }
    }

    /// Snapshots the whole layer as plain adjacency lists.
    pub(crate) fn snapshot(&self) -> Vec<Vec<NodeId>> {
        self.neighbors.iter().map(|slot| slot.read().clone()).collect()
    }

    /// Rebuilds a layer from plain adjacency lists.
    pub(crate) fn from_lists(lists: Vec<Vec<NodeId>>) -> Self {
        Self {
            neighbors: lists.into_iter().map(RwLock::new).collect(),
        }
    }
}

/// Serializable snapshot of a layer, used for builder node snapshots.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LayerSnapshot(pub Vec<Vec<NodeId>>);
