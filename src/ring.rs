//! Consistent hashing ring placing metrics on cluster servers.
//!
//! Placement is compatible with the Graphite carbon ring: every registered node contributes
//! `replicas` virtual nodes, the `i`-th positioned at
//! `md5("('<server>', '<instance>'):<i>")[0..2]` read as a big-endian u16. A metric belongs
//! to the first virtual node at or after its own position, wrapping past the top of the ring.
//!
//! The ring is a plain value. Callers sharing one across threads wrap it themselves, e.g.
//! in a `RwLock`.

use std::collections::HashSet;
use tracing::*;

mod node;
mod position;
mod store;

pub use node::{Node, NodeError};
pub use position::{compute_ring_position, replica_key, RingPosition};
pub use store::{RingEntry, RingStore};

pub const DEFAULT_REPLICAS: usize = 100;

#[derive(Clone)]
pub struct HashRing {
    ring: RingStore,
    nodes: Vec<Node>,
    replicas: usize,
}

impl Default for HashRing {
    fn default() -> Self {
        Self {
            ring: RingStore::new(),
            nodes: Vec::new(),
            replicas: DEFAULT_REPLICAS,
        }
    }
}

impl HashRing {
    pub fn new() -> Self { Self::default() }

    /// Creates an empty ring whose nodes each get `replicas` virtual nodes.
    pub fn with_replicas(replicas: usize) -> Self {
        let mut ring = Self::default();
        ring.set_replicas(replicas);
        ring
    }

    pub fn replicas(&self) -> usize { self.replicas }

    /// Sets the virtual node count for nodes added from now on. Nodes already on the ring
    /// keep their current footprint.
    ///
    /// # Panics
    /// When `replicas` is zero.
    pub fn set_replicas(&mut self, replicas: usize) {
        assert!(replicas > 0, "HashRing replicas must be positive");
        self.replicas = replicas;
    }

    /// Registers `node` and places its virtual nodes.
    ///
    /// No duplicate check is made: adding an identity that is already registered doubles its
    /// footprint. Callers must not re-register a node.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn add_node(&mut self, node: Node) {
        let key_value = node.key_value();
        for i in 0..self.replicas {
            let position = compute_ring_position(replica_key(&key_value, i));
            self.ring.insert(RingEntry::new(position, node.clone()));
        }

        debug!(%node, ring_members = self.ring.len(), "added node to ring");
        self.nodes.push(node);
    }

    /// Removes every registration and virtual node sharing `node`'s identity. Removing an
    /// unknown node does nothing.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn remove_node(&mut self, node: &Node) {
        let identity = node.identity();
        self.nodes.retain(|n| n.identity() != identity);
        let removed = self.ring.remove_node(node);
        debug!(%node, removed, ring_members = self.ring.len(), "removed node from ring");
    }

    /// Owner of `key`.
    ///
    /// # Panics
    /// When the ring is empty; asking for an owner before any node is registered is a
    /// configuration error, not something to retry.
    pub fn get_node<K: AsRef<str>>(&self, key: K) -> &Node {
        let start = self.start_index(key.as_ref());
        self.entry_at(start).node()
    }

    /// Distinct nodes met walking clockwise from `key`'s position, primary owner first.
    ///
    /// # Panics
    /// When the ring is empty.
    pub fn get_nodes<K: AsRef<str>>(&self, key: K) -> Vec<&Node> {
        let start = self.start_index(key.as_ref());
        let distinct = self.distinct_node_count();

        let mut seen = HashSet::with_capacity(distinct);
        let mut result = Vec::with_capacity(distinct);

        // visit each entry at most once
        for offset in 0..self.ring.len() {
            if distinct <= seen.len() { break; }

            let node = self.entry_at(start + offset).node();
            if seen.insert(node.identity()) {
                result.push(node);
            }
        }

        result
    }

    /// Registered nodes in registration order.
    pub fn nodes(&self) -> &[Node] { self.nodes.as_slice() }

    /// Number of virtual nodes on the ring.
    pub fn len(&self) -> usize { self.ring.len() }

    pub fn is_empty(&self) -> bool { self.ring.is_empty() }

    pub fn entries(&self) -> impl Iterator<Item = &RingEntry> { self.ring.iter() }

    fn distinct_node_count(&self) -> usize {
        self.nodes.iter().map(|n| n.identity()).collect::<HashSet<_>>().len()
    }

    fn start_index(&self, key: &str) -> usize {
        if self.ring.is_empty() {
            panic!("HashRing is empty");
        }

        let position = compute_ring_position(key);
        let index = self.ring.find_insertion_index(position);
        trace!(key, position, index, "ring lookup");
        index
    }

    /// Entry at `index`, wrapping around the ring.
    fn entry_at(&self, index: usize) -> &RingEntry {
        match self.ring.get(index % self.ring.len()) {
            Some(entry) => entry,
            None => unreachable!("index reduced modulo ring length"),
        }
    }
}

impl std::fmt::Display for HashRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let servers: Vec<String> = self.nodes.iter().map(|n| n.to_string()).collect();
        write!(
            f,
            "[HashRing: {} nodes, {} replicas, {} ring members {}]",
            self.nodes.len(),
            self.replicas,
            self.ring.len(),
            servers.join(" ")
        )
    }
}

impl std::fmt::Debug for HashRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HashRing(nodes:{:?}, replicas:{}, members:{})", self.nodes, self.replicas, self.ring.len())
    }
}
