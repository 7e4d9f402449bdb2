use super::node::Node;
use super::position::RingPosition;

#[derive(Debug, Clone, PartialEq)]
pub struct RingEntry {
    position: RingPosition,
    node: Node,
}

impl RingEntry {
    pub fn new(position: RingPosition, node: Node) -> Self { Self { position, node } }

    pub fn position(&self) -> RingPosition { self.position }

    pub fn node(&self) -> &Node { &self.node }
}

/// Ring entries kept non-decreasing by position.
#[derive(Debug, Clone, Default)]
pub struct RingStore {
    entries: Vec<RingEntry>,
}

impl RingStore {
    pub fn new() -> Self { Self::default() }

    /// Smallest index whose entry position is `>= position`, or `len()` when `position`
    /// is past every entry. Equal positions resolve to the leftmost match.
    pub fn find_insertion_index(&self, position: RingPosition) -> usize {
        self.entries.partition_point(|e| e.position < position)
    }

    /// Inserts ahead of any entries already sitting at the same position.
    pub fn insert(&mut self, entry: RingEntry) {
        let index = self.find_insertion_index(entry.position);
        self.entries.insert(index, entry);
    }

    /// Drops every entry owned by `node`'s identity, returning how many went.
    pub fn remove_node(&mut self, node: &Node) -> usize {
        let identity = node.identity();
        let before = self.entries.len();
        self.entries.retain(|e| e.node.identity() != identity);
        before - self.entries.len()
    }

    pub fn get(&self, index: usize) -> Option<&RingEntry> { self.entries.get(index) }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = &RingEntry> { self.entries.iter() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_of(positions: &[(RingPosition, &str)]) -> RingStore {
        let mut store = RingStore::new();
        for (pos, server) in positions {
            store.insert(RingEntry::new(*pos, Node::new(*server, "")));
        }
        store
    }

    fn positions(store: &RingStore) -> Vec<RingPosition> {
        store.iter().map(|e| e.position()).collect()
    }

    #[test]
    fn test_find_insertion_index() {
        let store = store_of(&[(10, "a"), (20, "b"), (20, "c"), (30, "d")]);
        assert_eq!(store.find_insertion_index(0), 0);
        assert_eq!(store.find_insertion_index(10), 0);
        assert_eq!(store.find_insertion_index(11), 1);
        assert_eq!(store.find_insertion_index(20), 1);
        assert_eq!(store.find_insertion_index(30), 3);
        assert_eq!(store.find_insertion_index(31), 4);
        assert_eq!(store.find_insertion_index(RingPosition::MAX), 4);
    }

    #[test]
    fn test_find_insertion_index_empty() {
        let store = RingStore::new();
        assert_eq!(store.find_insertion_index(0), 0);
        assert_eq!(store.find_insertion_index(65535), 0);
    }

    #[test]
    fn test_insert_keeps_order() {
        let store = store_of(&[(500, "a"), (3, "b"), (65535, "c"), (0, "d"), (42, "e")]);
        assert_eq!(positions(&store), vec![0, 3, 42, 500, 65535]);
    }

    #[test]
    fn test_insert_equal_position_goes_first() {
        let store = store_of(&[(7, "first"), (7, "second"), (7, "third")]);
        let servers: Vec<&str> = store.iter().map(|e| e.node().server()).collect();
        assert_eq!(servers, vec!["third", "second", "first"]);
    }

    #[test]
    fn test_remove_node_removes_every_match() {
        let mut store = store_of(&[(1, "a"), (2, "b"), (3, "a"), (4, "a"), (5, "c")]);
        assert_eq!(store.remove_node(&Node::new("a", "")), 3);
        assert_eq!(positions(&store), vec![2, 5]);
        assert_eq!(store.remove_node(&Node::new("a", "")), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_remove_node_matches_identity_only() {
        let mut store = RingStore::new();
        store.insert(RingEntry::new(1, Node::new("a", "x")));
        store.insert(RingEntry::new(2, Node::new("a", "")));
        assert_eq!(store.remove_node(&Node::new("a", "x")), 1);
        assert_eq!(store.get(0).map(|e| e.node().to_string()), Some("a".to_string()));
    }
}
