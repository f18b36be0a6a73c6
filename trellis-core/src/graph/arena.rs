//! Dependency Graph
//!
//! The arena that owns every node and the edges between them. Edges are
//! stored twice (as `sources` on the reader and `subscribers` on the node
//! being read) so both directions can be walked and torn down in O(degree).
//!
//! # Invalidation
//!
//! When a cell changes we walk its subscribers depth-first:
//!
//! 1. A derivation is marked stale. If it was fresh, its own subscribers are
//!    pushed onto the walk; if it was already stale, the subtree below it has
//!    already been visited and the walk stops there.
//! 2. An effect is handed to the [`UpdateQueue`], which deduplicates it.
//!
//! Nothing is recomputed during the walk. Derivations recompute on their next
//! read; effects run when the pass drains the queue.

use std::collections::HashMap;

use smallvec::SmallVec;

use super::node::{Node, NodeId, NodeKind};
use super::queue::UpdateQueue;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a node of the given kind.
    pub fn insert(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId::from_raw(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node::new(id, kind));
        id
    }

    /// Remove a node and every edge touching it.
    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        let mut node = self.nodes.remove(&id)?;

        for source in node.take_sources() {
            if let Some(source) = self.nodes.get_mut(&source) {
                source.remove_subscriber(id);
            }
        }
        for subscriber in node.take_subscribers() {
            if let Some(subscriber) = self.nodes.get_mut(&subscriber) {
                subscriber.remove_source(id);
            }
        }

        Some(node)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Record that `reader` read `source` during its current evaluation.
    ///
    /// Returns `true` if the edge is new. Edges to or from unknown nodes are
    /// ignored.
    pub fn link(&mut self, source: NodeId, reader: NodeId) -> bool {
        if source == reader || !self.contains(source) || !self.contains(reader) {
            return false;
        }

        let added = self
            .nodes
            .get_mut(&source)
            .map_or(false, |node| node.add_subscriber(reader));
        if let Some(node) = self.nodes.get_mut(&reader) {
            node.add_source(source);
        }
        added
    }

    pub fn unlink(&mut self, source: NodeId, reader: NodeId) {
        if let Some(node) = self.nodes.get_mut(&source) {
            node.remove_subscriber(reader);
        }
        if let Some(node) = self.nodes.get_mut(&reader) {
            node.remove_source(source);
        }
    }

    /// Drop every upstream edge of `reader`.
    pub fn clear_sources(&mut self, reader: NodeId) {
        let Some(sources) = self.nodes.get_mut(&reader).map(Node::take_sources) else {
            return;
        };
        for source in sources {
            if let Some(node) = self.nodes.get_mut(&source) {
                node.remove_subscriber(reader);
            }
        }
    }

    /// Propagate a change of `source` through the graph.
    ///
    /// Returns the number of derivations that became stale.
    pub fn invalidate(&mut self, source: NodeId, queue: &mut UpdateQueue) -> usize {
        let mut stack: SmallVec<[NodeId; 16]> = match self.nodes.get(&source) {
            Some(node) => node.subscribers().iter().rev().copied().collect(),
            None => return 0,
        };
        let mut marked = 0;

        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            match node.kind() {
                NodeKind::Derivation => {
                    if node.mark_stale() {
                        marked += 1;
                        stack.extend(node.subscribers().iter().rev().copied());
                    }
                }
                NodeKind::Effect => {
                    node.mark_stale();
                    queue.schedule_effect(id);
                }
                NodeKind::Cell => {}
            }
        }

        marked
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|node| node.sources().len()).sum()
    }
}
