//! Dependency Graph
//!
//! This module implements the arena that records relationships between
//! reactive values and computations.
//!
//! # Overview
//!
//! The dependency graph is a directed graph where:
//!
//! - Nodes represent cells, derivations or effects
//! - Edges represent reads: if A read B during its last evaluation, there is
//!   an edge from B to A
//!
//! Nodes refer to each other only through [`NodeId`] handles. No node owns
//! another node's lifetime; the typed handles in `reactive` own their node
//! and remove it (and all its edges) when the last handle is dropped.
//!
//! # Design Decisions
//!
//! 1. We use a centralized arena rather than object-to-object references
//!    because it keeps teardown a matter of deleting ids from adjacency sets.
//!
//! 2. The graph is indexed by node ID for O(1) lookups.
//!
//! 3. We maintain both forward (sources) and reverse (subscribers) edges to
//!    enable efficient traversal in both directions.

mod arena;
mod node;
mod queue;

pub use arena::DependencyGraph;
pub use node::{Node, NodeId, NodeKind};
pub use queue::UpdateQueue;
pub(crate) use queue::DeferredWrite;
