//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//! A node carries only topology and bookkeeping flags; the typed values and
//! closures live in the `reactive` handles that own the node.

use std::fmt;

use indexmap::IndexSet;
use serde::Serialize;

/// Unique identifier for a node in the dependency graph.
///
/// Identifiers are allocated monotonically per runtime, so ordering two ids
/// orders their nodes by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A mutable value holder. These are the roots of the graph.
    /// They have no dependencies, only dependents.
    Cell,

    /// A memoized derived value. Has dependencies and may have dependents.
    Derivation,

    /// A side-effecting callback. These are leaves of the graph.
    Effect,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeKind::Cell => "cell",
            NodeKind::Derivation => "derivation",
            NodeKind::Effect => "effect",
        })
    }
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    label: Option<String>,

    /// Derivations: the memoized value must be recomputed before use.
    /// Effects: a re-run is scheduled or the last run failed.
    stale: bool,

    /// Set while the node's compute function is on the tracker stack.
    evaluating: bool,

    /// Nodes that this node read during its most recent evaluation.
    sources: IndexSet<NodeId>,

    /// Nodes that read this node, in subscription order.
    subscribers: IndexSet<NodeId>,
}

impl Node {
    pub(crate) fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            label: None,
            // Cells are never stale; everything else starts out needing a run.
            stale: kind != NodeKind::Cell,
            evaluating: false,
            sources: IndexSet::new(),
            subscribers: IndexSet::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) fn set_label(&mut self, label: impl Into<String>) {
        self.label = Some(label.into());
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Mark the node stale. Returns `true` if it was fresh before.
    pub(crate) fn mark_stale(&mut self) -> bool {
        !std::mem::replace(&mut self.stale, true)
    }

    pub(crate) fn mark_fresh(&mut self) {
        self.stale = false;
    }

    pub fn is_evaluating(&self) -> bool {
        self.evaluating
    }

    pub(crate) fn set_evaluating(&mut self, evaluating: bool) {
        self.evaluating = evaluating;
    }

    pub fn sources(&self) -> &IndexSet<NodeId> {
        &self.sources
    }

    pub fn subscribers(&self) -> &IndexSet<NodeId> {
        &self.subscribers
    }

    pub(crate) fn add_source(&mut self, id: NodeId) -> bool {
        self.sources.insert(id)
    }

    pub(crate) fn remove_source(&mut self, id: NodeId) {
        self.sources.shift_remove(&id);
    }

    pub(crate) fn take_sources(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.sources)
    }

    pub(crate) fn add_subscriber(&mut self, id: NodeId) -> bool {
        self.subscribers.insert(id)
    }

    pub(crate) fn remove_subscriber(&mut self, id: NodeId) {
        self.subscribers.shift_remove(&id);
    }

    pub(crate) fn take_subscribers(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.subscribers)
    }
}
