//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a cell or derivation is
//! read, we can register the current computation as a dependent.
//!
//! # Implementation
//!
//! We use a thread-local stack to track the currently executing computation.
//! When a derivation or effect starts evaluating we push a frame for it, and
//! the guard returned by [`ReactiveContext::enter`] pops it again, including
//! when the computation panics.
//!
//! This design supports nested reactive contexts (e.g., a derivation that
//! reads from another derivation). An untracked frame (see
//! [`untrack`](super::untrack)) masks the frames below it so reads inside it
//! subscribe nothing.

use std::cell::RefCell;

use crate::graph::NodeId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = RefCell::new(Vec::new());
}

/// An entry in the reactive context stack.
#[derive(Debug, Clone)]
struct ContextEntry {
    /// The node being evaluated, or `None` for an untracked scope.
    node: Option<NodeId>,
    /// Set when a read on this frame's node closed a cycle.
    cycle: Option<Vec<NodeId>>,
}

/// Guard that pops the context when dropped.
pub struct ReactiveContext {
    node: Option<NodeId>,
    exited: bool,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given node.
    ///
    /// While this context is active, any cells or derivations that are read
    /// register the node as a dependent.
    pub fn enter(node: NodeId) -> Self {
        Self::push(Some(node))
    }

    /// Enter a scope in which reads are not tracked.
    pub fn untracked() -> Self {
        Self::push(None)
    }

    fn push(node: Option<NodeId>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry { node, cycle: None });
        });
        Self {
            node,
            exited: false,
        }
    }

    /// Check if there is any frame on the stack, tracked or not.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// The node that a read right now would subscribe, if any.
    pub fn current_node() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|entry| entry.node))
    }

    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }

    /// Record that `target`, which is already evaluating, was read again.
    ///
    /// Flags `target`'s frame so its evaluation fails with a cycle error and
    /// returns the path from `target` to the reader.
    pub(crate) fn close_cycle(target: NodeId) -> Vec<NodeId> {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let Some(start) = stack.iter().rposition(|entry| entry.node == Some(target)) else {
                return vec![target];
            };
            let path: Vec<NodeId> = stack[start..].iter().filter_map(|entry| entry.node).collect();
            stack[start].cycle = Some(path.clone());
            path
        })
    }

    /// Pop this context, returning the cycle recorded on it, if any.
    pub(crate) fn exit(mut self) -> Option<Vec<NodeId>> {
        self.exited = true;
        self.pop()
    }

    fn pop(&self) -> Option<Vec<NodeId>> {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop()?;

            // Verify we're popping the right context.
            debug_assert_eq!(
                popped.node, self.node,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.node, popped.node
            );
            popped.cycle
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if !self.exited {
            self.pop();
        }
    }
}
