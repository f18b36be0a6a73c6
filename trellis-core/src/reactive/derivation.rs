//! Derivation Implementation
//!
//! A Derivation is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Derivations Work
//!
//! 1. Nothing runs at construction. The first read evaluates the compute
//!    function and caches the result.
//!
//! 2. When read again, if no dependency has changed, returns the cached value.
//!
//! 3. When a dependency changes, propagation marks the derivation stale
//!    without running anything ("push invalidation").
//!
//! 4. The next read recomputes exactly once ("pull recomputation"), however
//!    many upstream writes happened in between.
//!
//! # Dependency Tracking
//!
//! The dependency set is rebuilt from scratch on every evaluation: edges from
//! the previous run are dropped before the compute function starts, and only
//! the reads it makes this time are recorded. A derivation that branches on a
//! condition therefore only listens to the branch it actually took.
//!
//! # Failures
//!
//! If the compute function returns an error (or panics), the edges it
//! recorded so far are dropped and the derivation stays stale, keeping its
//! previous value out of reach until a later read succeeds. Reading a
//! derivation from inside its own evaluation, directly or through other
//! derivations, fails with [`ReactiveError::Cycle`](crate::ReactiveError::Cycle).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use super::context::ReactiveContext;
use super::runtime::{untrack, Evaluation, Runtime};
use crate::error::EvalResult;
use crate::graph::{Node, NodeId, NodeKind};

/// A cached derived value that recomputes only when dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// let price = Cell::new(10);
/// let qty = Cell::new(2);
/// let total = Derivation::new({
///     let (price, qty) = (price.clone(), qty.clone());
///     move || Ok(price.get() * qty.get())
/// });
///
/// assert_eq!(total.get()?, 20);
/// ```
pub struct Derivation<T: 'static> {
    inner: Rc<DerivationInner<T>>,
}

struct DerivationInner<T> {
    id: NodeId,
    compute: Box<dyn Fn() -> EvalResult<T>>,
    value: RefCell<Option<T>>,
}

impl<T: 'static> Derivation<T> {
    /// Create a new derivation with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> EvalResult<T> + 'static,
    {
        let id = Runtime::with(|rt| rt.insert_node(NodeKind::Derivation));
        Self {
            inner: Rc::new(DerivationInner {
                id,
                compute: Box::new(compute),
                value: RefCell::new(None),
            }),
        }
    }

    /// Attach a name used in logs and error messages.
    pub fn labeled(self, label: impl Into<String>) -> Self {
        let label = label.into();
        Runtime::with(|rt| rt.set_label(self.inner.id, label));
        self
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Inside a reactive context this also registers the current computation
    /// as a dependent.
    pub fn get(&self) -> EvalResult<T>
    where
        T: Clone,
    {
        self.track()?;
        if !self.is_stale() {
            if let Some(value) = self.inner.value.borrow().clone() {
                return Ok(value);
            }
        }
        self.refresh()
    }

    /// Get the current value without registering a dependency.
    pub fn get_untracked(&self) -> EvalResult<T>
    where
        T: Clone,
    {
        untrack(|| self.get())
    }

    /// Check if the next read will run the compute function.
    pub fn is_stale(&self) -> bool {
        self.node(Node::is_stale).unwrap_or(true)
    }

    /// Check if the derivation has a cached value, fresh or not.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Number of nodes read during the last successful evaluation.
    pub fn dependency_count(&self) -> usize {
        self.node(|node| node.sources().len()).unwrap_or(0)
    }

    /// Get the number of dependents.
    pub fn subscriber_count(&self) -> usize {
        self.node(|node| node.subscribers().len()).unwrap_or(0)
    }

    fn node<R>(&self, f: impl FnOnce(&Node) -> R) -> Option<R> {
        Runtime::with(|rt| rt.graph().get(self.inner.id).map(f))
    }

    /// Subscribe the current computation, or report a cycle if this
    /// derivation is already on the evaluation stack.
    fn track(&self) -> EvalResult<()> {
        let id = self.inner.id;
        let reader = ReactiveContext::current_node();

        let evaluating = Runtime::with(|rt| {
            let evaluating = rt.graph().get(id).map_or(false, Node::is_evaluating);
            if let (false, Some(reader)) = (evaluating, reader) {
                rt.link(id, reader);
            }
            evaluating
        });

        if evaluating {
            let path = ReactiveContext::close_cycle(id);
            return Err(Runtime::with(|rt| rt.cycle_error(id, &path)));
        }
        Ok(())
    }

    fn refresh(&self) -> EvalResult<T>
    where
        T: Clone,
    {
        trace!(node = %self.inner.id, "recomputing derivation");
        let evaluation = Evaluation::begin(self.inner.id, NodeKind::Derivation)?;
        let result = (self.inner.compute)();
        let value = evaluation.finish(result)?;

        *self.inner.value.borrow_mut() = Some(value.clone());
        Ok(value)
    }
}

impl<T> Drop for DerivationInner<T> {
    fn drop(&mut self) {
        Runtime::try_with(|rt| rt.remove_node(self.id));
    }
}

impl<T: 'static> Clone for Derivation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Derivation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derivation")
            .field("id", &self.inner.id)
            .field("stale", &self.is_stale())
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
