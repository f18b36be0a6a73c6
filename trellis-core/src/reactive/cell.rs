//! Cell Implementation
//!
//! A Cell is the fundamental reactive primitive. It holds a value and is the
//! only place where new data enters the graph.
//!
//! # How Cells Work
//!
//! 1. When a cell is read within a reactive context (derivation/effect), the
//!    reader is recorded as a subscriber.
//!
//! 2. When a cell is written, its [`Equality`] policy decides whether the
//!    value actually changed. Equal writes stop right there.
//!
//! 3. A real change marks dependent derivations stale and re-runs dependent
//!    effects before `set` returns.
//!
//! # Writes during propagation
//!
//! An effect that writes a cell while a pass is running does not see its
//! write applied immediately: the comparison, the store and the propagation
//! are all deferred until the running pass has finished. Every write
//! deferred during that pass is then applied together, and the effects they
//! affect run once, as the next pass, seeing all of those writes at once.
//! `set` returns `Ok(())` for such a write; failures of the later pass are
//! reported by the write that started the outermost pass.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use super::context::ReactiveContext;
use super::equality::Equality;
use super::runtime::{run_pass, Phase, Runtime};
use crate::error::{EvalResult, NodeRef, ReactiveError};
use crate::graph::{NodeId, NodeKind};

/// A reactive cell holding a value of type T.
///
/// Cloning a cell yields another handle to the same node. The node is
/// removed from the graph when the last handle is dropped.
///
/// # Example
///
/// ```rust,ignore
/// let count = Cell::new(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (re-runs dependent effects)
/// count.set(5)?;
/// ```
pub struct Cell<T: 'static> {
    inner: Rc<CellInner<T>>,
}

struct CellInner<T> {
    id: NodeId,
    value: RefCell<T>,
    equality: Equality<T>,
}

impl<T: PartialEq + 'static> Cell<T> {
    /// Create a cell that compares writes with `PartialEq`.
    pub fn new(value: T) -> Self {
        Self::with_equality(value, Equality::value())
    }
}

impl<T: 'static> Cell<T> {
    pub fn with_equality(value: T, equality: Equality<T>) -> Self {
        let id = Runtime::with(|rt| rt.insert_node(NodeKind::Cell));
        Self {
            inner: Rc::new(CellInner {
                id,
                value: RefCell::new(value),
                equality,
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

    pub fn equality(&self) -> &Equality<T> {
        &self.inner.equality
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a subscriber.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.track();
        self.inner.value.borrow().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value, tracking the read like [`Cell::get`].
    ///
    /// Writing this same cell from `f` outside a propagation pass fails with
    /// [`ReactiveError::BorrowedWrite`].
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&*self.inner.value.borrow())
    }

    /// Set a new value and propagate it.
    ///
    /// Returns the errors raised by derivations and effects during the
    /// propagation this write started.
    pub fn set(&self, value: T) -> EvalResult<()> {
        self.ensure_not_in_derivation()?;

        let inner = Rc::clone(&self.inner);
        match Runtime::with(|rt| rt.phase()) {
            Phase::Idle => run_pass(move || inner.apply(value)),
            Phase::Batching => inner.apply(value),
            Phase::Propagating => {
                trace!(cell = %inner.id, "write deferred until the current pass completes");
                Runtime::with(|rt| rt.defer_write(Box::new(move || inner.apply(value))));
                Ok(())
            }
        }
    }

    /// Update the value using a function of the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> EvalResult<()> {
        let next = {
            let current = self.inner.value.borrow();
            f(&*current)
        };
        self.set(next)
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        Runtime::with(|rt| {
            rt.graph()
                .get(self.inner.id)
                .map_or(0, |node| node.subscribers().len())
        })
    }

    fn track(&self) {
        if let Some(reader) = ReactiveContext::current_node() {
            Runtime::with(|rt| rt.link(self.inner.id, reader));
        }
    }

    fn ensure_not_in_derivation(&self) -> EvalResult<()> {
        let Some(reader) = ReactiveContext::current_node() else {
            return Ok(());
        };
        Runtime::with(|rt| {
            let graph = rt.graph();
            match graph.get(reader) {
                Some(node) if node.kind() == NodeKind::Derivation => {
                    Err(ReactiveError::WriteInDerivation {
                        cell: rt.node_ref(self.inner.id, NodeKind::Cell),
                        derivation: NodeRef::of(node),
                    })
                }
                _ => Ok(()),
            }
        })
    }
}

impl<T> CellInner<T> {
    fn apply(&self, value: T) -> EvalResult<()> {
        let changed = {
            let Ok(mut current) = self.value.try_borrow_mut() else {
                return Err(ReactiveError::BorrowedWrite {
                    cell: Runtime::with(|rt| rt.node_ref(self.id, NodeKind::Cell)),
                });
            };
            if self.equality.is_equal(&current, &value) {
                false
            } else {
                *current = value;
                true
            }
        };

        if changed {
            Runtime::with(|rt| rt.invalidate(self.id));
        } else {
            trace!(
                cell = %self.id,
                policy = self.equality.name(),
                "write skipped: value unchanged"
            );
            Runtime::with(Runtime::note_skipped_write);
        }
        Ok(())
    }
}

impl<T> Drop for CellInner<T> {
    fn drop(&mut self) {
        Runtime::try_with(|rt| rt.remove_node(self.id));
    }
}

impl<T: 'static> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("equality", &self.inner.equality)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{batch, Effect};
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn cell_get_and_set() {
        let cell = Cell::new(0);
        assert_eq!(cell.get(), 0);

        cell.set(42).unwrap();
        assert_eq!(cell.get(), 42);
    }

    #[test]
    fn cell_update() {
        let cell = Cell::new(10);
        cell.update(|v| v + 5).unwrap();
        assert_eq!(cell.get(), 15);
    }

    #[test]
    fn cell_clone_shares_state() {
        let cell1 = Cell::new(0);
        let cell2 = cell1.clone();

        cell1.set(42).unwrap();
        assert_eq!(cell2.get(), 42);
        assert_eq!(cell1.id(), cell2.id());
    }

    #[test]
    fn cell_ids_are_unique() {
        let c1 = Cell::new(0);
        let c2 = Cell::new(0);
        let c3 = Cell::new(0);

        assert_ne!(c1.id(), c2.id());
        assert_ne!(c2.id(), c3.id());
        assert_ne!(c1.id(), c3.id());
    }

    #[test]
    fn read_inside_effect_subscribes() {
        let cell = Cell::new(1);
        assert_eq!(cell.subscriber_count(), 0);

        let reader = cell.clone();
        let effect = Effect::new(move || {
            reader.get();
        })
        .unwrap();
        assert_eq!(cell.subscriber_count(), 1);

        effect.dispose();
        assert_eq!(cell.subscriber_count(), 0);
    }

    #[test]
    fn untracked_read_does_not_subscribe() {
        let cell = Cell::new(1);
        let reader = cell.clone();
        let _effect = Effect::new(move || {
            reader.get_untracked();
        })
        .unwrap();

        assert_eq!(cell.subscriber_count(), 0);
    }

    #[test]
    fn equal_write_is_skipped() {
        let runs = Arc::new(AtomicI32::new(0));
        let cell = Cell::new(String::from("same"));

        let (reader, counter) = (cell.clone(), runs.clone());
        let _effect = Effect::new(move || {
            reader.with(|value| value.len());
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let before = Runtime::stats().skipped_writes;
        cell.set(String::from("same")).unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(Runtime::stats().skipped_writes, before + 1);
    }

    #[test]
    fn never_policy_always_propagates() {
        let runs = Arc::new(AtomicI32::new(0));
        let cell = Cell::with_equality(7, Equality::never());

        let (reader, counter) = (cell.clone(), runs.clone());
        let _effect = Effect::new(move || {
            reader.get();
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        cell.set(7).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn writes_inside_batch_apply_immediately() {
        let cell = Cell::new(1);
        let seen = batch(|| {
            cell.set(2).unwrap();
            cell.get()
        })
        .unwrap();

        assert_eq!(seen, 2);
    }

    #[test]
    fn write_while_borrowed_is_an_error() {
        let cell = Cell::new(1).labeled("held");

        let err = cell.with(|_| cell.set(2)).unwrap_err();
        assert!(matches!(err, ReactiveError::BorrowedWrite { .. }));
        assert!(err.to_string().contains("held"));
        assert_eq!(cell.get(), 1);

        let err = batch(|| cell.with(|_| cell.update(|value| value + 1)))
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, ReactiveError::BorrowedWrite { .. }));

        cell.set(3).unwrap();
        assert_eq!(cell.get(), 3);
    }

    #[test]
    fn dropping_last_handle_removes_node() {
        let before = Runtime::stats().nodes;
        let cell = Cell::new(0).labeled("temporary");
        let clone = cell.clone();
        assert_eq!(Runtime::stats().nodes, before + 1);

        drop(cell);
        assert_eq!(Runtime::stats().nodes, before + 1);

        drop(clone);
        assert_eq!(Runtime::stats().nodes, before);
    }
}
