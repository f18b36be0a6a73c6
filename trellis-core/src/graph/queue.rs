//! Update Queue
//!
//! Holds the work a propagation pass still has to do: effects waiting to
//! re-run and writes that arrived while a pass was already in progress.
//! Deferred writes are taken out as one generation at a time: everything
//! written during a pass is applied together before the next pass runs its
//! effects.
//!
//! Effects are kept in an ordered set keyed by [`NodeId`]. Ids grow with
//! creation time, so draining the set runs effects in registration order,
//! and inserting an already-queued effect is a no-op.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use super::node::NodeId;
use crate::error::EvalResult;

/// A write captured while a pass was running, applied with the rest of its
/// generation once that pass has finished.
pub(crate) type DeferredWrite = Box<dyn FnOnce() -> EvalResult<()>>;

#[derive(Default)]
pub struct UpdateQueue {
    effects: BTreeSet<NodeId>,
    writes: VecDeque<DeferredWrite>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an effect. Returns `false` if it was already queued.
    pub fn schedule_effect(&mut self, id: NodeId) -> bool {
        self.effects.insert(id)
    }

    /// Pop the earliest-registered queued effect.
    pub fn next_effect(&mut self) -> Option<NodeId> {
        self.effects.pop_first()
    }

    /// Drop a queued run, e.g. because the effect was disposed.
    pub fn cancel_effect(&mut self, id: NodeId) {
        self.effects.remove(&id);
    }

    pub fn is_scheduled(&self, id: NodeId) -> bool {
        self.effects.contains(&id)
    }

    pub(crate) fn defer_write(&mut self, write: DeferredWrite) {
        self.writes.push_back(write);
    }

    /// Take every write deferred so far, oldest first.
    pub(crate) fn take_writes(&mut self) -> Vec<DeferredWrite> {
        self.writes.drain(..).collect()
    }

    pub fn pending_effects(&self) -> usize {
        self.effects.len()
    }

    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty() && self.writes.is_empty()
    }

    /// Empty the queue, handing back the deferred writes.
    ///
    /// Deferred writes own cell handles; the caller must drop them outside
    /// any runtime borrow.
    pub(crate) fn take(&mut self) -> Vec<DeferredWrite> {
        self.effects.clear();
        self.writes.drain(..).collect()
    }
}

impl fmt::Debug for UpdateQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateQueue")
            .field("effects", &self.effects)
            .field("pending_writes", &self.writes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn effects_drain_in_id_order() {
        let mut queue = UpdateQueue::new();
        queue.schedule_effect(NodeId::from_raw(7));
        queue.schedule_effect(NodeId::from_raw(2));
        queue.schedule_effect(NodeId::from_raw(5));

        let order: Vec<u64> = std::iter::from_fn(|| queue.next_effect())
            .map(|id| id.raw())
            .collect();
        assert_eq!(order, vec![2, 5, 7]);
    }

    #[test]
    fn scheduling_twice_is_deduplicated() {
        let mut queue = UpdateQueue::new();
        assert!(queue.schedule_effect(NodeId::from_raw(1)));
        assert!(!queue.schedule_effect(NodeId::from_raw(1)));
        assert_eq!(queue.pending_effects(), 1);
    }

    #[test]
    fn cancel_removes_pending_run() {
        let mut queue = UpdateQueue::new();
        queue.schedule_effect(NodeId::from_raw(3));
        queue.cancel_effect(NodeId::from_raw(3));

        assert!(!queue.is_scheduled(NodeId::from_raw(3)));
        assert!(queue.next_effect().is_none());
    }

    #[test]
    fn deferred_writes_are_fifo() {
        let mut queue = UpdateQueue::new();
        let log = Arc::new(AtomicI32::new(0));

        for digit in 1..=3 {
            let log = log.clone();
            queue.defer_write(Box::new(move || {
                let current = log.load(Ordering::SeqCst);
                log.store(current * 10 + digit, Ordering::SeqCst);
                Ok(())
            }));
        }
        assert_eq!(queue.pending_writes(), 3);

        let generation = queue.take_writes();
        assert_eq!(generation.len(), 3);
        assert!(queue.is_empty());
        for write in generation {
            write().unwrap();
        }
        assert_eq!(log.load(Ordering::SeqCst), 123);
    }

    #[test]
    fn take_clears_everything() {
        let mut queue = UpdateQueue::new();
        queue.schedule_effect(NodeId::from_raw(1));
        queue.defer_write(Box::new(|| Ok(())));

        let writes = queue.take();
        assert_eq!(writes.len(), 1);
        assert!(queue.is_empty());
    }
}
