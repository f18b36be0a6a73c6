//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects cells, derivations
//! and effects. It owns the dependency graph and schedules updates when
//! cells change.
//!
//! # How It Works
//!
//! 1. Every cell, derivation and effect allocates a node in the runtime's
//!    [`DependencyGraph`] when it is created.
//!
//! 2. When a derivation or effect reads a cell or derivation, the runtime
//!    records the edge.
//!
//! 3. When a cell's value changes, the runtime runs a propagation pass:
//!    a. Marks dependent derivations stale, transitively
//!    b. Queues dependent effects
//!    c. Runs the queued effects, each at most once, in registration order
//!    d. Derivations stay lazy: they recompute on their next read
//!
//! 4. Writes issued by effects while a pass is running are deferred. Once
//!    the pass has run all its effects, every deferred write is applied
//!    together, and the effects they queued run as the next pass.
//!
//! # Threading
//!
//! Each thread has its own runtime. Nodes created on one thread are invisible
//! to every other thread, and the handles are `!Send`, so no locking is
//! involved anywhere in the graph.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;
use tracing::{debug, trace, warn};

use super::context::ReactiveContext;
use super::effect::EffectInner;
use crate::config::RuntimeConfig;
use crate::error::{EvalResult, NodeRef, ReactiveError};
use crate::graph::{DeferredWrite, DependencyGraph, NodeId, NodeKind, UpdateQueue};

thread_local! {
    static RUNTIME: RefCell<Runtime> = RefCell::new(Runtime::new());
}

/// What the runtime is doing right now; decides how a write is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// A write starts its own propagation pass.
    Idle,
    /// Inside [`batch`]: writes apply immediately, effects wait for the end.
    Batching,
    /// Effects are running: writes are deferred until the pass ends.
    Propagating,
}

/// Counters describing the current thread's graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeStats {
    /// Live nodes in the graph.
    pub nodes: usize,
    /// Live dependency edges.
    pub edges: usize,
    /// Propagation passes run, counting one per generation of deferred
    /// writes.
    pub passes: u64,
    /// Derivation and effect evaluations started.
    pub evaluations: u64,
    /// Effect callbacks invoked.
    pub effect_runs: u64,
    /// Derivations marked stale by propagation.
    pub stale_marks: u64,
    /// Writes dropped by a cell's equality policy.
    pub skipped_writes: u64,
}

/// The per-thread reactive runtime.
///
/// Application code interacts with it only through the associated functions
/// below; cells, derivations and effects reach it internally.
pub struct Runtime {
    graph: DependencyGraph,
    queue: UpdateQueue,
    effects: HashMap<NodeId, Rc<EffectInner>>,
    config: RuntimeConfig,
    phase: Phase,
    stats: RuntimeStats,
}

impl Runtime {
    fn new() -> Self {
        Self {
            graph: DependencyGraph::new(),
            queue: UpdateQueue::new(),
            effects: HashMap::new(),
            config: RuntimeConfig::default(),
            phase: Phase::Idle,
            stats: RuntimeStats::default(),
        }
    }

    /// Borrow this thread's runtime.
    ///
    /// The closure must not call back into user code: compute functions and
    /// effect callbacks re-enter the runtime.
    pub(crate) fn with<R>(f: impl FnOnce(&mut Runtime) -> R) -> R {
        RUNTIME.with(|runtime| f(&mut runtime.borrow_mut()))
    }

    /// Like [`Runtime::with`], but gives up instead of panicking when the
    /// runtime is already borrowed or has been torn down with its thread.
    pub(crate) fn try_with<R>(f: impl FnOnce(&mut Runtime) -> R) -> Option<R> {
        RUNTIME
            .try_with(|runtime| runtime.try_borrow_mut().ok().map(|mut rt| f(&mut rt)))
            .ok()
            .flatten()
    }

    /// Replace this thread's configuration.
    pub fn configure(config: RuntimeConfig) -> EvalResult<()> {
        config.validate()?;
        debug!(
            max_passes = config.max_passes,
            max_depth = config.max_depth,
            "runtime reconfigured"
        );
        Self::with(|rt| rt.config = config);
        Ok(())
    }

    pub fn config() -> RuntimeConfig {
        Self::with(|rt| rt.config.clone())
    }

    pub fn stats() -> RuntimeStats {
        Self::with(|rt| RuntimeStats {
            nodes: rt.graph.node_count(),
            edges: rt.graph.edge_count(),
            ..rt.stats.clone()
        })
    }

    /// Check if a propagation pass is running on this thread.
    pub fn is_propagating() -> bool {
        Self::with(|rt| rt.phase == Phase::Propagating)
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub(crate) fn insert_node(&mut self, kind: NodeKind) -> NodeId {
        self.graph.insert(kind)
    }

    pub(crate) fn remove_node(&mut self, id: NodeId) {
        self.graph.remove(id);
    }

    pub(crate) fn set_label(&mut self, id: NodeId, label: String) {
        if let Some(node) = self.graph.get_mut(id) {
            node.set_label(label);
        }
    }

    pub(crate) fn link(&mut self, source: NodeId, reader: NodeId) {
        self.graph.link(source, reader);
    }

    /// Describe a node for an error message.
    pub(crate) fn node_ref(&self, id: NodeId, kind: NodeKind) -> NodeRef {
        self.graph.get(id).map(NodeRef::of).unwrap_or(NodeRef {
            id,
            kind,
            label: None,
        })
    }

    pub(crate) fn cycle_error(&self, node: NodeId, path: &[NodeId]) -> ReactiveError {
        ReactiveError::Cycle {
            node: self.node_ref(node, NodeKind::Derivation),
            path: path
                .iter()
                .filter_map(|id| self.graph.get(*id).map(NodeRef::of))
                .collect(),
        }
    }

    pub(crate) fn register_effect(&mut self, effect: Rc<EffectInner>) {
        self.effects.insert(effect.id(), effect);
    }

    /// Forget an effect: its node, its edges and any queued run.
    ///
    /// The returned handle must be dropped outside the runtime borrow.
    pub(crate) fn remove_effect(&mut self, id: NodeId) -> Option<Rc<EffectInner>> {
        self.graph.remove(id);
        self.queue.cancel_effect(id);
        self.effects.remove(&id)
    }

    /// Propagate a change of `cell` through the graph.
    pub(crate) fn invalidate(&mut self, cell: NodeId) {
        let marked = self.graph.invalidate(cell, &mut self.queue);
        self.stats.stale_marks += marked as u64;
    }

    pub(crate) fn note_skipped_write(&mut self) {
        self.stats.skipped_writes += 1;
    }

    pub(crate) fn defer_write(&mut self, write: DeferredWrite) {
        self.queue.defer_write(write);
    }

    fn next_effect(&mut self) -> Option<Rc<EffectInner>> {
        while let Some(id) = self.queue.next_effect() {
            if let Some(effect) = self.effects.get(&id) {
                return Some(Rc::clone(effect));
            }
        }
        None
    }

    /// Finish an evaluation of `id`.
    ///
    /// A failed evaluation keeps no edges and stays stale so the next read
    /// retries it.
    fn settle(&mut self, id: NodeId, succeeded: bool) {
        let Some(node) = self.graph.get_mut(id) else {
            return;
        };
        node.set_evaluating(false);
        if succeeded {
            node.mark_fresh();
        } else {
            node.mark_stale();
            self.graph.clear_sources(id);
        }
    }
}

/// Restores the runtime to [`Phase::Idle`] when a pass or batch ends.
struct PhaseGuard;

impl PhaseGuard {
    fn enter(phase: Phase) -> Self {
        Runtime::with(|rt| rt.phase = phase);
        PhaseGuard
    }
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        let discarded = Runtime::try_with(|rt| {
            rt.phase = Phase::Idle;
            // An unwinding pass leaves its remaining work behind.
            if std::thread::panicking() {
                rt.queue.take()
            } else {
                Vec::new()
            }
        });
        drop(discarded);
    }
}

/// Run `first` as the opening step of a propagation pass, then run every
/// queued effect and every deferred write before returning.
///
/// Errors from `first` and from the drain are combined.
pub(crate) fn run_pass<R>(first: impl FnOnce() -> EvalResult<R>) -> EvalResult<R> {
    match run_pass_split(first) {
        (Ok(value), Ok(())) => Ok(value),
        (Err(err), Ok(())) | (Ok(_), Err(err)) => Err(err),
        (Err(first), Err(ReactiveError::Multiple(mut rest))) => {
            rest.insert(0, first);
            Err(ReactiveError::Multiple(rest))
        }
        (Err(first), Err(rest)) => Err(ReactiveError::Multiple(vec![first, rest])),
    }
}

/// Like [`run_pass`], keeping the result of `first` apart from the errors
/// raised by everything the pass ran after it.
pub(crate) fn run_pass_split<R>(
    first: impl FnOnce() -> EvalResult<R>,
) -> (EvalResult<R>, EvalResult<()>) {
    let _guard = PhaseGuard::enter(Phase::Propagating);
    let result = first();
    let drained = drain();
    (result, drained)
}

/// Run queued effects, then apply the writes they deferred as one
/// generation, and repeat until nothing is left.
fn drain() -> EvalResult<()> {
    let max_passes = Runtime::with(|rt| {
        rt.stats.passes += 1;
        rt.config.max_passes
    });
    let mut passes = 1;
    let mut errors = Vec::new();

    loop {
        while let Some(effect) = Runtime::with(Runtime::next_effect) {
            if let Err(err) = effect.run() {
                warn!(node = %effect.id(), error = %err, "effect failed during propagation");
                errors.push(err);
            }
        }

        let generation = Runtime::with(|rt| rt.queue.take_writes());
        if generation.is_empty() {
            break;
        }
        if passes >= max_passes {
            warn!(
                passes,
                dropped_writes = generation.len(),
                "propagation did not settle, dropping remaining writes"
            );
            drop(generation);
            errors.push(ReactiveError::PropagationLimit { passes });
            break;
        }

        passes += 1;
        Runtime::with(|rt| rt.stats.passes += 1);
        trace!(pass = passes, writes = generation.len(), "applying deferred writes");
        for write in generation {
            if let Err(err) = write() {
                warn!(error = %err, "deferred write failed");
                errors.push(err);
            }
        }
    }

    debug!(passes, errors = errors.len(), "propagation settled");
    ReactiveError::collect(errors)
}

/// Group writes into one propagation pass.
///
/// Writes inside `f` are applied immediately, so derivations read inside `f`
/// see them, but effects only run once, after `f` returns, and see the final
/// values of every cell written.
///
/// Nested batches join the outermost one. Called while a pass is already
/// running, `f` simply runs: its writes are deferred like any other write
/// made by an effect.
///
/// ```rust,ignore
/// batch(|| {
///     price.set(12)?;
///     qty.set(4)
/// })??;
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> EvalResult<R> {
    if Runtime::with(|rt| rt.phase) != Phase::Idle {
        return Ok(f());
    }

    let _guard = PhaseGuard::enter(Phase::Batching);
    let value = f();
    Runtime::with(|rt| rt.phase = Phase::Propagating);
    drain()?;
    Ok(value)
}

/// Run `f` without subscribing the current computation to anything it reads.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::untracked();
    f()
}

/// Scope of one derivation or effect evaluation.
///
/// Beginning an evaluation drops the node's previous edges and pushes a
/// tracker frame; finishing pops it and settles the node. If the compute
/// function unwinds instead, dropping the scope settles the node as failed.
pub(crate) struct Evaluation {
    node: NodeId,
    kind: NodeKind,
    context: Option<ReactiveContext>,
}

impl Evaluation {
    pub(crate) fn begin(node: NodeId, kind: NodeKind) -> EvalResult<Self> {
        let depth = ReactiveContext::depth();
        Runtime::with(|rt| {
            if depth >= rt.config.max_depth {
                return Err(ReactiveError::DepthExceeded {
                    node: rt.node_ref(node, kind),
                    depth,
                });
            }
            rt.graph.clear_sources(node);
            if let Some(entry) = rt.graph.get_mut(node) {
                entry.set_evaluating(true);
            }
            rt.stats.evaluations += 1;
            if kind == NodeKind::Effect {
                rt.stats.effect_runs += 1;
            }
            Ok(())
        })?;

        Ok(Self {
            node,
            kind,
            context: Some(ReactiveContext::enter(node)),
        })
    }

    pub(crate) fn finish<T>(mut self, result: EvalResult<T>) -> EvalResult<T> {
        let cycle = self.context.take().and_then(ReactiveContext::exit);
        let succeeded = result.is_ok() && cycle.is_none();

        let (node, cycle) = Runtime::with(|rt| {
            rt.settle(self.node, succeeded);
            let node = rt.node_ref(self.node, self.kind);
            let cycle = cycle.map(|path| rt.cycle_error(self.node, &path));
            (node, cycle)
        });

        if let Some(err) = cycle {
            debug!(node = %self.node, error = %err, "cycle detected");
            return Err(err);
        }
        result.map_err(|err| err.attribute(|| Some(node)))
    }
}

impl Drop for Evaluation {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            drop(context);
            Runtime::try_with(|rt| rt.settle(self.node, false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_rejects_invalid_limits() {
        let before = Runtime::config();
        let err = Runtime::configure(RuntimeConfig {
            max_passes: 0,
            ..RuntimeConfig::default()
        })
        .unwrap_err();

        assert!(matches!(err, ReactiveError::InvalidConfig(_)));
        assert_eq!(Runtime::config(), before);
    }

    #[test]
    fn evaluation_links_and_settles() {
        let (cell, derived) = Runtime::with(|rt| {
            (
                rt.insert_node(NodeKind::Cell),
                rt.insert_node(NodeKind::Derivation),
            )
        });

        let evaluation = Evaluation::begin(derived, NodeKind::Derivation).unwrap();
        assert!(Runtime::with(|rt| rt.graph().get(derived).unwrap().is_evaluating()));
        Runtime::with(|rt| rt.link(cell, derived));
        evaluation.finish(Ok(())).unwrap();

        Runtime::with(|rt| {
            let node = rt.graph().get(derived).unwrap();
            assert!(!node.is_evaluating());
            assert!(!node.is_stale());
            assert!(node.sources().contains(&cell));
            rt.remove_node(cell);
            rt.remove_node(derived);
        });
    }

    #[test]
    fn failed_evaluation_drops_partial_edges() {
        let (cell, derived) = Runtime::with(|rt| {
            (
                rt.insert_node(NodeKind::Cell),
                rt.insert_node(NodeKind::Derivation),
            )
        });

        let evaluation = Evaluation::begin(derived, NodeKind::Derivation).unwrap();
        Runtime::with(|rt| rt.link(cell, derived));
        let err = evaluation
            .finish::<()>(Err(ReactiveError::msg("nope")))
            .unwrap_err();

        assert_eq!(err.node().map(|node| node.id), Some(derived));
        Runtime::with(|rt| {
            let node = rt.graph().get(derived).unwrap();
            assert!(node.is_stale());
            assert!(node.sources().is_empty());
            assert!(rt.graph().get(cell).unwrap().subscribers().is_empty());
            rt.remove_node(cell);
            rt.remove_node(derived);
        });
    }

    #[test]
    fn dropped_evaluation_settles_as_failed() {
        let derived = Runtime::with(|rt| rt.insert_node(NodeKind::Derivation));

        let evaluation = Evaluation::begin(derived, NodeKind::Derivation).unwrap();
        drop(evaluation);

        assert!(!ReactiveContext::is_active());
        Runtime::with(|rt| {
            let node = rt.graph().get(derived).unwrap();
            assert!(!node.is_evaluating());
            assert!(node.is_stale());
            rt.remove_node(derived);
        });
    }

    #[test]
    fn depth_limit_is_enforced() {
        let previous = Runtime::config();
        Runtime::configure(RuntimeConfig {
            max_depth: 1,
            ..previous.clone()
        })
        .unwrap();

        let (outer, inner) = Runtime::with(|rt| {
            (
                rt.insert_node(NodeKind::Derivation),
                rt.insert_node(NodeKind::Derivation),
            )
        });
        let evaluation = Evaluation::begin(outer, NodeKind::Derivation).unwrap();
        let err = Evaluation::begin(inner, NodeKind::Derivation)
            .err()
            .expect("second level should exceed the depth limit");
        assert!(matches!(err, ReactiveError::DepthExceeded { depth: 1, .. }));
        drop(evaluation);

        Runtime::configure(previous).unwrap();
        Runtime::with(|rt| {
            rt.remove_node(outer);
            rt.remove_node(inner);
        });
    }

    #[test]
    fn untrack_hides_the_current_node() {
        let _ctx = ReactiveContext::enter(NodeId::from_raw(u64::MAX));
        untrack(|| assert!(ReactiveContext::current_node().is_none()));
        assert!(ReactiveContext::current_node().is_some());
    }
}
