//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued. The queue runs
//!    after the propagation walk, so an effect reachable through several
//!    changed paths still runs once per pass.
//!
//! 3. Before re-running, the effect drops its old dependencies and tracks
//!    new ones during execution.
//!
//! # Ordering
//!
//! Effects queued in the same pass run in the order they were created.
//!
//! # Differences from Derivation
//!
//! - Derivations return a value; effects do not.
//! - Derivations are lazy (compute on access); effects are eager (run when
//!   deps change).
//! - Derivations may not write cells; effects may, and those writes are
//!   applied after the current pass.
//!
//! # Disposal
//!
//! Dropping the [`Effect`] handle disposes the effect, as does calling
//! [`Effect::dispose`]. A disposed effect holds no subscriptions and never
//! runs again.

use std::cell::{Cell as Flag, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::{trace, warn};

use super::runtime::{run_pass, run_pass_split, Evaluation, Phase, Runtime};
use crate::error::EvalResult;
use crate::graph::{NodeId, NodeKind};

type Callback = Box<dyn FnMut() -> EvalResult<()>>;

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// let count = Cell::new(0);
///
/// let effect = Effect::new({
///     let count = count.clone();
///     move || println!("Count is: {}", count.get())
/// })?;
///
/// count.set(5)?;  // Prints: "Count is: 5"
/// ```
#[must_use = "dropping an Effect disposes it"]
pub struct Effect {
    inner: Rc<EffectInner>,
}

pub(crate) struct EffectInner {
    id: NodeId,
    callback: RefCell<Callback>,
    runs: Flag<usize>,
    disposed: Flag<bool>,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(mut run: F) -> EvalResult<Self>
    where
        F: FnMut() + 'static,
    {
        Self::create(None, move || {
            run();
            Ok(())
        })
    }

    /// Create an effect whose function can fail.
    ///
    /// If the first run fails, the effect is disposed and the error returned.
    /// Failures of other effects in the pass the first run started are
    /// logged and leave the new effect alive.
    pub fn try_new<F>(run: F) -> EvalResult<Self>
    where
        F: FnMut() -> EvalResult<()> + 'static,
    {
        Self::create(None, run)
    }

    /// Like [`Effect::try_new`], naming the effect in logs and errors.
    pub fn labeled<F>(label: impl Into<String>, run: F) -> EvalResult<Self>
    where
        F: FnMut() -> EvalResult<()> + 'static,
    {
        Self::create(Some(label.into()), run)
    }

    fn create<F>(label: Option<String>, run: F) -> EvalResult<Self>
    where
        F: FnMut() -> EvalResult<()> + 'static,
    {
        let inner = Runtime::with(|rt| {
            let id = rt.insert_node(NodeKind::Effect);
            if let Some(label) = label {
                rt.set_label(id, label);
            }
            let inner = Rc::new(EffectInner {
                id,
                callback: RefCell::new(Box::new(run)),
                runs: Flag::new(0),
                disposed: Flag::new(false),
            });
            rt.register_effect(Rc::clone(&inner));
            inner
        });

        let effect = Self { inner };
        let first = match Runtime::with(|rt| rt.phase()) {
            Phase::Idle => {
                let (first, rest) = run_pass_split(|| effect.inner.run());
                if let Err(err) = rest {
                    warn!(
                        node = %effect.inner.id,
                        error = %err,
                        "other nodes failed in the pass started by a new effect"
                    );
                }
                first
            }
            Phase::Batching | Phase::Propagating => effect.inner.run(),
        };
        first?;
        Ok(effect)
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Run the effect now, outside of any change notification.
    ///
    /// Called from outside a pass, this starts one, so writes made by the
    /// effect are applied and propagated before it returns. This is also how
    /// an effect whose last run failed is retried.
    pub fn execute(&self) -> EvalResult<()> {
        if self.is_disposed() {
            return Ok(());
        }
        match Runtime::with(|rt| rt.phase()) {
            Phase::Idle => run_pass(|| self.inner.run()),
            Phase::Batching | Phase::Propagating => self.inner.run(),
        }
    }

    /// Dispose of the effect.
    ///
    /// After disposal, the effect will not run again. Disposing twice is a
    /// no-op.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        trace!(node = %self.inner.id, "disposing effect");
        let registered = Runtime::try_with(|rt| rt.remove_effect(self.inner.id));
        drop(registered);
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.runs.get()
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        Runtime::with(|rt| {
            rt.graph()
                .get(self.inner.id)
                .map_or(0, |node| node.sources().len())
        })
    }
}

impl EffectInner {
    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    /// Execute the callback under the tracker.
    pub(crate) fn run(&self) -> EvalResult<()> {
        if self.disposed.get() {
            return Ok(());
        }
        let Ok(mut callback) = self.callback.try_borrow_mut() else {
            // The callback is already on the stack: it caused its own re-run.
            return Err(Runtime::with(|rt| rt.cycle_error(self.id, &[self.id])));
        };

        let evaluation = Evaluation::begin(self.id, NodeKind::Effect)?;
        let result = (*callback)();
        self.runs.set(self.runs.get() + 1);
        evaluation.finish(result)
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
