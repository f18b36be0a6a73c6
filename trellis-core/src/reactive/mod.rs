//! Reactive Primitives
//!
//! This module implements the core reactive system: cells, derivations, and
//! effects. These primitives form the foundation of Trellis's fine-grained
//! reactivity.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A Cell is a container for mutable state. When a cell's value is read
//! within a tracking context (such as a derivation or effect), the cell
//! automatically registers that context as a dependent. When the cell's value
//! changes, all dependents are notified.
//!
//! ## Derivations
//!
//! A Derivation is a derived value that caches its result. It is computed
//! lazily on first read and re-evaluates only when one of its dependencies
//! has changed since.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects are how reactive state reaches the outside
//! world: logging, persistence, rendering.
//!
//! # Implementation Notes
//!
//! Dependencies are detected automatically through a thread-local tracking
//! context. When a cell or derivation is read, the innermost active context
//! (if any) is recorded as its subscriber.
//!
//! Propagation is glitch-free: a write first marks everything downstream
//! stale, and only then runs effects, which pull fresh values on demand. No
//! effect can observe a mix of old and new inputs.

mod cell;
mod context;
mod derivation;
mod effect;
mod equality;
mod runtime;

pub use cell::Cell;
pub use context::ReactiveContext;
pub use derivation::Derivation;
pub use effect::Effect;
pub use equality::Equality;
pub use runtime::{batch, untrack, Runtime, RuntimeStats};
