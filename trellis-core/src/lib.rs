//! Trellis Core
//!
//! This crate provides a dependency-tracked reactive computation graph.
//! It implements:
//!
//! - Reactive primitives (cells, derivations, effects)
//! - Automatic dependency tracking
//! - Glitch-free push/pull propagation
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives, the tracker and the per-thread
//!   runtime that drives propagation
//! - `graph`: The dependency graph, its nodes and the update queue
//! - `error`: The error type shared by every fallible operation
//! - `config`: Runtime limits, loadable from JSON
//!
//! # Example
//!
//! ```rust
//! use trellis_core::{Cell, Derivation, Effect, EvalResult};
//!
//! # fn main() -> EvalResult<()> {
//! let price = Cell::new(10);
//! let qty = Cell::new(2);
//!
//! // Create a derived value; it is computed on first read
//! let total = Derivation::new({
//!     let (price, qty) = (price.clone(), qty.clone());
//!     move || Ok(price.get() * qty.get())
//! });
//!
//! // Create an effect; it runs once now and again after every change
//! let _log = Effect::try_new({
//!     let total = total.clone();
//!     move || {
//!         println!("Total: {}", total.get()?);
//!         Ok(())
//!     }
//! })?;
//!
//! price.set(12)?;
//! // Effect automatically runs, prints: "Total: 24"
//! assert_eq!(total.get()?, 24);
//! # Ok(())
//! # }
//! ```
//!
//! # Logging
//!
//! The crate emits [`tracing`] events and never installs a subscriber.

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{BoxError, EvalResult, NodeRef, ReactiveError};
pub use reactive::{batch, untrack, Cell, Derivation, Effect, Equality, Runtime, RuntimeStats};
