//! Error types for the reactive runtime.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::graph::{Node, NodeId, NodeKind};

/// Boxed error returned by user compute functions.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type returned by evaluations, reads of derivations and writes.
pub type EvalResult<T> = Result<T, ReactiveError>;

/// Identifies a node in an error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub id: NodeId,
    pub kind: NodeKind,
    pub label: Option<String>,
}

impl NodeRef {
    pub(crate) fn of(node: &Node) -> Self {
        Self {
            id: node.id(),
            kind: node.kind(),
            label: node.label().map(str::to_owned),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{} {} ({label:?})", self.kind, self.id),
            None => write!(f, "{} {}", self.kind, self.id),
        }
    }
}

struct Path<'a>(&'a [NodeRef]);

impl fmt::Display for Path<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, node) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{node}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A derivation read itself, directly or through other derivations.
    ///
    /// `path` starts at `node` and lists the evaluations that were on the
    /// stack when the cycle closed.
    #[error("cycle detected at {node}: {}", Path(.path))]
    Cycle { node: NodeRef, path: Vec<NodeRef> },

    /// A compute function or effect callback returned an error.
    ///
    /// `node` is `None` until the error leaves the evaluation that produced
    /// it; the runtime fills it in at that point.
    #[error("{} failed: {source}", .node.as_ref().map_or_else(|| "evaluation".to_owned(), ToString::to_string))]
    Failed {
        node: Option<NodeRef>,
        #[source]
        source: BoxError,
    },

    #[error("{cell} written from inside {derivation}; derivations must be pure")]
    WriteInDerivation { cell: NodeRef, derivation: NodeRef },

    /// A cell was written while its value was borrowed through
    /// [`Cell::with`](crate::Cell::with).
    #[error("{cell} written while its value is borrowed")]
    BorrowedWrite { cell: NodeRef },

    #[error("propagation did not settle after {passes} passes")]
    PropagationLimit { passes: u32 },

    #[error("evaluation depth {depth} exceeded while evaluating {node}")]
    DepthExceeded { node: NodeRef, depth: usize },

    #[error("{} nodes failed during propagation", .0.len())]
    Multiple(Vec<ReactiveError>),

    #[error("invalid runtime configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("invalid runtime configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

impl ReactiveError {
    /// Wrap an arbitrary error raised by a compute function or callback.
    pub fn failed(source: impl Into<BoxError>) -> Self {
        Self::Failed {
            node: None,
            source: source.into(),
        }
    }

    /// Fail an evaluation with a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::failed(Message(message.into()))
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::Cycle { .. })
    }

    /// The node this error is attributed to, if any.
    pub fn node(&self) -> Option<&NodeRef> {
        match self {
            Self::Cycle { node, .. } | Self::DepthExceeded { node, .. } => Some(node),
            Self::Failed { node, .. } => node.as_ref(),
            Self::WriteInDerivation { derivation, .. } => Some(derivation),
            Self::BorrowedWrite { cell } => Some(cell),
            _ => None,
        }
    }

    /// Attribute an unattributed failure to `node`.
    pub(crate) fn attribute(self, node: impl FnOnce() -> Option<NodeRef>) -> Self {
        match self {
            Self::Failed { node: None, source } => Self::Failed {
                node: node(),
                source,
            },
            other => other,
        }
    }

    /// Collapse the errors gathered during a pass into one result.
    pub(crate) fn collect(mut errors: Vec<ReactiveError>) -> EvalResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(raw: u64, kind: NodeKind, label: Option<&str>) -> NodeRef {
        NodeRef {
            id: NodeId::from_raw(raw),
            kind,
            label: label.map(str::to_owned),
        }
    }

    #[test]
    fn cycle_message_lists_path() {
        let a = node(1, NodeKind::Derivation, Some("a"));
        let b = node(2, NodeKind::Derivation, None);
        let err = ReactiveError::Cycle {
            node: a.clone(),
            path: vec![a, b],
        };

        assert_eq!(
            err.to_string(),
            "cycle detected at derivation #1 (\"a\"): derivation #1 (\"a\") -> derivation #2"
        );
        assert!(err.is_cycle());
    }

    #[test]
    fn attribute_fills_missing_node_only() {
        let first = node(3, NodeKind::Effect, Some("log"));
        let second = node(4, NodeKind::Derivation, None);

        let err = ReactiveError::msg("boom").attribute(|| Some(first.clone()));
        assert_eq!(err.node(), Some(&first));
        assert_eq!(err.to_string(), "effect #3 (\"log\") failed: boom");

        let err = err.attribute(|| Some(second));
        assert_eq!(err.node(), Some(&first));
    }

    #[test]
    fn collect_flattens_single_error() {
        assert!(ReactiveError::collect(Vec::new()).is_ok());

        let single = ReactiveError::collect(vec![ReactiveError::msg("one")]);
        assert!(matches!(single, Err(ReactiveError::Failed { .. })));

        let many = ReactiveError::collect(vec![
            ReactiveError::msg("one"),
            ReactiveError::msg("two"),
        ]);
        match many {
            Err(ReactiveError::Multiple(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected Multiple, got {other:?}"),
        }
    }

    #[test]
    fn failed_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = ReactiveError::failed(io);
        assert_eq!(err.source().map(ToString::to_string).as_deref(), Some("disk gone"));
    }
}
