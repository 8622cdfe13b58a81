//! Error types.
//!
//! Two kinds of failure exist in the graph:
//!
//! - [`GraphError`] is a usage fault (subscribing to a finished node, an empty
//!   subscription request). It is returned synchronously to the caller.
//! - [`Fault`] is a payload-level failure travelling through the graph via
//!   `error`. It is routed to handlers and never returned to producers.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::stream::{NodeId, State};

/// Usage errors raised synchronously by graph operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The operation is not allowed once a node reached a terminal state.
    #[error("operation not allowed on {id} in state {state:?}")]
    IllegalState { id: NodeId, state: State },

    /// A subscription request was malformed.
    #[error("illegal subscription: {0}")]
    IllegalArity(&'static str),
}

pub type Result<T> = std::result::Result<T, GraphError>;

/// A cloneable, type-erased payload error.
///
/// Faults fan out to every child able to handle them, so they are shared
/// behind an `Arc` rather than moved.
#[derive(Clone)]
pub struct Fault(Arc<dyn std::error::Error + Send + Sync>);

impl Fault {
    /// Wrap an existing error.
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Arc::new(err))
    }

    /// Create a fault from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self(Arc::new(Message(message.into())))
    }

    /// Borrow the underlying error.
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.0
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fault").field(&self.0.to_string()).finish()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for Fault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<GraphError> for Fault {
    fn from(err: GraphError) -> Self {
        Self::new(err)
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);
