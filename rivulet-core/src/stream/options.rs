//! Node lifecycle state and configuration.

use serde::{Deserialize, Serialize};

use super::id::NodeId;

/// Lifecycle state of a node.
///
/// States are ordered; a node only ever moves forward through them and
/// nothing leaves `Done` or `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// Created, nobody subscribed yet.
    Idle,
    /// At least one subscription was made.
    Active,
    /// Completed or unsubscribed. Resources are released.
    Done,
    /// Failed.
    Error,
}

impl State {
    /// Whether the state is `Done` or `Error`.
    pub fn is_terminal(self) -> bool {
        self >= State::Done
    }
}

/// When a node tears itself down because of removed subscriptions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseMode {
    /// Never close automatically.
    Never,
    /// Close as soon as the first one goes away.
    First,
    /// Close once the last one goes away.
    #[default]
    Last,
}

/// Per-node configuration.
///
/// All fields have defaults, so a partial document deserializes:
///
/// ```
/// use rivulet_core::stream::{CloseMode, NodeOptions};
///
/// let opts: NodeOptions = serde_json::from_str(r#"{ "close_out": "first" }"#).unwrap();
/// assert_eq!(opts.close_out, CloseMode::First);
/// assert!(opts.cache);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeOptions {
    /// Display name. Generated from a type prefix when absent.
    pub id: Option<String>,
    /// Input close policy, for nodes with more than one input.
    pub close_in: CloseMode,
    /// Output close policy, applied when children are removed.
    pub close_out: CloseMode,
    /// Keep the last dispatched value and replay it to late subscribers.
    pub cache: bool,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            id: None,
            close_in: CloseMode::Last,
            close_out: CloseMode::Last,
            cache: true,
        }
    }
}

impl NodeOptions {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_close_in(mut self, mode: CloseMode) -> Self {
        self.close_in = mode;
        self
    }

    pub fn with_close_out(mut self, mode: CloseMode) -> Self {
        self.close_out = mode;
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Resolve the node id, falling back to a generated `prefix-N` name.
    pub(crate) fn node_id(&self, prefix: &str) -> NodeId {
        match &self.id {
            Some(name) => NodeId::named(name.as_str()),
            None => NodeId::next(prefix),
        }
    }
}
