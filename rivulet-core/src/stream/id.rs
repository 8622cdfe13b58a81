//! Node identifiers.
//!
//! Every node in the graph gets a process-unique sequence number when it is
//! created. The number is what identity, equality and hashing use; the
//! attached name is only for display and logging, so two nodes sharing a
//! caller-chosen name are still distinct.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide sequence counter. Starts at zero on first use.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_seq() -> u64 {
    NEXT_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// Unique identifier for a node.
#[derive(Clone)]
pub struct NodeId {
    seq: u64,
    name: Arc<str>,
}

impl NodeId {
    /// Allocate a new id named `"{prefix}-{seq}"`.
    pub fn next(prefix: &str) -> Self {
        let seq = next_seq();
        Self {
            seq,
            name: format!("{prefix}-{seq}").into(),
        }
    }

    /// Allocate a new id carrying a caller-chosen name.
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self {
            seq: next_seq(),
            name: name.into(),
        }
    }

    /// The unique sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The display name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for NodeId {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for NodeId {}

impl Hash for NodeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.seq.hash(state);
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}#{})", self.name, self.seq)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
