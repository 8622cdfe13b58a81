//! Dataflow Streams
//!
//! This module implements a push-based subscription graph: values enter at a
//! root node and are pushed synchronously through transform steps to every
//! subscribed handler.
//!
//! # Concepts
//!
//! ## Nodes
//!
//! A [`Node`] receives values from its parent, runs them through its
//! [`Transform`] step and fans the results out to its children. A node moves
//! from Idle to Active on its first subscription and ends in Done or Error.
//! It can cache the last value it dispatched and replays that value to late
//! subscribers.
//!
//! ## Handlers
//!
//! A [`Handler`] is a bundle of optional callbacks for values, completion
//! and errors. Subscribing a handler wraps it in its own child node, so the
//! returned node is the handle used to unsubscribe.
//!
//! ## Teardown
//!
//! Unsubscribing removes a node from its parent. The parent then applies its
//! [`CloseMode`] and may remove itself from its own parent. Completion flows
//! the other way: `done` reaches every child once and then detaches the
//! completed node.
//!
//! ## Partitioning
//!
//! A [`Partitioner`] buffers values and releases them as one batch whenever
//! an independent side node emits.
//!
//! # Implementation Notes
//!
//! All delivery is synchronous and depth-first on the caller's thread. Node
//! state is guarded by mutexes that are never held across a callback, so
//! handlers may re-enter the graph.

mod id;
mod node;
mod options;
mod partition;
mod subscriber;
mod transform;

pub use id::NodeId;
pub use node::{Node, Subscribe};
pub use options::{CloseMode, NodeOptions, State};
pub use partition::Partitioner;
pub use subscriber::{Composable, Downstream, Handler, Subscribable, Subscription, Upstream};
pub use transform::{Chunk, Emit, Filter, Flow, Identity, Map, Take, Then, Transform, TransformExt};
