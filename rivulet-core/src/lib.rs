//! Rivulet Core
//!
//! This crate provides a synchronous, push-based dataflow graph. It
//! implements:
//!
//! - Nodes with transform steps, value caching and fan-out
//! - Completion, error and teardown propagation with close policies
//! - Side-channel partitioning of values into batches
//!
//! # Architecture
//!
//! - `stream`: nodes, handlers, transform steps and the partitioner
//! - `error`: usage errors returned to callers and payload faults routed
//!   through the graph
//!
//! # Example
//!
//! ```rust
//! use rivulet_core::stream::{Filter, Handler, Map, Node, NodeOptions, TransformExt};
//!
//! // A root node accepting raw readings
//! let readings = Node::new(NodeOptions::default());
//!
//! // A derived node keeping the large ones, scaled
//! let alerts = readings
//!     .transform(
//!         Filter::new(|x: &u32| *x > 100).then(Map::new(|x: u32| x / 10)),
//!         NodeOptions::default(),
//!     )
//!     .unwrap();
//!
//! alerts
//!     .subscribe(Handler::each(|x: u32| println!("alert: {x}")), NodeOptions::default())
//!     .unwrap();
//!
//! readings.next(42);
//! readings.next(420); // prints "alert: 42"
//! readings.done();
//! ```

pub mod error;
pub mod stream;

pub use error::{Fault, GraphError, Result};
