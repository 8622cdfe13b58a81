//! Subscriber types for the dataflow graph.
//!
//! A child of a node is either a raw [`Handler`] (plain callbacks) or a
//! composable node that can itself be subscribed to. The two are kept apart
//! by the [`Child`] sum type so that dispatch knows up front which children
//! can fail and which can handle errors.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::{Fault, Result};

use super::id::NodeId;
use super::node::Node;
use super::options::{NodeOptions, State};

type NextFn<T> = Box<dyn Fn(T) -> std::result::Result<(), Fault> + Send + Sync>;
type DoneFn = Box<dyn Fn() -> std::result::Result<(), Fault> + Send + Sync>;
type ErrorFn = Box<dyn Fn(Fault) + Send + Sync>;

/// A raw consumer with optional callbacks.
///
/// Absent callbacks simply skip that notification. A failing `next` or
/// `done` callback is treated as the handler's own error: it goes to the
/// handler's error callback when there is one, otherwise it is escalated to
/// the node that was delivering.
///
/// ```
/// use rivulet_core::stream::{Handler, Node, NodeOptions};
///
/// let source = Node::new(NodeOptions::default());
/// source
///     .subscribe(Handler::each(|x: i32| println!("got {x}")), NodeOptions::default())
///     .unwrap();
/// source.next(1);
/// ```
pub struct Handler<T> {
    next: Option<NextFn<T>>,
    done: Option<DoneFn>,
    error: Option<ErrorFn>,
}

impl<T> Handler<T> {
    /// A handler with no callbacks.
    pub fn new() -> Self {
        Self {
            next: None,
            done: None,
            error: None,
        }
    }

    /// A handler with an infallible `next` callback only.
    pub fn each<F>(f: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::new().on_next(move |value| {
            f(value);
            Ok(())
        })
    }

    pub fn on_next<F>(mut self, f: F) -> Self
    where
        F: Fn(T) -> std::result::Result<(), Fault> + Send + Sync + 'static,
    {
        self.next = Some(Box::new(f));
        self
    }

    pub fn on_done<F>(mut self, f: F) -> Self
    where
        F: Fn() -> std::result::Result<(), Fault> + Send + Sync + 'static,
    {
        self.done = Some(Box::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(Fault) + Send + Sync + 'static,
    {
        self.error = Some(Box::new(f));
        self
    }

    /// Whether an error callback is present.
    pub fn handles_errors(&self) -> bool {
        self.error.is_some()
    }

    fn deliver_next(&self, value: T) -> std::result::Result<(), Fault> {
        match &self.next {
            Some(f) => f(value),
            None => Ok(()),
        }
    }

    fn deliver_done(&self) -> std::result::Result<(), Fault> {
        match &self.done {
            Some(f) => f(),
            None => Ok(()),
        }
    }

    fn deliver_error(&self, fault: Fault) {
        if let Some(f) = &self.error {
            f(fault);
        }
    }
}

impl<T> Default for Handler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("next", &self.next.is_some())
            .field("done", &self.done.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

/// A node that can receive values from a parent.
pub trait Downstream<T>: Send + Sync {
    fn id(&self) -> &NodeId;

    fn next(&self, value: T);

    fn done(&self);

    fn error(&self, fault: Fault);

    /// Link this node to a new parent. The link is non-owning and only used
    /// to ask the parent to drop this node.
    fn set_parent(&self, parent: Weak<dyn Upstream>);
}

/// The parent side of a link.
pub trait Upstream: Send + Sync {
    /// Remove the child with the given id. Returns `false` if it was not a
    /// child.
    fn unsubscribe_child(&self, child: &NodeId) -> bool;
}

/// Anything that can be torn down.
pub trait Subscription: Send + Sync {
    fn id(&self) -> &NodeId;

    fn state(&self) -> State;

    fn unsubscribe(&self) -> bool;
}

/// A handle that can be attached under a parent emitting `T`.
pub trait Composable<T> {
    fn downstream(&self) -> Arc<dyn Downstream<T>>;
}

/// A node other handlers can subscribe to.
pub trait Subscribable<T> {
    fn subscribe(&self, handler: Handler<T>, options: NodeOptions) -> Result<Node<T, T>>;
}

/// A child entry in a node.
pub(crate) enum Child<T> {
    Handler(Arc<Handler<T>>),
    Node(Arc<dyn Downstream<T>>),
}

impl<T> Clone for Child<T> {
    fn clone(&self) -> Self {
        match self {
            Child::Handler(h) => Child::Handler(Arc::clone(h)),
            Child::Node(n) => Child::Node(Arc::clone(n)),
        }
    }
}

impl<T> Child<T> {
    /// Nodes never fail on delivery; only raw handlers do.
    pub(crate) fn next(&self, value: T) -> std::result::Result<(), Fault> {
        match self {
            Child::Handler(h) => h.deliver_next(value),
            Child::Node(n) => {
                n.next(value);
                Ok(())
            }
        }
    }

    pub(crate) fn done(&self) -> std::result::Result<(), Fault> {
        match self {
            Child::Handler(h) => h.deliver_done(),
            Child::Node(n) => {
                n.done();
                Ok(())
            }
        }
    }

    pub(crate) fn handles_errors(&self) -> bool {
        match self {
            Child::Handler(h) => h.handles_errors(),
            Child::Node(_) => true,
        }
    }

    pub(crate) fn error(&self, fault: Fault) {
        match self {
            Child::Handler(h) => h.deliver_error(fault),
            Child::Node(n) => n.error(fault),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn absent_callbacks_are_skipped() {
        let child = Child::Handler(Arc::new(Handler::<i32>::new()));
        assert!(child.next(1).is_ok());
        assert!(child.done().is_ok());
        assert!(!child.handles_errors());
    }

    #[test]
    fn handler_callbacks_are_called() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_next = seen.clone();
        let seen_done = seen.clone();
        let seen_error = seen.clone();

        let handler = Handler::new()
            .on_next(move |x: i32| {
                seen_next.lock().push(format!("next {x}"));
                Ok(())
            })
            .on_done(move || {
                seen_done.lock().push("done".to_string());
                Ok(())
            })
            .on_error(move |e| seen_error.lock().push(format!("error {e}")));
        let child = Child::Handler(Arc::new(handler));

        child.next(7).unwrap();
        child.done().unwrap();
        assert!(child.handles_errors());
        child.error(Fault::msg("boom"));

        assert_eq!(*seen.lock(), vec!["next 7", "done", "error boom"]);
    }

    #[test]
    fn failing_next_returns_fault() {
        let handler = Handler::new().on_next(|x: i32| {
            if x < 0 {
                Err(Fault::msg("negative"))
            } else {
                Ok(())
            }
        });
        let child = Child::Handler(Arc::new(handler));
        assert!(child.next(1).is_ok());
        assert_eq!(child.next(-1).unwrap_err().to_string(), "negative");
    }

    #[test]
    fn debug_lists_present_callbacks() {
        let handler = Handler::each(|_: u8| {});
        assert_eq!(
            format!("{handler:?}"),
            "Handler { next: true, done: false, error: false }"
        );
    }
}
