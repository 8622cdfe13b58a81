//! Node Implementation
//!
//! A Node is the vertex of the dataflow graph. It accepts values from a
//! parent (or an external producer), runs them through its transform step
//! and fans the outputs out to its children.
//!
//! # How Nodes Work
//!
//! 1. A node is created Idle. The first subscription makes it Active.
//!
//! 2. `next` feeds the step; each emitted output is cached (when caching is
//!    enabled) and dispatched. One child is called directly; several children
//!    are called most-recently-subscribed first.
//!
//! 3. `done` flushes the step, notifies every child once and tears the node
//!    down. `error` goes to every child able to handle it; an error nobody
//!    handles is logged and the node detaches from its parent.
//!
//! 4. Removing a child applies the node's `close_out` policy, which may
//!    detach the node from its own parent in turn. Teardown cascades upward
//!    this way until it reaches a node with other children or a root.
//!
//! # Locking
//!
//! Node state sits behind `parking_lot` mutexes. No lock is held while a
//! child, parent, handler or step callback runs, so handlers may call back
//! into the graph (`next`, `subscribe`, `unsubscribe`) as ordinary nested
//! calls.
//!
//! A step cannot be entered twice at once. A value pushed into a node from
//! inside its own running step, directly or around a cycle, is queued and
//! fed to the step once the current call returns.

use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::error::{Fault, GraphError, Result};

use super::id::NodeId;
use super::options::{CloseMode, NodeOptions, State};
use super::subscriber::{
    Child, Composable, Downstream, Handler, Subscribable, Subscription, Upstream,
};
use super::transform::{Emit, Flow, Identity, Transform};

/// Snapshot of a node's children taken before calling out.
type Children<T> = SmallVec<[Child<T>; 4]>;

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// A request for a new child subscription.
///
/// A request carries a raw handler, a transform step, or both. A request
/// with neither is rejected with [`GraphError::IllegalArity`].
pub struct Subscribe<A, B> {
    /// Raw consumer wrapped by the child.
    handler: Option<Handler<B>>,
    /// Step installed on the child. Requests built without one can only
    /// exist for `A = B` and carry [`Identity`], since a passthrough for
    /// arbitrary `A` and `B` cannot be built later.
    step: Box<dyn Transform<A, B>>,
    /// Whether the caller asked for a step. Picks the id prefix and the
    /// arity check.
    has_step: bool,
    /// Child configuration.
    options: NodeOptions,
}

impl<T: 'static> Subscribe<T, T> {
    /// An empty request.
    pub fn new() -> Self {
        Self {
            handler: None,
            step: Box::new(Identity),
            has_step: false,
            options: NodeOptions::default(),
        }
    }

    /// A request for a plain handler without a step.
    pub fn handler(handler: Handler<T>) -> Self {
        Self::new().with_handler(handler)
    }
}

impl<T: 'static> Default for Subscribe<T, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, B> Subscribe<A, B> {
    /// A request for a child running `step`.
    pub fn transform<S>(step: S) -> Self
    where
        S: Transform<A, B> + 'static,
    {
        Self {
            handler: None,
            step: Box::new(step),
            has_step: true,
            options: NodeOptions::default(),
        }
    }

    pub fn with_handler(mut self, handler: Handler<B>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }
}

/// Mutable link state of a node.
struct Links<O> {
    /// Lifecycle state. Only ever moves forward.
    state: State,
    /// Non-owning link used to ask the parent to drop this node.
    parent: Option<Weak<dyn Upstream>>,
    /// Children in subscription order.
    children: IndexMap<NodeId, Child<O>>,
    /// Last dispatched value, kept only when caching is enabled.
    last: Option<O>,
}

impl<O> Links<O> {
    fn snapshot(&self) -> Children<O> {
        self.children.values().cloned().collect()
    }
}

/// Shared node machinery, also used by the partitioner.
pub(crate) struct Core<I, O> {
    /// Unique identifier for this node.
    id: NodeId,
    /// Input close policy, exposed for multi-input nodes.
    close_in: CloseMode,
    /// Policy applied when a child is removed.
    close_out: CloseMode,
    /// Whether dispatched values are cached for replay.
    cache: bool,
    /// State, parent, children and cached value.
    links: Mutex<Links<O>>,
    /// Transform step. Taken out of the slot while it runs, and for good on
    /// release.
    step: Mutex<Option<Box<dyn Transform<I, O>>>>,
    /// Inputs pushed into this node by its own running step.
    backlog: Mutex<VecDeque<I>>,
    /// Teardown hook run once on release.
    on_release: Mutex<Option<ReleaseHook>>,
}

impl<I, O> Core<I, O>
where
    I: Send + 'static,
    O: Clone + Send + 'static,
{
    pub(crate) fn new(
        id: NodeId,
        options: &NodeOptions,
        step: Option<Box<dyn Transform<I, O>>>,
        handler: Option<Handler<O>>,
    ) -> Self {
        let mut children = IndexMap::new();
        if let Some(handler) = handler {
            children.insert(NodeId::next("handler"), Child::Handler(Arc::new(handler)));
        }
        Self {
            id,
            close_in: options.close_in,
            close_out: options.close_out,
            cache: options.cache,
            links: Mutex::new(Links {
                state: State::Idle,
                parent: None,
                children,
                last: None,
            }),
            step: Mutex::new(step),
            backlog: Mutex::new(VecDeque::new()),
            on_release: Mutex::new(None),
        }
    }

    pub(crate) fn id(&self) -> &NodeId {
        &self.id
    }

    pub(crate) fn state(&self) -> State {
        self.links.lock().state
    }

    pub(crate) fn last(&self) -> Option<O> {
        self.links.lock().last.clone()
    }

    pub(crate) fn child_count(&self) -> usize {
        self.links.lock().children.len()
    }

    pub(crate) fn close_in(&self) -> CloseMode {
        self.close_in
    }

    pub(crate) fn close_out(&self) -> CloseMode {
        self.close_out
    }

    /// Run `hook` once when the node releases its resources.
    pub(crate) fn on_release(&self, hook: ReleaseHook) {
        *self.on_release.lock() = Some(hook);
    }

    fn illegal_state(&self, state: State) -> GraphError {
        GraphError::IllegalState {
            id: self.id.clone(),
            state,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        let state = self.state();
        if state.is_terminal() {
            return Err(self.illegal_state(state));
        }
        Ok(())
    }

    pub(crate) fn subscribe_with<X>(
        &self,
        me: Weak<dyn Upstream>,
        request: Subscribe<O, X>,
    ) -> Result<Node<O, X>>
    where
        X: Clone + Send + 'static,
    {
        self.ensure_open()?;
        let Subscribe {
            handler,
            step,
            has_step,
            options,
        } = request;
        let prefix = match (has_step, handler.is_some()) {
            (false, false) => {
                return Err(GraphError::IllegalArity(
                    "a subscription needs a handler or a transform step",
                ))
            }
            (true, false) => "xform",
            _ => "sub",
        };
        let child = Node::from_parts(options.node_id(prefix), &options, step, handler);
        self.attach(me, child.downstream())?;
        Ok(child)
    }

    /// Add `child` and replay the cached value into it.
    pub(crate) fn attach(&self, me: Weak<dyn Upstream>, child: Arc<dyn Downstream<O>>) -> Result<()> {
        let replay = {
            let mut links = self.links.lock();
            if links.state.is_terminal() {
                return Err(self.illegal_state(links.state));
            }
            links
                .children
                .insert(child.id().clone(), Child::Node(Arc::clone(&child)));
            links.state = State::Active;
            links.last.clone()
        };
        debug!(id = %self.id, child = %child.id(), "subscribed");
        child.set_parent(me);
        if let Some(last) = replay {
            child.next(last);
        }
        Ok(())
    }

    pub(crate) fn set_parent(&self, parent: Weak<dyn Upstream>) {
        self.links.lock().parent = Some(parent);
    }

    pub(crate) fn next(&self, value: I) {
        if self.state().is_terminal() {
            return;
        }
        let taken = self.step.lock().take();
        let Some(mut step) = taken else {
            // The step is running further up this call stack.
            self.backlog.lock().push_back(value);
            return;
        };
        let mut out = Emit::new();
        let flow = step.step(value, &mut out);
        self.restore(step);
        for output in out {
            self.dispatch(output);
        }
        if flow == Flow::Stop {
            self.done();
            return;
        }
        loop {
            let queued = self.backlog.lock().pop_front();
            match queued {
                Some(value) => self.next(value),
                None => break,
            }
        }
    }

    /// Put the step back unless the node was torn down while it ran.
    fn restore(&self, step: Box<dyn Transform<I, O>>) {
        let links = self.links.lock();
        if !links.state.is_terminal() {
            *self.step.lock() = Some(step);
        }
    }

    pub(crate) fn dispatch(&self, value: O) {
        let children = {
            let mut links = self.links.lock();
            if self.cache && !links.state.is_terminal() {
                links.last = Some(value.clone());
            }
            links.snapshot()
        };
        match children.as_slice() {
            [] => {}
            [only] => self.deliver(only, value),
            many => {
                for child in many.iter().rev() {
                    self.deliver(child, value.clone());
                }
            }
        }
    }

    fn deliver(&self, child: &Child<O>, value: O) {
        if let Err(fault) = child.next(value) {
            self.route(child, fault);
        }
    }

    /// A child failed: let it handle its own fault, or escalate.
    fn route(&self, child: &Child<O>, fault: Fault) {
        if child.handles_errors() {
            child.error(fault);
        } else {
            self.error(fault);
        }
    }

    pub(crate) fn done(&self) {
        if self.state().is_terminal() {
            return;
        }
        debug!(id = %self.id, "entering done");
        let mut out = Emit::new();
        let step = self.step.lock().take();
        if let Some(mut step) = step {
            step.flush(&mut out);
        }
        for output in out {
            self.dispatch(output);
        }
        let children = {
            let mut links = self.links.lock();
            if links.state.is_terminal() {
                return;
            }
            links.state = State::Done;
            links.snapshot()
        };
        for child in &children {
            if let Err(fault) = child.done() {
                self.route(child, fault);
            }
        }
        self.unsubscribe();
        debug!(id = %self.id, "exiting done");
    }

    pub(crate) fn error(&self, fault: Fault) {
        let (children, has_parent) = {
            let mut links = self.links.lock();
            if !links.state.is_terminal() {
                links.state = State::Error;
            }
            (links.snapshot(), links.parent.is_some())
        };
        let mut handled = false;
        for child in &children {
            if child.handles_errors() {
                child.error(fault.clone());
                handled = true;
            }
        }
        if !handled {
            warn!(id = %self.id, error = %fault, "unhandled error");
            if has_parent {
                debug!(id = %self.id, "detaching after unhandled error");
                self.unsubscribe();
            }
        }
    }

    pub(crate) fn unsubscribe(&self) -> bool {
        debug!(id = %self.id, "unsubscribe self");
        let parent = self.links.lock().parent.take();
        let detached = match parent.and_then(|p| p.upgrade()) {
            Some(parent) => parent.unsubscribe_child(&self.id),
            None => true,
        };
        self.release();
        detached
    }

    pub(crate) fn unsubscribe_child(&self, child: &NodeId) -> bool {
        debug!(id = %self.id, child = %child, "unsubscribe child");
        let (removed, close) = {
            let mut links = self.links.lock();
            let Some(removed) = links.children.shift_remove(child) else {
                return false;
            };
            let close = match self.close_out {
                CloseMode::First => true,
                CloseMode::Last => links.children.is_empty(),
                CloseMode::Never => false,
            };
            (removed, close)
        };
        drop(removed);
        if close {
            self.unsubscribe();
        }
        true
    }

    fn release(&self) {
        let released = {
            let mut links = self.links.lock();
            if links.state != State::Error {
                links.state = State::Done;
            }
            links.parent = None;
            (mem::take(&mut links.children), links.last.take())
        };
        let step = self.step.lock().take();
        let backlog = mem::take(&mut *self.backlog.lock());
        let hook = self.on_release.lock().take();
        drop((released, step, backlog));
        if let Some(hook) = hook {
            hook();
        }
        debug!(id = %self.id, "released");
    }
}

impl<I, O> Downstream<I> for Core<I, O>
where
    I: Send + 'static,
    O: Clone + Send + 'static,
{
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn next(&self, value: I) {
        Core::next(self, value)
    }

    fn done(&self) {
        Core::done(self)
    }

    fn error(&self, fault: Fault) {
        Core::error(self, fault)
    }

    fn set_parent(&self, parent: Weak<dyn Upstream>) {
        Core::set_parent(self, parent)
    }
}

impl<I, O> Upstream for Core<I, O>
where
    I: Send + 'static,
    O: Clone + Send + 'static,
{
    fn unsubscribe_child(&self, child: &NodeId) -> bool {
        Core::unsubscribe_child(self, child)
    }
}

/// A dataflow node taking `I` and emitting `O`.
///
/// `Node` is a cheap handle; clones refer to the same node.
///
/// ```
/// use rivulet_core::stream::{Handler, Map, Node, NodeOptions};
///
/// let source = Node::new(NodeOptions::default());
/// let doubled = source.transform(Map::new(|x: i32| x * 2), NodeOptions::default()).unwrap();
/// doubled.subscribe(Handler::each(|x: i32| assert_eq!(x, 42)), NodeOptions::default()).unwrap();
///
/// source.next(21);
/// assert_eq!(doubled.deref(), Some(42));
/// ```
pub struct Node<I, O> {
    inner: Arc<Core<I, O>>,
}

impl<T> Node<T, T>
where
    T: Clone + Send + 'static,
{
    /// A root node passing values through unchanged.
    pub fn new(options: NodeOptions) -> Self {
        Self::from_parts(options.node_id("stream"), &options, Box::new(Identity), None)
    }
}

impl<I, O> Node<I, O>
where
    I: Send + 'static,
    O: Clone + Send + 'static,
{
    /// A root node running `step` on every value.
    pub fn with_transform<S>(step: S, options: NodeOptions) -> Self
    where
        S: Transform<I, O> + 'static,
    {
        Self::from_parts(options.node_id("stream"), &options, Box::new(step), None)
    }

    pub(crate) fn from_parts(
        id: NodeId,
        options: &NodeOptions,
        step: Box<dyn Transform<I, O>>,
        handler: Option<Handler<O>>,
    ) -> Self {
        Self {
            inner: Arc::new(Core::new(id, options, Some(step), handler)),
        }
    }

    fn me(&self) -> Weak<dyn Upstream> {
        let me: Weak<Core<I, O>> = Arc::downgrade(&self.inner);
        me
    }

    pub fn id(&self) -> &NodeId {
        self.inner.id()
    }

    pub fn state(&self) -> State {
        self.inner.state()
    }

    /// The last dispatched value, if caching is enabled and one was seen.
    #[allow(clippy::should_implement_trait)]
    pub fn deref(&self) -> Option<O> {
        self.inner.last()
    }

    pub fn child_count(&self) -> usize {
        self.inner.child_count()
    }

    pub fn close_in(&self) -> CloseMode {
        self.inner.close_in()
    }

    pub fn close_out(&self) -> CloseMode {
        self.inner.close_out()
    }

    /// Wrap `handler` in a new child node.
    pub fn subscribe(&self, handler: Handler<O>, options: NodeOptions) -> Result<Node<O, O>> {
        self.inner
            .subscribe_with(self.me(), Subscribe::handler(handler).with_options(options))
    }

    /// Create a child node running `step`.
    pub fn transform<X, S>(&self, step: S, options: NodeOptions) -> Result<Node<O, X>>
    where
        X: Clone + Send + 'static,
        S: Transform<O, X> + 'static,
    {
        self.inner
            .subscribe_with(self.me(), Subscribe::transform(step).with_options(options))
    }

    pub fn subscribe_with<X>(&self, request: Subscribe<O, X>) -> Result<Node<O, X>>
    where
        X: Clone + Send + 'static,
    {
        self.inner.subscribe_with(self.me(), request)
    }

    /// Reparent an existing node under this one.
    pub fn attach<C>(&self, child: C) -> Result<C>
    where
        C: Composable<O>,
    {
        self.inner.attach(self.me(), child.downstream())?;
        Ok(child)
    }

    /// Subscribe each handler with default options.
    pub fn subscribe_all<H>(&self, handlers: H) -> Result<Vec<Node<O, O>>>
    where
        H: IntoIterator<Item = Handler<O>>,
    {
        handlers
            .into_iter()
            .map(|handler| self.subscribe(handler, NodeOptions::default()))
            .collect()
    }

    /// Detach from the parent and release everything.
    ///
    /// Returns the parent's answer, or `true` for a root.
    pub fn unsubscribe(&self) -> bool {
        self.inner.unsubscribe()
    }

    /// Remove one child, then apply the `close_out` policy.
    pub fn unsubscribe_child(&self, child: &NodeId) -> bool {
        self.inner.unsubscribe_child(child)
    }

    pub fn next(&self, value: I) {
        self.inner.next(value)
    }

    pub fn done(&self) {
        self.inner.done()
    }

    pub fn error(&self, fault: Fault) {
        self.inner.error(fault)
    }
}

impl<I, O> Clone for Node<I, O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, O> fmt::Debug for Node<I, O>
where
    I: Send + 'static,
    O: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", self.id())
            .field("state", &self.state())
            .field("children", &self.child_count())
            .finish()
    }
}

impl<I, O> Composable<I> for Node<I, O>
where
    I: Send + 'static,
    O: Clone + Send + 'static,
{
    fn downstream(&self) -> Arc<dyn Downstream<I>> {
        self.inner.clone()
    }
}

impl<I, O> Subscribable<O> for Node<I, O>
where
    I: Send + 'static,
    O: Clone + Send + 'static,
{
    fn subscribe(&self, handler: Handler<O>, options: NodeOptions) -> Result<Node<O, O>> {
        self.inner
            .subscribe_with(self.me(), Subscribe::handler(handler).with_options(options))
    }
}

impl<I, O> Subscription for Node<I, O>
where
    I: Send + 'static,
    O: Clone + Send + 'static,
{
    fn id(&self) -> &NodeId {
        self.inner.id()
    }

    fn state(&self) -> State {
        self.inner.state()
    }

    fn unsubscribe(&self) -> bool {
        self.inner.unsubscribe()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
