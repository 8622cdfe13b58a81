//! Side-channel partitioning.
//!
//! A [`Partitioner`] buffers every value it receives and emits the buffer as
//! one batch whenever a second, independent node (the side channel) emits a
//! value. Batch boundaries therefore follow the side channel's timing, not a
//! count or a clock.
//!
//! A typical use is coalescing a burst of input events into one batch per
//! frame tick:
//!
//! ```
//! use rivulet_core::stream::{Handler, Node, NodeOptions, Partitioner};
//!
//! let events = Node::new(NodeOptions::default());
//! let frames = Node::new(NodeOptions::default());
//! let batches = Partitioner::new(&frames, NodeOptions::default()).unwrap();
//! events.attach(batches.clone()).unwrap();
//! let check = Handler::each(|batch: Vec<&'static str>| assert_eq!(batch, ["down", "up"]));
//! batches.subscribe(check, NodeOptions::default()).unwrap();
//!
//! events.next("down");
//! events.next("up");
//! frames.next(());
//! ```

use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Fault, Result};

use super::id::NodeId;
use super::node::{Core, Node, Subscribe};
use super::options::{CloseMode, NodeOptions, State};
use super::subscriber::{
    Composable, Downstream, Handler, Subscribable, Subscription, Upstream,
};
use super::transform::Transform;

struct Shared<T> {
    /// Node machinery for the batched output.
    core: Core<T, Vec<T>>,
    /// Values received since the last flush.
    buffer: Mutex<Vec<T>>,
    /// Subscription to the side channel, dropped on teardown.
    side: Mutex<Option<Box<dyn Subscription>>>,
}

impl<T> Shared<T>
where
    T: Clone + Send + 'static,
{
    fn next(&self, value: T) {
        if self.core.state().is_terminal() {
            return;
        }
        self.buffer.lock().push(value);
    }

    /// Side channel fired.
    fn trigger<S>(&self, tick: &S, pred: &(dyn Fn(&S) -> bool + Send + Sync)) {
        if self.core.state().is_terminal() || self.buffer.lock().is_empty() {
            return;
        }
        if !pred(tick) {
            return;
        }
        self.flush();
    }

    /// Side channel completed.
    fn side_done(&self) {
        self.flush();
        self.done();
    }

    fn flush(&self) {
        let batch = mem::take(&mut *self.buffer.lock());
        if batch.is_empty() {
            return;
        }
        debug!(id = %self.core.id(), len = batch.len(), "flushing partition");
        self.core.dispatch(batch);
    }

    fn done(&self) {
        self.release_side();
        self.core.done();
    }

    fn release_side(&self) {
        let side = self.side.lock().take();
        if let Some(side) = side {
            debug!(id = %self.core.id(), side = %side.id(), "releasing side channel");
            side.unsubscribe();
        }
    }
}

impl<T> Downstream<T> for Shared<T>
where
    T: Clone + Send + 'static,
{
    fn id(&self) -> &NodeId {
        self.core.id()
    }

    fn next(&self, value: T) {
        Shared::next(self, value)
    }

    fn done(&self) {
        Shared::done(self)
    }

    fn error(&self, fault: Fault) {
        self.core.error(fault)
    }

    fn set_parent(&self, parent: Weak<dyn Upstream>) {
        self.core.set_parent(parent)
    }
}

impl<T> Upstream for Shared<T>
where
    T: Clone + Send + 'static,
{
    fn unsubscribe_child(&self, child: &NodeId) -> bool {
        let removed = self.core.unsubscribe_child(child);
        if self.core.child_count() == 0 || self.core.state().is_terminal() {
            self.release_side();
        }
        removed
    }
}

/// Buffers values of type `T` and emits them as `Vec<T>` batches timed by a
/// side channel.
///
/// - Each side value that passes the predicate flushes the buffer, unless
///   the buffer is empty. Empty batches are never emitted.
/// - When the side channel completes, a non-empty buffer is flushed once
///   and the partitioner completes.
/// - The side subscription is owned by the partitioner and torn down with
///   it.
pub struct Partitioner<T> {
    inner: Arc<Shared<T>>,
}

impl<T> Partitioner<T>
where
    T: Clone + Send + 'static,
{
    /// Flush on every side value.
    pub fn new<C, S>(side: &C, options: NodeOptions) -> Result<Self>
    where
        C: Subscribable<S>,
        S: Clone + Send + 'static,
    {
        Self::with_predicate(side, |_: &S| true, options)
    }

    /// Flush only on side values for which `pred` holds.
    pub fn with_predicate<C, S, P>(side: &C, pred: P, options: NodeOptions) -> Result<Self>
    where
        C: Subscribable<S>,
        S: Clone + Send + 'static,
        P: Fn(&S) -> bool + Send + Sync + 'static,
    {
        let id = options.node_id("sidepart");
        let inner = Arc::new(Shared {
            core: Core::new(id, &options, None, None),
            buffer: Mutex::new(Vec::new()),
            side: Mutex::new(None),
        });

        let on_next = Arc::downgrade(&inner);
        let on_done = Arc::downgrade(&inner);
        let handler = Handler::new()
            .on_next(move |tick: S| {
                if let Some(inner) = on_next.upgrade() {
                    inner.trigger(&tick, &pred);
                }
                Ok(())
            })
            .on_done(move || {
                if let Some(inner) = on_done.upgrade() {
                    inner.side_done();
                }
                Ok(())
            });
        let side_options = NodeOptions::default().with_id(format!("{}-side", inner.core.id()));
        let subscription = side.subscribe(handler, side_options)?;
        *inner.side.lock() = Some(Box::new(subscription));

        let on_release = Arc::downgrade(&inner);
        inner.core.on_release(Box::new(move || {
            if let Some(inner) = on_release.upgrade() {
                inner.release_side();
            }
        }));

        Ok(Self { inner })
    }

    fn me(&self) -> Weak<dyn Upstream> {
        let me: Weak<Shared<T>> = Arc::downgrade(&self.inner);
        me
    }

    pub fn id(&self) -> &NodeId {
        self.inner.core.id()
    }

    pub fn state(&self) -> State {
        self.inner.core.state()
    }

    /// The last emitted batch, if caching is enabled.
    #[allow(clippy::should_implement_trait)]
    pub fn deref(&self) -> Option<Vec<T>> {
        self.inner.core.last()
    }

    /// Number of values waiting for the next side trigger.
    pub fn buffered(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    pub fn child_count(&self) -> usize {
        self.inner.core.child_count()
    }

    pub fn close_in(&self) -> CloseMode {
        self.inner.core.close_in()
    }

    pub fn close_out(&self) -> CloseMode {
        self.inner.core.close_out()
    }

    /// Whether the side subscription is still held.
    pub fn has_side(&self) -> bool {
        self.inner.side.lock().is_some()
    }

    pub fn subscribe(&self, handler: Handler<Vec<T>>, options: NodeOptions) -> Result<Node<Vec<T>, Vec<T>>> {
        self.inner
            .core
            .subscribe_with(self.me(), Subscribe::handler(handler).with_options(options))
    }

    pub fn transform<X, St>(&self, step: St, options: NodeOptions) -> Result<Node<Vec<T>, X>>
    where
        X: Clone + Send + 'static,
        St: Transform<Vec<T>, X> + 'static,
    {
        self.inner
            .core
            .subscribe_with(self.me(), Subscribe::transform(step).with_options(options))
    }

    pub fn subscribe_with<X>(&self, request: Subscribe<Vec<T>, X>) -> Result<Node<Vec<T>, X>>
    where
        X: Clone + Send + 'static,
    {
        self.inner.core.subscribe_with(self.me(), request)
    }

    pub fn attach<C>(&self, child: C) -> Result<C>
    where
        C: Composable<Vec<T>>,
    {
        self.inner.core.attach(self.me(), child.downstream())?;
        Ok(child)
    }

    /// Buffer a value. Nothing is emitted until the side channel fires.
    pub fn next(&self, value: T) {
        self.inner.next(value)
    }

    /// Release the side channel and complete. Buffered values are dropped.
    pub fn done(&self) {
        self.inner.done()
    }

    pub fn error(&self, fault: Fault) {
        self.inner.core.error(fault)
    }

    pub fn unsubscribe(&self) -> bool {
        self.inner.core.unsubscribe()
    }

    pub fn unsubscribe_child(&self, child: &NodeId) -> bool {
        Upstream::unsubscribe_child(&*self.inner, child)
    }
}

impl<T> Clone for Partitioner<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Partitioner<T>
where
    T: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partitioner")
            .field("id", self.id())
            .field("state", &self.state())
            .field("buffered", &self.buffered())
            .field("children", &self.child_count())
            .finish()
    }
}

impl<T> Composable<T> for Partitioner<T>
where
    T: Clone + Send + 'static,
{
    fn downstream(&self) -> Arc<dyn Downstream<T>> {
        self.inner.clone()
    }
}

impl<T> Subscribable<Vec<T>> for Partitioner<T>
where
    T: Clone + Send + 'static,
{
    fn subscribe(&self, handler: Handler<Vec<T>>, options: NodeOptions) -> Result<Node<Vec<T>, Vec<T>>> {
        Partitioner::subscribe(self, handler, options)
    }
}

impl<T> Subscription for Partitioner<T>
where
    T: Clone + Send + 'static,
{
    fn id(&self) -> &NodeId {
        self.inner.core.id()
    }

    fn state(&self) -> State {
        self.inner.core.state()
    }

    fn unsubscribe(&self) -> bool {
        self.inner.core.unsubscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;

    fn opts() -> NodeOptions {
        NodeOptions::default()
    }

    fn collect<T: Send + 'static>() -> (Handler<T>, Arc<Mutex<Vec<T>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        (Handler::each(move |x| seen_clone.lock().push(x)), seen)
    }

    #[test]
    fn side_trigger_flushes_buffer() {
        let side = Node::new(opts());
        let part = Partitioner::new(&side, opts()).unwrap();
        let (handler, seen) = collect();
        part.subscribe(handler, opts()).unwrap();

        part.next('a');
        part.next('b');
        assert_eq!(part.buffered(), 2);
        assert!(seen.lock().is_empty());

        side.next(0u8);

        assert_eq!(*seen.lock(), vec![vec!['a', 'b']]);
        assert_eq!(part.buffered(), 0);
    }

    #[test]
    fn empty_buffer_emits_nothing() {
        let side = Node::new(opts());
        let part = Partitioner::<i32>::new(&side, opts()).unwrap();
        let (handler, seen) = collect();
        part.subscribe(handler, opts()).unwrap();

        side.next(());
        side.next(());

        assert!(seen.lock().is_empty());
    }

    #[test]
    fn predicate_sees_raw_side_values() {
        let side = Node::new(opts());
        let part = Partitioner::with_predicate(&side, |tick: &u32| tick % 2 == 0, opts()).unwrap();
        let (handler, seen) = collect();
        part.subscribe(handler, opts()).unwrap();

        part.next(1);
        side.next(1);
        assert!(seen.lock().is_empty());

        part.next(2);
        side.next(2);
        assert_eq!(*seen.lock(), vec![vec![1, 2]]);
    }

    #[test]
    fn side_completion_flushes_then_completes() {
        let side: Node<(), ()> = Node::new(opts());
        let part = Partitioner::new(&side, opts()).unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let on_next = events.clone();
        let on_done = events.clone();
        part.subscribe(
            Handler::new()
                .on_next(move |batch: Vec<&'static str>| {
                    on_next.lock().push(batch.join(","));
                    Ok(())
                })
                .on_done(move || {
                    on_done.lock().push("done".to_string());
                    Ok(())
                }),
            opts(),
        )
        .unwrap();

        part.next("c");
        side.done();

        assert_eq!(*events.lock(), vec!["c", "done"]);
        assert_eq!(part.state(), State::Done);
        assert!(!part.has_side());
    }

    #[test]
    fn side_completion_with_empty_buffer_only_completes() {
        let side: Node<(), ()> = Node::new(opts());
        let part = Partitioner::<i32>::new(&side, opts()).unwrap();
        let (handler, seen) = collect();
        part.subscribe(handler, opts()).unwrap();

        side.done();

        assert!(seen.lock().is_empty());
        assert_eq!(part.state(), State::Done);
    }

    #[test]
    fn next_after_done_is_ignored() {
        let side: Node<(), ()> = Node::new(opts());
        let part = Partitioner::new(&side, opts()).unwrap();
        part.subscribe(Handler::new(), opts()).unwrap();

        part.done();
        part.next(1);

        assert_eq!(part.buffered(), 0);
        assert_eq!(part.state(), State::Done);
    }

    #[test]
    fn unsubscribe_releases_side_channel() {
        let side: Node<(), ()> = Node::new(opts().with_close_out(CloseMode::Never));
        let part = Partitioner::<i32>::new(&side, opts()).unwrap();
        assert_eq!(side.child_count(), 1);
        assert!(part.has_side());

        assert!(part.unsubscribe());

        assert!(!part.has_side());
        assert_eq!(side.child_count(), 0);
        assert_eq!(side.state(), State::Active);
    }

    #[test]
    fn last_child_leaving_releases_side_channel() {
        let side: Node<(), ()> = Node::new(opts());
        let part = Partitioner::<i32>::new(&side, opts().with_close_out(CloseMode::Never)).unwrap();
        let child = part.subscribe(Handler::new(), opts()).unwrap();

        assert!(part.unsubscribe_child(child.id()));

        assert!(!part.has_side());
        assert_eq!(part.state(), State::Active);
    }

    #[test]
    fn child_unsubscribing_itself_releases_side_channel() {
        let side: Node<(), ()> = Node::new(opts().with_close_out(CloseMode::Never));
        let part = Partitioner::<i32>::new(&side, opts()).unwrap();
        let child = part.subscribe(Handler::new(), opts()).unwrap();

        child.unsubscribe();

        assert_eq!(part.state(), State::Done);
        assert!(!part.has_side());
        assert_eq!(side.child_count(), 0);
    }

    #[test]
    fn finished_side_channel_is_rejected() {
        let side: Node<(), ()> = Node::new(opts());
        side.done();

        let err = Partitioner::<i32>::new(&side, opts()).unwrap_err();
        assert!(matches!(err, GraphError::IllegalState { .. }));
    }

    #[test]
    fn partitioner_can_time_another_partitioner() {
        let ticks = Node::new(opts());
        let first = Partitioner::new(&ticks, opts()).unwrap();
        let second = Partitioner::new(&first, opts()).unwrap();
        let (handler, seen) = collect();
        second.subscribe(handler, opts()).unwrap();

        second.next('a');
        first.next(1u8);
        ticks.next(());

        assert_eq!(*seen.lock(), vec![vec!['a']]);
        assert_eq!(first.deref(), Some(vec![1]));
    }

    #[test]
    fn ids_use_sidepart_prefix() {
        let side: Node<(), ()> = Node::new(opts());
        let part = Partitioner::<i32>::new(&side, opts()).unwrap();
        assert!(part.id().name().starts_with("sidepart-"));
    }

    #[test]
    fn partitioner_can_feed_on_another_partitioner() {
        let ticks = Node::new(opts());
        let first = Partitioner::new(&ticks, opts()).unwrap();
        let second = Partitioner::with_predicate(&first, |batch: &Vec<u8>| batch.len() > 1, opts())
            .unwrap();
        let (handler, seen) = collect();
        second.subscribe(handler, opts()).unwrap();

        second.next("x");
        first.next(1u8);
        ticks.next(());
        assert!(seen.lock().is_empty());

        first.next(2u8);
        first.next(3u8);
        ticks.next(());
        assert_eq!(*seen.lock(), vec![vec!["x"]]);
    }
}
