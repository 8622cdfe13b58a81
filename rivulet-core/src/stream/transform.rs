//! Transform steps.
//!
//! A transform step is a stateful incremental function bound to a node when
//! the node is created. For every input it may emit zero or more outputs and
//! may ask the node to complete early. When the node completes, the step is
//! flushed once so it can emit anything it was holding back.
//!
//! Steps compose left to right with [`TransformExt::then`]:
//!
//! ```
//! use rivulet_core::stream::{Filter, Map, Take, TransformExt};
//!
//! let step = Map::new(|x: i32| x * 10)
//!     .then(Filter::new(|x: &i32| *x > 10))
//!     .then(Take::new(3));
//! # let _ = step;
//! ```

use std::marker::PhantomData;

use smallvec::SmallVec;

/// Output buffer filled by a step. Most steps emit at most one value.
pub type Emit<B> = SmallVec<[B; 4]>;

/// Whether a node should keep accepting input after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Complete the node once the emitted outputs were dispatched.
    Stop,
}

/// A stateful step mapping inputs of type `A` to outputs of type `B`.
pub trait Transform<A, B>: Send {
    /// Accept one input, pushing outputs in emission order.
    fn step(&mut self, input: A, out: &mut Emit<B>) -> Flow;

    /// Emit trailing outputs on completion.
    fn flush(&mut self, _out: &mut Emit<B>) {}
}

impl<A, B> Transform<A, B> for Box<dyn Transform<A, B>> {
    fn step(&mut self, input: A, out: &mut Emit<B>) -> Flow {
        (**self).step(input, out)
    }

    fn flush(&mut self, out: &mut Emit<B>) {
        (**self).flush(out)
    }
}

/// Composition helpers available on every step.
pub trait TransformExt<A, B>: Transform<A, B> + Sized {
    /// Feed this step's outputs into `next`.
    fn then<C, Y>(self, next: Y) -> Then<Self, Y, B>
    where
        Y: Transform<B, C>,
    {
        Then {
            first: self,
            second: next,
            stopped: false,
            _mid: PhantomData,
        }
    }

    /// Erase the concrete step type.
    fn boxed(self) -> Box<dyn Transform<A, B>>
    where
        Self: 'static,
    {
        Box::new(self)
    }
}

impl<A, B, T> TransformExt<A, B> for T where T: Transform<A, B> {}

/// Passes every value through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl<T> Transform<T, T> for Identity {
    #[inline]
    fn step(&mut self, input: T, out: &mut Emit<T>) -> Flow {
        out.push(input);
        Flow::Continue
    }
}

/// Applies a function to every value.
pub struct Map<F> {
    f: F,
}

impl<F> Map<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<A, B, F> Transform<A, B> for Map<F>
where
    F: FnMut(A) -> B + Send,
{
    fn step(&mut self, input: A, out: &mut Emit<B>) -> Flow {
        out.push((self.f)(input));
        Flow::Continue
    }
}

/// Drops values failing a predicate.
pub struct Filter<P> {
    pred: P,
}

impl<P> Filter<P> {
    pub fn new(pred: P) -> Self {
        Self { pred }
    }
}

impl<T, P> Transform<T, T> for Filter<P>
where
    P: FnMut(&T) -> bool + Send,
{
    fn step(&mut self, input: T, out: &mut Emit<T>) -> Flow {
        if (self.pred)(&input) {
            out.push(input);
        }
        Flow::Continue
    }
}

/// Passes the first `n` values, then stops.
#[derive(Debug, Clone)]
pub struct Take {
    remaining: usize,
}

impl Take {
    pub fn new(n: usize) -> Self {
        Self { remaining: n }
    }
}

impl<T> Transform<T, T> for Take {
    fn step(&mut self, input: T, out: &mut Emit<T>) -> Flow {
        if self.remaining == 0 {
            return Flow::Stop;
        }
        out.push(input);
        self.remaining -= 1;
        if self.remaining == 0 {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }
}

/// Groups values into vectors of a fixed size. A partial trailing group is
/// emitted on flush.
#[derive(Debug, Clone)]
pub struct Chunk<T> {
    size: usize,
    buf: Vec<T>,
}

impl<T> Chunk<T> {
    /// `size` is clamped to at least one.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            buf: Vec::with_capacity(size),
        }
    }
}

impl<T: Send> Transform<T, Vec<T>> for Chunk<T> {
    fn step(&mut self, input: T, out: &mut Emit<Vec<T>>) -> Flow {
        self.buf.push(input);
        if self.buf.len() == self.size {
            out.push(std::mem::replace(&mut self.buf, Vec::with_capacity(self.size)));
        }
        Flow::Continue
    }

    fn flush(&mut self, out: &mut Emit<Vec<T>>) {
        if !self.buf.is_empty() {
            out.push(std::mem::take(&mut self.buf));
        }
    }
}

/// Two steps run back to back. Built by [`TransformExt::then`].
pub struct Then<X, Y, M> {
    first: X,
    second: Y,
    stopped: bool,
    _mid: PhantomData<fn() -> M>,
}

impl<A, M, B, X, Y> Transform<A, B> for Then<X, Y, M>
where
    X: Transform<A, M>,
    Y: Transform<M, B>,
{
    fn step(&mut self, input: A, out: &mut Emit<B>) -> Flow {
        if self.stopped {
            return Flow::Stop;
        }
        let mut mid = Emit::new();
        let flow = self.first.step(input, &mut mid);
        if self.feed(mid, out) == Flow::Stop {
            return Flow::Stop;
        }
        flow
    }

    fn flush(&mut self, out: &mut Emit<B>) {
        if !self.stopped {
            let mut mid = Emit::new();
            self.first.flush(&mut mid);
            self.feed(mid, out);
        }
        self.second.flush(out);
    }
}

impl<X, Y, M> Then<X, Y, M> {
    fn feed<B>(&mut self, mid: Emit<M>, out: &mut Emit<B>) -> Flow
    where
        Y: Transform<M, B>,
    {
        for value in mid {
            if self.second.step(value, out) == Flow::Stop {
                self.stopped = true;
                return Flow::Stop;
            }
        }
        Flow::Continue
    }
}
