// Lookahead Cursor - peek/commit adapter over any pull-based sequence
// Lets a consumer inspect the next element before deciding to take it

use async_trait::async_trait;

use crate::core::errors::AggregationError;
use crate::core::types::MarketEvent;

// ============================================================================
// Pull Stream
// ============================================================================

/// A lazily produced, forward-only sequence. `Ok(None)` means drained.
#[async_trait]
pub trait PullStream: Send {
    type Item: Send;

    async fn pull(&mut self) -> Result<Option<Self::Item>, AggregationError>;
}

#[async_trait]
impl<S: PullStream + ?Sized> PullStream for Box<S> {
    type Item = S::Item;

    async fn pull(&mut self) -> Result<Option<Self::Item>, AggregationError> {
        (**self).pull().await
    }
}

/// Type-erased event stream, so loaders and channel consumers can sit side by side
pub type EventStream = Box<dyn PullStream<Item = MarketEvent>>;

/// Adapts a plain iterator into a `PullStream`
pub struct IterStream<I> {
    iter: I,
}

impl<I> IterStream<I> {
    pub fn new(iter: I) -> Self {
        Self { iter }
    }
}

#[async_trait]
impl<I> PullStream for IterStream<I>
where
    I: Iterator + Send,
    I::Item: Send,
{
    type Item = I::Item;

    async fn pull(&mut self) -> Result<Option<Self::Item>, AggregationError> {
        Ok(self.iter.next())
    }
}

// ============================================================================
// Lookahead Cursor
// ============================================================================

/// Holds at most one peeked-but-uncommitted element.
///
/// `peek` is idempotent until `commit`; `commit` with nothing buffered is an
/// `IllegalState` error. Once the inner stream is drained it is never polled again.
pub struct LookaheadCursor<S: PullStream> {
    inner: S,
    pending: Option<S::Item>,
    drained: bool,
    committed: u64,
}

impl<S: PullStream> LookaheadCursor<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pending: None,
            drained: false,
            committed: 0,
        }
    }

    /// Return the buffered element, pulling one if the slot is empty
    pub async fn peek(&mut self) -> Result<Option<&S::Item>, AggregationError> {
        if self.pending.is_none() && !self.drained {
            match self.inner.pull().await? {
                Some(item) => self.pending = Some(item),
                None => self.drained = true,
            }
        }
        Ok(self.pending.as_ref())
    }

    /// Take the buffered element so the next `peek` advances
    pub fn commit(&mut self) -> Result<S::Item, AggregationError> {
        let item = self.pending.take().ok_or_else(|| {
            AggregationError::IllegalState("commit called with no pending element".to_string())
        })?;
        self.committed += 1;
        Ok(item)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// True once the inner stream is drained and nothing is buffered
    pub fn is_exhausted(&self) -> bool {
        self.drained && self.pending.is_none()
    }

    pub fn committed(&self) -> u64 {
        self.committed
    }
}
