// Channel Producer - drains a stream on its own task into a bounded queue
// Lets independent sources load concurrently while the consumer still pulls in order

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::core::errors::AggregationError;
use crate::core::types::MarketEvent;
use super::cursor::{EventStream, PullStream};

type Message = Result<MarketEvent, AggregationError>;

/// Consumer half of a spawned producer. Dropping it stops the producer.
pub struct ChannelStream {
    rx: mpsc::Receiver<Message>,
    handle: JoinHandle<()>,
    failed: bool,
}

/// Spawn a task that pulls `stream` to completion and forwards every event.
///
/// A producer error is forwarded once and ends the stream. Cancellation stops
/// the producer between events.
pub fn spawn_producer(mut stream: EventStream, capacity: usize, cancel: CancellationToken) -> ChannelStream {
    let (tx, rx) = mpsc::channel::<Message>(capacity.max(1));

    let handle = tokio::spawn(async move {
        let mut forwarded: u64 = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = stream.pull() => next,
            };
            match next {
                Ok(Some(event)) => {
                    if tx.send(Ok(event)).await.is_err() {
                        break;
                    }
                    forwarded += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Producer failed");
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
        debug!(forwarded, "Producer exiting");
    });

    ChannelStream {
        rx,
        handle,
        failed: false,
    }
}

#[async_trait]
impl PullStream for ChannelStream {
    type Item = MarketEvent;

    async fn pull(&mut self) -> Result<Option<MarketEvent>, AggregationError> {
        if self.failed {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(e)) => {
                self.failed = true;
                Err(e)
            }
            None => Ok(None),
        }
    }
}

impl Drop for ChannelStream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AggTrade;
    use crate::layer2::cursor::IterStream;

    fn trades(n: i64) -> Vec<MarketEvent> {
        (0..n)
            .map(|i| MarketEvent::FuturesTrade(AggTrade::new(i, 100.0, 1.0, i * 1_000, true)))
            .collect()
    }

    /// Yields the given events, then fails
    struct FailingStream {
        events: std::vec::IntoIter<MarketEvent>,
    }

    #[async_trait]
    impl PullStream for FailingStream {
        type Item = MarketEvent;

        async fn pull(&mut self) -> Result<Option<MarketEvent>, AggregationError> {
            match self.events.next() {
                Some(e) => Ok(Some(e)),
                None => Err(AggregationError::IllegalState("boom".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_forwards_in_order() {
        let expected = trades(50);
        let stream: EventStream = Box::new(IterStream::new(expected.clone().into_iter()));
        // capacity smaller than the stream exercises backpressure
        let mut rx = spawn_producer(stream, 4, CancellationToken::new());

        let mut got = Vec::new();
        while let Some(e) = rx.pull().await.unwrap() {
            got.push(e);
        }
        assert_eq!(got, expected);
        assert_eq!(rx.pull().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_error_is_forwarded_once() {
        let stream: EventStream = Box::new(FailingStream {
            events: trades(2).into_iter(),
        });
        let mut rx = spawn_producer(stream, 8, CancellationToken::new());

        assert!(rx.pull().await.unwrap().is_some());
        assert!(rx.pull().await.unwrap().is_some());
        assert!(matches!(rx.pull().await, Err(AggregationError::IllegalState(_))));
        assert_eq!(rx.pull().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancel_closes_stream() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stream: EventStream = Box::new(IterStream::new(trades(10).into_iter()));
        let mut rx = spawn_producer(stream, 1, cancel);

        let mut got = 0;
        while rx.pull().await.unwrap().is_some() {
            got += 1;
        }
        assert_eq!(got, 0);
    }
}
