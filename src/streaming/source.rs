//! Data-source contract and a demand-driven adapter over `futures::Stream`.
//!
//! A source yields items only after [`Subscription::request`] and stops
//! after [`Subscription::cancel`]. Callbacks may arrive on any thread, but a
//! single source never calls the same subscriber concurrently.

use crate::error::SourceError;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Handle a subscriber uses to ask for more items or to stop the source.
pub trait Subscription: Send + Sync {
    /// Ask for `n` more items.
    fn request(&self, n: u64);
    fn cancel(&self);
}

/// Receives notifications from a data source.
pub trait Subscriber<T>: Send + Sync {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);
    fn on_item(&self, item: T);
    fn on_error(&self, error: SourceError);
    fn on_complete(&self);
}

/// A data source that can be subscribed to exactly once.
pub trait Publisher<T> {
    fn subscribe(self, subscriber: Arc<dyn Subscriber<T>>);
}

// =============================================================================
// StreamSource
// =============================================================================

enum Signal {
    Request(u64),
    Cancel,
}

struct DemandSubscription {
    signals: mpsc::UnboundedSender<Signal>,
}

impl Subscription for DemandSubscription {
    fn request(&self, n: u64) {
        if n > 0 {
            let _ = self.signals.send(Signal::Request(n));
        }
    }

    fn cancel(&self) {
        let _ = self.signals.send(Signal::Cancel);
    }
}

/// Publishes the items of a stream, pulling only as many as were requested.
///
/// The stream is polled on a Tokio task spawned at subscription time.
/// Dropping every clone of the subscription counts as cancellation.
pub struct StreamSource<S> {
    stream: S,
}

impl<S> StreamSource<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S, T> Publisher<T> for StreamSource<S>
where
    S: Stream<Item = Result<T, SourceError>> + Send + 'static,
    T: Send + 'static,
{
    fn subscribe(self, subscriber: Arc<dyn Subscriber<T>>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                subscriber.on_error(Box::new(e));
                return;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        subscriber.on_subscribe(Arc::new(DemandSubscription { signals: tx }));
        runtime.spawn(drive(self.stream, rx, subscriber));
    }
}

async fn drive<S, T>(
    stream: S,
    mut signals: mpsc::UnboundedReceiver<Signal>,
    subscriber: Arc<dyn Subscriber<T>>,
) where
    S: Stream<Item = Result<T, SourceError>> + Send + 'static,
{
    let mut stream = Box::pin(stream);
    let mut outstanding: u64 = 0;

    loop {
        if outstanding == 0 {
            match signals.recv().await {
                Some(Signal::Request(n)) => outstanding = outstanding.saturating_add(n),
                Some(Signal::Cancel) | None => {
                    tracing::trace!("source cancelled while idle");
                    return;
                }
            }
            continue;
        }

        tokio::select! {
            biased;

            signal = signals.recv() => match signal {
                Some(Signal::Request(n)) => outstanding = outstanding.saturating_add(n),
                Some(Signal::Cancel) | None => {
                    tracing::trace!(outstanding, "source cancelled with demand outstanding");
                    return;
                }
            },
            next = stream.next() => match next {
                Some(Ok(item)) => {
                    outstanding -= 1;
                    subscriber.on_item(item);
                }
                Some(Err(e)) => {
                    subscriber.on_error(e);
                    return;
                }
                None => {
                    subscriber.on_complete();
                    return;
                }
            },
        }
    }
}
