//! Streaming bridge orchestration.
//!
//! Wires a data source, the pending queue, the state cell and an output
//! channel together for one response.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::streaming::{
    channel::OutputChannel,
    encoder::{Item, ItemEncoder, JsonEncoder},
    framing::Framing,
    queue::PendingQueue,
    source::{Publisher, Subscriber},
    state::StateCell,
    subscriber::SourceSubscriber,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::Instrument;

// =============================================================================
// Outcome types
// =============================================================================

/// Totals for one response.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    /// Items confirmed written
    pub items: u64,
    /// Confirmed writes
    pub writes: u64,
    /// Bytes confirmed written, punctuation included
    pub bytes: u64,
}

/// How a response ended when nothing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The whole array, closing bracket included, was written.
    Finished(StreamSummary),
    /// The client went away or the response was cancelled. Also reported
    /// when only the final write went undelivered, though the state phase
    /// is then already `Done`.
    Aborted(StreamSummary),
}

impl Completion {
    pub fn summary(&self) -> StreamSummary {
        match self {
            Completion::Finished(s) | Completion::Aborted(s) => *s,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Completion::Finished(_))
    }
}

#[derive(Default)]
pub(crate) struct SummaryCounters {
    items: AtomicU64,
    writes: AtomicU64,
    bytes: AtomicU64,
}

impl SummaryCounters {
    pub(crate) fn record_write(&self, bytes: usize, items: usize) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.items.fetch_add(items as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StreamSummary {
        StreamSummary {
            items: self.items.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Bridge internals shared by subscriber and writer
// =============================================================================

pub(crate) struct BridgeInner<T> {
    pub(crate) state: StateCell,
    pub(crate) queue: PendingQueue<Item<T>>,
    pub(crate) encoder: Arc<dyn ItemEncoder<T>>,
    pub(crate) channel: Arc<dyn OutputChannel>,
    pub(crate) framing: Framing,
    pub(crate) batch_size: u64,
    pub(crate) close_connection_after: bool,
    pub(crate) runtime: Handle,
    pub(crate) span: tracing::Span,
    pub(crate) stats: SummaryCounters,
    closing: AtomicBool,
    outcome: Mutex<Option<oneshot::Sender<Result<Completion>>>>,
}

impl<T: Send + 'static> BridgeInner<T> {
    /// Run a flush on the runtime rather than on the calling thread.
    pub(crate) fn schedule_flush(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        self.runtime
            .spawn(async move { inner.flush() }.instrument(self.span.clone()));
    }

    /// Cancellation from either side: stop demanding, drop what is queued.
    pub(crate) fn abort(&self) {
        let _enter = self.span.enter();
        match self.state.with_aborted() {
            Some(terminated) => {
                if let Some(subscription) = terminated.subscription {
                    subscription.cancel();
                }
                let dropped = self.queue.discard();
                tracing::info!(dropped, "stream cancelled");
                self.close_channel();
                self.resolve(Ok(Completion::Aborted(self.stats.snapshot())));
            }
            None => tracing::trace!("cancel after stream already ended"),
        }
    }

    /// Failure from either side. The subscription is always cancelled before
    /// the channel is closed.
    pub(crate) fn fail(&self, error: BridgeError) {
        let _enter = self.span.enter();
        match self.state.with_errored() {
            Some(terminated) => {
                if let Some(subscription) = terminated.subscription {
                    subscription.cancel();
                }
                let dropped = self.queue.discard();
                tracing::warn!(dropped, "stream failed: {}", error);
                self.close_channel();
                self.resolve(Err(error));
            }
            None => {
                tracing::debug!("error after stream already ended: {}", error);
                if error.is_downstream() {
                    self.close_channel();
                }
            }
        }
    }
}

impl<T> BridgeInner<T> {
    pub(crate) fn close_channel(&self) {
        if !self.closing.swap(true, Ordering::AcqRel) {
            self.channel.close();
        }
    }

    /// Report the outcome to the handle. Only the first report counts.
    pub(crate) fn resolve(&self, outcome: Result<Completion>) {
        let sender = self
            .outcome
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(outcome);
        }
    }
}

trait Cancel: Send + Sync {
    fn cancel(&self);
}

impl<T: Send + 'static> Cancel for BridgeInner<T> {
    fn cancel(&self) {
        self.abort();
    }
}

// =============================================================================
// Public API
// =============================================================================

/// Streams every item of a source to an output channel as one JSON array.
///
/// One `StreamBridge` can start any number of responses; each
/// [`start`](StreamBridge::start) call gets its own state and queue.
pub struct StreamBridge<T> {
    config: BridgeConfig,
    encoder: Arc<dyn ItemEncoder<T>>,
    runtime: Option<Handle>,
}

impl<T: Serialize + Send + 'static> StreamBridge<T> {
    /// Bridge that encodes values with `serde_json`.
    pub fn json(config: BridgeConfig) -> Result<Self> {
        Self::new(config, Arc::new(JsonEncoder))
    }
}

impl<T: Send + 'static> StreamBridge<T> {
    pub fn new(config: BridgeConfig, encoder: Arc<dyn ItemEncoder<T>>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            encoder,
            runtime: None,
        })
    }

    /// Schedule flushes and completions on `runtime` instead of the runtime
    /// current at [`start`](StreamBridge::start).
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Subscribe to `source` and stream its items to `channel`.
    ///
    /// `response_id` only labels the log output of this response.
    pub fn start<P>(
        &self,
        response_id: &str,
        source: P,
        channel: Arc<dyn OutputChannel>,
    ) -> Result<BridgeHandle>
    where
        P: Publisher<Item<T>>,
    {
        let runtime = match &self.runtime {
            Some(handle) => handle.clone(),
            None => Handle::try_current()
                .map_err(|e| BridgeError::Config(format!("no Tokio runtime available: {}", e)))?,
        };

        let (tx, rx) = oneshot::channel();
        let span = tracing::info_span!("stream", response = %response_id);
        let inner = Arc::new(BridgeInner {
            state: StateCell::new(),
            queue: PendingQueue::new(),
            encoder: Arc::clone(&self.encoder),
            channel,
            framing: Framing::new(self.config.pretty_print_newlines),
            batch_size: self.config.batch_size as u64,
            close_connection_after: self.config.close_connection_after,
            runtime,
            span,
            stats: SummaryCounters::default(),
            closing: AtomicBool::new(false),
            outcome: Mutex::new(Some(tx)),
        });

        {
            let _enter = inner.span.enter();
            tracing::debug!(batch_size = inner.batch_size, "subscribing to source");
        }
        let subscriber: Arc<dyn Subscriber<Item<T>>> =
            Arc::new(SourceSubscriber::new(Arc::clone(&inner)));
        source.subscribe(subscriber);

        Ok(BridgeHandle {
            canceller: inner,
            outcome: rx,
        })
    }
}

/// Handle to one running response.
pub struct BridgeHandle {
    canceller: Arc<dyn Cancel>,
    outcome: oneshot::Receiver<Result<Completion>>,
}

impl BridgeHandle {
    /// Cancel from the network side, e.g. when the client disconnected.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// Wait until the response finished, was aborted, or failed.
    pub async fn finished(self) -> Result<Completion> {
        self.outcome.await.unwrap_or(Err(BridgeError::Detached))
    }
}
