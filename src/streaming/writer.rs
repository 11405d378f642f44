//! Flush algorithm: drain, frame, encode and submit one write at a time.
//!
//! A flush runs when a batch boundary is reached, when the source completes
//! and when a write completes. Whoever claims the write slot drains the
//! whole queue; everybody else leaves a note and returns, and the slot owner
//! flushes again once its write is confirmed.

use crate::error::{BridgeError, EncodeError};
use crate::streaming::{
    channel::WriteOutcome,
    encoder::{encode_item, Item},
    pipeline::{BridgeInner, Completion},
    state::{Claim, Commit, FlushView, WriteId},
};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tracing::Instrument;

/// One composed buffer, ready to submit.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) bytes: Bytes,
    pub(crate) items: usize,
    pub(crate) is_final: bool,
}

impl<T: Send + 'static> BridgeInner<T> {
    pub(crate) fn flush(self: &Arc<Self>) {
        let mut view = match self.state.claim_write() {
            Claim::Granted(view) => view,
            Claim::Busy => {
                tracing::trace!("write in flight, flush deferred");
                return;
            }
            Claim::Closed => return,
        };

        loop {
            let batch = self.queue.drain();
            match self.compose(&view, batch) {
                Ok(Some(frame)) => return self.submit(view.id, frame),
                Ok(None) => match self.state.release_claim(view.id) {
                    Some(next) => view = next,
                    None => return,
                },
                Err(e) => {
                    // The claimed slot dies with the stream
                    return self.fail(BridgeError::Encode(e));
                }
            }
        }
    }

    /// Build the bytes for one write, or `None` if there is nothing to say.
    pub(crate) fn compose(
        &self,
        view: &FlushView,
        batch: Vec<Item<T>>,
    ) -> Result<Option<Frame>, EncodeError> {
        // cursor_done was read before the drain, so nothing can follow it
        let is_final = view.cursor_done;
        if batch.is_empty() && !view.first && !is_final {
            return Ok(None);
        }

        let mut buf = BytesMut::new();
        if view.first {
            buf.extend_from_slice(&self.framing.open);
        }

        let items = batch.len();
        for (i, item) in batch.into_iter().enumerate() {
            if i > 0 || view.items_written {
                buf.extend_from_slice(&self.framing.separator);
            }
            let encoded = encode_item(self.encoder.as_ref(), item)?;
            buf.extend_from_slice(&encoded);
        }

        if is_final {
            buf.extend_from_slice(&self.framing.close);
        }

        Ok(Some(Frame {
            bytes: buf.freeze(),
            items,
            is_final,
        }))
    }

    fn submit(self: &Arc<Self>, id: WriteId, frame: Frame) {
        match self.state.commit_flush(id, frame.items > 0, frame.is_final) {
            Commit::Submit(subscription) => {
                if let Some(subscription) = subscription {
                    subscription.cancel();
                }
            }
            Commit::Discard => {
                tracing::debug!(
                    items = frame.items,
                    "stream ended while composing, write dropped"
                );
                return;
            }
        }

        let Frame {
            bytes,
            items,
            is_final,
        } = frame;
        let len = bytes.len();
        tracing::debug!(write = id, bytes = len, items, is_final, "submitting write");

        let completion = self.channel.submit(bytes);
        let inner = Arc::clone(self);
        self.runtime.spawn(
            async move {
                let outcome = completion.await;
                if is_final {
                    inner.on_final_write_complete(len, items, outcome);
                } else {
                    inner.on_write_complete(id, len, items, outcome);
                }
            }
            .instrument(self.span.clone()),
        );
    }

    fn on_write_complete(
        self: &Arc<Self>,
        id: WriteId,
        len: usize,
        items: usize,
        outcome: WriteOutcome,
    ) {
        match outcome {
            WriteOutcome::Written => {
                self.stats.record_write(len, items);
                if let Some(subscription) = self.state.complete_write(id, self.batch_size) {
                    tracing::trace!(n = self.batch_size, "requesting next batch");
                    subscription.request(self.batch_size);
                }
                self.flush();
            }
            WriteOutcome::Cancelled => self.abort(),
            WriteOutcome::Failed(e) => self.fail(BridgeError::Downstream(e)),
        }
    }

    fn on_final_write_complete(&self, len: usize, items: usize, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Written => {
                self.stats.record_write(len, items);
                let summary = self.stats.snapshot();
                tracing::debug!(
                    items = summary.items,
                    writes = summary.writes,
                    bytes = summary.bytes,
                    "stream finished"
                );
                if self.close_connection_after {
                    self.close_channel();
                }
                self.resolve(Ok(Completion::Finished(summary)));
            }
            WriteOutcome::Cancelled => {
                // The phase stays Done: the final write was committed, only
                // its delivery is reported as aborted.
                tracing::info!("client went away before the final write");
                self.close_channel();
                self.resolve(Ok(Completion::Aborted(self.stats.snapshot())));
            }
            WriteOutcome::Failed(e) => {
                tracing::warn!("final write failed: {}", e);
                self.close_channel();
                self.resolve(Err(BridgeError::Downstream(e)));
            }
        }
    }
}
