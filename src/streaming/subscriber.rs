//! Source-side callbacks of the bridge.

use crate::error::{BridgeError, SourceError};
use crate::streaming::{
    encoder::Item,
    pipeline::BridgeInner,
    source::{Subscriber, Subscription},
    state::SubscribeEffect,
};
use std::sync::Arc;

pub(crate) struct SourceSubscriber<T> {
    inner: Arc<BridgeInner<T>>,
}

impl<T> SourceSubscriber<T> {
    pub(crate) fn new(inner: Arc<BridgeInner<T>>) -> Self {
        Self { inner }
    }
}

impl<T: Send + 'static> Subscriber<Item<T>> for SourceSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let batch_size = self.inner.batch_size;
        match self.inner.state.with_subscription(subscription, batch_size) {
            SubscribeEffect::Request(subscription) => subscription.request(batch_size),
            SubscribeEffect::Cancel(subscription) => {
                self.inner.span.in_scope(|| {
                    tracing::warn!("refusing subscription: already subscribed or stream ended")
                });
                subscription.cancel();
            }
        }
    }

    fn on_item(&self, item: Item<T>) {
        if !self.inner.state.is_active() {
            return;
        }
        self.inner.queue.push(item);
        if self.inner.state.increment(self.inner.batch_size) {
            self.inner.schedule_flush();
        }
    }

    fn on_error(&self, error: SourceError) {
        self.inner.fail(BridgeError::Upstream(error));
    }

    fn on_complete(&self) {
        if self.inner.state.with_cursor_done() {
            self.inner.span.in_scope(|| {
                tracing::debug!(queued = self.inner.queue.len(), "source completed")
            });
            self.inner.schedule_flush();
        }
    }
}
