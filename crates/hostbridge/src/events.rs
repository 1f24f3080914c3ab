//! Push event surface for protocol adapters.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::bridge::protocol::Envelope;
use crate::listener::{Disposition, ListenerGuard, ListenerRegistry};

/// Stream of decoded push envelopes, optionally restricted to one tag.
///
/// Backed by a single listener; dropping the subscription unsubscribes it.
pub struct PushSubscription {
    rx: mpsc::UnboundedReceiver<Arc<Envelope>>,
    tag_filter: Option<String>,
    _guard: ListenerGuard,
}

impl PushSubscription {
    pub(crate) fn new(listeners: &Arc<ListenerRegistry>, tag_filter: Option<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let filter = tag_filter.clone();
        let id = listeners.subscribe(move |envelope| {
            if !envelope.kind.is_push() {
                return Disposition::Keep;
            }
            if filter.as_deref().is_some_and(|tag| envelope.tag() != Some(tag)) {
                return Disposition::Keep;
            }
            match tx.send(Arc::clone(envelope)) {
                Ok(()) => Disposition::Keep,
                Err(_) => Disposition::Remove,
            }
        });
        Self {
            rx,
            tag_filter,
            _guard: ListenerGuard::new(Arc::clone(listeners), id),
        }
    }

    pub fn tag_filter(&self) -> Option<&str> {
        self.tag_filter.as_deref()
    }

    /// Next push, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        self.rx.recv().await
    }
}

impl Stream for PushSubscription {
    type Item = Arc<Envelope>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
