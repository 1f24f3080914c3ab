//! Listener registry: fan-out of every inbound envelope on the persistent channel.
//!
//! Each subscriber owns a queue and a task. Dispatch only enqueues, so a slow
//! subscriber never applies backpressure to the read loop, and a panicking
//! subscriber is caught inside its own task without affecting its siblings.
//! Per-subscriber delivery order matches receive order.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::bridge::protocol::Envelope;

pub type ListenerId = u64;

/// What a listener wants after seeing a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Keep,
    /// Unsubscribe; no further messages are delivered.
    Remove,
}

pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: DashMap<ListenerId, mpsc::UnboundedSender<Arc<Envelope>>>,
}

impl ListenerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            listeners: DashMap::new(),
        })
    }

    /// Register a subscriber. Must be called from within a tokio runtime.
    pub fn subscribe<F>(self: &Arc<Self>, mut listener: F) -> ListenerId
    where
        F: FnMut(&Arc<Envelope>) -> Disposition + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel::<Arc<Envelope>>();
        self.listeners.insert(id, tx);

        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                match catch_unwind(AssertUnwindSafe(|| listener(&envelope))) {
                    Ok(Disposition::Keep) => {}
                    Ok(Disposition::Remove) => {
                        if let Some(registry) = registry.upgrade() {
                            registry.unsubscribe(id);
                        }
                        break;
                    }
                    Err(_) => {
                        tracing::warn!(listener = id, kind = %envelope.kind, "Listener panicked");
                    }
                }
            }
            tracing::trace!(listener = id, "Listener task exiting");
        });

        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    /// Hand an envelope to every current subscriber without waiting on any.
    pub fn dispatch(&self, envelope: Arc<Envelope>) {
        for entry in self.listeners.iter() {
            // A closed queue means the task already exited; unsubscribe races it.
            let _ = entry.value().send(Arc::clone(&envelope));
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

/// Unsubscribes on drop.
pub(crate) struct ListenerGuard {
    registry: Arc<ListenerRegistry>,
    id: ListenerId,
}

impl ListenerGuard {
    pub(crate) fn new(registry: Arc<ListenerRegistry>, id: ListenerId) -> Self {
        Self { registry, id }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.registry.unsubscribe(self.id);
    }
}
