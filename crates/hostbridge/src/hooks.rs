//! Hook registry: predicate-gated waits on tagged pushes.
//!
//! Several hooks may share one tag. Each is evaluated independently against
//! every push with that tag; a rejected push is discarded for that hook and the
//! hook keeps waiting. Accepting does not remove the hook: the registrant owns
//! removal.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use crate::bridge::protocol::Envelope;
use crate::lock_unpoisoned;

pub type HookId = u64;

type Predicate = dyn Fn(&Arc<Envelope>) -> bool + Send + Sync;
type OnEvent = dyn Fn(&Arc<Envelope>) + Send + Sync;

struct Hook {
    id: HookId,
    predicate: Box<Predicate>,
    on_event: Box<OnEvent>,
}

pub struct HookRegistry {
    next_id: AtomicU64,
    hooks: StdMutex<HashMap<String, Vec<Arc<Hook>>>>,
}

impl HookRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            hooks: StdMutex::new(HashMap::new()),
        })
    }

    pub fn register<P, E>(&self, tag: impl Into<String>, predicate: P, on_event: E) -> HookId
    where
        P: Fn(&Arc<Envelope>) -> bool + Send + Sync + 'static,
        E: Fn(&Arc<Envelope>) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tag = tag.into();
        tracing::trace!(hook = id, %tag, "Registering hook");
        let hook = Arc::new(Hook {
            id,
            predicate: Box::new(predicate),
            on_event: Box::new(on_event),
        });
        lock_unpoisoned(&self.hooks)
            .entry(tag)
            .or_default()
            .push(hook);
        id
    }

    pub fn remove(&self, id: HookId) -> bool {
        let mut hooks = lock_unpoisoned(&self.hooks);
        let mut removed = false;
        hooks.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|hook| hook.id != id);
            removed |= entries.len() != before;
            !entries.is_empty()
        });
        removed
    }

    /// Offer a push to every hook registered for its tag.
    ///
    /// Returns the number of hooks that accepted it. Hooks run outside the
    /// registry lock so `on_event` may remove its own hook.
    pub fn dispatch(&self, envelope: &Arc<Envelope>) -> usize {
        let Some(tag) = envelope.tag() else {
            return 0;
        };
        let candidates = match lock_unpoisoned(&self.hooks).get(tag) {
            Some(entries) => entries.clone(),
            None => return 0,
        };

        let mut accepted = 0;
        for hook in candidates {
            match catch_unwind(AssertUnwindSafe(|| (hook.predicate)(envelope))) {
                Ok(true) => {
                    accepted += 1;
                    if catch_unwind(AssertUnwindSafe(|| (hook.on_event)(envelope))).is_err() {
                        tracing::warn!(hook = hook.id, %tag, "Hook handler panicked");
                    }
                }
                Ok(false) => {}
                Err(_) => {
                    tracing::warn!(hook = hook.id, %tag, "Hook predicate panicked");
                }
            }
        }
        accepted
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.hooks).values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len_for(&self, tag: &str) -> usize {
        lock_unpoisoned(&self.hooks).get(tag).map_or(0, Vec::len)
    }
}

/// Removes its hook on drop.
pub(crate) struct HookGuard {
    registry: Arc<HookRegistry>,
    id: HookId,
}

impl HookGuard {
    pub(crate) fn new(registry: Arc<HookRegistry>, id: HookId) -> Self {
        Self { registry, id }
    }
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
