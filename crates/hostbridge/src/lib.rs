//! hostbridge: call/event correlation bridge to an external chat host process.

use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};

mod health;
mod version;

pub mod api;
pub mod bridge;
pub mod config;
pub mod events;
pub mod hooks;
pub mod invoke;
pub mod listener;

#[cfg(test)]
mod testing;

pub use bridge::protocol::{Envelope, EnvelopeType, Payload};
pub use bridge::transport::{Transport, TransportError};
pub use bridge::value::{MapKey, Value};
pub use config::{BridgeConfig, ConfigError};
pub use events::PushSubscription;
pub use health::{BridgeHealth, ConnectionState};
pub use invoke::{Channel, Invoke, InvokeError, InvokeOptions, Invoker};
pub use version::{HOSTBRIDGE_VERSION, user_agent};

/// Lock a std mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock_unpoisoned<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
