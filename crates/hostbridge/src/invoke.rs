//! Invoke facade - the call surface used by the rest of the system.
//!
//! Flow of one invocation:
//! 1. Register a hook for the result tag, if one is declared
//! 2. Send the call on the persistent channel and wait for the ack
//! 3. Ack error: fail with the host's code, drop the hook
//! 4. No result tag: the ack payload is the result
//! 5. Otherwise: resolve with the first push the predicate accepts
//!
//! One timer bounds the whole invocation, ack and push phases together.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bridge::protocol::{Envelope, Payload};
use crate::bridge::transport::{Transport, TransportError};
use crate::bridge::value::Value;
use crate::hooks::{HookGuard, HookRegistry};
use crate::lock_unpoisoned;

const RENDER_MAX_DEPTH: usize = 3;
const RENDER_MAX_LEN: usize = 512;

/// Decides whether a push is the result: `(push data, ack data)`.
pub type ResultPredicate = dyn Fn(&Payload, &Payload) -> bool + Send + Sync;

#[derive(Clone, Default)]
pub struct InvokeOptions {
    pub result_tag: Option<String>,
    pub result_predicate: Option<Arc<ResultPredicate>>,
    pub timeout: Option<Duration>,
}

impl fmt::Debug for InvokeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokeOptions")
            .field("result_tag", &self.result_tag)
            .field("result_predicate", &self.result_predicate.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl InvokeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result_tag(mut self, tag: impl Into<String>) -> Self {
        self.result_tag = Some(tag.into());
        self
    }

    pub fn with_result_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Payload, &Payload) -> bool + Send + Sync + 'static,
    {
        self.result_predicate = Some(Arc::new(predicate));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Which channel a raw exchange goes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Persistent,
    OneShot,
}

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("{operation} rejected by host (code {code}): {message}")]
    Ack {
        operation: String,
        code: i64,
        message: String,
        request: Payload,
        response: Payload,
    },
    #[error("{operation} timed out after {timeout:?}, args: {args}")]
    Timeout {
        operation: String,
        timeout: Duration,
        args: String,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{operation} reply has no '{field}'")]
    MissingField {
        operation: String,
        field: &'static str,
    },
}

impl InvokeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Seam between capability functions and the bridge.
#[async_trait]
pub trait Invoke: Send + Sync {
    /// Call a named remote operation, optionally waiting for a tagged push.
    async fn invoke(
        &self,
        operation: &str,
        args: Vec<Value>,
        options: InvokeOptions,
    ) -> Result<Payload, InvokeError>;

    /// Send a prebuilt envelope and return the single reply's payload.
    async fn exchange(&self, envelope: Envelope, channel: Channel) -> Result<Payload, InvokeError>;
}

pub struct Invoker {
    transport: Arc<Transport>,
    default_timeout: Duration,
}

impl Invoker {
    pub fn new(transport: Arc<Transport>) -> Self {
        let default_timeout = transport.config().default_timeout;
        Self {
            transport,
            default_timeout,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    async fn complete(
        &self,
        operation: &str,
        request: Envelope,
        pending: Option<PendingPush>,
        timeout: Duration,
    ) -> Result<Payload, InvokeError> {
        let request_data = request.data.clone();
        let ack = match self.transport.send_persistent(request, timeout).await {
            Ok(ack) => ack,
            Err(TransportError::Timeout { .. }) => {
                return Err(timeout_error(operation, timeout, &request_data));
            }
            Err(e) => return Err(e.into()),
        };
        check_ack(operation, request_data, &ack)?;

        let Some(pending) = pending else {
            tracing::debug!(operation, "Resolved from ack");
            return Ok(ack.data.clone());
        };
        tracing::debug!(operation, "Ack accepted, awaiting push");
        let push = pending.wait(ack.data.clone()).await;
        tracing::debug!(operation, tag = ?push.tag(), "Resolved from push");
        Ok(push.data.clone())
    }
}

#[async_trait]
impl Invoke for Invoker {
    async fn invoke(
        &self,
        operation: &str,
        args: Vec<Value>,
        options: InvokeOptions,
    ) -> Result<Payload, InvokeError> {
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let mut request = Envelope::call(operation, args);
        let echo = request.ensure_echo();
        tracing::debug!(operation, %echo, result_tag = ?options.result_tag, ?timeout, "Invoking");

        // Registered before sending so a fast push cannot slip past.
        let pending = options
            .result_tag
            .as_deref()
            .map(|tag| PendingPush::register(self.transport.hooks(), tag, options.result_predicate.clone()));

        let request_data = request.data.clone();
        match tokio::time::timeout(timeout, self.complete(operation, request, pending, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(timeout_error(operation, timeout, &request_data)),
        }
    }

    async fn exchange(&self, envelope: Envelope, channel: Channel) -> Result<Payload, InvokeError> {
        let operation = envelope.kind.to_string();
        let request_data = envelope.data.clone();
        let reply = match channel {
            Channel::Persistent => {
                // bounds the wait for a connection too, not just the reply
                let timeout = self.default_timeout;
                let sent = tokio::time::timeout(timeout, self.transport.send_persistent(envelope, timeout));
                match sent.await {
                    Ok(Ok(reply)) => reply,
                    Ok(Err(TransportError::Timeout { .. })) | Err(_) => {
                        return Err(timeout_error(&operation, timeout, &request_data));
                    }
                    Ok(Err(e)) => return Err(e.into()),
                }
            }
            Channel::OneShot => Arc::new(self.transport.send_one_shot(envelope).await?),
        };
        check_ack(&operation, request_data, &reply)?;
        Ok(reply.data.clone())
    }
}

fn check_ack(operation: &str, request: Payload, ack: &Envelope) -> Result<(), InvokeError> {
    if !ack.is_ack_error() {
        return Ok(());
    }
    let code = ack.result_code().unwrap_or_default();
    let message = ack.error_message().to_string();
    tracing::warn!(operation, code, %message, "Host rejected request");
    Err(InvokeError::Ack {
        operation: operation.to_string(),
        code,
        message,
        request,
        response: ack.data.clone(),
    })
}

fn timeout_error(operation: &str, timeout: Duration, request: &Payload) -> InvokeError {
    let args = match request.get("args").and_then(Value::as_list) {
        Some(args) => render_args(args),
        None => render_args(&[Value::Object(request.clone())]),
    };
    tracing::warn!(operation, ?timeout, %args, "Invocation timed out");
    InvokeError::Timeout {
        operation: operation.to_string(),
        timeout,
        args,
    }
}

#[derive(Default)]
struct PushGate {
    ack: Option<Payload>,
    /// Pushes seen before the ack; judged once the ack is known.
    early: Vec<Arc<Envelope>>,
}

/// Hook registration for one invocation's result push. Dropping it removes the hook.
struct PendingPush {
    gate: Arc<StdMutex<PushGate>>,
    predicate: Option<Arc<ResultPredicate>>,
    accepted: mpsc::UnboundedReceiver<Arc<Envelope>>,
    _hook: HookGuard,
}

impl PendingPush {
    fn register(
        hooks: &Arc<HookRegistry>,
        tag: &str,
        predicate: Option<Arc<ResultPredicate>>,
    ) -> Self {
        let gate = Arc::new(StdMutex::new(PushGate::default()));
        let (tx, accepted) = mpsc::unbounded_channel();

        let hook_gate = Arc::clone(&gate);
        let hook_predicate = predicate.clone();
        let id = hooks.register(
            tag,
            move |push| {
                let mut gate = lock_unpoisoned(&hook_gate);
                if let Some(ack) = gate.ack.as_ref() {
                    return accepts(hook_predicate.as_deref(), push, ack);
                }
                gate.early.push(Arc::clone(push));
                false
            },
            move |push| {
                let _ = tx.send(Arc::clone(push));
            },
        );

        Self {
            gate,
            predicate,
            accepted,
            _hook: HookGuard::new(Arc::clone(hooks), id),
        }
    }

    async fn wait(mut self, ack: Payload) -> Arc<Envelope> {
        let early = {
            let mut gate = lock_unpoisoned(&self.gate);
            gate.ack = Some(ack.clone());
            std::mem::take(&mut gate.early)
        };
        for push in early {
            if accepts(self.predicate.as_deref(), &push, &ack) {
                return push;
            }
        }
        match self.accepted.recv().await {
            Some(push) => push,
            // sender lives in the hook we hold, so this does not happen
            None => std::future::pending().await,
        }
    }
}

fn accepts(predicate: Option<&ResultPredicate>, push: &Envelope, ack: &Payload) -> bool {
    let Some(predicate) = predicate else {
        return true;
    };
    catch_unwind(AssertUnwindSafe(|| predicate(&push.data, ack))).unwrap_or_else(|_| {
        tracing::warn!(tag = ?push.tag(), "Result predicate panicked");
        false
    })
}

/// Render call arguments for diagnostics, bounded in depth and length.
pub fn render_args(args: &[Value]) -> String {
    let mut out = String::new();
    render_list(args, 0, &mut out);
    if out.len() > RENDER_MAX_LEN {
        let mut cut = RENDER_MAX_LEN;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
        out.push_str("...");
    }
    out
}

fn render_list(items: &[Value], depth: usize, out: &mut String) {
    if depth >= RENDER_MAX_DEPTH {
        out.push_str("[...]");
        return;
    }
    out.push('[');
    for (i, item) in items.iter().enumerate() {
        if out.len() > RENDER_MAX_LEN {
            break;
        }
        if i > 0 {
            out.push_str(", ");
        }
        render_value(item, depth + 1, out);
    }
    out.push(']');
}

fn render_value(value: &Value, depth: usize, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(&format!("{:?}", s)),
        Value::List(items) => render_list(items, depth, out),
        Value::Object(_) | Value::Map(_) if depth >= RENDER_MAX_DEPTH => out.push_str("{...}"),
        Value::Object(fields) => {
            out.push('{');
            for (i, (key, field)) in fields.iter().enumerate() {
                if out.len() > RENDER_MAX_LEN {
                    break;
                }
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(key);
                out.push_str(": ");
                render_value(field, depth + 1, out);
            }
            out.push('}');
        }
        Value::Map(entries) => {
            out.push_str("Map{");
            for (i, (key, entry)) in entries.iter().enumerate() {
                if out.len() > RENDER_MAX_LEN {
                    break;
                }
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&key.to_string());
                out.push_str(" => ");
                render_value(entry, depth + 1, out);
            }
            out.push('}');
        }
    }
}
