//! Transport to the host process.
//!
//! Two channels to the same host:
//! - **Persistent**: a websocket carrying echo-correlated replies and pushes.
//!   Replaced in place on reconnect; senders block while it is down.
//! - **One-shot**: an HTTP POST per request, one reply per request, no echo.
//!
//! A closed or failed persistent channel only clears the handle and schedules
//! a reconnect. In-flight waits are left alone and end at their own timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{SplitSink, SplitStream};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use super::codec::{self, CodecError};
use super::protocol::Envelope;
use crate::config::BridgeConfig;
use crate::events::PushSubscription;
use crate::health::{BridgeHealth, ConnectionState};
use crate::hooks::HookRegistry;
use crate::listener::{Disposition, ListenerGuard, ListenerRegistry};
use crate::lock_unpoisoned;
use crate::version::{HOSTBRIDGE_VERSION, user_agent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;
type SharedSink = Arc<AsyncMutex<WsSink>>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no reply for echo {echo} within {timeout:?}")]
    Timeout { echo: String, timeout: Duration },
    #[error("one-shot request failed with status {status}: {body}")]
    OneShotStatus { status: u16, body: String },
    #[error("one-shot request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Default)]
struct ChannelSlot {
    state: ConnectionState,
    sink: Option<SharedSink>,
    generation: u64,
}

struct ReconnectTimer {
    ticket: u64,
    handle: JoinHandle<()>,
}

pub struct Transport {
    config: BridgeConfig,
    channel: StdMutex<ChannelSlot>,
    listeners: Arc<ListenerRegistry>,
    hooks: Arc<HookRegistry>,
    reconnect_timer: StdMutex<Option<ReconnectTimer>>,
    reconnect_ticket: AtomicU64,
    connect_attempts: AtomicU64,
    http: reqwest::Client,
    shutdown: CancellationToken,
}

impl Transport {
    /// Construct without connecting; call [`Transport::connect`] to open the channel.
    pub fn new(config: BridgeConfig) -> Result<Arc<Self>, TransportError> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent())
            .timeout(config.one_shot_timeout)
            .build()?;

        Ok(Arc::new(Self {
            config,
            channel: StdMutex::new(ChannelSlot::default()),
            listeners: ListenerRegistry::new(),
            hooks: HookRegistry::new(),
            reconnect_timer: StdMutex::new(None),
            reconnect_ticket: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            http,
            shutdown: CancellationToken::new(),
        }))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn state(&self) -> ConnectionState {
        lock_unpoisoned(&self.channel).state
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    pub fn health(&self) -> BridgeHealth {
        let (state, generation) = {
            let slot = lock_unpoisoned(&self.channel);
            (slot.state, slot.generation)
        };
        BridgeHealth {
            state,
            generation,
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            listeners: self.listeners.len(),
            hooks: self.hooks.len(),
            version: HOSTBRIDGE_VERSION,
        }
    }

    /// Open the persistent channel.
    ///
    /// Resolves after one attempt. On failure a reconnect is scheduled; a
    /// call while already connected or connecting is a no-op.
    pub fn connect(self: &Arc<Self>) -> BoxFuture<'static, ()> {
        let this = Arc::clone(self);
        async move {
            if this.shutdown.is_cancelled() {
                return;
            }
            {
                let mut slot = lock_unpoisoned(&this.channel);
                if slot.state != ConnectionState::Disconnected {
                    tracing::debug!(state = ?slot.state, "Connect skipped");
                    return;
                }
                slot.state = ConnectionState::Connecting;
            }

            let url = this.config.persistent_url();
            let attempt = this.connect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(%url, attempt, "Connecting to host");

            let connected = tokio::select! {
                _ = this.shutdown.cancelled() => {
                    this.mark_closed(None);
                    return;
                }
                result = connect_async(url.as_str()) => result,
            };

            match connected {
                Ok((stream, _response)) => {
                    let (sink, source) = stream.split();
                    let generation = this.install(sink);
                    tracing::info!(%url, generation, "Persistent channel open");
                    tokio::spawn(Arc::clone(&this).run_read_loop(source, generation));
                }
                Err(e) => {
                    tracing::warn!(%url, attempt, error = %e, "Failed to open persistent channel");
                    this.mark_closed(None);
                    this.schedule_reconnect();
                }
            }
        }
        .boxed()
    }

    fn install(&self, sink: WsSink) -> u64 {
        let mut slot = lock_unpoisoned(&self.channel);
        slot.generation += 1;
        slot.sink = Some(Arc::new(AsyncMutex::new(sink)));
        slot.state = ConnectionState::Connected;
        slot.generation
    }

    /// Clear the channel handle. With `Some(generation)`, only if that
    /// generation is still current, so a stale reader cannot clear a newer channel.
    fn mark_closed(&self, generation: Option<u64>) -> bool {
        let mut slot = lock_unpoisoned(&self.channel);
        if generation.is_some_and(|g| g != slot.generation) {
            return false;
        }
        slot.state = ConnectionState::Disconnected;
        slot.sink = None;
        true
    }

    /// Arm the single reconnect timer, cancelling any pending one.
    fn schedule_reconnect(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let delay = self.config.reconnect_delay;
        let ticket = self.reconnect_ticket.fetch_add(1, Ordering::Relaxed) + 1;

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = this.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    this.clear_reconnect_timer(ticket);
                    this.connect().await;
                }
            }
        });

        let previous = lock_unpoisoned(&self.reconnect_timer).replace(ReconnectTimer { ticket, handle });
        if let Some(previous) = previous {
            previous.handle.abort();
            tracing::debug!(ticket = previous.ticket, "Cancelled pending reconnect");
        }
        tracing::info!(?delay, "Reconnect scheduled");
    }

    fn clear_reconnect_timer(&self, ticket: u64) {
        let mut timer = lock_unpoisoned(&self.reconnect_timer);
        if timer.as_ref().is_some_and(|t| t.ticket == ticket) {
            timer.take();
        }
    }

    async fn run_read_loop(self: Arc<Self>, mut source: WsSource, generation: u64) {
        // Hooks run on their own task, in receive order, off the read path.
        let (hook_tx, hook_rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_hooks(Arc::clone(&self.hooks), hook_rx));

        loop {
            let frame = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                frame = source.next() => frame,
            };
            match frame {
                Some(Ok(message)) => match codec::decode_frame(message) {
                    Ok(Some(envelope)) => self.route(envelope, &hook_tx),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(generation, error = %e, "Dropping undecodable frame");
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(generation, error = %e, "Persistent channel error");
                    break;
                }
                None => {
                    tracing::warn!(generation, "Persistent channel closed by host");
                    break;
                }
            }
        }

        if self.mark_closed(Some(generation)) {
            self.schedule_reconnect();
        }
        tracing::debug!(generation, "Read loop exiting");
    }

    fn route(&self, envelope: Envelope, hook_tx: &mpsc::UnboundedSender<Arc<Envelope>>) {
        let envelope = Arc::new(envelope);
        tracing::trace!(kind = %envelope.kind, echo = ?envelope.echo(), tag = ?envelope.tag(), "Received envelope");
        if envelope.tag().is_some() {
            let _ = hook_tx.send(Arc::clone(&envelope));
        }
        self.listeners.dispatch(envelope);
    }

    /// Suspend until the persistent channel is open.
    ///
    /// Polls at `poll_interval`; never times out on its own.
    pub async fn wait_connected(&self) {
        while !self.is_open() {
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn connected_sink(&self) -> SharedSink {
        loop {
            self.wait_connected().await;
            if let Some(sink) = lock_unpoisoned(&self.channel).sink.clone() {
                return sink;
            }
        }
    }

    /// Send on the persistent channel and wait for the reply carrying the
    /// same echo. Assigns an echo if the envelope has none.
    ///
    /// The echo wait is one more listener that removes itself on match; it is
    /// also removed when this future times out or is dropped.
    pub async fn send_persistent(
        &self,
        mut envelope: Envelope,
        timeout: Duration,
    ) -> Result<Arc<Envelope>, TransportError> {
        let sink = self.connected_sink().await;
        let echo = envelope.ensure_echo();

        let (reply_tx, reply_rx) = oneshot::channel();
        let mut reply_tx = Some(reply_tx);
        let expected = echo.clone();
        let id = self.listeners.subscribe(move |incoming| {
            // pushes may quote the echo of the call they answer; they are never the reply
            if incoming.kind.is_push() || incoming.echo() != Some(expected.as_str()) {
                return Disposition::Keep;
            }
            if let Some(tx) = reply_tx.take() {
                let _ = tx.send(Arc::clone(incoming));
            }
            Disposition::Remove
        });
        let _pending = ListenerGuard::new(Arc::clone(&self.listeners), id);

        let frame = codec::encode_frame(&envelope)?;
        // one deadline for the write and the reply; a host that stops reading
        // must not hold the call or the sink past it
        let deadline = tokio::time::Instant::now() + timeout;
        tracing::trace!(%echo, kind = %envelope.kind, "Sending on persistent channel");
        let write = async { sink.lock().await.send(frame).await };
        match tokio::time::timeout_at(deadline, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(%echo, error = %e, "Persistent send failed");
            }
            Err(_) => {
                tracing::warn!(%echo, ?timeout, "Persistent write did not complete");
                return Err(TransportError::Timeout { echo, timeout });
            }
        }

        match tokio::time::timeout_at(deadline, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) | Err(_) => {
                tracing::debug!(%echo, ?timeout, "No reply on persistent channel");
                Err(TransportError::Timeout { echo, timeout })
            }
        }
    }

    /// One request, one reply over HTTP.
    pub async fn send_one_shot(&self, envelope: Envelope) -> Result<Envelope, TransportError> {
        let body = codec::encode_envelope(&envelope)?;
        tracing::trace!(kind = %envelope.kind, "Sending on one-shot channel");

        let response = self
            .http
            .post(self.config.one_shot_url())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "One-shot request rejected");
            return Err(TransportError::OneShotStatus {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(codec::decode_envelope(&text)?)
    }

    /// Stream of push-kind envelopes, optionally restricted to one tag.
    pub fn subscribe_pushes(&self, tag_filter: Option<String>) -> PushSubscription {
        PushSubscription::new(&self.listeners, tag_filter)
    }

    /// Stop reconnecting and close the current channel.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(timer) = lock_unpoisoned(&self.reconnect_timer).take() {
            timer.handle.abort();
        }
        let sink = {
            let mut slot = lock_unpoisoned(&self.channel);
            slot.state = ConnectionState::Disconnected;
            slot.sink.take()
        };
        if let Some(sink) = sink
            && let Err(e) = sink.lock().await.close().await
        {
            tracing::debug!(error = %e, "Error closing persistent channel");
        }
        tracing::info!("Transport shut down");
    }
}

async fn dispatch_hooks(hooks: Arc<HookRegistry>, mut rx: mpsc::UnboundedReceiver<Arc<Envelope>>) {
    while let Some(envelope) = rx.recv().await {
        let accepted = hooks.dispatch(&envelope);
        if accepted > 0 {
            tracing::trace!(tag = ?envelope.tag(), accepted, "Push accepted by hooks");
        }
    }
}
