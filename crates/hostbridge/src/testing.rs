//! Test doubles: an in-process fake host and a scripted [`Invoke`].
//!
//! Serves one websocket connection at a time. Frames the bridge sends show up
//! in [`FakeHost::next_request`]; frames queued with [`FakeHost::send`] go to
//! the current connection, or to the next one if none is open.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value as Json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::bridge::codec;
use crate::bridge::protocol::{Envelope, Payload};
use crate::bridge::transport::Transport;
use crate::bridge::value::Value;
use crate::config::BridgeConfig;
use crate::invoke::{Channel, Invoke, InvokeError, InvokeOptions};

enum HostCommand {
    Send(String),
    Close,
}

pub(crate) struct FakeHost {
    addr: SocketAddr,
    requests: mpsc::UnboundedReceiver<Json>,
    commands: mpsc::UnboundedSender<HostCommand>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakeHost {
    pub(crate) async fn start() -> Self {
        Self::bind("127.0.0.1:0".parse().unwrap()).await
    }

    pub(crate) async fn bind(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (request_tx, requests) = mpsc::unbounded_channel();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let task = tokio::spawn(serve(
            listener,
            request_tx,
            command_rx,
            Arc::clone(&connections),
        ));
        Self {
            addr,
            requests,
            commands,
            connections,
            task,
        }
    }

    pub(crate) fn config(&self) -> BridgeConfig {
        BridgeConfig::new()
            .with_host(self.addr.ip().to_string())
            .with_port(self.addr.port())
            .with_reconnect_delay(Duration::from_millis(50))
            .with_poll_interval(Duration::from_millis(5))
            .with_default_timeout(Duration::from_secs(2))
    }

    pub(crate) async fn next_request(&mut self) -> Json {
        tokio::time::timeout(Duration::from_secs(5), self.requests.recv())
            .await
            .expect("timed out waiting for a request")
            .expect("fake host stopped")
    }

    pub(crate) fn send(&self, json: Json) {
        self.send_raw(json.to_string());
    }

    pub(crate) fn send_raw(&self, text: impl Into<String>) {
        let _ = self.commands.send(HostCommand::Send(text.into()));
    }

    /// Answer `request` with `data`, echoing its type and echo.
    pub(crate) fn reply(&self, request: &Json, mut data: Json) {
        data["echo"] = request["data"]["echo"].clone();
        self.send(serde_json::json!({"type": request["type"].clone(), "data": data}));
    }

    pub(crate) fn close_connection(&self) {
        let _ = self.commands.send(HostCommand::Close);
    }

    pub(crate) fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_for_connections(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.connections() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for the bridge to reconnect");
    }
}

impl Drop for FakeHost {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    listener: TcpListener,
    requests: mpsc::UnboundedSender<Json>,
    mut commands: mpsc::UnboundedReceiver<HostCommand>,
    connections: Arc<AtomicUsize>,
) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
            continue;
        };
        connections.fetch_add(1, Ordering::SeqCst);
        let (mut sink, mut source) = ws.split();

        loop {
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(json) = serde_json::from_str(text.as_str()) {
                            let _ = requests.send(json);
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                },
                command = commands.recv() => match command {
                    Some(HostCommand::Send(text)) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(HostCommand::Close) => {
                        let _ = sink.close().await;
                        break;
                    }
                    None => return,
                },
            }
        }
    }
}

/// Transport connected to `host`.
pub(crate) async fn connected(host: &FakeHost) -> Arc<Transport> {
    let transport = Transport::new(host.config()).unwrap();
    transport.connect().await;
    tokio::time::timeout(Duration::from_secs(5), transport.wait_connected())
        .await
        .expect("transport did not connect");
    transport
}

/// Payload from a JSON object literal.
pub(crate) fn payload(json: Json) -> Payload {
    match codec::decode_value(json).unwrap() {
        Value::Object(fields) => fields,
        other => panic!("not an object: {other:?}"),
    }
}

pub(crate) struct RecordedCall {
    pub operation: String,
    pub args: Vec<Value>,
    pub options: InvokeOptions,
}

/// Scripted [`Invoke`]: answers calls from a queue and records what it saw.
/// An empty queue answers with an empty payload.
#[derive(Default)]
pub(crate) struct MockInvoke {
    responses: StdMutex<VecDeque<Result<Payload, InvokeError>>>,
    calls: StdMutex<Vec<RecordedCall>>,
    exchanges: StdMutex<Vec<(Envelope, Channel)>>,
}

impl MockInvoke {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, response: Result<Payload, InvokeError>) -> &Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    pub(crate) fn respond_json(&self, json: Json) -> &Self {
        self.respond(Ok(payload(json)))
    }

    pub(crate) fn calls(&self) -> Vec<RecordedCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    pub(crate) fn exchanges(&self) -> Vec<(Envelope, Channel)> {
        std::mem::take(&mut *self.exchanges.lock().unwrap())
    }

    fn next_response(&self) -> Result<Payload, InvokeError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Payload::new()))
    }
}

#[async_trait]
impl Invoke for MockInvoke {
    async fn invoke(
        &self,
        operation: &str,
        args: Vec<Value>,
        options: InvokeOptions,
    ) -> Result<Payload, InvokeError> {
        self.calls.lock().unwrap().push(RecordedCall {
            operation: operation.to_string(),
            args,
            options,
        });
        self.next_response()
    }

    async fn exchange(&self, envelope: Envelope, channel: Channel) -> Result<Payload, InvokeError> {
        self.exchanges.lock().unwrap().push((envelope, channel));
        self.next_response()
    }
}
