//! Envelope types shared by both channels.
//!
//! Every message, in both directions, is `{ "type": <tag>, "data": {...} }`.
//! `data.echo` correlates a request with its reply on the persistent channel;
//! `data.cmd` names the category of a push.

use indexmap::IndexMap;

use super::value::Value;

/// Envelope payload: a keyed record in wire order.
pub type Payload = IndexMap<String, Value>;

pub const ECHO_FIELD: &str = "echo";
pub const TAG_FIELD: &str = "cmd";
pub const RESULT_CODE_FIELD: &str = "result";
pub const ERROR_MESSAGE_FIELD: &str = "errMsg";

/// Envelope `type` discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnvelopeType {
    /// Generic remote call and its ack reply.
    Call,
    /// Raw payload send.
    Send,
    /// Announcement to the host.
    Broadcast,
    /// Generic push, tagged by `data.cmd`.
    Push,
    /// Unsolicited category event, tagged by `data.cmd`.
    Event,
    Other(String),
}

impl EnvelopeType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Call => "call",
            Self::Send => "send",
            Self::Broadcast => "broadcast",
            Self::Push => "push",
            Self::Event => "event",
            Self::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "call" => Self::Call,
            "send" => Self::Send,
            "broadcast" => Self::Broadcast,
            "push" => Self::Push,
            "event" => Self::Event,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_push(&self) -> bool {
        matches!(self, Self::Push | Self::Event)
    }
}

impl std::fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: EnvelopeType,
    pub data: Payload,
}

impl Envelope {
    pub fn new(kind: EnvelopeType, data: Payload) -> Self {
        Self { kind, data }
    }

    /// Generic remote call: `{func, args}`.
    pub fn call(operation: &str, args: Vec<Value>) -> Self {
        let mut data = Payload::new();
        data.insert("func".to_string(), Value::from(operation));
        data.insert("args".to_string(), Value::List(args));
        Self::new(EnvelopeType::Call, data)
    }

    /// Raw payload send: `{cmd, payload}`.
    pub fn send(cmd: &str, payload: Value) -> Self {
        let mut data = Payload::new();
        data.insert(TAG_FIELD.to_string(), Value::from(cmd));
        data.insert("payload".to_string(), payload);
        Self::new(EnvelopeType::Send, data)
    }

    pub fn broadcast(data: Payload) -> Self {
        Self::new(EnvelopeType::Broadcast, data)
    }

    /// Tagged push, as the host emits them.
    pub fn push(tag: &str, mut fields: Payload) -> Self {
        fields.shift_insert(0, TAG_FIELD.to_string(), Value::from(tag));
        Self::new(EnvelopeType::Push, fields)
    }

    pub fn with_echo(mut self, echo: impl Into<String>) -> Self {
        self.set_echo(echo);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn echo(&self) -> Option<&str> {
        self.data.get(ECHO_FIELD).and_then(Value::as_str)
    }

    pub fn set_echo(&mut self, echo: impl Into<String>) {
        self.data
            .shift_insert(0, ECHO_FIELD.to_string(), Value::String(echo.into()));
    }

    /// Return the envelope's echo, assigning a fresh one if absent.
    pub fn ensure_echo(&mut self) -> String {
        if let Some(echo) = self.echo() {
            return echo.to_string();
        }
        let echo = uuid::Uuid::new_v4().to_string();
        self.set_echo(echo.clone());
        echo
    }

    /// Push tag, only for push-kind envelopes.
    pub fn tag(&self) -> Option<&str> {
        if !self.kind.is_push() {
            return None;
        }
        self.data.get(TAG_FIELD).and_then(Value::as_str)
    }

    /// Ack result code; `None` when the reply carries no code.
    pub fn result_code(&self) -> Option<i64> {
        self.data.get(RESULT_CODE_FIELD).and_then(Value::as_i64)
    }

    pub fn is_ack_error(&self) -> bool {
        self.result_code().is_some_and(|code| code != 0)
    }

    pub fn error_message(&self) -> &str {
        self.data
            .get(ERROR_MESSAGE_FIELD)
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}
