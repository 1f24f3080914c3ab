//! Wire codec for envelopes.
//!
//! Every inbound frame is decoded once into native [`Value`]s before dispatch,
//! and every outbound envelope is encoded once before transmission. The
//! conversion is structural: no key is dropped or reordered.
//!
//! Associative maps use the tagged shape
//! `{"dataType": "Map", "value": [[key, value], ...]}` on the wire.

use indexmap::IndexMap;
use serde_json::Value as Json;
use tokio_tungstenite::tungstenite::Message;

use super::protocol::{Envelope, EnvelopeType, Payload};
use super::value::{MapKey, Value};

const MAP_MARKER_FIELD: &str = "dataType";
const MAP_MARKER: &str = "Map";
const MAP_ENTRIES_FIELD: &str = "value";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("invalid envelope: {0}")]
    Envelope(&'static str),
    #[error("invalid map entry {index}: {reason}")]
    MapEntry { index: usize, reason: &'static str },
}

fn is_map_shape(obj: &serde_json::Map<String, Json>) -> bool {
    obj.len() == 2
        && obj.get(MAP_MARKER_FIELD).and_then(Json::as_str) == Some(MAP_MARKER)
        && obj.contains_key(MAP_ENTRIES_FIELD)
}

/// Wire JSON -> native value.
pub fn decode_value(json: Json) -> Result<Value, CodecError> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => Value::Number(n),
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::List(
            items
                .into_iter()
                .map(decode_value)
                .collect::<Result<_, _>>()?,
        ),
        Json::Object(obj) if is_map_shape(&obj) => decode_map(obj)?,
        Json::Object(obj) => Value::Object(decode_object(obj)?),
    })
}

fn decode_object(obj: serde_json::Map<String, Json>) -> Result<Payload, CodecError> {
    obj.into_iter()
        .map(|(k, v)| Ok((k, decode_value(v)?)))
        .collect()
}

fn decode_map(mut obj: serde_json::Map<String, Json>) -> Result<Value, CodecError> {
    let Some(Json::Array(entries)) = obj.remove(MAP_ENTRIES_FIELD) else {
        return Err(CodecError::Envelope("map entries must be a list"));
    };

    let mut map = IndexMap::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let Json::Array(pair) = entry else {
            return Err(CodecError::MapEntry {
                index,
                reason: "entry is not a list",
            });
        };
        let [key, value]: [Json; 2] = pair.try_into().map_err(|_| CodecError::MapEntry {
            index,
            reason: "entry is not a [key, value] pair",
        })?;
        let key = match key {
            Json::String(s) => MapKey::Str(s),
            Json::Number(n) => n.as_i64().map(MapKey::Int).ok_or(CodecError::MapEntry {
                index,
                reason: "numeric key is not an integer",
            })?,
            _ => {
                return Err(CodecError::MapEntry {
                    index,
                    reason: "key must be a string or integer",
                });
            }
        };
        map.insert(key, decode_value(value)?);
    }
    Ok(Value::Map(map))
}

/// Native value -> wire JSON.
pub fn encode_value(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => Json::Number(n.clone()),
        Value::String(s) => Json::String(s.clone()),
        Value::List(items) => Json::Array(items.iter().map(encode_value).collect()),
        Value::Object(fields) => Json::Object(encode_object(fields)),
        Value::Map(entries) => {
            let pairs = entries
                .iter()
                .map(|(k, v)| {
                    let key = match k {
                        MapKey::Int(n) => Json::from(*n),
                        MapKey::Str(s) => Json::String(s.clone()),
                    };
                    Json::Array(vec![key, encode_value(v)])
                })
                .collect();
            let mut obj = serde_json::Map::with_capacity(2);
            obj.insert(MAP_MARKER_FIELD.to_string(), Json::from(MAP_MARKER));
            obj.insert(MAP_ENTRIES_FIELD.to_string(), Json::Array(pairs));
            Json::Object(obj)
        }
    }
}

fn encode_object(fields: &Payload) -> serde_json::Map<String, Json> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect()
}

pub fn envelope_to_json(envelope: &Envelope) -> Json {
    let mut obj = serde_json::Map::with_capacity(2);
    obj.insert("type".to_string(), Json::from(envelope.kind.as_str()));
    obj.insert("data".to_string(), Json::Object(encode_object(&envelope.data)));
    Json::Object(obj)
}

pub fn envelope_from_json(json: Json) -> Result<Envelope, CodecError> {
    let Json::Object(mut obj) = json else {
        return Err(CodecError::Envelope("envelope is not an object"));
    };
    let kind = match obj.remove("type") {
        Some(Json::String(s)) => EnvelopeType::parse(&s),
        Some(_) => return Err(CodecError::Envelope("type is not a string")),
        None => return Err(CodecError::Envelope("missing type")),
    };
    let data = match obj.remove("data") {
        Some(Json::Object(data)) => decode_object(data)?,
        Some(Json::Null) | None => Payload::new(),
        Some(_) => return Err(CodecError::Envelope("data is not an object")),
    };
    Ok(Envelope { kind, data })
}

pub fn encode_envelope(envelope: &Envelope) -> Result<String, CodecError> {
    let text = serde_json::to_string(&envelope_to_json(envelope))?;
    tracing::trace!(kind = %envelope.kind, frame_size_bytes = text.len(), "Encoding frame");
    Ok(text)
}

pub fn decode_envelope(text: &str) -> Result<Envelope, CodecError> {
    let json: Json = serde_json::from_str(text)?;
    envelope_from_json(json)
}

/// Decode one websocket message. Control frames yield `None`.
pub fn decode_frame(message: Message) -> Result<Option<Envelope>, CodecError> {
    match message {
        Message::Text(text) => decode_envelope(text.as_str()).map(Some),
        Message::Binary(bytes) => decode_envelope(std::str::from_utf8(&bytes)?).map(Some),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => Ok(None),
    }
}

pub fn encode_frame(envelope: &Envelope) -> Result<Message, CodecError> {
    Ok(Message::Text(encode_envelope(envelope)?.into()))
}
