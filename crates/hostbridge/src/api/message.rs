//! Message operations.

use std::time::Duration;

use indexmap::IndexMap;

use crate::bridge::protocol::Payload;
use crate::bridge::value::Value;
use crate::invoke::{Invoke, InvokeError, InvokeOptions};

pub const SEND_MSG: &str = "nodeIKernelMsgService/sendMsg";
pub const MSG_INFO_LIST_UPDATE: &str = "nodeIKernelMsgListener/onMsgInfoListUpdate";

/// `sendStatus` of a message the host is still sending.
const SEND_STATUS_SENDING: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatType {
    Friend,
    Group,
    TempFromGroup,
}

impl ChatType {
    pub fn code(self) -> i64 {
        match self {
            Self::Friend => 1,
            Self::Group => 2,
            Self::TempFromGroup => 100,
        }
    }
}

/// Conversation a message goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub chat_type: ChatType,
    pub peer_uid: String,
    pub guild_id: String,
}

impl Peer {
    pub fn new(chat_type: ChatType, peer_uid: impl Into<String>) -> Self {
        Self {
            chat_type,
            peer_uid: peer_uid.into(),
            guild_id: String::new(),
        }
    }

    pub fn friend(uid: impl Into<String>) -> Self {
        Self::new(ChatType::Friend, uid)
    }

    pub fn group(group_code: impl Into<String>) -> Self {
        Self::new(ChatType::Group, group_code)
    }

    pub fn to_value(&self) -> Value {
        Value::object([
            ("chatType", Value::from(self.chat_type.code())),
            ("peerUid", Value::from(self.peer_uid.as_str())),
            ("guildId", Value::from(self.guild_id.as_str())),
        ])
    }
}

/// Send `elements` to `peer`.
///
/// The host acks the request at once and reports the sent message later in a
/// message-list update; resolves with that message record.
pub async fn send_message(
    invoker: &dyn Invoke,
    peer: &Peer,
    elements: Vec<Value>,
    timeout: Option<Duration>,
) -> Result<Value, InvokeError> {
    let args = vec![
        Value::object([
            ("msgId", Value::from("0")),
            ("peer", peer.to_value()),
            ("msgElements", Value::List(elements)),
            ("msgAttributeInfos", Value::Map(IndexMap::new())),
        ]),
        Value::Null,
    ];

    let target = peer.peer_uid.clone();
    let mut options = InvokeOptions::new()
        .with_result_tag(MSG_INFO_LIST_UPDATE)
        .with_result_predicate(move |push, _ack| is_sent_to(push, &target));
    if let Some(timeout) = timeout {
        options = options.with_timeout(timeout);
    }

    let push = invoker.invoke(SEND_MSG, args, options).await?;
    first_message(&push)
        .cloned()
        .ok_or_else(|| InvokeError::MissingField {
            operation: SEND_MSG.to_string(),
            field: "msgList",
        })
}

fn first_message(push: &Payload) -> Option<&Value> {
    push.get("msgList").and_then(|list| list.index(0))
}

fn is_sent_to(push: &Payload, peer_uid: &str) -> bool {
    let Some(message) = first_message(push) else {
        return false;
    };
    message.get("peerUid").and_then(Value::as_str) == Some(peer_uid)
        && message.get("sendStatus").and_then(Value::as_i64) != Some(SEND_STATUS_SENDING)
}
