use serde::{Deserialize, Serialize};

use crate::api::ErrorKind;
use crate::models::{Attachment, Avatar, ChatMessage, ConnectionId, Participant, Profile, ReactionSnapshot};

/// Events sent FROM server TO clients over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// First frame on every connection: tells the client its identity
    Ready { id: ConnectionId },

    /// A connection joined the room
    UserJoined(Participant),

    /// A joined connection went away
    UserLeft(Participant),

    /// Full roster snapshot
    Userlist { count: usize, list: Vec<Participant> },

    /// A message was accepted (or a single record was requested)
    Message(ChatMessage),

    /// Sender-only reply to a `message` command that carried an `ackId`
    Ack {
        ack_id: u64,
        accepted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<ErrorKind>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },

    /// Sender-only rejection for clients that did not ask for an ack
    MessageError {
        error_kind: ErrorKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },

    ReactionUpdate {
        message_id: String,
        reactions: ReactionSnapshot,
    },

    SeenUpdate {
        message_id: String,
        seen: Vec<Participant>,
    },

    /// Relayed to every connection except the typist
    Typing {
        id: ConnectionId,
        profile: Profile,
        is_typing: bool,
    },

    /// Most recent records, oldest first
    History(Vec<ChatMessage>),

    HistoryError { error_kind: ErrorKind },

    /// Records removed by the retention sweep
    MessageDelete { ids: Vec<String> },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    Join {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        group: Option<String>,
        #[serde(default)]
        avatar: Option<Avatar>,
    },

    Message {
        #[serde(default)]
        text: String,
        #[serde(default)]
        attachment: Option<Attachment>,
        #[serde(default)]
        client_correlation_id: Option<String>,
        #[serde(default)]
        ack_id: Option<u64>,
    },

    React {
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        emoji: Option<String>,
    },

    Seen {
        #[serde(default)]
        message_id: Option<String>,
    },

    Typing {
        #[serde(default)]
        is_typing: bool,
    },

    RequestHistory {
        #[serde(default)]
        limit: Option<u32>,
    },

    RequestMessage { id: String },
}
