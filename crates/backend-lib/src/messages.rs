//! Wire protocol for the `/reflect` WebSocket channel.
//!
//! Inbound frames carry a double-encoded payload: the outer envelope names
//! the action and holds the inner request as a JSON *string*, which the
//! matching handler decodes. Outbound envelopes carry the payload as a raw
//! JSON value together with an ok/error status.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::room::RoomId;
use crate::session::{ClientRole, PrivateToken, PublicToken};

pub const ERR_INTERNAL: &str = "Internal server error.";
pub const ERR_BAD_JSON: &str = "Bad request, please upgrade your extension to a newer version";
pub const ERR_NO_ROOM: &str = "The room you're trying to join doesn't exist";
pub const ERR_FULL_ROOM: &str = "The room you're trying to join is full";
pub const ERR_NOT_HOST: &str = "You're not a host";
pub const ERR_SHORT_ROOM_NAME: &str = "The room name must be 3 characters or more.";
pub const ERR_LONG_ROOM_NAME: &str = "The room name must be 50 characters or less.";

/// Envelope sent by the extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEnvelope {
    #[serde(rename = "actionType")]
    pub action_type: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Requests the server knows how to dispatch. Unknown tags are dropped by
/// the coordinator with a log line only, so the envelope keeps the tag as a
/// plain string and parsing happens once here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientActionKind {
    Authorize,
    HostRoom,
    JoinRoom,
    DisconnectRoom,
    SendReflection,
    SendVideoDetails,
    Ping,
}

impl ClientActionKind {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "Authorize" => Some(Self::Authorize),
            "HostRoom" => Some(Self::HostRoom),
            "JoinRoom" => Some(Self::JoinRoom),
            "DisconnectRoom" => Some(Self::DisconnectRoom),
            "SendReflection" => Some(Self::SendReflection),
            "SendVideoDetails" => Some(Self::SendVideoDetails),
            "Ping" => Some(Self::Ping),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authorize => "Authorize",
            Self::HostRoom => "HostRoom",
            Self::JoinRoom => "JoinRoom",
            Self::DisconnectRoom => "DisconnectRoom",
            Self::SendReflection => "SendReflection",
            Self::SendVideoDetails => "SendVideoDetails",
            Self::Ping => "Ping",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessageKind {
    Authorize,
    HostRoom,
    JoinRoom,
    UpdateRoom,
    DisconnectRoom,
    ReflectRoom,
    ReflectVideoDetails,
    Pong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Ok,
    Error,
}

/// Envelope written back to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEnvelope {
    #[serde(rename = "actionType")]
    pub action_type: ServerMessageKind,
    pub action: Value,
    pub status: MessageStatus,
    #[serde(rename = "errorMessage")]
    pub error_message: String,
}

impl ServerEnvelope {
    pub fn ok(action_type: ServerMessageKind, action: Value) -> Self {
        Self {
            action_type,
            action,
            status: MessageStatus::Ok,
            error_message: String::new(),
        }
    }

    pub fn error(action_type: ServerMessageKind, error_message: &str) -> Self {
        Self {
            action_type,
            action: Value::Null,
            status: MessageStatus::Error,
            error_message: error_message.to_string(),
        }
    }

    /// Serializes `action` into the envelope; a marshal failure downgrades to
    /// an internal-error reply of the same action type.
    pub fn ok_or_internal<T: Serialize>(action_type: ServerMessageKind, action: &T) -> Self {
        match serde_json::to_value(action) {
            Ok(value) => Self::ok(action_type, value),
            Err(err) => {
                error!(kind = ?action_type, error = %err, "failed to marshal response payload");
                Self::error(action_type, ERR_INTERNAL)
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == MessageStatus::Ok
    }
}

/// A payload addressed to one client. Handlers return these; the coordinator
/// owns the channels and performs the actual writes.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectedMessage {
    pub to: PrivateToken,
    pub message: ServerEnvelope,
}

impl DirectedMessage {
    pub fn new(to: PrivateToken, message: ServerEnvelope) -> Self {
        Self { to, message }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default, rename = "privateToken")]
    pub private_token: PrivateToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub name: String,
    pub image: String,
    #[serde(rename = "privateToken")]
    pub private_token: PrivateToken,
    #[serde(rename = "publicToken")]
    pub public_token: PublicToken,
}

/// Room settings as submitted by a hosting client and as stored on the room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSettings {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinRoomRequest {
    #[serde(default, rename = "roomID")]
    pub room_id: RoomId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRoomResponse {
    pub room: RoomRecord,
    #[serde(rename = "clientType")]
    pub client_type: ClientRole,
}

/// Snapshot of the host's playback position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomReflection {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub state: i32,
    #[serde(default)]
    pub time: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDetails {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, rename = "authorImage")]
    pub author_image: String,
    #[serde(default, rename = "subscriberCount")]
    pub subscriber_count: String,
    #[serde(default, rename = "likeCount")]
    pub like_count: String,
}

impl VideoDetails {
    /// Details count as set only when every field carries a value; partial
    /// scrapes from the extension are ignored.
    pub fn is_complete(&self) -> bool {
        !self.title.is_empty()
            && !self.author.is_empty()
            && !self.author_image.is_empty()
            && !self.subscriber_count.is_empty()
            && !self.like_count.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingPong {
    #[serde(default)]
    pub timestamp: i64,
}

/// The peer-visible slice of a client: no private token, no email.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub name: String,
    pub image: String,
    #[serde(rename = "publicToken")]
    pub public_token: PublicToken,
}

/// The peer-visible slice of a room, used by `HostRoom`, `JoinRoom` and
/// `UpdateRoom` payloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomRecord {
    #[serde(rename = "roomID")]
    pub room_id: RoomId,
    pub host: ClientRecord,
    pub viewers: Vec<ClientRecord>,
    pub settings: RoomSettings,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}
