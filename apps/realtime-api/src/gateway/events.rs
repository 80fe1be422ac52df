//! Gateway wire format: inbound protocol events, outbound event names, and
//! the JSON frames exchanged over the socket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DispatchError;

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A frame sent from the server to a client connection.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub event: String,
    pub data: Value,
}

impl GatewayMessage {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }

    /// Build a `call-error` frame carrying a user-facing message.
    pub fn call_error(message: &str) -> Self {
        Self::new(EventName::CALL_ERROR, serde_json::json!({ "error": message }))
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A raw frame received from a client, before the payload is validated.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// A validated inbound protocol event.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundEvent {
    #[serde(alias = "join-room")]
    JoinGroup(RoomPayload),
    #[serde(alias = "leave-room")]
    LeaveGroup(RoomPayload),
    SendMessage(SendMessagePayload),
    ReadMessage(RoomPayload),
    GetLastMessage(RoomPayload),
    PinMessage(MessagePayload),
    #[serde(alias = "un-pin-message")]
    UnpinMessage(MessagePayload),
    DeleteMessage(MessagePayload),
    SendNotification(NotificationPayload),
    ReceiveNotification(NotificationPayload),
    #[serde(alias = "send-request-add-friend")]
    SendFriendRequest(FriendRequestPayload),
    LikePost(LikePostPayload),
    CallInitiate(InitiateCallPayload),
    CallAccept(CallRef),
    CallReject(CallRef),
    CallEnd(CallRef),
    CallOffer(OfferPayload),
    CallAnswer(AnswerPayload),
    CallIceCandidate(IceCandidatePayload),
    CallMediaToggle(MediaTogglePayload),
    Heartbeat,
}

impl InboundEvent {
    /// Validate a raw client frame into a typed event.
    pub fn from_client(msg: ClientMessage) -> Result<Self, DispatchError> {
        let event = msg.event;
        // Heartbeats carry no payload; clients sometimes send `{}` anyway.
        let framed = if msg.data.is_null() || event == "heartbeat" {
            serde_json::json!({ "event": event })
        } else {
            serde_json::json!({ "event": event, "data": msg.data })
        };
        let parsed: InboundEvent = serde_json::from_value(framed)
            .map_err(|e| DispatchError::Validation(format!("{event}: {e}")))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Protocol name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinGroup(_) => "join-group",
            Self::LeaveGroup(_) => "leave-group",
            Self::SendMessage(_) => "send-message",
            Self::ReadMessage(_) => "read-message",
            Self::GetLastMessage(_) => "get-last-message",
            Self::PinMessage(_) => "pin-message",
            Self::UnpinMessage(_) => "unpin-message",
            Self::DeleteMessage(_) => "delete-message",
            Self::SendNotification(_) => "send-notification",
            Self::ReceiveNotification(_) => "receive-notification",
            Self::SendFriendRequest(_) => "send-friend-request",
            Self::LikePost(_) => "like-post",
            Self::CallInitiate(_) => "call-initiate",
            Self::CallAccept(_) => "call-accept",
            Self::CallReject(_) => "call-reject",
            Self::CallEnd(_) => "call-end",
            Self::CallOffer(_) => "call-offer",
            Self::CallAnswer(_) => "call-answer",
            Self::CallIceCandidate(_) => "call-ice-candidate",
            Self::CallMediaToggle(_) => "call-media-toggle",
            Self::Heartbeat => "heartbeat",
        }
    }

    /// Reject payloads whose required identifiers are empty or not plain ids.
    fn validate(&self) -> Result<(), DispatchError> {
        match self {
            Self::JoinGroup(p)
            | Self::LeaveGroup(p)
            | Self::ReadMessage(p)
            | Self::GetLastMessage(p) => require_id("roomId", &p.room_id),
            Self::SendMessage(p) => {
                require_id("roomId", &p.room_id)?;
                require_value("message", &p.message)
            }
            Self::PinMessage(p) | Self::UnpinMessage(p) | Self::DeleteMessage(p) => {
                require_value("message", &p.message)
            }
            Self::SendNotification(p) | Self::ReceiveNotification(p) => {
                require_value("notification", &p.notification)
            }
            Self::SendFriendRequest(p) => require_value("request", &p.request),
            Self::LikePost(p) => {
                require_id("postId", &p.post_id)?;
                require_id("authorId", &p.author_id)
            }
            Self::CallInitiate(p) => {
                require_id("conversationId", &p.conversation_id)?;
                require_id("targetUserId", &p.target_user_id)
            }
            Self::CallAccept(p) | Self::CallReject(p) | Self::CallEnd(p) => {
                require_id("callId", &p.call_id)
            }
            Self::CallOffer(p) => {
                require_id("callId", &p.call_id)?;
                require_id("targetUserId", &p.target_user_id)?;
                require_value("offer", &p.offer)
            }
            Self::CallAnswer(p) => {
                require_id("callId", &p.call_id)?;
                require_id("targetUserId", &p.target_user_id)?;
                require_value("answer", &p.answer)
            }
            Self::CallIceCandidate(p) => {
                require_id("callId", &p.call_id)?;
                require_id("targetUserId", &p.target_user_id)?;
                require_value("candidate", &p.candidate)
            }
            Self::CallMediaToggle(p) => require_id("callId", &p.call_id),
            Self::Heartbeat => Ok(()),
        }
    }
}

fn require(field: &str, value: &str) -> Result<(), DispatchError> {
    if value.trim().is_empty() {
        return Err(DispatchError::Validation(format!("{field} is required")));
    }
    Ok(())
}

/// Identifiers double as backend path segments and group keys.
fn require_id(field: &str, value: &str) -> Result<(), DispatchError> {
    require(field, value)?;
    if matches!(value, "." | "..") || value.contains(&['/', '\\', '?', '#', '%'][..]) {
        return Err(DispatchError::Validation(format!("{field} is not a valid id")));
    }
    Ok(())
}

fn require_value(field: &str, value: &Value) -> Result<(), DispatchError> {
    if value.is_null() {
        return Err(DispatchError::Validation(format!("{field} is required")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

/// Group id is the conversation id.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPayload {
    #[serde(alias = "groupId", alias = "conversationId")]
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(alias = "groupId", alias = "conversationId")]
    pub room_id: String,
    pub message: Value,
}

#[derive(Debug, Deserialize)]
pub struct MessagePayload {
    pub message: Value,
}

#[derive(Debug, Deserialize)]
pub struct NotificationPayload {
    pub notification: Value,
}

#[derive(Debug, Deserialize)]
pub struct FriendRequestPayload {
    pub request: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikePostPayload {
    pub post_id: String,
    pub author_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCallPayload {
    pub conversation_id: String,
    pub target_user_id: String,
    #[serde(default = "default_true")]
    pub is_video_call: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRef {
    pub call_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    pub call_id: String,
    pub target_user_id: String,
    pub offer: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub call_id: String,
    pub target_user_id: String,
    pub answer: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidatePayload {
    pub call_id: String,
    pub target_user_id: String,
    pub candidate: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTogglePayload {
    pub call_id: String,
    #[serde(default, alias = "isVideoEnabled")]
    pub video_enabled: Option<bool>,
    #[serde(default, alias = "isAudioEnabled")]
    pub audio_enabled: Option<bool>,
}

// ---------------------------------------------------------------------------
// Payload field resolution shared by socket handlers and the event bridge
// ---------------------------------------------------------------------------

/// Resolve the conversation a message belongs to.
///
/// Accepts a populated `conversation._id`, a flattened `conversationId`, or a
/// bare string `conversation`.
pub fn conversation_id_of(message: &Value) -> Option<String> {
    message
        .pointer("/conversation/_id")
        .or_else(|| message.pointer("/conversation/id"))
        .and_then(id_string)
        .or_else(|| message.get("conversationId").and_then(id_string))
        .or_else(|| message.get("conversation").and_then(id_string))
}

/// Resolve the receiving user of a notification or friend request.
pub fn receiver_id_of(notification: &Value) -> Option<String> {
    notification
        .pointer("/receiver/_id")
        .or_else(|| notification.pointer("/receiver/id"))
        .and_then(id_string)
        .or_else(|| notification.get("receiver").and_then(id_string))
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Outbound event names
// ---------------------------------------------------------------------------

/// Event names pushed to clients.
pub struct EventName;

impl EventName {
    pub const RECEIVE_MESSAGE: &'static str = "receive-message";
    pub const READ_MESSAGE: &'static str = "read-message";
    pub const GET_LAST_MESSAGE: &'static str = "get-last-message";
    pub const DELETE_MESSAGE: &'static str = "delete-message";
    pub const PIN_MESSAGE: &'static str = "pin-message";
    pub const UNPIN_MESSAGE: &'static str = "unpin-message";
    pub const RECEIVE_NOTIFICATION: &'static str = "receive-notification";
    pub const FRIEND_ONLINE: &'static str = "friend-online";
    pub const USER_DISCONNECTED: &'static str = "user-disconnected";
    pub const CALL_INITIATE: &'static str = "call-initiate";
    pub const CALL_INITIATED: &'static str = "call-initiated";
    pub const CALL_ACCEPT: &'static str = "call-accept";
    pub const CALL_REJECT: &'static str = "call-reject";
    pub const CALL_END: &'static str = "call-end";
    pub const CALL_OFFER: &'static str = "call-offer";
    pub const CALL_ANSWER: &'static str = "call-answer";
    pub const CALL_ICE_CANDIDATE: &'static str = "call-ice-candidate";
    pub const CALL_ERROR: &'static str = "call-error";
    pub const CALL_MEDIA_UPDATED: &'static str = "call-media-updated";
    pub const PARTICIPANT_LEFT: &'static str = "participant-left";
}
