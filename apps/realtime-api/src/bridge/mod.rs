//! Cross-instance event bridge.
//!
//! Events published on the shared broker (or posted to the internal trigger
//! endpoint) are routed through one static table of channel handlers and
//! delivered only to connections that live on this instance.

pub mod subscriber;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::DispatchError;
use crate::gateway::events::{conversation_id_of, receiver_id_of, EventName, GatewayMessage};
use crate::gateway::fanout::Fanout;
use crate::gateway::groups::GroupTracker;
use crate::gateway::presence::PresenceRegistry;

/// Broker channel names.
pub struct Channel;

impl Channel {
    pub const MESSAGE_CREATED: &'static str = "message.created";
    pub const MESSAGE_READ: &'static str = "message.read";
    pub const MESSAGE_DELETED: &'static str = "message.deleted";
    pub const MESSAGE_PINNED: &'static str = "message.pinned";
    pub const MESSAGE_UNPINNED: &'static str = "message.unpinned";
    pub const NOTIFICATION_SENT: &'static str = "notification.sent";
    pub const USER_STATUS_CHANGED: &'static str = "user.status.changed";
    pub const POST_LIKED: &'static str = "post.liked";
}

type Handler = fn(&EventBridge, &Value) -> Result<usize, DispatchError>;

/// Channel → handler. Handlers return the number of connections reached.
const HANDLERS: &[(&str, Handler)] = &[
    (Channel::MESSAGE_CREATED, EventBridge::on_message_created),
    (Channel::MESSAGE_READ, EventBridge::on_message_read),
    (Channel::MESSAGE_DELETED, EventBridge::on_message_deleted),
    (Channel::MESSAGE_PINNED, EventBridge::on_message_pinned),
    (Channel::MESSAGE_UNPINNED, EventBridge::on_message_unpinned),
    (Channel::NOTIFICATION_SENT, EventBridge::on_notification_sent),
    (Channel::USER_STATUS_CHANGED, EventBridge::on_user_status_changed),
    (Channel::POST_LIKED, EventBridge::on_post_liked),
];

/// Every channel the bridge subscribes to.
pub fn channels() -> impl Iterator<Item = &'static str> {
    HANDLERS.iter().map(|(name, _)| *name)
}

// ---------------------------------------------------------------------------
// Broker payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageCreated {
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    room_id: Option<String>,
    #[serde(default)]
    conversation_title: Option<String>,
    message: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRead {
    room_id: String,
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct MessageEnvelope {
    message: Value,
}

#[derive(Debug, Deserialize)]
struct NotificationEnvelope {
    notification: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserStatusChanged {
    user_id: String,
    is_online: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostLiked {
    author_id: String,
    #[serde(default)]
    notification: Value,
}

fn parse<T: DeserializeOwned>(data: &Value) -> Result<T, DispatchError> {
    T::deserialize(data).map_err(|e| DispatchError::Broker(e.to_string()))
}

fn as_object(message: Value) -> Result<Map<String, Value>, DispatchError> {
    match message {
        Value::Object(map) => Ok(map),
        _ => Err(DispatchError::Broker("message must be an object".to_string())),
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

pub struct EventBridge {
    presence: Arc<PresenceRegistry>,
    groups: Arc<GroupTracker>,
    fanout: Arc<Fanout>,
}

impl EventBridge {
    pub fn new(presence: Arc<PresenceRegistry>, groups: Arc<GroupTracker>, fanout: Arc<Fanout>) -> Self {
        Self {
            presence,
            groups,
            fanout,
        }
    }

    /// Raw broker payload entry point. Malformed JSON is logged and dropped.
    pub fn handle_broker_message(&self, channel: &str, payload: &str) -> usize {
        match serde_json::from_str::<Value>(payload) {
            Ok(data) => self.dispatch(channel, &data),
            Err(e) => {
                let err = DispatchError::Broker(e.to_string());
                tracing::warn!(channel, error = %err, "dropping broker message");
                0
            }
        }
    }

    /// Route an already-decoded event to local connections. Returns the
    /// number of connections reached; failures are logged, never raised.
    pub fn dispatch(&self, channel: &str, data: &Value) -> usize {
        let Some((_, handler)) = HANDLERS.iter().find(|(name, _)| *name == channel) else {
            tracing::warn!(channel, "no handler for channel");
            return 0;
        };
        match handler(self, data) {
            Ok(delivered) => {
                tracing::debug!(channel, delivered, "event dispatched");
                delivered
            }
            Err(e) => {
                tracing::warn!(channel, error = %e, "dropping event");
                0
            }
        }
    }

    fn on_message_created(&self, data: &Value) -> Result<usize, DispatchError> {
        let event: MessageCreated = parse(data)?;
        let group_id = event
            .conversation_id
            .filter(|id| !id.is_empty())
            .or(event.room_id.filter(|id| !id.is_empty()))
            .ok_or_else(|| DispatchError::Broker("missing conversationId/roomId".to_string()))?;

        let mut message = as_object(event.message)?;
        message.insert("conversationId".to_string(), json!(group_id));
        if let Some(title) = event.conversation_title.filter(|t| !t.is_empty()) {
            attach_title(&mut message, title);
        }

        Ok(self.push_group(&group_id, EventName::RECEIVE_MESSAGE, Value::Object(message)))
    }

    fn on_message_read(&self, data: &Value) -> Result<usize, DispatchError> {
        let event: MessageRead = parse(data)?;
        Ok(self.push_group(
            &event.room_id,
            EventName::READ_MESSAGE,
            json!({ "roomId": event.room_id, "userId": event.user_id }),
        ))
    }

    fn on_message_deleted(&self, data: &Value) -> Result<usize, DispatchError> {
        let MessageEnvelope { message } = parse(data)?;
        let group_id = conversation_id_of(&message)
            .ok_or_else(|| DispatchError::Broker("missing conversation id".to_string()))?;
        let mut message = as_object(message)?;
        message.insert("conversationId".to_string(), json!(group_id));
        Ok(self.push_group(&group_id, EventName::DELETE_MESSAGE, Value::Object(message)))
    }

    fn on_message_pinned(&self, data: &Value) -> Result<usize, DispatchError> {
        self.push_message_to_group(data, EventName::PIN_MESSAGE)
    }

    fn on_message_unpinned(&self, data: &Value) -> Result<usize, DispatchError> {
        self.push_message_to_group(data, EventName::UNPIN_MESSAGE)
    }

    fn on_notification_sent(&self, data: &Value) -> Result<usize, DispatchError> {
        let NotificationEnvelope { notification } = parse(data)?;
        let receiver = receiver_id_of(&notification)
            .ok_or_else(|| DispatchError::Broker("missing notification receiver".to_string()))?;
        let kind = notification
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");
        tracing::debug!(receiver = %receiver, kind, "notification for user");
        Ok(self.push_user(
            &receiver,
            EventName::RECEIVE_NOTIFICATION,
            json!({ "notification": notification }),
        ))
    }

    /// Reserved channel: validated and logged only.
    fn on_user_status_changed(&self, data: &Value) -> Result<usize, DispatchError> {
        let event: UserStatusChanged = parse(data)?;
        tracing::info!(user_id = %event.user_id, is_online = event.is_online, "user status changed");
        Ok(0)
    }

    fn on_post_liked(&self, data: &Value) -> Result<usize, DispatchError> {
        let event: PostLiked = parse(data)?;
        if event.notification.is_null() {
            return Ok(0);
        }
        Ok(self.push_user(
            &event.author_id,
            EventName::RECEIVE_NOTIFICATION,
            json!({ "notification": event.notification }),
        ))
    }

    fn push_message_to_group(&self, data: &Value, event: &str) -> Result<usize, DispatchError> {
        let MessageEnvelope { message } = parse(data)?;
        let group_id = conversation_id_of(&message)
            .ok_or_else(|| DispatchError::Broker("missing conversation id".to_string()))?;
        Ok(self.push_group(&group_id, event, message))
    }

    fn push_group(&self, group_id: &str, event: &str, data: Value) -> usize {
        let members = self.groups.members(group_id);
        if members.is_empty() {
            tracing::warn!(group_id, event, "group has no local members, nothing delivered");
            return 0;
        }
        self.fanout.send_all(&members, GatewayMessage::new(event, data))
    }

    fn push_user(&self, user_id: &str, event: &str, data: Value) -> usize {
        let connections = self.presence.lookup(user_id);
        if connections.is_empty() {
            tracing::debug!(user_id, event, "user has no local connections");
            return 0;
        }
        self.fanout.send_all(&connections, GatewayMessage::new(event, data))
    }
}

/// Put a display title on the message's conversation without clobbering an
/// existing one.
fn attach_title(message: &mut Map<String, Value>, title: String) {
    let conversation = match message.remove("conversation") {
        Some(Value::Object(mut conversation)) => {
            conversation.entry("title").or_insert(Value::String(title));
            Value::Object(conversation)
        }
        Some(Value::String(id)) => json!({ "_id": id, "title": title }),
        _ => json!({ "title": title }),
    };
    message.insert("conversation".to_string(), conversation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::Receiver;

    struct Harness {
        bridge: EventBridge,
        presence: Arc<PresenceRegistry>,
        groups: Arc<GroupTracker>,
        fanout: Arc<Fanout>,
    }

    fn harness() -> Harness {
        let presence = Arc::new(PresenceRegistry::new());
        let groups = Arc::new(GroupTracker::new());
        let fanout = Arc::new(Fanout::new(16));
        Harness {
            bridge: EventBridge::new(presence.clone(), groups.clone(), fanout.clone()),
            presence,
            groups,
            fanout,
        }
    }

    impl Harness {
        fn member(&self, user: &str, conn: &str, group: &str) -> Receiver<Arc<GatewayMessage>> {
            self.presence.register(user, conn);
            self.groups.join(group, conn);
            self.fanout.attach(conn)
        }
    }

    #[test]
    fn table_covers_every_channel() {
        let names: Vec<_> = channels().collect();
        assert_eq!(names.len(), 8);
        assert!(names.contains(&"post.liked"));
        assert!(names.contains(&"user.status.changed"));
    }

    #[test]
    fn message_created_to_empty_group_delivers_nothing() {
        let h = harness();
        let delivered = h.bridge.dispatch(
            Channel::MESSAGE_CREATED,
            &json!({ "conversationId": "c1", "message": { "text": "hi" } }),
        );
        assert_eq!(delivered, 0);
    }

    #[test]
    fn message_created_is_normalized() {
        let h = harness();
        let mut rx = h.member("u1", "conn_1", "c1");

        let delivered = h.bridge.dispatch(
            Channel::MESSAGE_CREATED,
            &json!({
                "roomId": "c1",
                "conversationTitle": "Weekend",
                "message": { "text": "hi", "conversation": "c1" }
            }),
        );
        assert_eq!(delivered, 1);

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.event, EventName::RECEIVE_MESSAGE);
        assert_eq!(msg.data["conversationId"], "c1");
        assert_eq!(msg.data["conversation"]["_id"], "c1");
        assert_eq!(msg.data["conversation"]["title"], "Weekend");
        assert_eq!(msg.data["text"], "hi");
    }

    #[test]
    fn existing_conversation_title_is_kept() {
        let mut message = json!({ "conversation": { "_id": "c1", "title": "Old" } })
            .as_object()
            .cloned()
            .unwrap();
        attach_title(&mut message, "New".to_string());
        assert_eq!(message["conversation"]["title"], "Old");
    }

    #[test]
    fn message_deleted_resolves_populated_conversation() {
        let h = harness();
        let mut rx = h.member("u1", "conn_1", "c9");

        h.bridge.dispatch(
            Channel::MESSAGE_DELETED,
            &json!({ "message": { "_id": "m1", "conversation": { "_id": "c9" } } }),
        );
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.event, EventName::DELETE_MESSAGE);
        assert_eq!(msg.data["conversationId"], "c9");
    }

    #[test]
    fn pin_and_unpin_go_to_group() {
        let h = harness();
        let mut rx = h.member("u1", "conn_1", "c1");
        let data = json!({ "message": { "_id": "m1", "conversation": { "_id": "c1" } } });

        h.bridge.dispatch(Channel::MESSAGE_PINNED, &data);
        h.bridge.dispatch(Channel::MESSAGE_UNPINNED, &data);
        assert_eq!(rx.try_recv().unwrap().event, EventName::PIN_MESSAGE);
        assert_eq!(rx.try_recv().unwrap().event, EventName::UNPIN_MESSAGE);
    }

    #[test]
    fn notification_reaches_every_receiver_connection() {
        let h = harness();
        h.presence.register("u2", "conn_a");
        h.presence.register("u2", "conn_b");
        let mut a = h.fanout.attach("conn_a");
        let mut b = h.fanout.attach("conn_b");

        let delivered = h.bridge.dispatch(
            Channel::NOTIFICATION_SENT,
            &json!({ "notification": { "type": "comment", "receiver": { "_id": "u2" } } }),
        );
        assert_eq!(delivered, 2);
        for rx in [&mut a, &mut b] {
            let msg = rx.try_recv().unwrap();
            assert_eq!(msg.event, EventName::RECEIVE_NOTIFICATION);
            assert_eq!(msg.data["notification"]["type"], "comment");
        }
    }

    #[test]
    fn post_liked_without_notification_is_ignored() {
        let h = harness();
        let mut rx = h.member("author", "conn_1", "c1");
        assert_eq!(h.bridge.dispatch(Channel::POST_LIKED, &json!({ "authorId": "author" })), 0);
        assert!(rx.try_recv().is_err());

        let delivered = h.bridge.dispatch(
            Channel::POST_LIKED,
            &json!({ "authorId": "author", "notification": { "postId": "p1" } }),
        );
        assert_eq!(delivered, 1);
    }

    #[test]
    fn user_status_changed_delivers_nothing() {
        let h = harness();
        let _rx = h.member("u1", "conn_1", "c1");
        let delivered = h.bridge.dispatch(
            Channel::USER_STATUS_CHANGED,
            &json!({ "userId": "u1", "isOnline": false }),
        );
        assert_eq!(delivered, 0);
    }

    #[test]
    fn malformed_and_unknown_input_is_dropped() {
        let h = harness();
        let mut rx = h.member("u1", "conn_1", "c1");

        assert_eq!(h.bridge.handle_broker_message(Channel::MESSAGE_CREATED, "{not json"), 0);
        assert_eq!(h.bridge.dispatch(Channel::MESSAGE_READ, &json!({ "roomId": "c1" })), 0);
        assert_eq!(h.bridge.dispatch("chat.exploded", &json!({})), 0);
        assert!(rx.try_recv().is_err());

        let delivered = h.bridge.handle_broker_message(
            Channel::MESSAGE_READ,
            r#"{"roomId":"c1","userId":"u2"}"#,
        );
        assert_eq!(delivered, 1);
        assert_eq!(rx.try_recv().unwrap().data["userId"], "u2");
    }
}
