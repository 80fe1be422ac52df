//! Connect and disconnect hooks. The only place that registers or retires a
//! connection.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use crate::AppState;

use super::events::{EventName, GatewayMessage};
use super::session::ConnectionSession;

/// Bring a connection online: open its outbound queue, register presence,
/// announce the user to online friends and join the user's conversations.
///
/// Directory failures are logged and never prevent registration.
pub async fn on_connect(
    state: &AppState,
    session: &ConnectionSession,
) -> mpsc::Receiver<Arc<GatewayMessage>> {
    let user_id = session.user_id.as_str();
    let connection_id = session.connection_id.as_str();

    let outbound = state.fanout.attach(connection_id);
    let came_online = state.presence.register(user_id, connection_id);

    if came_online {
        if let Err(e) = state.directory.update_user_status(user_id, true).await {
            tracing::warn!(user_id, error = %e, "failed to mark user online");
        }
        announce_to_friends(state, session).await;
    }

    match state.directory.user_conversations(user_id).await {
        Ok(conversations) => {
            for conversation in &conversations {
                state.groups.join(&conversation.id, connection_id);
            }
            tracing::debug!(user_id, groups = conversations.len(), "joined conversation groups");
        }
        Err(e) => tracing::warn!(user_id, error = %e, "failed to load conversations"),
    }

    outbound
}

async fn announce_to_friends(state: &AppState, session: &ConnectionSession) {
    let user_id = session.user_id.as_str();
    let friends = match state.directory.online_friends(user_id).await {
        Ok(friends) => friends,
        Err(e) => {
            tracing::warn!(user_id, error = %e, "failed to load online friends");
            return;
        }
    };
    if friends.is_empty() {
        return;
    }

    let name = match &session.user_name {
        Some(name) => Some(name.clone()),
        None => state
            .directory
            .user(user_id)
            .await
            .ok()
            .flatten()
            .map(|user| user.name),
    };

    let message = Arc::new(GatewayMessage::new(
        EventName::FRIEND_ONLINE,
        json!({ "_id": user_id, "isOnline": true, "name": name }),
    ));
    let mut delivered = 0;
    for friend in &friends {
        for connection in state.presence.lookup(&friend.id) {
            if state.fanout.send(&connection, message.clone()) {
                delivered += 1;
            }
        }
    }
    tracing::debug!(user_id, friends = friends.len(), delivered, "friend-online sent");
}

/// Retire a connection: end or leave its call, drop it from presence and every
/// group, and tell the rest of the instance when the user went offline.
pub async fn on_disconnect(state: &AppState, session: &ConnectionSession) {
    let user_id = session.user_id.as_str();
    let connection_id = session.connection_id.as_str();

    state.signaling.handle_disconnect(user_id, connection_id);

    state.fanout.detach(connection_id);
    let went_offline = state.presence.unregister(user_id, connection_id);
    let left = state.groups.leave_all(connection_id);
    let dropped = state.groups.cleanup_empty();
    tracing::debug!(connection_id, left, dropped, "connection left groups");

    if went_offline {
        if let Err(e) = state.directory.update_user_status(user_id, false).await {
            tracing::warn!(user_id, error = %e, "failed to mark user offline");
        }
        state.fanout.broadcast_except(
            connection_id,
            GatewayMessage::new(EventName::USER_DISCONNECTED, json!(user_id)),
        );
    }
}
