//! Inbound protocol event dispatch for an established connection.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::DispatchError;
use crate::signaling::Relay;
use crate::AppState;

use super::events::{conversation_id_of, receiver_id_of, EventName, GatewayMessage, InboundEvent};
use super::session::ConnectionSession;

/// Handle one validated client event.
///
/// Failures never close the connection. Call operations that fail with a
/// user-facing error answer the requesting connection with `call-error`;
/// everything else is logged and dropped.
pub async fn handle_event(state: &AppState, session: &ConnectionSession, event: InboundEvent) {
    let name = event.name();
    let Err(err) = dispatch(state, session, event).await else {
        return;
    };

    if name.starts_with("call-") && err.is_user_facing() {
        tracing::debug!(
            connection_id = %session.connection_id,
            event = name,
            error = %err,
            "call request refused"
        );
        state.fanout.send(
            &session.connection_id,
            Arc::new(GatewayMessage::call_error(&err.to_string())),
        );
        return;
    }

    match err {
        DispatchError::Upstream(_) => tracing::error!(
            user_id = %session.user_id,
            event = name,
            error = %err,
            "event handler failed"
        ),
        _ => tracing::warn!(
            user_id = %session.user_id,
            event = name,
            error = %err,
            "event dropped"
        ),
    }
}

async fn dispatch(
    state: &AppState,
    session: &ConnectionSession,
    event: InboundEvent,
) -> Result<(), DispatchError> {
    let user_id = session.user_id.as_str();
    let connection_id = session.connection_id.as_str();

    match event {
        InboundEvent::JoinGroup(p) => {
            state.groups.join(&p.room_id, connection_id);
            tracing::debug!(user_id, room_id = %p.room_id, "joined group");
        }
        InboundEvent::LeaveGroup(p) => {
            state.groups.leave(&p.room_id, connection_id);
            tracing::debug!(user_id, room_id = %p.room_id, "left group");
        }
        InboundEvent::SendMessage(p) => {
            if state.groups.join(&p.room_id, connection_id) {
                tracing::debug!(user_id, room_id = %p.room_id, "joined group on send");
            }
            push_group(state, &p.room_id, None, EventName::RECEIVE_MESSAGE, p.message);
        }
        InboundEvent::ReadMessage(p) => {
            let updated = state.directory.mark_read(&p.room_id, user_id).await?;
            tracing::debug!(user_id, room_id = %p.room_id, updated, "messages marked read");
            push_group(
                state,
                &p.room_id,
                Some(connection_id),
                EventName::READ_MESSAGE,
                json!({ "roomId": p.room_id, "userId": user_id }),
            );
        }
        InboundEvent::GetLastMessage(p) => {
            let last = state.directory.last_message(&p.room_id).await?;
            push_group(
                state,
                &p.room_id,
                None,
                EventName::GET_LAST_MESSAGE,
                json!({ "roomId": p.room_id, "data": last }),
            );
        }
        InboundEvent::PinMessage(p) => push_message(state, EventName::PIN_MESSAGE, p.message)?,
        InboundEvent::UnpinMessage(p) => push_message(state, EventName::UNPIN_MESSAGE, p.message)?,
        InboundEvent::DeleteMessage(p) => push_message(state, EventName::DELETE_MESSAGE, p.message)?,
        InboundEvent::SendNotification(p) | InboundEvent::ReceiveNotification(p) => {
            push_notification(state, p.notification)?;
        }
        InboundEvent::SendFriendRequest(p) => push_notification(state, p.request)?,
        InboundEvent::LikePost(p) => {
            let created = state
                .directory
                .record_post_like(user_id, &p.author_id, &p.post_id)
                .await?;
            match created {
                Some(notification) => {
                    push_user(state, &p.author_id, json!({ "notification": notification }));
                }
                None => tracing::debug!(user_id, post_id = %p.post_id, "like already notified"),
            }
        }
        InboundEvent::CallInitiate(p) => {
            state
                .signaling
                .initiate(session, &p.conversation_id, &p.target_user_id, p.is_video_call)
                .await?;
        }
        InboundEvent::CallAccept(p) => {
            state.signaling.accept(&p.call_id, user_id, connection_id)?;
        }
        InboundEvent::CallReject(p) => state.signaling.reject(&p.call_id, user_id)?,
        InboundEvent::CallEnd(p) => {
            state.signaling.end(&p.call_id, user_id);
        }
        InboundEvent::CallOffer(p) => {
            state
                .signaling
                .relay(user_id, &p.call_id, &p.target_user_id, Relay::Offer(p.offer))?;
        }
        InboundEvent::CallAnswer(p) => {
            state
                .signaling
                .relay(user_id, &p.call_id, &p.target_user_id, Relay::Answer(p.answer))?;
        }
        InboundEvent::CallIceCandidate(p) => {
            state.signaling.relay(
                user_id,
                &p.call_id,
                &p.target_user_id,
                Relay::IceCandidate(p.candidate),
            )?;
        }
        InboundEvent::CallMediaToggle(p) => {
            state
                .signaling
                .toggle_media(&p.call_id, user_id, p.video_enabled, p.audio_enabled)?;
        }
        InboundEvent::Heartbeat => {
            // Last-seen refresh runs beside the read loop.
            let directory = state.directory.clone();
            let user_id = user_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = directory.update_user_status(&user_id, true).await {
                    tracing::warn!(user_id = %user_id, error = %e, "heartbeat status update failed");
                }
            });
        }
    }
    Ok(())
}

/// Pin/unpin/delete: relay the message to its conversation's group.
fn push_message(state: &AppState, event: &str, message: Value) -> Result<(), DispatchError> {
    let group_id = conversation_id_of(&message)
        .ok_or_else(|| DispatchError::Validation("message has no conversation id".to_string()))?;
    push_group(state, &group_id, None, event, message);
    Ok(())
}

fn push_notification(state: &AppState, notification: Value) -> Result<(), DispatchError> {
    let receiver = receiver_id_of(&notification)
        .ok_or_else(|| DispatchError::Validation("notification has no receiver".to_string()))?;
    push_user(state, &receiver, json!({ "notification": notification }));
    Ok(())
}

fn push_group(state: &AppState, group_id: &str, except: Option<&str>, event: &str, data: Value) -> usize {
    let members = state.groups.members(group_id);
    let targets = members.iter().filter(|id| Some(id.as_str()) != except);
    state.fanout.send_all(targets, GatewayMessage::new(event, data))
}

fn push_user(state: &AppState, user_id: &str, data: Value) -> usize {
    let connections = state.presence.lookup(user_id);
    if connections.is_empty() {
        tracing::debug!(user_id, "notification receiver is not connected here");
    }
    state
        .fanout
        .send_all(&connections, GatewayMessage::new(EventName::RECEIVE_NOTIFICATION, data))
}
