use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::task::JoinHandle;

use realtime_common::id;

use super::store::{CallSession, CallStore, Departure};
use crate::directory::Directory;
use crate::error::DispatchError;
use crate::gateway::events::{EventName, GatewayMessage};
use crate::gateway::fanout::Fanout;
use crate::gateway::groups::GroupTracker;
use crate::gateway::presence::PresenceRegistry;
use crate::gateway::session::ConnectionSession;

pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// A WebRTC payload relayed verbatim between two participants.
#[derive(Debug)]
pub enum Relay {
    Offer(Value),
    Answer(Value),
    IceCandidate(Value),
}

impl Relay {
    fn event(&self) -> &'static str {
        match self {
            Self::Offer(_) => EventName::CALL_OFFER,
            Self::Answer(_) => EventName::CALL_ANSWER,
            Self::IceCandidate(_) => EventName::CALL_ICE_CANDIDATE,
        }
    }

    fn into_field(self) -> (&'static str, Value) {
        match self {
            Self::Offer(v) => ("offer", v),
            Self::Answer(v) => ("answer", v),
            Self::IceCandidate(v) => ("candidate", v),
        }
    }
}

/// Drives call lifecycle over the [`CallStore`] and pushes the resulting
/// protocol events to the right local connections.
pub struct Signaling {
    presence: Arc<PresenceRegistry>,
    groups: Arc<GroupTracker>,
    fanout: Arc<Fanout>,
    directory: Arc<dyn Directory>,
    store: CallStore,
}

impl Signaling {
    pub fn new(
        presence: Arc<PresenceRegistry>,
        groups: Arc<GroupTracker>,
        fanout: Arc<Fanout>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self {
            presence,
            groups,
            fanout,
            directory,
            store: CallStore::new(),
        }
    }

    pub fn store(&self) -> &CallStore {
        &self.store
    }

    /// Start a call from `caller` to `target_user_id` and ring the target.
    pub async fn initiate(
        &self,
        caller: &ConnectionSession,
        conversation_id: &str,
        target_user_id: &str,
        is_video: bool,
    ) -> Result<CallSession, DispatchError> {
        if caller.user_id == target_user_id {
            return Err(DispatchError::Validation("cannot call yourself".to_string()));
        }

        let session = self.store.create(
            id::call_id(),
            conversation_id,
            &caller.user_id,
            &caller.connection_id,
            target_user_id,
            is_video,
        )?;
        let call_id = session.call_id.clone();

        let targets = self.presence.lookup(target_user_id);
        if targets.is_empty() {
            self.store.end(&call_id);
            return Err(DispatchError::NotFound("User is offline".to_string()));
        }

        let initiator = match self.directory.user(&caller.user_id).await {
            Ok(Some(user)) => json!({
                "_id": user.id,
                "name": user.name,
                "avatar": user.avatar,
            }),
            Ok(None) => json!({ "_id": caller.user_id, "name": caller.user_name }),
            Err(e) => {
                tracing::warn!(user_id = %caller.user_id, error = %e, "initiator lookup failed");
                json!({ "_id": caller.user_id, "name": caller.user_name })
            }
        };

        // The call may have been ended while the lookup was in flight.
        let Some(session) = self.store.mark_ringing(&call_id) else {
            return Err(DispatchError::NotFound("Call not found".to_string()));
        };

        self.fanout.send_all(
            &targets,
            GatewayMessage::new(
                EventName::CALL_INITIATE,
                json!({
                    "callId": call_id,
                    "conversationId": conversation_id,
                    "isVideoCall": is_video,
                    "initiator": initiator,
                }),
            ),
        );
        self.fanout.send(
            &caller.connection_id,
            Arc::new(GatewayMessage::new(
                EventName::CALL_INITIATED,
                json!({ "callId": call_id, "status": "ringing" }),
            )),
        );

        tracing::info!(
            call_id = %call_id,
            caller = %caller.user_id,
            target = %target_user_id,
            is_video,
            "call initiated"
        );
        Ok(session)
    }

    /// Join `user_id` to the call and tell every participant who is in it.
    pub fn accept(
        &self,
        call_id: &str,
        user_id: &str,
        connection_id: &str,
    ) -> Result<CallSession, DispatchError> {
        let session = self.store.accept(call_id, user_id, connection_id)?;
        self.push_to_users(
            &session.participant_ids(),
            GatewayMessage::new(
                EventName::CALL_ACCEPT,
                json!({ "callId": call_id, "participants": session.participants }),
            ),
        );
        tracing::info!(call_id, user_id, "call accepted");
        Ok(session)
    }

    pub fn reject(&self, call_id: &str, user_id: &str) -> Result<(), DispatchError> {
        let session = self.store.end_by(call_id, user_id)?;
        self.push_to_users(
            &session.audience(),
            GatewayMessage::new(
                EventName::CALL_REJECT,
                json!({ "callId": call_id, "rejectedBy": user_id }),
            ),
        );
        tracing::info!(call_id, user_id, "call rejected");
        Ok(())
    }

    /// End a call. Ending a call that no longer exists, or one `user_id` is
    /// not part of, is a no-op.
    pub fn end(&self, call_id: &str, user_id: &str) -> bool {
        let session = match self.store.end_by(call_id, user_id) {
            Ok(session) => session,
            Err(e) => {
                tracing::debug!(call_id, user_id, error = %e, "end ignored");
                return false;
            }
        };
        self.notify_ended(&session, json!({ "callId": call_id, "endedBy": user_id }));
        tracing::info!(call_id, user_id, "call ended");
        true
    }

    /// Forward offer/answer/ICE data from a participant to the target user.
    ///
    /// ICE candidates from non-participants are dropped without an error.
    pub fn relay(
        &self,
        from_user_id: &str,
        call_id: &str,
        target_user_id: &str,
        payload: Relay,
    ) -> Result<usize, DispatchError> {
        if let Err(e) = self.store.authorize_relay(call_id, from_user_id) {
            if matches!(payload, Relay::IceCandidate(_)) {
                return Ok(0);
            }
            return Err(e);
        }

        let event = payload.event();
        let (field, value) = payload.into_field();
        let mut data = json!({ "callId": call_id, "fromUserId": from_user_id });
        data[field] = value;

        let delivered = self
            .fanout
            .send_all(&self.presence.lookup(target_user_id), GatewayMessage::new(event, data));
        tracing::debug!(call_id, from = from_user_id, to = target_user_id, event, "relayed");
        Ok(delivered)
    }

    pub fn toggle_media(
        &self,
        call_id: &str,
        user_id: &str,
        video: Option<bool>,
        audio: Option<bool>,
    ) -> Result<(), DispatchError> {
        let session = self.store.update_media(call_id, user_id, video, audio)?;
        let Some(me) = session.participants.iter().find(|p| p.user_id == user_id) else {
            return Ok(());
        };
        let others: Vec<String> = session
            .participant_ids()
            .into_iter()
            .filter(|id| id != user_id)
            .collect();
        self.push_to_users(
            &others,
            GatewayMessage::new(
                EventName::CALL_MEDIA_UPDATED,
                json!({
                    "callId": call_id,
                    "userId": user_id,
                    "isVideoEnabled": me.video_enabled,
                    "isAudioEnabled": me.audio_enabled,
                }),
            ),
        );
        Ok(())
    }

    /// Drop `user_id` from their call when `connection_id` is the connection
    /// they joined it with. Other connections of the same user closing leave
    /// the call untouched.
    pub fn handle_disconnect(&self, user_id: &str, connection_id: &str) {
        let Some(session) = self.store.call_of(user_id) else {
            return;
        };
        let joined_here = session
            .participants
            .iter()
            .any(|p| p.user_id == user_id && p.connection_id == connection_id);
        if !joined_here {
            return;
        }

        match self.store.remove_participant(&session.call_id, user_id) {
            Some(Departure::Left(remaining)) => {
                self.push_to_users(
                    &remaining.participant_ids(),
                    GatewayMessage::new(
                        EventName::PARTICIPANT_LEFT,
                        json!({ "callId": remaining.call_id, "userId": user_id }),
                    ),
                );
                tracing::info!(call_id = %remaining.call_id, user_id, "participant left call");
            }
            Some(Departure::Ended(ended)) => {
                self.push_to_users(
                    &ended.audience(),
                    GatewayMessage::new(
                        EventName::CALL_END,
                        json!({ "callId": ended.call_id, "endedBy": user_id }),
                    ),
                );
                tracing::info!(call_id = %ended.call_id, user_id, "call ended by disconnect");
            }
            None => {}
        }
    }

    /// End every call left unanswered for too long. Returns how many ended.
    pub fn sweep(&self, now: Instant) -> usize {
        let expired = self.store.sweep_expired(now);
        for session in &expired {
            self.notify_ended(
                session,
                json!({ "callId": session.call_id, "reason": "timeout" }),
            );
            tracing::info!(call_id = %session.call_id, "unanswered call timed out");
        }
        expired.len()
    }

    /// Run [`sweep`](Self::sweep) on a fixed period, never faster than once
    /// per [`MIN_SWEEP_INTERVAL`].
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        let every = every.max(MIN_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep(Instant::now());
            }
        })
    }

    /// `call-end` goes to participants, invitees and the conversation group,
    /// each connection at most once.
    fn notify_ended(&self, session: &CallSession, data: Value) {
        let mut targets = self.connections_of(&session.audience());
        targets.extend(self.groups.members(&session.conversation_id));
        self.fanout
            .send_all(&targets, GatewayMessage::new(EventName::CALL_END, data));
    }

    fn push_to_users(&self, user_ids: &[String], message: GatewayMessage) -> usize {
        let targets = self.connections_of(user_ids);
        self.fanout.send_all(&targets, message)
    }

    fn connections_of(&self, user_ids: &[String]) -> HashSet<String> {
        user_ids
            .iter()
            .flat_map(|id| self.presence.lookup(id))
            .collect()
    }
}
