//! Call session store: call id → session, plus a user → call index that
//! keeps every user in at most one live call.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::DispatchError;

/// Unanswered calls older than this are ended by the sweep.
pub const RING_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Initiating,
    Ringing,
    Active,
    Ended,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    #[serde(skip)]
    pub connection_id: String,
    #[serde(rename = "isVideoEnabled")]
    pub video_enabled: bool,
    #[serde(rename = "isAudioEnabled")]
    pub audio_enabled: bool,
}

/// Snapshot of one signaling negotiation.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub call_id: String,
    pub conversation_id: String,
    pub is_video: bool,
    pub status: CallStatus,
    /// Caller first, then everyone who accepted, in order.
    pub participants: Vec<Participant>,
    /// Users rung but not (yet) joined.
    pub invitees: Vec<String>,
    pub created_at: Instant,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    /// Participant or invitee.
    pub fn involves(&self, user_id: &str) -> bool {
        self.has_participant(user_id) || self.invitees.iter().any(|u| u == user_id)
    }

    pub fn participant_ids(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.user_id.clone()).collect()
    }

    /// Everyone who should hear about the call ending: participants first,
    /// then invitees who never joined.
    pub fn audience(&self) -> Vec<String> {
        let mut users = self.participant_ids();
        for invitee in &self.invitees {
            if !users.contains(invitee) {
                users.push(invitee.clone());
            }
        }
        users
    }

    fn finish(mut self) -> Self {
        self.status = CallStatus::Ended;
        self.ended_at = Some(Utc::now());
        self
    }
}

/// Result of removing a participant.
#[derive(Debug)]
pub enum Departure {
    /// The call continues with the remaining participants.
    Left(CallSession),
    /// Too few participants remained; the call was ended and purged.
    Ended(CallSession),
}

#[derive(Default)]
struct CallMaps {
    sessions: HashMap<String, CallSession>,
    by_user: HashMap<String, String>,
}

impl CallMaps {
    /// Remove a session and every index entry pointing at it.
    fn purge(&mut self, call_id: &str) -> Option<CallSession> {
        let session = self.sessions.remove(call_id)?;
        for participant in &session.participants {
            if self.by_user.get(&participant.user_id).map(String::as_str) == Some(call_id) {
                self.by_user.remove(&participant.user_id);
            }
        }
        Some(session.finish())
    }
}

/// All call sessions on this instance, behind a single lock.
pub struct CallStore {
    inner: Mutex<CallMaps>,
}

impl CallStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CallMaps::default()),
        }
    }

    /// Create a session with the caller as its only participant.
    ///
    /// Fails with `Conflict` if either side is already in a call.
    pub fn create(
        &self,
        call_id: String,
        conversation_id: &str,
        caller_id: &str,
        caller_connection: &str,
        invitee_id: &str,
        is_video: bool,
    ) -> Result<CallSession, DispatchError> {
        let mut maps = self.inner.lock();
        if maps.by_user.contains_key(caller_id) {
            return Err(DispatchError::Conflict(
                "You are already in another call".to_string(),
            ));
        }
        if maps.by_user.contains_key(invitee_id) {
            return Err(DispatchError::Conflict(
                "User is busy in another call".to_string(),
            ));
        }

        let session = CallSession {
            call_id: call_id.clone(),
            conversation_id: conversation_id.to_string(),
            is_video,
            status: CallStatus::Initiating,
            participants: vec![Participant {
                user_id: caller_id.to_string(),
                connection_id: caller_connection.to_string(),
                video_enabled: is_video,
                audio_enabled: true,
            }],
            invitees: vec![invitee_id.to_string()],
            created_at: Instant::now(),
            started_at: None,
            ended_at: None,
        };
        maps.by_user.insert(caller_id.to_string(), call_id.clone());
        maps.sessions.insert(call_id, session.clone());
        Ok(session)
    }

    /// Initiating → Ringing once the invitee has been notified.
    pub fn mark_ringing(&self, call_id: &str) -> Option<CallSession> {
        let mut maps = self.inner.lock();
        let session = maps.sessions.get_mut(call_id)?;
        if session.status == CallStatus::Initiating {
            session.status = CallStatus::Ringing;
        }
        Some(session.clone())
    }

    /// Join a user to a ringing or active call and make it active.
    pub fn accept(
        &self,
        call_id: &str,
        user_id: &str,
        connection_id: &str,
    ) -> Result<CallSession, DispatchError> {
        let mut maps = self.inner.lock();
        if let Some(current) = maps.by_user.get(user_id) {
            if current != call_id {
                return Err(DispatchError::Conflict(
                    "You are already in another call".to_string(),
                ));
            }
        }

        let session = maps
            .sessions
            .get_mut(call_id)
            .ok_or_else(|| DispatchError::NotFound("Call not found".to_string()))?;

        if !session.has_participant(user_id) {
            session.participants.push(Participant {
                user_id: user_id.to_string(),
                connection_id: connection_id.to_string(),
                video_enabled: session.is_video,
                audio_enabled: true,
            });
        }
        session.invitees.retain(|id| id != user_id);
        session.status = CallStatus::Active;
        if session.started_at.is_none() {
            session.started_at = Some(Utc::now());
        }
        let snapshot = session.clone();
        maps.by_user.insert(user_id.to_string(), call_id.to_string());
        Ok(snapshot)
    }

    /// End and purge a call. `None` if it was already gone.
    pub fn end(&self, call_id: &str) -> Option<CallSession> {
        self.inner.lock().purge(call_id)
    }

    /// End a call on behalf of `user_id`, who must be a participant or invitee.
    pub fn end_by(&self, call_id: &str, user_id: &str) -> Result<CallSession, DispatchError> {
        let mut maps = self.inner.lock();
        match maps.sessions.get(call_id) {
            Some(session) if session.involves(user_id) => {}
            Some(_) => {
                return Err(DispatchError::NotFound(
                    "Call not found or not permitted".to_string(),
                ))
            }
            None => return Err(DispatchError::NotFound("Call not found".to_string())),
        }
        maps.purge(call_id)
            .ok_or_else(|| DispatchError::NotFound("Call not found".to_string()))
    }

    /// Remove one participant; ends the call when one or fewer remain.
    pub fn remove_participant(&self, call_id: &str, user_id: &str) -> Option<Departure> {
        let mut maps = self.inner.lock();
        let session = maps.sessions.get_mut(call_id)?;
        let before = session.participants.len();
        session.participants.retain(|p| p.user_id != user_id);
        if session.participants.len() == before {
            return None;
        }
        let remaining = session.participants.len();
        if maps.by_user.get(user_id).map(String::as_str) == Some(call_id) {
            maps.by_user.remove(user_id);
        }

        if remaining <= 1 {
            return maps.purge(call_id).map(Departure::Ended);
        }
        maps.sessions
            .get(call_id)
            .cloned()
            .map(Departure::Left)
    }

    /// Update a participant's media flags.
    pub fn update_media(
        &self,
        call_id: &str,
        user_id: &str,
        video: Option<bool>,
        audio: Option<bool>,
    ) -> Result<CallSession, DispatchError> {
        let mut maps = self.inner.lock();
        let session = maps
            .sessions
            .get_mut(call_id)
            .ok_or_else(|| DispatchError::NotFound("Call not found".to_string()))?;
        let participant = session
            .participants
            .iter_mut()
            .find(|p| p.user_id == user_id)
            .ok_or_else(|| DispatchError::NotFound("You are not in this call".to_string()))?;
        if let Some(video) = video {
            participant.video_enabled = video;
        }
        if let Some(audio) = audio {
            participant.audio_enabled = audio;
        }
        Ok(session.clone())
    }

    /// Read-only check that `user_id` may relay signaling data in a call.
    pub fn authorize_relay(&self, call_id: &str, user_id: &str) -> Result<(), DispatchError> {
        let maps = self.inner.lock();
        match maps.sessions.get(call_id) {
            Some(session) if session.has_participant(user_id) => Ok(()),
            Some(_) => Err(DispatchError::NotFound(
                "Call not found or not permitted".to_string(),
            )),
            None => Err(DispatchError::NotFound("Call not found".to_string())),
        }
    }

    pub fn get(&self, call_id: &str) -> Option<CallSession> {
        self.inner.lock().sessions.get(call_id).cloned()
    }

    /// The call a user is currently in.
    pub fn call_of(&self, user_id: &str) -> Option<CallSession> {
        let maps = self.inner.lock();
        let call_id = maps.by_user.get(user_id)?;
        maps.sessions.get(call_id).cloned()
    }

    /// End every unanswered call created more than `RING_TIMEOUT` before `now`.
    pub fn sweep_expired(&self, now: Instant) -> Vec<CallSession> {
        let mut maps = self.inner.lock();
        let expired: Vec<String> = maps
            .sessions
            .values()
            .filter(|s| matches!(s.status, CallStatus::Initiating | CallStatus::Ringing))
            .filter(|s| now.saturating_duration_since(s.created_at) > RING_TIMEOUT)
            .map(|s| s.call_id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|call_id| maps.purge(call_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CallStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_call() -> (CallStore, String) {
        let store = CallStore::new();
        let session = store
            .create("call_1".to_string(), "conv1", "alice", "conn_a", "bob", true)
            .unwrap();
        (store, session.call_id)
    }

    #[test]
    fn create_indexes_caller_only() {
        let (store, call_id) = store_with_call();
        let session = store.get(&call_id).unwrap();
        assert_eq!(session.status, CallStatus::Initiating);
        assert_eq!(session.participant_ids(), vec!["alice"]);
        assert_eq!(session.invitees, vec!["bob"]);
        assert!(store.call_of("alice").is_some());
        assert!(store.call_of("bob").is_none());
    }

    #[test]
    fn busy_caller_conflicts_without_mutation() {
        let (store, call_id) = store_with_call();
        let err = store
            .create("call_2".to_string(), "conv2", "alice", "conn_a", "carol", false)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.call_of("alice").unwrap().call_id, call_id);
    }

    #[test]
    fn busy_invitee_conflicts() {
        let (store, call_id) = store_with_call();
        store.accept(&call_id, "bob", "conn_b").unwrap();
        let err = store
            .create("call_2".to_string(), "conv2", "carol", "conn_c", "bob", true)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
        assert!(store.call_of("carol").is_none());
    }

    #[test]
    fn accept_activates_and_sets_started_at_once() {
        let (store, call_id) = store_with_call();
        store.mark_ringing(&call_id);

        let session = store.accept(&call_id, "bob", "conn_b").unwrap();
        assert_eq!(session.status, CallStatus::Active);
        assert_eq!(session.participant_ids(), vec!["alice", "bob"]);
        assert!(session.invitees.is_empty());
        let started = session.started_at.unwrap();

        let again = store.accept(&call_id, "bob", "conn_b").unwrap();
        assert_eq!(again.participants.len(), 2);
        assert_eq!(again.started_at.unwrap(), started);
    }

    #[test]
    fn accept_while_in_other_call_conflicts() {
        let (store, call_id) = store_with_call();
        store
            .create("call_2".to_string(), "conv2", "carol", "conn_c", "dave", true)
            .unwrap();

        let err = store.accept(&call_id, "carol", "conn_c").unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
        assert_eq!(store.get(&call_id).unwrap().participants.len(), 1);
    }

    #[test]
    fn accept_missing_call_is_not_found() {
        let store = CallStore::new();
        let err = store.accept("nope", "bob", "conn_b").unwrap_err();
        assert_eq!(err, DispatchError::NotFound("Call not found".to_string()));
    }

    #[test]
    fn end_is_idempotent_and_clears_index() {
        let (store, call_id) = store_with_call();
        store.accept(&call_id, "bob", "conn_b").unwrap();

        let ended = store.end(&call_id).unwrap();
        assert_eq!(ended.status, CallStatus::Ended);
        assert!(ended.ended_at.is_some());
        assert!(store.call_of("alice").is_none());
        assert!(store.call_of("bob").is_none());

        assert!(store.end(&call_id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn removing_down_to_one_participant_ends_call() {
        let (store, call_id) = store_with_call();
        store.accept(&call_id, "bob", "conn_b").unwrap();

        match store.remove_participant(&call_id, "alice") {
            Some(Departure::Ended(session)) => {
                assert_eq!(session.participant_ids(), vec!["bob"]);
                assert_eq!(session.status, CallStatus::Ended);
            }
            other => panic!("expected call to end, got {other:?}"),
        }
        assert!(store.call_of("bob").is_none());
        assert!(store.get(&call_id).is_none());
    }

    #[test]
    fn removing_from_group_call_keeps_it_active() {
        let (store, call_id) = store_with_call();
        store.accept(&call_id, "bob", "conn_b").unwrap();
        store.accept(&call_id, "carol", "conn_c").unwrap();

        match store.remove_participant(&call_id, "bob") {
            Some(Departure::Left(session)) => {
                assert_eq!(session.participant_ids(), vec!["alice", "carol"]);
                assert_eq!(session.status, CallStatus::Active);
            }
            other => panic!("expected call to continue, got {other:?}"),
        }
        assert!(store.call_of("bob").is_none());
        assert!(store.call_of("carol").is_some());
    }

    #[test]
    fn end_by_requires_participant_or_invitee() {
        let (store, call_id) = store_with_call();

        let err = store.end_by(&call_id, "mallory").unwrap_err();
        assert_eq!(
            err,
            DispatchError::NotFound("Call not found or not permitted".to_string())
        );
        assert!(store.get(&call_id).is_some());

        let ended = store.end_by(&call_id, "bob").unwrap();
        assert_eq!(ended.status, CallStatus::Ended);
        assert!(store.call_of("alice").is_none());

        let err = store.end_by(&call_id, "alice").unwrap_err();
        assert_eq!(err, DispatchError::NotFound("Call not found".to_string()));
    }

    #[test]
    fn remove_non_participant_is_none() {
        let (store, call_id) = store_with_call();
        assert!(store.remove_participant(&call_id, "zed").is_none());
        assert!(store.remove_participant("missing", "alice").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_media_flags() {
        let (store, call_id) = store_with_call();
        let session = store
            .update_media(&call_id, "alice", Some(false), None)
            .unwrap();
        assert!(!session.participants[0].video_enabled);
        assert!(session.participants[0].audio_enabled);

        let err = store.update_media(&call_id, "bob", None, Some(false)).unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[test]
    fn authorize_relay_is_read_only() {
        let (store, call_id) = store_with_call();
        assert!(store.authorize_relay(&call_id, "alice").is_ok());
        assert!(store.authorize_relay(&call_id, "bob").is_err());
        assert!(store.authorize_relay("missing", "alice").is_err());

        let session = store.get(&call_id).unwrap();
        assert_eq!(session.status, CallStatus::Initiating);
        assert_eq!(session.participants.len(), 1);
    }

    #[test]
    fn sweep_ends_only_stale_unanswered_calls() {
        let (store, ringing) = store_with_call();
        store.mark_ringing(&ringing);
        let active = store
            .create("call_2".to_string(), "conv2", "carol", "conn_c", "dave", true)
            .unwrap()
            .call_id;
        store.accept(&active, "dave", "conn_d").unwrap();

        assert!(store.sweep_expired(Instant::now()).is_empty());

        let later = Instant::now() + RING_TIMEOUT + Duration::from_secs(1);
        let swept = store.sweep_expired(later);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].call_id, ringing);
        assert!(store.call_of("alice").is_none());
        assert!(store.get(&active).is_some());
    }
}
