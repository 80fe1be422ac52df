//! External collaborator capability: users, friends, conversations and the
//! few message operations the socket handlers trigger.
//!
//! Backed by the backend's internal HTTP API in production and by an
//! in-memory map in tests.

pub mod http;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DispatchError;

/// A conversation the user belongs to. Only the id matters here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(alias = "_id")]
    pub id: String,
}

/// Public profile of a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn user_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, DispatchError>;

    async fn online_friends(&self, user_id: &str) -> Result<Vec<UserSummary>, DispatchError>;

    async fn user(&self, user_id: &str) -> Result<Option<UserSummary>, DispatchError>;

    /// Persist online/offline and refresh "last seen".
    async fn update_user_status(&self, user_id: &str, is_online: bool) -> Result<(), DispatchError>;

    /// Mark messages in a conversation as read by `reader_id`: only messages
    /// not yet read by the reader and not sent by the reader. Returns the
    /// number of messages updated.
    async fn mark_read(&self, conversation_id: &str, reader_id: &str) -> Result<u64, DispatchError>;

    async fn last_message(&self, conversation_id: &str) -> Result<Option<Value>, DispatchError>;

    /// Record a post like. Returns the new notification for the author, or
    /// `None` if this like was already notified.
    async fn record_post_like(
        &self,
        sender_id: &str,
        author_id: &str,
        post_id: &str,
    ) -> Result<Option<Value>, DispatchError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests / local runs)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredMessage {
    sender_id: String,
    read_by: HashSet<String>,
    body: Value,
}

#[derive(Default)]
struct MemoryData {
    users: HashMap<String, UserSummary>,
    conversations: HashMap<String, Vec<Conversation>>,
    friends: HashMap<String, Vec<String>>,
    statuses: HashMap<String, bool>,
    messages: HashMap<String, Vec<StoredMessage>>,
    likes: HashSet<(String, String, String)>,
}

pub struct MemoryDirectory {
    data: Mutex<MemoryData>,
    failing: AtomicBool,
    status_updates: AtomicU64,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(MemoryData::default()),
            failing: AtomicBool::new(false),
            status_updates: AtomicU64::new(0),
        }
    }

    pub fn add_user(&self, id: &str, name: &str) {
        self.data.lock().users.insert(
            id.to_string(),
            UserSummary {
                id: id.to_string(),
                name: name.to_string(),
                avatar: None,
            },
        );
    }

    pub fn add_conversation(&self, user_id: &str, conversation_id: &str) {
        self.data
            .lock()
            .conversations
            .entry(user_id.to_string())
            .or_default()
            .push(Conversation {
                id: conversation_id.to_string(),
            });
    }

    /// Make two users friends of each other.
    pub fn add_friendship(&self, a: &str, b: &str) {
        let mut data = self.data.lock();
        data.friends.entry(a.to_string()).or_default().push(b.to_string());
        data.friends.entry(b.to_string()).or_default().push(a.to_string());
    }

    pub fn add_message(&self, conversation_id: &str, sender_id: &str, body: Value) {
        self.data
            .lock()
            .messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(StoredMessage {
                sender_id: sender_id.to_string(),
                read_by: HashSet::new(),
                body,
            });
    }

    /// Make every call fail with an upstream error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn status_of(&self, user_id: &str) -> Option<bool> {
        self.data.lock().statuses.get(user_id).copied()
    }

    pub fn status_update_count(&self) -> u64 {
        self.status_updates.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<(), DispatchError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(DispatchError::Upstream("directory unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn user_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, DispatchError> {
        self.check()?;
        Ok(self
            .data
            .lock()
            .conversations
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn online_friends(&self, user_id: &str) -> Result<Vec<UserSummary>, DispatchError> {
        self.check()?;
        let data = self.data.lock();
        let friends = data
            .friends
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter(|id| data.statuses.get(*id).copied().unwrap_or(false))
                    .map(|id| {
                        data.users.get(id).cloned().unwrap_or_else(|| UserSummary {
                            id: id.clone(),
                            name: String::new(),
                            avatar: None,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(friends)
    }

    async fn user(&self, user_id: &str) -> Result<Option<UserSummary>, DispatchError> {
        self.check()?;
        Ok(self.data.lock().users.get(user_id).cloned())
    }

    async fn update_user_status(&self, user_id: &str, is_online: bool) -> Result<(), DispatchError> {
        self.check()?;
        self.status_updates.fetch_add(1, Ordering::Relaxed);
        self.data
            .lock()
            .statuses
            .insert(user_id.to_string(), is_online);
        Ok(())
    }

    async fn mark_read(&self, conversation_id: &str, reader_id: &str) -> Result<u64, DispatchError> {
        self.check()?;
        let mut data = self.data.lock();
        let mut updated = 0;
        if let Some(messages) = data.messages.get_mut(conversation_id) {
            for message in messages
                .iter_mut()
                .filter(|m| m.sender_id != reader_id)
            {
                if message.read_by.insert(reader_id.to_string()) {
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn last_message(&self, conversation_id: &str) -> Result<Option<Value>, DispatchError> {
        self.check()?;
        Ok(self
            .data
            .lock()
            .messages
            .get(conversation_id)
            .and_then(|messages| messages.last())
            .map(|m| m.body.clone()))
    }

    async fn record_post_like(
        &self,
        sender_id: &str,
        author_id: &str,
        post_id: &str,
    ) -> Result<Option<Value>, DispatchError> {
        self.check()?;
        let mut data = self.data.lock();
        let key = (sender_id.to_string(), author_id.to_string(), post_id.to_string());
        if !data.likes.insert(key) {
            return Ok(None);
        }
        let sender_name = data
            .users
            .get(sender_id)
            .map(|u| u.name.clone())
            .unwrap_or_default();
        Ok(Some(serde_json::json!({
            "type": "like-post",
            "sender": { "_id": sender_id, "name": sender_name },
            "receiver": { "_id": author_id },
            "postId": post_id,
            "message": "liked your post",
        })))
    }
}
