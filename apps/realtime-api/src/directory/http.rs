//! `Directory` backed by the backend's internal realtime API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

use super::{Conversation, Directory, UserSummary};
use crate::error::DispatchError;

/// Header the backend checks on every internal call.
const INTERNAL_SECRET_HEADER: &str = "x-internal-secret";

#[derive(Clone)]
pub struct HttpDirectory {
    base_url: Url,
    secret: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MarkReadResponse {
    #[serde(default)]
    modified: u64,
}

#[derive(Debug, Deserialize)]
struct PostLikeResponse {
    #[serde(default)]
    notification: Option<Value>,
}

impl HttpDirectory {
    /// Every request is bounded by `timeout`.
    pub fn new(base_url: &str, secret: &str, timeout: Duration) -> Result<Self, DispatchError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| DispatchError::Upstream(format!("invalid backend url: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(DispatchError::Upstream(format!(
                "backend url cannot carry a path: {base_url}"
            )));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            secret: secret.to_string(),
            http,
        })
    }

    /// `<base>/internal/realtime/<segments...>`, each segment percent-encoded
    /// on its own so ids cannot add path components, queries or fragments.
    fn url(&self, segments: &[&str]) -> Result<Url, DispatchError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| DispatchError::Upstream("backend url cannot be a base".to_string()))?;
            path.pop_if_empty().extend(["internal", "realtime"]);
            for segment in segments {
                if matches!(*segment, "" | "." | "..") {
                    return Err(DispatchError::Validation(format!(
                        "invalid path segment {segment:?}"
                    )));
                }
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        segments: &[&str],
    ) -> Result<T, DispatchError> {
        let url = self.url(segments)?;
        tracing::debug!(%url, "directory GET");
        let resp = self
            .http
            .get(url)
            .header(INTERNAL_SECRET_HEADER, &self.secret)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn user_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, DispatchError> {
        self.get_json(&["users", user_id, "conversations"]).await
    }

    async fn online_friends(&self, user_id: &str) -> Result<Vec<UserSummary>, DispatchError> {
        self.get_json(&["users", user_id, "friends", "online"]).await
    }

    async fn user(&self, user_id: &str) -> Result<Option<UserSummary>, DispatchError> {
        let resp = self
            .http
            .get(self.url(&["users", user_id])?)
            .header(INTERNAL_SECRET_HEADER, &self.secret)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(resp.error_for_status()?.json().await?)
    }

    async fn update_user_status(&self, user_id: &str, is_online: bool) -> Result<(), DispatchError> {
        self.http
            .patch(self.url(&["users", user_id, "status"])?)
            .header(INTERNAL_SECRET_HEADER, &self.secret)
            .json(&serde_json::json!({ "isOnline": is_online }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn mark_read(&self, conversation_id: &str, reader_id: &str) -> Result<u64, DispatchError> {
        let resp: MarkReadResponse = self
            .http
            .patch(self.url(&["conversations", conversation_id, "read"])?)
            .header(INTERNAL_SECRET_HEADER, &self.secret)
            .json(&serde_json::json!({ "userId": reader_id }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.modified)
    }

    async fn last_message(&self, conversation_id: &str) -> Result<Option<Value>, DispatchError> {
        let value: Value = self
            .get_json(&["conversations", conversation_id, "messages", "last"])
            .await?;
        Ok(Some(value).filter(|v| !v.is_null()))
    }

    async fn record_post_like(
        &self,
        sender_id: &str,
        author_id: &str,
        post_id: &str,
    ) -> Result<Option<Value>, DispatchError> {
        let resp: PostLikeResponse = self
            .http
            .post(self.url(&["posts", post_id, "likes"])?)
            .header(INTERNAL_SECRET_HEADER, &self.secret)
            .json(&serde_json::json!({ "senderId": sender_id, "authorId": author_id }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.notification.filter(|n| !n.is_null()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> HttpDirectory {
        HttpDirectory::new("http://api.local/api/v1/", "s3cret", Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn url_joins_internal_prefix_without_double_slash() {
        let url = directory().url(&["users", "u1", "conversations"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://api.local/api/v1/internal/realtime/users/u1/conversations"
        );
    }

    #[test]
    fn ids_stay_inside_their_own_segment() {
        let dir = directory();

        let url = dir
            .url(&["conversations", "../../users/victim/friends/online", "messages", "last"])
            .unwrap();
        let segments: Vec<&str> = url.path_segments().unwrap().collect();
        assert_eq!(segments.len(), 8);
        assert_eq!(&segments[..5], ["api", "v1", "internal", "realtime", "conversations"]);
        assert_eq!(&segments[6..], ["messages", "last"]);
        assert!(!url.path().contains("/users/"));

        let url = dir.url(&["posts", "p1?admin=1#x", "likes"]).unwrap();
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
        assert!(url.path().ends_with("/likes"));
    }

    #[test]
    fn dot_segments_are_rejected() {
        let dir = directory();
        for id in ["..", ".", ""] {
            let err = dir.url(&["conversations", id, "read"]).unwrap_err();
            assert!(matches!(err, DispatchError::Validation(_)), "{id:?}");
        }
    }

    #[test]
    fn invalid_base_url_is_an_error() {
        assert!(HttpDirectory::new("not a url", "s", Duration::from_secs(1)).is_err());
        assert!(HttpDirectory::new("mailto:ops@example.com", "s", Duration::from_secs(1)).is_err());
    }
}
