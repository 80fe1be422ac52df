//! Per-connection gateway session state.

use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use parking_lot::Mutex;

/// Header carrying the authenticated user id, set by the fronting auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Optional display name accompanying the user id.
pub const USER_NAME_HEADER: &str = "x-user-name";

/// Trusted identity attached to a connection before it reaches the gateway.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub name: Option<String>,
}

impl Identity {
    /// Read the identity from upgrade request headers. `None` when absent.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let user_id = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())?;
        let name = headers
            .get(USER_NAME_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        Some(Self {
            user_id: user_id.to_string(),
            name,
        })
    }
}

/// State for a single WebSocket connection.
pub struct ConnectionSession {
    /// Unique connection identifier (`conn_` prefixed ULID).
    pub connection_id: String,
    /// Authenticated user ID.
    pub user_id: String,
    /// Display name supplied with the identity, if any.
    pub user_name: Option<String>,
    last_seen: Mutex<Instant>,
}

impl ConnectionSession {
    pub fn new(connection_id: String, identity: Identity) -> Self {
        Self {
            connection_id,
            user_id: identity.user_id,
            user_name: identity.name,
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Refresh the last-seen timestamp.
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the connection was last heard from.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn identity_requires_user_id() {
        let mut headers = HeaderMap::new();
        assert!(Identity::from_headers(&headers).is_none());

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("   "));
        assert!(Identity::from_headers(&headers).is_none());
    }

    #[test]
    fn identity_reads_optional_name() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("u1"));
        headers.insert(USER_NAME_HEADER, HeaderValue::from_static("Alice"));

        let identity = Identity::from_headers(&headers).unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.name.as_deref(), Some("Alice"));
    }

    #[test]
    fn touch_resets_idle_time() {
        let session = ConnectionSession::new(
            "conn_1".to_string(),
            Identity {
                user_id: "u1".to_string(),
                name: None,
            },
        );
        *session.last_seen.lock() = Instant::now() - Duration::from_secs(30);
        assert!(session.idle_for() >= Duration::from_secs(30));

        session.touch();
        assert!(session.idle_for() < Duration::from_secs(30));
    }
}
