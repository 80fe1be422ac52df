//! Redis pub/sub loop feeding the [`EventBridge`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use redis::aio::PubSub;

use super::{channels, EventBridge};

const RECONNECT_BASE: Duration = Duration::from_millis(500);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

/// Open a pub/sub connection and subscribe to every bridge channel.
pub async fn connect(redis_url: &str) -> redis::RedisResult<PubSub> {
    let client = redis::Client::open(redis_url)?;
    let mut pubsub = client.get_async_pubsub().await?;
    for channel in channels() {
        pubsub.subscribe(channel).await?;
    }
    tracing::info!(channels = channels().count(), "subscribed to broker channels");
    Ok(pubsub)
}

/// Consume broker messages forever, resubscribing whenever the connection drops.
pub async fn run(redis_url: String, mut pubsub: PubSub, bridge: Arc<EventBridge>) {
    loop {
        consume(pubsub, &bridge).await;
        tracing::error!("broker subscription closed, reconnecting");
        pubsub = reconnect(&redis_url).await;
    }
}

async fn consume(pubsub: PubSub, bridge: &EventBridge) {
    let mut messages = pubsub.into_on_message();
    while let Some(msg) = messages.next().await {
        let channel = msg.get_channel_name().to_string();
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(channel = %channel, ?e, "unreadable broker payload");
                continue;
            }
        };
        bridge.handle_broker_message(&channel, &payload);
    }
}

async fn reconnect(redis_url: &str) -> PubSub {
    let mut attempt = 0u32;
    loop {
        tokio::time::sleep(reconnect_delay(attempt)).await;
        match connect(redis_url).await {
            Ok(pubsub) => {
                tracing::info!(attempt, "broker subscription restored");
                return pubsub;
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "broker reconnect failed");
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

/// Exponential backoff from 500ms, capped at 30s.
pub fn reconnect_delay(attempt: u32) -> Duration {
    RECONNECT_BASE
        .saturating_mul(1u32 << attempt.min(16))
        .min(RECONNECT_MAX)
}
