//! Per-connection outbound queues.
//!
//! Every live socket owns one bounded `mpsc` receiver; everything that wants
//! to push to a connection goes through here. A slow connection whose queue
//! is full skips events rather than stalling the sender.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::events::GatewayMessage;

/// Outbound hub keyed by connection id. Store in `AppState` behind an `Arc`.
pub struct Fanout {
    outboxes: DashMap<String, mpsc::Sender<Arc<GatewayMessage>>>,
    capacity: usize,
}

impl Fanout {
    pub fn new(capacity: usize) -> Self {
        Self {
            outboxes: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Open the outbound queue for a connection. The socket loop drains the
    /// returned receiver.
    pub fn attach(&self, connection_id: &str) -> mpsc::Receiver<Arc<GatewayMessage>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.outboxes.insert(connection_id.to_string(), tx);
        rx
    }

    pub fn detach(&self, connection_id: &str) {
        self.outboxes.remove(connection_id);
    }

    /// Push to a single connection. Returns `true` if the event was queued.
    pub fn send(&self, connection_id: &str, message: Arc<GatewayMessage>) -> bool {
        let Some(outbox) = self.outboxes.get(connection_id) else {
            return false;
        };
        match outbox.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                tracing::warn!(
                    connection_id,
                    event = %message.event,
                    "outbound queue full, dropping event"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(connection_id, "outbound queue closed");
                false
            }
        }
    }

    /// Push one event to many connections. Returns the number queued.
    pub fn send_all<'a, I>(&self, connection_ids: I, message: GatewayMessage) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        let message = Arc::new(message);
        connection_ids
            .into_iter()
            .filter(|id| self.send(id, message.clone()))
            .count()
    }

    /// Push to every attached connection except one.
    pub fn broadcast_except(&self, except: &str, message: GatewayMessage) -> usize {
        let targets: Vec<String> = self
            .outboxes
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|id| id != except)
            .collect();
        self.send_all(&targets, message)
    }

    pub fn connection_count(&self) -> usize {
        self.outboxes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(event: &str) -> GatewayMessage {
        GatewayMessage::new(event, json!({}))
    }

    #[test]
    fn send_reaches_attached_connection_only() {
        let fanout = Fanout::new(8);
        let mut rx = fanout.attach("c1");

        assert!(fanout.send("c1", Arc::new(msg("ping"))));
        assert!(!fanout.send("c2", Arc::new(msg("ping"))));
        assert_eq!(rx.try_recv().unwrap().event, "ping");
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let fanout = Fanout::new(1);
        let mut rx = fanout.attach("c1");

        assert!(fanout.send("c1", Arc::new(msg("first"))));
        assert!(!fanout.send("c1", Arc::new(msg("second"))));
        assert_eq!(rx.try_recv().unwrap().event, "first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_except_skips_origin() {
        let fanout = Fanout::new(8);
        let mut a = fanout.attach("a");
        let mut b = fanout.attach("b");

        assert_eq!(fanout.broadcast_except("a", msg("user-disconnected")), 1);
        assert!(a.try_recv().is_err());
        assert_eq!(b.try_recv().unwrap().event, "user-disconnected");
    }

    #[test]
    fn detach_stops_delivery() {
        let fanout = Fanout::new(8);
        let _rx = fanout.attach("c1");
        fanout.detach("c1");
        assert!(!fanout.send("c1", Arc::new(msg("late"))));
        assert_eq!(fanout.connection_count(), 0);
    }
}
