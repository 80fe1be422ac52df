pub mod bridge;
pub mod config;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod routes;
pub mod signaling;

use std::sync::Arc;

use bridge::EventBridge;
use config::Config;
use directory::Directory;
use gateway::fanout::Fanout;
use gateway::groups::GroupTracker;
use gateway::presence::PresenceRegistry;
use signaling::Signaling;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub directory: Arc<dyn Directory>,
    pub presence: Arc<PresenceRegistry>,
    pub groups: Arc<GroupTracker>,
    pub fanout: Arc<Fanout>,
    pub signaling: Arc<Signaling>,
    pub bridge: Arc<EventBridge>,
}

impl AppState {
    /// Wire up the dispatch core around a directory implementation.
    pub fn new(config: Config, directory: Arc<dyn Directory>) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let groups = Arc::new(GroupTracker::new());
        let fanout = Arc::new(Fanout::new(config.outbound_queue_capacity));
        let signaling = Arc::new(Signaling::new(
            presence.clone(),
            groups.clone(),
            fanout.clone(),
            directory.clone(),
        ));
        let bridge = Arc::new(EventBridge::new(
            presence.clone(),
            groups.clone(),
            fanout.clone(),
        ));

        Self {
            config: Arc::new(config),
            directory,
            presence,
            groups,
            fanout,
            signaling,
            bridge,
        }
    }
}
