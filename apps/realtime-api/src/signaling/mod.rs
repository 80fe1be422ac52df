//! Call signaling: session state plus the coordinator that relays
//! offer/answer/ICE between participants.

pub mod coordinator;
pub mod store;

pub use coordinator::{Relay, Signaling};
pub use store::{CallSession, CallStatus, CallStore, Departure, Participant};
