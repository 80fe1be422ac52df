pub mod id;

pub use id::{call_id, connection_id};
