pub mod events;
pub mod fanout;
pub mod groups;
pub mod handler;
pub mod lifecycle;
pub mod presence;
pub mod server;
pub mod session;
