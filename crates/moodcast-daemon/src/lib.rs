//! moodcast-daemon: the stateful half of moodcast.
//!
//! Hosts the sampling heartbeat endpoints, the session room behind the push
//! connections, the admin surface, and the SQLite store both modes share.

pub mod admin;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod persist;
pub mod protocol;
pub mod room;
pub mod server;
pub mod store;
