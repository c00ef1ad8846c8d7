//! moodcast-core: the pure half of moodcast.
//!
//! Moods, identifier validation, the sampling estimator and the ambient
//! simulation layer. Nothing in here touches sockets, disks or a runtime;
//! callers pass `now` (or a [`clock::Clock`]) in explicitly.

pub mod clock;
pub mod error;
pub mod sampling;
pub mod simulation;
pub mod types;
pub mod validation;

pub use error::ValidationError;
pub use types::{Mood, PresenceSnapshot, UserRecord};
