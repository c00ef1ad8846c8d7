mod mood;
mod snapshot;

pub use mood::{Mood, MoodCounts};
pub use snapshot::{PresenceSnapshot, UserRecord};
pub(crate) use snapshot::country_counts;
