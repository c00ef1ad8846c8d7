use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::mood::{Mood, MoodCounts};

/// One entry of the roster every client renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub mood: Mood,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl UserRecord {
    pub fn new(id: impl Into<String>, mood: Mood, country: Option<String>) -> Self {
        Self {
            id: id.into(),
            mood,
            country,
        }
    }
}

/// The mode-agnostic aggregate handed to clients.
///
/// `users` is always sorted by id: the visualization maps list position to
/// a visual slot, so every observer has to derive the same order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub count: u64,
    pub moods: MoodCounts,
    pub users: Vec<UserRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countries: Option<BTreeMap<String, u64>>,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl PresenceSnapshot {
    /// Build an exact snapshot from a roster: count and mood tallies are
    /// derived from `users`, so they always agree.
    pub fn from_users(mut users: Vec<UserRecord>, timestamp: i64) -> Self {
        users.sort_by(|a, b| a.id.cmp(&b.id));
        let moods = MoodCounts::from_moods(users.iter().map(|u| u.mood));
        let countries = country_counts(&users);
        Self {
            count: users.len() as u64,
            moods,
            users,
            countries,
            timestamp,
        }
    }

    pub fn empty(timestamp: i64) -> Self {
        Self::from_users(Vec::new(), timestamp)
    }
}

/// Tally users by country. `None` when nobody reported one.
pub(crate) fn country_counts(users: &[UserRecord]) -> Option<BTreeMap<String, u64>> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for country in users.iter().filter_map(|u| u.country.as_ref()) {
        *counts.entry(country.clone()).or_default() += 1;
    }
    if counts.is_empty() { None } else { Some(counts) }
}
