//! Session arena: identifier → Session, socket → owning identifier.
//!
//! Owned by the room actor only; nothing here is shared or async.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use moodcast_core::{Mood, UserRecord};

pub type SocketId = u64;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub mood: Mood,
    pub country: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub sockets: BTreeSet<SocketId>,
}

/// Result of attaching a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    Created,
    Joined { mood_changed: bool },
}

/// Result of detaching a socket.
#[derive(Debug)]
pub enum Detach {
    Unknown,
    Remaining { session_id: String, sockets: usize },
    Removed(Session),
}

/// Admin view of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub mood: Mood,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub connected_secs: i64,
    pub sockets: usize,
}

#[derive(Debug, Default)]
pub struct SessionArena {
    sessions: HashMap<String, Session>,
    owners: HashMap<SocketId, String>,
}

impl SessionArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `socket` to `id`, creating the session on first contact.
    /// A later connection's mood wins; a later connection without a
    /// country keeps the known one.
    pub fn attach(
        &mut self,
        id: &str,
        socket: SocketId,
        mood: Mood,
        country: Option<String>,
        now: DateTime<Utc>,
    ) -> Attach {
        self.owners.insert(socket, id.to_string());
        match self.sessions.get_mut(id) {
            Some(session) => {
                session.sockets.insert(socket);
                session.last_seen = now;
                if country.is_some() {
                    session.country = country;
                }
                let mood_changed = session.mood != mood;
                session.mood = mood;
                Attach::Joined { mood_changed }
            }
            None => {
                self.sessions.insert(
                    id.to_string(),
                    Session {
                        id: id.to_string(),
                        mood,
                        country,
                        connected_at: now,
                        last_seen: now,
                        sockets: BTreeSet::from([socket]),
                    },
                );
                Attach::Created
            }
        }
    }

    /// Set the mood of the session owning `socket`. Returns the session id
    /// and whether the mood actually changed.
    pub fn set_mood(
        &mut self,
        socket: SocketId,
        mood: Mood,
        now: DateTime<Utc>,
    ) -> Option<(String, bool)> {
        let id = self.owners.get(&socket)?;
        let session = self.sessions.get_mut(id)?;
        session.last_seen = now;
        let changed = session.mood != mood;
        session.mood = mood;
        Some((session.id.clone(), changed))
    }

    pub fn detach(&mut self, socket: SocketId) -> Detach {
        let Some(id) = self.owners.remove(&socket) else {
            return Detach::Unknown;
        };
        let Some(session) = self.sessions.get_mut(&id) else {
            return Detach::Unknown;
        };
        session.sockets.remove(&socket);
        if session.sockets.is_empty() {
            match self.sessions.remove(&id) {
                Some(session) => Detach::Removed(session),
                None => Detach::Unknown,
            }
        } else {
            Detach::Remaining {
                session_id: id,
                sockets: session.sockets.len(),
            }
        }
    }

    pub fn owner(&self, socket: SocketId) -> Option<&Session> {
        self.owners.get(&socket).and_then(|id| self.sessions.get(id))
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn socket_count(&self) -> usize {
        self.owners.len()
    }

    /// Roster of real users. Unsorted; the snapshot sorts.
    pub fn users(&self) -> Vec<UserRecord> {
        self.sessions
            .values()
            .map(|s| UserRecord::new(s.id.clone(), s.mood, s.country.clone()))
            .collect()
    }

    pub fn summaries(&self, now: DateTime<Utc>) -> Vec<SessionSummary> {
        let mut out: Vec<SessionSummary> = self
            .sessions
            .values()
            .map(|s| SessionSummary {
                id: s.id.clone(),
                mood: s.mood,
                country: s.country.clone(),
                connected_at: s.connected_at,
                connected_secs: (now - s.connected_at).num_seconds().max(0),
                sockets: s.sockets.len(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 4, 4, 0, 0).unwrap()
    }

    #[test]
    fn second_socket_attaches_instead_of_duplicating() {
        let mut arena = SessionArena::new();
        assert_eq!(arena.attach("A", 1, Mood::Presence, None, now()), Attach::Created);
        assert_eq!(
            arena.attach("A", 2, Mood::Gratitude, None, now()),
            Attach::Joined { mood_changed: true }
        );
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.socket_count(), 2);
        let session = arena.get("A").unwrap();
        assert_eq!(session.sockets.len(), 2);
        assert_eq!(session.mood, Mood::Gratitude);
    }

    #[test]
    fn same_mood_join_is_not_a_change() {
        let mut arena = SessionArena::new();
        arena.attach("A", 1, Mood::Hope, None, now());
        assert_eq!(
            arena.attach("A", 2, Mood::Hope, None, now()),
            Attach::Joined { mood_changed: false }
        );
    }

    #[test]
    fn session_lives_until_last_socket_closes() {
        let mut arena = SessionArena::new();
        arena.attach("A", 1, Mood::Presence, None, now());
        arena.attach("A", 2, Mood::Presence, None, now());

        assert!(matches!(arena.detach(1), Detach::Remaining { sockets: 1, .. }));
        assert!(arena.get("A").is_some());

        let Detach::Removed(session) = arena.detach(2) else {
            panic!("expected session removal");
        };
        assert_eq!(session.id, "A");
        assert!(arena.is_empty());
        assert_eq!(arena.socket_count(), 0);
    }

    #[test]
    fn detaching_unknown_socket_is_harmless() {
        let mut arena = SessionArena::new();
        assert!(matches!(arena.detach(99), Detach::Unknown));
        arena.attach("A", 1, Mood::Presence, None, now());
        arena.detach(1);
        assert!(matches!(arena.detach(1), Detach::Unknown));
    }

    #[test]
    fn set_mood_targets_owning_session() {
        let mut arena = SessionArena::new();
        arena.attach("A", 1, Mood::Presence, None, now());
        arena.attach("B", 2, Mood::Presence, None, now());
        assert_eq!(
            arena.set_mood(2, Mood::Solace, now()),
            Some(("B".to_string(), true))
        );
        assert_eq!(arena.get("A").unwrap().mood, Mood::Presence);
        assert_eq!(arena.set_mood(2, Mood::Solace, now()), Some(("B".to_string(), false)));
        assert_eq!(arena.set_mood(7, Mood::Solace, now()), None);
    }

    #[test]
    fn rejoin_keeps_country_when_none_given() {
        let mut arena = SessionArena::new();
        arena.attach("A", 1, Mood::Presence, Some("FR".into()), now());
        arena.attach("A", 2, Mood::Presence, None, now());
        assert_eq!(arena.get("A").unwrap().country.as_deref(), Some("FR"));
    }

    #[test]
    fn summaries_report_duration_and_sockets() {
        let mut arena = SessionArena::new();
        arena.attach("B", 1, Mood::Hope, None, now());
        arena.attach("A", 2, Mood::Presence, None, now());
        arena.attach("A", 3, Mood::Presence, None, now());
        let later = now() + Duration::seconds(90);
        let summaries = arena.summaries(later);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].id, "A");
        assert_eq!(summaries[0].sockets, 2);
        assert_eq!(summaries[0].connected_secs, 90);
    }
}
