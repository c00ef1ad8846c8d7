//! Bounded log of recent join/leave/mood events for the admin surface.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use moodcast_core::Mood;

pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomEventKind {
    Join,
    Leave,
    Mood,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomEvent {
    pub kind: RoomEventKind,
    pub session_id: String,
    pub mood: Mood,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    events: VecDeque<RoomEvent>,
    recorded: u64,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
            recorded: 0,
        }
    }

    pub fn push(&mut self, kind: RoomEventKind, session_id: &str, mood: Mood, at: DateTime<Utc>) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(RoomEvent {
            kind,
            session_id: session_id.to_string(),
            mood,
            at,
        });
        self.recorded += 1;
    }

    /// Oldest first.
    pub fn recent(&self) -> Vec<RoomEvent> {
        self.events.iter().cloned().collect()
    }

    /// Total ever recorded, including evicted entries.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_LOG_CAPACITY)
    }
}
