use serde::{Deserialize, Serialize};

/// The closed set of moods a client can report.
///
/// Anything outside this set coerces to [`Mood::Presence`]; a wrong mood is
/// cheap, a rejected heartbeat is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    #[default]
    Presence,
    Gratitude,
    Hope,
    Solace,
}

impl Mood {
    pub const ALL: [Mood; 4] = [Mood::Presence, Mood::Gratitude, Mood::Hope, Mood::Solace];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Presence => "presence",
            Mood::Gratitude => "gratitude",
            Mood::Hope => "hope",
            Mood::Solace => "solace",
        }
    }

    /// Strict parse. Case-insensitive, surrounding whitespace ignored.
    pub fn parse(s: &str) -> Option<Mood> {
        let s = s.trim();
        Mood::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
    }

    /// Lenient parse used on every client-supplied mood.
    pub fn coerce(s: Option<&str>) -> Mood {
        s.and_then(Mood::parse).unwrap_or_default()
    }
}

impl std::fmt::Display for Mood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-mood tallies. Serializes as `{"presence": n, "gratitude": n, ...}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodCounts {
    pub presence: u64,
    pub gratitude: u64,
    pub hope: u64,
    pub solace: u64,
}

impl MoodCounts {
    pub fn get(&self, mood: Mood) -> u64 {
        match mood {
            Mood::Presence => self.presence,
            Mood::Gratitude => self.gratitude,
            Mood::Hope => self.hope,
            Mood::Solace => self.solace,
        }
    }

    pub fn get_mut(&mut self, mood: Mood) -> &mut u64 {
        match mood {
            Mood::Presence => &mut self.presence,
            Mood::Gratitude => &mut self.gratitude,
            Mood::Hope => &mut self.hope,
            Mood::Solace => &mut self.solace,
        }
    }

    pub fn add(&mut self, mood: Mood, n: u64) {
        *self.get_mut(mood) += n;
    }

    pub fn total(&self) -> u64 {
        Mood::ALL.iter().map(|m| self.get(*m)).sum()
    }

    pub fn from_moods<I: IntoIterator<Item = Mood>>(moods: I) -> Self {
        let mut counts = MoodCounts::default();
        for mood in moods {
            counts.add(mood, 1);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_known_moods_case_insensitively() {
        assert_eq!(Mood::parse("gratitude"), Some(Mood::Gratitude));
        assert_eq!(Mood::parse(" HOPE "), Some(Mood::Hope));
        assert_eq!(Mood::parse("joy"), None);
    }

    #[test]
    fn coerce_falls_back_to_presence() {
        assert_eq!(Mood::coerce(None), Mood::Presence);
        assert_eq!(Mood::coerce(Some("")), Mood::Presence);
        assert_eq!(Mood::coerce(Some("rage")), Mood::Presence);
        assert_eq!(Mood::coerce(Some("solace")), Mood::Solace);
    }

    #[test]
    fn serde_uses_snake_case_names() {
        assert_eq!(serde_json::to_string(&Mood::Gratitude).unwrap(), "\"gratitude\"");
        let m: Mood = serde_json::from_str("\"solace\"").unwrap();
        assert_eq!(m, Mood::Solace);
    }

    #[test]
    fn mood_counts_total_and_from_moods() {
        let counts = MoodCounts::from_moods([Mood::Hope, Mood::Hope, Mood::Presence]);
        assert_eq!(counts.hope, 2);
        assert_eq!(counts.presence, 1);
        assert_eq!(counts.total(), 3);
    }
}
