//! Sampling estimator.
//!
//! Clients self-select into reporting with a low probability (`sample_rate`).
//! The server keeps only the reporting fraction, keyed by a short slot, and
//! extrapolates a population estimate from it. The estimate blends the fresh
//! extrapolation with a decayed copy of the previous one so a single noisy
//! sample cannot swing the count and a quiet minute cannot freeze it.
//!
//! Every function here is pure: state in, state out. Persisting the result is
//! the caller's job, and concurrent writers are last-write-wins.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{Mood, MoodCounts, PresenceSnapshot, UserRecord, country_counts};
use crate::validation::{slot_key, validate_sampling_identifier};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Probability that a client's heartbeat is reported.
    pub sample_rate: f64,
    /// Samples older than this are pruned on every recompute.
    pub ttl_secs: u64,
    /// Per-minute multiplier applied to the previous estimate.
    pub decay_factor: f64,
    /// Weight of the fresh mood ratios against the previous ones.
    pub smoothing: f64,
    /// Weight of the fresh extrapolation against the decayed previous estimate.
    pub fresh_weight: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_rate: 0.03,
            ttl_secs: 120,
            decay_factor: 0.85,
            smoothing: 0.7,
            fresh_weight: 0.6,
        }
    }
}

/// One reported observation, stored under the reporter's slot key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub mood: Mood,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// Smoothed share of each mood. Sums to 1.0 up to float error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoodRatios {
    pub presence: f64,
    pub gratitude: f64,
    pub hope: f64,
    pub solace: f64,
}

impl Default for MoodRatios {
    fn default() -> Self {
        Self {
            presence: 0.25,
            gratitude: 0.25,
            hope: 0.25,
            solace: 0.25,
        }
    }
}

impl MoodRatios {
    pub fn get(&self, mood: Mood) -> f64 {
        match mood {
            Mood::Presence => self.presence,
            Mood::Gratitude => self.gratitude,
            Mood::Hope => self.hope,
            Mood::Solace => self.solace,
        }
    }

    fn set(&mut self, mood: Mood, value: f64) {
        match mood {
            Mood::Presence => self.presence = value,
            Mood::Gratitude => self.gratitude = value,
            Mood::Hope => self.hope = value,
            Mood::Solace => self.solace = value,
        }
    }

    pub fn sum(&self) -> f64 {
        Mood::ALL.iter().map(|m| self.get(*m)).sum()
    }

    /// `smoothing * fresh + (1 - smoothing) * self`, where `fresh` is the
    /// observed share of each mood in `counts`.
    fn blend(&self, counts: &MoodCounts, smoothing: f64) -> MoodRatios {
        let total = counts.total() as f64;
        let mut out = *self;
        for mood in Mood::ALL {
            let fresh = counts.get(mood) as f64 / total;
            out.set(mood, smoothing * fresh + (1.0 - smoothing) * self.get(mood));
        }
        out
    }
}

/// The stored, reconstructible sampling state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateState {
    pub estimated_total: u64,
    pub sample_count: u64,
    pub ratios: MoodRatios,
    pub last_update: Option<DateTime<Utc>>,
    pub samples: BTreeMap<String, Sample>,
    /// Set by `record_sample` until the following recompute. Never stored.
    #[serde(skip)]
    dirty: bool,
}

impl AggregateState {
    /// Project the state into a client snapshot.
    ///
    /// Each mood count is rounded independently from the shared total, so
    /// the four counts may differ from `count` by up to the number of moods.
    pub fn to_snapshot(&self) -> PresenceSnapshot {
        let total = self.estimated_total as f64;
        let mut moods = MoodCounts::default();
        for mood in Mood::ALL {
            let share = (total * self.ratios.get(mood)).round().max(0.0);
            moods.add(mood, share as u64);
        }

        let users: Vec<UserRecord> = self
            .samples
            .iter()
            .map(|(slot, s)| UserRecord::new(slot.clone(), s.mood, s.country.clone()))
            .collect();
        let countries = country_counts(&users);

        PresenceSnapshot {
            count: self.estimated_total,
            moods,
            users,
            countries,
            timestamp: self.last_update.map_or(0, |t| t.timestamp_millis()),
        }
    }
}

/// Stateless estimator parameterized by its config.
#[derive(Debug, Clone, Default)]
pub struct Sampler {
    pub config: SamplingConfig,
}

impl Sampler {
    pub fn new(config: SamplingConfig) -> Self {
        Self { config }
    }

    /// Upsert a sample for `identifier` and recompute.
    pub fn record_sample(
        &self,
        mut state: AggregateState,
        identifier: &str,
        mood: Mood,
        now: DateTime<Utc>,
        country: Option<String>,
    ) -> Result<AggregateState, ValidationError> {
        let identifier = validate_sampling_identifier(identifier)?;
        state.samples.insert(
            slot_key(identifier),
            Sample {
                mood,
                timestamp: now,
                country,
            },
        );
        state.dirty = true;
        Ok(self.recompute(state, now))
    }

    /// Prune, re-tally, smooth ratios, re-estimate, stamp.
    pub fn recompute(&self, mut state: AggregateState, now: DateTime<Utc>) -> AggregateState {
        if !state.dirty && state.last_update == Some(now) {
            return state;
        }

        let cutoff = now - Duration::seconds(self.config.ttl_secs as i64);
        state.samples.retain(|_, s| s.timestamp >= cutoff);

        let counts = MoodCounts::from_moods(state.samples.values().map(|s| s.mood));
        let sample_count = counts.total();
        if sample_count > 0 {
            state.ratios = state.ratios.blend(&counts, self.config.smoothing);
        }

        let minutes = state
            .last_update
            .map(|last| (now - last).num_milliseconds() as f64 / 60_000.0)
            .unwrap_or(0.0)
            .max(0.0);
        state.estimated_total =
            estimate_population(&self.config, sample_count, state.estimated_total, minutes);
        state.sample_count = sample_count;
        state.last_update = Some(now);
        state.dirty = false;
        state
    }
}

/// `fresh_weight × (samples / rate) + (1 - fresh_weight) × previous × decay^minutes`,
/// floored at zero and rounded.
pub fn estimate_population(
    config: &SamplingConfig,
    sample_count: u64,
    previous: u64,
    minutes_since_update: f64,
) -> u64 {
    let fresh = sample_count as f64 / config.sample_rate;
    let carried = previous as f64 * config.decay_factor.powf(minutes_since_update.max(0.0));
    let blended = config.fresh_weight * fresh + (1.0 - config.fresh_weight) * carried;
    blended.max(0.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn sampler() -> Sampler {
        Sampler::new(SamplingConfig::default())
    }

    #[test]
    fn estimate_from_fresh_samples_only() {
        let cfg = SamplingConfig::default();
        assert_eq!(estimate_population(&cfg, 30, 0, 0.0), 600);
    }

    #[test]
    fn estimate_blends_previous_without_decay() {
        let cfg = SamplingConfig::default();
        assert_eq!(estimate_population(&cfg, 30, 800, 0.0), 920);
    }

    #[test]
    fn estimate_decays_previous_after_one_minute() {
        let cfg = SamplingConfig::default();
        assert_eq!(estimate_population(&cfg, 0, 1000, 1.0), 340);
    }

    #[test]
    fn estimate_never_negative() {
        let cfg = SamplingConfig::default();
        assert_eq!(estimate_population(&cfg, 0, 0, 0.0), 0);
        assert_eq!(estimate_population(&cfg, 0, 0, 30.0), 0);
    }

    #[test]
    fn record_sample_rejects_short_identifier() {
        let err = sampler()
            .record_sample(AggregateState::default(), "abc", Mood::Hope, t0(), None)
            .unwrap_err();
        assert_eq!(err, ValidationError::InvalidIdentifier { min: 8 });
    }

    #[test]
    fn record_sample_uses_slot_key_and_recomputes() {
        let state = sampler()
            .record_sample(
                AggregateState::default(),
                "abcdefgh-1234-5678",
                Mood::Gratitude,
                t0(),
                Some("NL".into()),
            )
            .unwrap();
        assert!(state.samples.contains_key("abcdefgh"));
        assert_eq!(state.sample_count, 1);
        assert_eq!(state.last_update, Some(t0()));
        // 0.6 × (1 / 0.03) = 20
        assert_eq!(state.estimated_total, 20);
        assert!(state.ratios.gratitude > state.ratios.presence);
    }

    #[test]
    fn same_slot_is_overwritten_not_duplicated() {
        let s = sampler();
        let state = s
            .record_sample(AggregateState::default(), "session-aaaa", Mood::Hope, t0(), None)
            .unwrap();
        let state = s
            .record_sample(state, "session-bbbb", Mood::Solace, t0(), None)
            .unwrap();
        // Both identifiers share the "session-" prefix.
        assert_eq!(state.samples.len(), 1);
        assert_eq!(state.samples["session-"].mood, Mood::Solace);
    }

    #[test]
    fn prune_boundary_is_exact() {
        let s = sampler();
        let now = t0();
        let mut state = AggregateState::default();
        state.samples.insert(
            "at-edge1".into(),
            Sample {
                mood: Mood::Hope,
                timestamp: now - Duration::seconds(120),
                country: None,
            },
        );
        state.samples.insert(
            "too-old1".into(),
            Sample {
                mood: Mood::Hope,
                timestamp: now - Duration::seconds(120) - Duration::milliseconds(1),
                country: None,
            },
        );
        let state = s.recompute(state, now);
        assert!(state.samples.contains_key("at-edge1"));
        assert!(!state.samples.contains_key("too-old1"));
    }

    #[test]
    fn empty_sample_set_keeps_previous_ratios() {
        let s = sampler();
        let mut state = AggregateState::default();
        state.ratios = MoodRatios {
            presence: 0.1,
            gratitude: 0.6,
            hope: 0.2,
            solace: 0.1,
        };
        state.estimated_total = 1000;
        state.last_update = Some(t0());
        let state = s.recompute(state, t0() + Duration::minutes(1));
        assert_eq!(state.ratios.gratitude, 0.6);
        assert_eq!(state.estimated_total, 340);
        assert_eq!(state.sample_count, 0);
    }

    #[test]
    fn recompute_at_same_instant_is_a_no_op() {
        let s = sampler();
        let state = s
            .record_sample(AggregateState::default(), "abcdefgh", Mood::Hope, t0(), None)
            .unwrap();
        let again = s.recompute(state.clone(), t0());
        assert_eq!(state, again);
    }

    #[test]
    fn clock_going_backwards_does_not_inflate_estimate() {
        let s = sampler();
        let mut state = AggregateState::default();
        state.estimated_total = 100;
        state.last_update = Some(t0());
        let state = s.recompute(state, t0() - Duration::minutes(5));
        // previous carried at full weight: 0.4 × 100
        assert_eq!(state.estimated_total, 40);
    }

    #[test]
    fn snapshot_splits_total_by_ratio() {
        let mut state = AggregateState::default();
        state.estimated_total = 100;
        state.ratios = MoodRatios {
            presence: 0.5,
            gratitude: 0.25,
            hope: 0.125,
            solace: 0.125,
        };
        let snap = state.to_snapshot();
        assert_eq!(snap.count, 100);
        assert_eq!(snap.moods.presence, 50);
        assert_eq!(snap.moods.gratitude, 25);
        // 12.5 rounds away from zero on both
        assert_eq!(snap.moods.hope, 13);
        assert_eq!(snap.moods.solace, 13);
    }

    #[test]
    fn snapshot_roster_comes_from_samples_in_slot_order() {
        let s = sampler();
        let mut state = AggregateState::default();
        for (id, mood) in [("zzzzzzzz-1", Mood::Hope), ("aaaaaaaa-1", Mood::Solace)] {
            state = s.record_sample(state, id, mood, t0(), Some("JP".into())).unwrap();
        }
        let snap = state.to_snapshot();
        let ids: Vec<_> = snap.users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["aaaaaaaa", "zzzzzzzz"]);
        assert_eq!(snap.countries.unwrap()["JP"], 2);
        assert_eq!(snap.timestamp, t0().timestamp_millis());
    }

    #[test]
    fn state_round_trips_through_json_without_dirty_flag() {
        let state = sampler()
            .record_sample(AggregateState::default(), "abcdefgh", Mood::Hope, t0(), None)
            .unwrap();
        let json = serde_json::to_string(&state).unwrap();
        assert!(!json.contains("dirty"));
        let back: AggregateState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
