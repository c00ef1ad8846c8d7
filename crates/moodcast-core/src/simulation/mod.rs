//! Ambient simulation layer.
//!
//! Pads a sparse real population with a reproducible synthetic roster so an
//! early deployment does not look empty. Regenerating at the same count
//! yields the same ids, moods and countries, so clients never see simulated
//! users jump between visual slots.

mod geo;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::types::{Mood, PresenceSnapshot, UserRecord};

pub use geo::country_for_index;

/// Share of simulated users per mood, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodDistribution {
    pub presence: u64,
    pub gratitude: u64,
    pub hope: u64,
    pub solace: u64,
}

impl Default for MoodDistribution {
    fn default() -> Self {
        Self {
            presence: 40,
            gratitude: 25,
            hope: 20,
            solace: 15,
        }
    }
}

impl MoodDistribution {
    pub fn percent(&self, mood: Mood) -> u64 {
        match mood {
            Mood::Presence => self.presence,
            Mood::Gratitude => self.gratitude,
            Mood::Hope => self.hope,
            Mood::Solace => self.solace,
        }
    }
}

/// Largest simulated base population the server will be configured with.
pub const MAX_BASE_COUNT: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub enabled: bool,
    pub base_count: u64,
    /// Random-walk the offset around `base_count`.
    pub dynamic: bool,
    pub min_offset: i64,
    pub max_offset: i64,
    pub fluctuation_interval_secs: u64,
    pub distribution: MoodDistribution,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_count: 24,
            dynamic: true,
            min_offset: -5,
            max_offset: 5,
            fluctuation_interval_secs: 30,
            distribution: MoodDistribution::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedUser {
    pub id: String,
    pub mood: Mood,
    pub country: String,
}

impl From<&SimulatedUser> for UserRecord {
    fn from(u: &SimulatedUser) -> Self {
        UserRecord::new(u.id.clone(), u.mood, Some(u.country.clone()))
    }
}

/// Owns the fluctuation state and roster cache for one consumer.
///
/// Each delivery mode holds its own engine; nothing here is global.
pub struct SimulationEngine {
    config: SimulationConfig,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    offset: i64,
    last_fluctuation: Option<DateTime<Utc>>,
    cache: Option<(usize, Vec<SimulatedUser>)>,
}

impl SimulationEngine {
    pub fn new(config: SimulationConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_rng(config, clock, StdRng::from_entropy())
    }

    /// Deterministic random walk, for tests.
    pub fn with_seed(config: SimulationConfig, clock: Arc<dyn Clock>, seed: u64) -> Self {
        Self::with_rng(config, clock, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: SimulationConfig, clock: Arc<dyn Clock>, rng: StdRng) -> Self {
        Self {
            config,
            clock,
            rng,
            offset: 0,
            last_fluctuation: None,
            cache: None,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// How many simulated users to show right now.
    pub fn simulated_count(&mut self) -> usize {
        if !self.config.enabled {
            return 0;
        }
        if self.config.dynamic {
            self.fluctuate(self.clock.now());
        }
        let base = i64::try_from(self.config.base_count).unwrap_or(i64::MAX);
        usize::try_from(base.saturating_add(self.offset).max(0)).unwrap_or(usize::MAX)
    }

    /// One ±1 step, at most once per fluctuation interval. The first call
    /// only starts the interval.
    fn fluctuate(&mut self, now: DateTime<Utc>) {
        let interval = i64::try_from(self.config.fluctuation_interval_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        match self.last_fluctuation {
            None => self.last_fluctuation = Some(now),
            Some(last) if now - last >= interval => {
                let step = if self.rng.gen_bool(0.5) { 1 } else { -1 };
                let (lo, hi) = (
                    self.config.min_offset.min(self.config.max_offset),
                    self.config.max_offset.max(self.config.min_offset),
                );
                self.offset = self.offset.saturating_add(step).clamp(lo, hi);
                self.last_fluctuation = Some(now);
                debug!(offset = self.offset, "simulation: offset fluctuated");
            }
            Some(_) => {}
        }
    }

    /// Deterministic roster of `count` simulated users, sorted by id.
    pub fn generate(&mut self, count: usize) -> &[SimulatedUser] {
        let stale = !matches!(&self.cache, Some((cached, _)) if *cached == count);
        if stale {
            self.cache = Some((count, build_roster(count, &self.config.distribution)));
        }
        match &self.cache {
            Some((_, users)) => users.as_slice(),
            None => &[],
        }
    }

    /// `simulated_count` followed by `generate`.
    pub fn roster(&mut self) -> Vec<SimulatedUser> {
        let count = self.simulated_count();
        self.generate(count).to_vec()
    }
}

fn build_roster(count: usize, distribution: &MoodDistribution) -> Vec<SimulatedUser> {
    let mut per_mood: Vec<(Mood, usize)> = Mood::ALL
        .iter()
        .map(|m| {
            let share = (count as u128 * u128::from(distribution.percent(*m)) / 100) as usize;
            (*m, share.min(count))
        })
        .collect();
    let assigned: usize = per_mood.iter().map(|(_, n)| n).sum();
    let remainder = count.saturating_sub(assigned);
    if let Some(slot) = per_mood.iter_mut().find(|(m, _)| *m == Mood::default()) {
        slot.1 += remainder;
    }

    let mut users = Vec::with_capacity(count);
    let mut global = 0usize;
    for (mood, n) in per_mood {
        for i in 0..n {
            users.push(SimulatedUser {
                id: format!("sim-{}-{:04}", mood.as_str(), i),
                mood,
                country: country_for_index(global).to_string(),
            });
            global += 1;
        }
    }
    users.truncate(count);
    users.sort_by(|a, b| a.id.cmp(&b.id));
    users
}

/// Concatenate and stable-sort by id. List position is the visual slot, so
/// this ordering is what keeps every client's layout identical.
pub fn merge(real: Vec<UserRecord>, simulated: &[SimulatedUser]) -> Vec<UserRecord> {
    let mut users = real;
    users.extend(simulated.iter().map(UserRecord::from));
    users.sort_by(|a, b| a.id.cmp(&b.id));
    users
}

/// Fold a simulated roster into a snapshot: counts, moods, countries and
/// users all grow by the simulated share.
pub fn overlay(mut snapshot: PresenceSnapshot, simulated: &[SimulatedUser]) -> PresenceSnapshot {
    if simulated.is_empty() {
        return snapshot;
    }
    snapshot.count += simulated.len() as u64;
    let countries = snapshot.countries.get_or_insert_with(Default::default);
    for user in simulated {
        snapshot.moods.add(user.mood, 1);
        *countries.entry(user.country.clone()).or_default() += 1;
    }
    snapshot.users = merge(std::mem::take(&mut snapshot.users), simulated);
    snapshot
}
