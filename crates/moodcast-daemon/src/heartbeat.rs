//! Stateless heartbeat path: every request loads the shared aggregate,
//! folds in one sample, and writes it back. Concurrent heartbeats race
//! last-write-wins on the store.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use moodcast_core::clock::Clock;
use moodcast_core::sampling::{AggregateState, MoodRatios, Sampler};
use moodcast_core::simulation::{SimulationEngine, overlay};
use moodcast_core::validation::{normalize_country, validate_sampling_identifier};
use moodcast_core::{Mood, PresenceSnapshot, ValidationError};

use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("store worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Sampling-side numbers for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct SamplingStats {
    pub estimated_total: u64,
    pub sample_count: u64,
    pub ratios: MoodRatios,
    pub last_update: Option<DateTime<Utc>>,
}

pub struct HeartbeatService {
    store: Arc<Store>,
    sampler: Sampler,
    simulation: Mutex<SimulationEngine>,
    clock: Arc<dyn Clock>,
    cache_ttl: TimeDelta,
    cache: Mutex<Option<(DateTime<Utc>, PresenceSnapshot)>>,
}

impl HeartbeatService {
    pub fn new(
        store: Arc<Store>,
        sampler: Sampler,
        simulation: SimulationEngine,
        clock: Arc<dyn Clock>,
        cache_ttl: std::time::Duration,
    ) -> Self {
        Self {
            store,
            sampler,
            simulation: Mutex::new(simulation),
            clock,
            cache_ttl: TimeDelta::from_std(cache_ttl).unwrap_or(TimeDelta::zero()),
            cache: Mutex::new(None),
        }
    }

    pub fn cache_ttl_secs(&self) -> i64 {
        self.cache_ttl.num_seconds()
    }

    /// Record one heartbeat and return the refreshed aggregate.
    pub async fn heartbeat(
        &self,
        identifier: Option<&str>,
        mood: Option<&str>,
        country: Option<&str>,
    ) -> Result<PresenceSnapshot, HeartbeatError> {
        let identifier = identifier.ok_or(ValidationError::MissingIdentifier)?;
        let identifier = validate_sampling_identifier(identifier)?.to_string();
        let mood = Mood::coerce(mood);
        let country = normalize_country(country);
        let now = self.clock.now();

        let store = self.store.clone();
        let sampler = self.sampler.clone();
        let state = tokio::task::spawn_blocking(move || -> Result<AggregateState, HeartbeatError> {
            let state = store.load_aggregate()?;
            let state = sampler.record_sample(state, &identifier, mood, now, country)?;
            store.save_aggregate(&state)?;
            Ok(state)
        })
        .await??;

        debug!(
            estimated_total = state.estimated_total,
            sample_count = state.sample_count,
            "heartbeat: sample recorded"
        );
        let snapshot = self.with_simulation(state.to_snapshot());
        self.remember(now, &snapshot);
        Ok(snapshot)
    }

    /// Current aggregate, memoized for the cache window.
    pub async fn presence(&self) -> Result<PresenceSnapshot, HeartbeatError> {
        let now = self.clock.now();
        if let Some(hit) = self.cached(now) {
            return Ok(hit);
        }
        let state = self.load_recomputed(now).await?;
        let snapshot = self.with_simulation(state.to_snapshot());
        self.remember(now, &snapshot);
        Ok(snapshot)
    }

    pub async fn stats(&self) -> Result<SamplingStats, HeartbeatError> {
        let state = self.load_recomputed(self.clock.now()).await?;
        Ok(SamplingStats {
            estimated_total: state.estimated_total,
            sample_count: state.sample_count,
            ratios: state.ratios,
            last_update: state.last_update,
        })
    }

    /// Read-only recompute: prunes and decays in memory without writing
    /// back, so idle reads never race heartbeats.
    async fn load_recomputed(&self, now: DateTime<Utc>) -> Result<AggregateState, HeartbeatError> {
        let store = self.store.clone();
        let sampler = self.sampler.clone();
        let state = tokio::task::spawn_blocking(move || -> Result<AggregateState, HeartbeatError> {
            Ok(sampler.recompute(store.load_aggregate()?, now))
        })
        .await??;
        Ok(state)
    }

    fn with_simulation(&self, snapshot: PresenceSnapshot) -> PresenceSnapshot {
        let roster = self
            .simulation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .roster();
        overlay(snapshot, &roster)
    }

    fn cached(&self, now: DateTime<Utc>) -> Option<PresenceSnapshot> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        match cache.as_ref() {
            Some((at, snapshot)) if now >= *at && now - *at < self.cache_ttl => Some(snapshot.clone()),
            _ => None,
        }
    }

    fn remember(&self, now: DateTime<Utc>, snapshot: &PresenceSnapshot) {
        if self.cache_ttl <= TimeDelta::zero() {
            return;
        }
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        *cache = Some((now, snapshot.clone()));
    }
}
