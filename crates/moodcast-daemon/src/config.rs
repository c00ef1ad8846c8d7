//! Daemon configuration: CLI flags, each backed by an environment variable.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser};

use moodcast_core::sampling::SamplingConfig;
use moodcast_core::simulation::{MAX_BASE_COUNT, SimulationConfig};

use crate::room::RoomConfig;

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";
pub const DEFAULT_DB: &str = "moodcast.db";

#[derive(Debug, Clone, Args)]
pub struct ServeOpts {
    /// Address the HTTP/WebSocket server listens on
    #[arg(long, env = "MOODCAST_BIND", default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,

    /// SQLite database path
    #[arg(long, env = "MOODCAST_DB", default_value = DEFAULT_DB)]
    pub db: PathBuf,

    /// Pad sparse populations with simulated users
    #[arg(
        long,
        env = "MOODCAST_SIMULATION",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true"
    )]
    pub simulation: bool,

    #[arg(long, env = "MOODCAST_SIMULATION_BASE", default_value_t = 24)]
    pub simulation_base: u64,

    /// Random-walk the simulated count around the base
    #[arg(
        long,
        env = "MOODCAST_SIMULATION_DYNAMIC",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = true,
        default_missing_value = "true"
    )]
    pub simulation_dynamic: bool,

    #[arg(
        long,
        env = "MOODCAST_SIMULATION_MIN_OFFSET",
        default_value_t = -5,
        allow_hyphen_values = true
    )]
    pub simulation_min_offset: i64,

    #[arg(
        long,
        env = "MOODCAST_SIMULATION_MAX_OFFSET",
        default_value_t = 5,
        allow_hyphen_values = true
    )]
    pub simulation_max_offset: i64,

    /// Seconds between simulated-count steps
    #[arg(long, env = "MOODCAST_FLUCTUATION_SECS", default_value_t = 30)]
    pub fluctuation_secs: u64,

    /// Fraction of clients expected to send heartbeats
    #[arg(long, env = "MOODCAST_SAMPLE_RATE", default_value_t = 0.03)]
    pub sample_rate: f64,

    #[arg(long, env = "MOODCAST_SAMPLE_TTL_SECS", default_value_t = 120)]
    pub sample_ttl_secs: u64,

    /// Per-minute decay applied to the previous estimate
    #[arg(long, env = "MOODCAST_DECAY_FACTOR", default_value_t = 0.85)]
    pub decay_factor: f64,

    #[arg(long, env = "MOODCAST_BROADCAST_INTERVAL_SECS", default_value_t = 5)]
    pub broadcast_interval_secs: u64,

    /// Memo and Cache-Control window for GET /api/presence
    #[arg(long, env = "MOODCAST_PRESENCE_CACHE_SECS", default_value_t = 5)]
    pub presence_cache_secs: u64,

    /// Minimum spacing between room durability snapshots
    #[arg(long, env = "MOODCAST_SNAPSHOT_INTERVAL_SECS", default_value_t = 60)]
    pub snapshot_interval_secs: u64,

    #[arg(long, env = "MOODCAST_EVENT_LOG_CAPACITY", default_value_t = 100)]
    pub event_log_capacity: usize,

    /// Shared secret for /admin endpoints. Unset: loopback only.
    #[arg(long, env = "MOODCAST_ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,
}

#[derive(Parser)]
struct EnvOnly {
    #[command(flatten)]
    opts: ServeOpts,
}

impl ServeOpts {
    /// Defaults overlaid with whatever `MOODCAST_*` variables are set.
    pub fn from_env() -> Result<Self, clap::Error> {
        EnvOnly::try_parse_from(["moodcast"]).map(|cli| cli.opts)
    }

    pub fn app_config(&self) -> AppConfig {
        AppConfig {
            sampling: self.sampling_config(),
            simulation: self.simulation_config(),
            room: self.room_config(),
            presence_cache: Duration::from_secs(self.presence_cache_secs),
            admin_token: self.admin_token.clone(),
        }
    }

    pub fn sampling_config(&self) -> SamplingConfig {
        let defaults = SamplingConfig::default();
        SamplingConfig {
            sample_rate: unit_interval(self.sample_rate, defaults.sample_rate),
            ttl_secs: self.sample_ttl_secs.max(1),
            decay_factor: unit_interval(self.decay_factor, defaults.decay_factor),
            ..defaults
        }
    }

    pub fn simulation_config(&self) -> SimulationConfig {
        let (min_offset, max_offset) = if self.simulation_min_offset <= self.simulation_max_offset {
            (self.simulation_min_offset, self.simulation_max_offset)
        } else {
            (self.simulation_max_offset, self.simulation_min_offset)
        };
        SimulationConfig {
            enabled: self.simulation,
            base_count: self.simulation_base.min(MAX_BASE_COUNT),
            dynamic: self.simulation_dynamic,
            min_offset,
            max_offset,
            fluctuation_interval_secs: self.fluctuation_secs.max(1),
            ..SimulationConfig::default()
        }
    }

    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            broadcast_interval: Duration::from_secs(self.broadcast_interval_secs.max(1)),
            snapshot_interval: Duration::from_secs(self.snapshot_interval_secs),
            event_log_capacity: self.event_log_capacity.max(1),
            ..RoomConfig::default()
        }
    }
}

/// Everything the running services need, detached from the CLI.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub sampling: SamplingConfig,
    pub simulation: SimulationConfig,
    pub room: RoomConfig,
    pub presence_cache: Duration,
    pub admin_token: Option<String>,
}

/// Keep a rate in (0, 1]; anything else falls back.
fn unit_interval(value: f64, fallback: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value.min(1.0)
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ServeOpts {
        let mut argv = vec!["moodcast"];
        argv.extend_from_slice(args);
        EnvOnly::try_parse_from(argv).unwrap().opts
    }

    #[test]
    fn defaults_match_documented_values() {
        let opts = parse(&[]);
        assert_eq!(opts.bind, DEFAULT_BIND.parse().unwrap());
        assert_eq!(opts.db, PathBuf::from(DEFAULT_DB));
        assert!(!opts.simulation);
        assert!(opts.simulation_dynamic);
        assert_eq!(opts.simulation_config(), SimulationConfig::default());
        assert_eq!(opts.sampling_config(), SamplingConfig::default());
        let room = opts.room_config();
        assert_eq!(room.broadcast_interval, Duration::from_secs(5));
        assert_eq!(room.snapshot_interval, Duration::from_secs(60));
        assert_eq!(room.event_log_capacity, 100);
        assert_eq!(opts.app_config().presence_cache, Duration::from_secs(5));
        assert!(opts.admin_token.is_none());
    }

    #[test]
    fn bare_flag_enables_simulation() {
        let opts = parse(&["--simulation", "--simulation-dynamic", "false"]);
        assert!(opts.simulation);
        assert!(!opts.simulation_dynamic);
    }

    #[test]
    fn negative_offsets_parse_and_get_ordered() {
        let opts = parse(&[
            "--simulation-min-offset",
            "3",
            "--simulation-max-offset",
            "-8",
        ]);
        let sim = opts.simulation_config();
        assert_eq!((sim.min_offset, sim.max_offset), (-8, 3));
    }

    #[test]
    fn out_of_range_rates_are_clamped() {
        let opts = parse(&["--sample-rate", "0", "--decay-factor", "7.5"]);
        let sampling = opts.sampling_config();
        assert_eq!(sampling.sample_rate, 0.03);
        assert_eq!(sampling.decay_factor, 1.0);
    }

    #[test]
    fn huge_simulation_base_is_capped() {
        let opts = parse(&["--simulation-base", "18446744073709551615"]);
        assert_eq!(opts.simulation_base, u64::MAX);
        assert_eq!(opts.simulation_config().base_count, MAX_BASE_COUNT);
    }

    #[test]
    fn zero_intervals_are_bumped() {
        let opts = parse(&["--broadcast-interval-secs", "0", "--fluctuation-secs", "0"]);
        assert_eq!(opts.room_config().broadcast_interval, Duration::from_secs(1));
        assert_eq!(opts.simulation_config().fluctuation_interval_secs, 1);
    }
}
