//! Configuration types for the simulation.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelCapacity;
use crate::error::{KernelError, Result};
use crate::policy::PolicyKind;
use crate::scope::FailurePolicy;

/// Top-level simulation configuration.
///
/// Supplied once at construction and never reloaded. Loaded from TOML/JSON
/// and then overridden from the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Average arrivals per second
    pub arrival_rate: f64,

    /// Average park duration in seconds
    pub mean_park_secs: f64,

    /// Upper bound of the random pause after each arrival (milliseconds, 0 disables)
    pub max_emission_pause_ms: u64,

    /// Length of one vehicle tracking tick (milliseconds)
    pub tracking_tick_ms: u64,

    /// Seed for the arrival process (None draws from OS entropy)
    pub seed: Option<u64>,

    /// Stop generating arrivals after this many vehicles (None runs forever)
    pub max_vehicles: Option<usize>,

    /// Built-in admission policy
    pub policy: PolicyKind,

    /// What the supervisor does when a task fails
    pub failure_policy: FailurePolicy,

    /// Channel capacities
    pub channels: ChannelConfig,

    /// Optional return path and admission limit
    pub extensions: ExtensionConfig,

    /// Waypoints handed to every vehicle as its directive
    pub reference_path: Vec<[f64; 2]>,
}

/// Capacities of the conduits the supervisor and planner create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// ArrivalSource → AdmissionController and AdmissionController ↔ DirectivePlanner
    pub static_capacity: ChannelCapacity,

    /// DirectivePlanner ↔ VehicleAgent, one pair per vehicle
    pub vehicle_capacity: ChannelCapacity,
}

/// Extension points that are off unless asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionConfig {
    /// Send a departure request from the vehicle back to admission control
    pub departure_requests: bool,

    /// Admit at most this many vehicles that have not been released
    pub admission_capacity: Option<usize>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            arrival_rate: 1.0,
            mean_park_secs: 1.0,
            max_emission_pause_ms: 1_000,
            tracking_tick_ms: 1_000,
            seed: None,
            max_vehicles: None,
            policy: PolicyKind::AcceptAll,
            failure_policy: FailurePolicy::FailFast,
            channels: ChannelConfig::default(),
            extensions: ExtensionConfig::default(),
            reference_path: vec![[0.0, 0.0], [1.0, 1.0]],
        }
    }
}

impl SimConfig {
    /// Load a config file; the format follows the extension (`.toml` or `.json`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| KernelError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;

        let parse_error = |reason: String| KernelError::ConfigParse {
            path: path.to_path_buf(),
            reason,
        };

        let config: SimConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&text).map_err(|e| parse_error(e.to_string()))?,
            Some("json") => serde_json::from_str(&text).map_err(|e| parse_error(e.to_string()))?,
            other => {
                return Err(parse_error(format!(
                    "unsupported config format {:?} (expected .toml or .json)",
                    other.unwrap_or("")
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the values the actors rely on.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("arrival_rate", self.arrival_rate),
            ("mean_park_secs", self.mean_park_secs),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(KernelError::InvalidConfig(format!(
                    "{} must be positive and finite, got {}",
                    name, value
                )));
            }
        }
        if self.tracking_tick_ms == 0 {
            return Err(KernelError::InvalidConfig(
                "tracking_tick_ms must be at least 1".to_string(),
            ));
        }
        if self.extensions.admission_capacity == Some(0) {
            return Err(KernelError::InvalidConfig(
                "admission_capacity must be at least 1".to_string(),
            ));
        }
        self.channels.static_capacity.validate()?;
        self.channels.vehicle_capacity.validate()?;
        Ok(())
    }

    pub fn tracking_tick(&self) -> Duration {
        Duration::from_millis(self.tracking_tick_ms)
    }

    pub fn max_emission_pause(&self) -> Duration {
        Duration::from_millis(self.max_emission_pause_ms)
    }
}
