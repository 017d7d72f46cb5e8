//! Random-process collaborators: where arrival intervals and stays come from.
//!
//! The [`ArrivalSource`](crate::actors::ArrivalSource) only asks an
//! [`ArrivalProcess`] for the next interval and the next park duration. Two
//! implementations ship with the kernel:
//!
//! - [`ExponentialArrivals`]: Poisson arrivals with exponentially distributed stays
//! - [`ScriptedArrivals`]: a fixed schedule, for reproducible scenarios

use std::collections::VecDeque;
use std::time::Duration;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::error::{KernelError, Result};

/// Supplies the stochastic inputs of the arrival loop.
pub trait ArrivalProcess: Send {
    /// Seconds to wait before the next vehicle arrives.
    ///
    /// `None` means the process is exhausted and no more vehicles will come.
    fn next_interval(&mut self) -> Option<f64>;

    /// Seconds the vehicle that just arrived will stay. Always positive.
    fn park_duration(&mut self) -> f64;

    /// Extra pause after handing a vehicle downstream.
    ///
    /// Only shuffles the interleaving of downstream work.
    fn emission_pause(&mut self) -> Duration {
        Duration::ZERO
    }
}

/// Draw from Exponential with the given mean by inverting the CDF.
///
/// `u` is kept away from zero so the sample is finite and strictly positive.
fn sample_exponential(rng: &mut impl Rng, mean: f64) -> f64 {
    let u: f64 = rng.random_range(f64::EPSILON..1.0);
    -u.ln() * mean
}

fn require_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(KernelError::InvalidConfig(format!(
            "{} must be positive and finite, got {}",
            name, value
        )))
    }
}

/// Arrivals at `arrival_rate` per second with stays averaging `mean_park_secs`.
#[derive(Debug, Clone)]
pub struct ExponentialArrivals {
    arrival_rate: f64,
    mean_park_secs: f64,
    max_pause: Duration,
    rng: ChaCha8Rng,
}

impl ExponentialArrivals {
    /// Create the process. A seed makes the sample sequence reproducible.
    pub fn new(arrival_rate: f64, mean_park_secs: f64, seed: Option<u64>) -> Result<Self> {
        require_positive("arrival_rate", arrival_rate)?;
        require_positive("mean_park_secs", mean_park_secs)?;

        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };

        Ok(Self {
            arrival_rate,
            mean_park_secs,
            max_pause: Duration::ZERO,
            rng,
        })
    }

    /// Pause up to `max_pause` (uniformly) after each emission.
    pub fn with_max_pause(mut self, max_pause: Duration) -> Self {
        self.max_pause = max_pause;
        self
    }

    pub fn arrival_rate(&self) -> f64 {
        self.arrival_rate
    }

    pub fn mean_park_secs(&self) -> f64 {
        self.mean_park_secs
    }
}

impl ArrivalProcess for ExponentialArrivals {
    fn next_interval(&mut self) -> Option<f64> {
        Some(sample_exponential(&mut self.rng, 1.0 / self.arrival_rate))
    }

    fn park_duration(&mut self) -> f64 {
        sample_exponential(&mut self.rng, self.mean_park_secs)
    }

    fn emission_pause(&mut self) -> Duration {
        let max_ms = self.max_pause.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.rng.random_range(0..=max_ms))
    }
}

/// A fixed list of `(interval, park_duration)` pairs, replayed in order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedArrivals {
    script: VecDeque<(f64, f64)>,
    pending_park: Option<f64>,
}

impl ScriptedArrivals {
    /// Intervals must be non-negative and stays positive.
    pub fn new(script: impl IntoIterator<Item = (f64, f64)>) -> Result<Self> {
        let script: VecDeque<(f64, f64)> = script.into_iter().collect();
        for &(interval, park) in &script {
            if !interval.is_finite() || interval < 0.0 {
                return Err(KernelError::InvalidConfig(format!(
                    "scripted interval must be non-negative, got {}",
                    interval
                )));
            }
            require_positive("scripted park duration", park)?;
        }
        Ok(Self {
            script,
            pending_park: None,
        })
    }

    /// Vehicles still to arrive.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl ArrivalProcess for ScriptedArrivals {
    fn next_interval(&mut self) -> Option<f64> {
        let (interval, park) = self.script.pop_front()?;
        self.pending_park = Some(park);
        Some(interval)
    }

    fn park_duration(&mut self) -> f64 {
        // Only reachable after next_interval, which always stages a stay
        self.pending_park.take().unwrap_or(f64::MIN_POSITIVE)
    }
}
