//! Simulation-relative time.

use tokio::time::Instant;

/// Clock whose origin is captured once when the simulation starts.
///
/// Every actor that needs a timestamp gets a copy; there is no global start
/// time. Reads go through tokio's clock so paused-time tests stay deterministic.
#[derive(Debug, Clone, Copy)]
pub struct SimClock {
    origin: Instant,
}

impl SimClock {
    /// Capture the current instant as the time origin.
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Seconds elapsed since the origin.
    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }
}
