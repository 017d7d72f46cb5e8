//! Vehicle types: the entities that flow through the facility pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{KernelError, Result};

/// Opaque identity of a vehicle, stable for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleId(Uuid);

impl VehicleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic id derived from a label, used by scripted scenarios.
    pub fn from_label(label: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, label.as_bytes()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for VehicleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for VehicleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Eight hex digits are plenty to tell vehicles apart in a log line.
        let simple = self.0.simple().to_string();
        write!(f, "Car-{}", &simple[..8])
    }
}

/// Motion instruction handed from the planner to a vehicle agent.
///
/// The kernel never looks inside the payload; it is whatever the planner
/// was configured with (typically a reference path).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive(serde_json::Value);

impl Directive {
    pub fn new(payload: serde_json::Value) -> Self {
        Self(payload)
    }

    /// A directive carrying a list of 2D waypoints.
    pub fn reference_path(points: &[[f64; 2]]) -> Self {
        Self(serde_json::json!(points))
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.0
    }
}

impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A vehicle admitted to (or arriving at) the facility.
///
/// Times are seconds relative to the simulation clock origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub arrive_time: f64,
    pub depart_time: f64,
    directive: Option<Directive>,
}

impl Vehicle {
    /// Create a vehicle arriving at `arrive_time` and parking for `park_duration` seconds.
    ///
    /// A positive stay too short to register at `arrive_time`'s magnitude is
    /// rounded up to the next representable instant.
    pub fn new(arrive_time: f64, park_duration: f64) -> Result<Self> {
        let mut depart_time = arrive_time + park_duration;
        if park_duration > 0.0 && depart_time == arrive_time {
            depart_time = next_up(arrive_time);
        }
        Self::with_id(VehicleId::new(), arrive_time, depart_time)
    }

    /// Create a vehicle with an explicit identity.
    ///
    /// Fails unless `depart_time` is strictly after `arrive_time`.
    pub fn with_id(id: VehicleId, arrive_time: f64, depart_time: f64) -> Result<Self> {
        // NaN fails this comparison too.
        if !(depart_time > arrive_time) {
            return Err(KernelError::InvalidVehicle {
                id,
                arrive_time,
                depart_time,
            });
        }
        Ok(Self {
            id,
            arrive_time,
            depart_time,
            directive: None,
        })
    }

    pub fn directive(&self) -> Option<&Directive> {
        self.directive.as_ref()
    }

    /// Record the directive delivered by the planner. Only the first one sticks.
    pub(crate) fn assign_directive(&mut self, directive: Directive) -> Result<()> {
        if self.directive.is_some() {
            return Err(KernelError::DirectiveAlreadySet(self.id));
        }
        self.directive = Some(directive);
        Ok(())
    }

    /// Planned stay in seconds.
    pub fn park_duration(&self) -> f64 {
        self.depart_time - self.arrive_time
    }
}

/// Smallest `f64` greater than a finite `x`.
fn next_up(x: f64) -> f64 {
    if x == 0.0 {
        return f64::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

/// Notice sent by a vehicle agent to the planner when its vehicle asks to leave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartureRequest {
    pub vehicle: VehicleId,
    pub arrive_time: f64,
    pub depart_time: f64,
    pub requested_at: f64,
}

impl DepartureRequest {
    pub fn for_vehicle(vehicle: &Vehicle, requested_at: f64) -> Self {
        Self {
            vehicle: vehicle.id,
            arrive_time: vehicle.arrive_time,
            depart_time: vehicle.depart_time,
            requested_at,
        }
    }
}

/// Notice sent from the planner to admission control once a vehicle's agent
/// has ended, however it ended. Frees the vehicle's place in the facility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Departure {
    pub vehicle: VehicleId,
    /// Whether the agent asked to leave before it ended.
    pub requested: bool,
    pub left_at: f64,
}
