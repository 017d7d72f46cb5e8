//! Admission policies: the accept/reject decision applied to each arrival.
//!
//! The [`AdmissionController`](crate::actors::AdmissionController) is the only
//! place a policy is consulted. Policies are pure functions of the vehicle and
//! the controller's running counts; they never hold vehicles themselves.

use serde::{Deserialize, Serialize};

use crate::vehicle::Vehicle;

/// Running counts kept by the admission controller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionState {
    pub admitted: u64,
    pub rejected: u64,
    /// Vehicles that have asked to leave (only counted with departure requests on).
    pub released: u64,
}

impl AdmissionState {
    /// Vehicles admitted and not yet released.
    pub fn in_facility(&self) -> u64 {
        self.admitted.saturating_sub(self.released)
    }
}

/// Outcome of evaluating a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Accept,
    Reject { reason: String },
}

impl AdmissionDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, AdmissionDecision::Accept)
    }
}

/// A pluggable admission predicate.
///
/// Must be cheap and side-effect free; it runs inline on the controller's loop.
pub trait AdmissionPolicy: Send + Sync {
    /// Unique name for this policy.
    fn name(&self) -> &str;

    fn evaluate(&self, vehicle: &Vehicle, state: &AdmissionState) -> AdmissionDecision;
}

/// Admit everything. The default placeholder policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl AdmissionPolicy for AcceptAll {
    fn name(&self) -> &str {
        "accept_all"
    }

    fn evaluate(&self, _vehicle: &Vehicle, _state: &AdmissionState) -> AdmissionDecision {
        AdmissionDecision::Accept
    }
}

/// Turn every vehicle away.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectAll;

impl AdmissionPolicy for RejectAll {
    fn name(&self) -> &str {
        "reject_all"
    }

    fn evaluate(&self, _vehicle: &Vehicle, _state: &AdmissionState) -> AdmissionDecision {
        AdmissionDecision::Reject {
            reason: "admission closed".to_string(),
        }
    }
}

/// Admit while fewer than `max_in_facility` vehicles are inside.
///
/// Occupancy only drops when departure requests are enabled; without them this
/// caps the total number of admissions.
#[derive(Debug, Clone, Copy)]
pub struct CapacityLimit {
    pub max_in_facility: u64,
}

impl CapacityLimit {
    pub fn new(max_in_facility: u64) -> Self {
        Self { max_in_facility }
    }
}

impl AdmissionPolicy for CapacityLimit {
    fn name(&self) -> &str {
        "capacity_limit"
    }

    fn evaluate(&self, _vehicle: &Vehicle, state: &AdmissionState) -> AdmissionDecision {
        if state.in_facility() < self.max_in_facility {
            AdmissionDecision::Accept
        } else {
            AdmissionDecision::Reject {
                reason: format!("facility full ({} inside)", state.in_facility()),
            }
        }
    }
}

/// Policies selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    AcceptAll,
    RejectAll,
}
