//! Messages exchanged between actors.
//!
//! ```text
//! ArrivalSource ──Vehicle──▶ AdmissionController ──Vehicle──▶ DirectivePlanner
//!                                   ▲                            │      ▲
//!                                   └────────Departure───────────┘      │
//!                                                             Directive │ DepartureRequest
//!                                                                ▼      │
//!                                                              VehicleAgent
//! ```
//!
//! `DepartureRequest` and `Departure` only flow when departure requests are enabled.

use crate::vehicle::{Departure, DepartureRequest, Directive, Vehicle};

#[derive(Debug, Clone)]
pub enum Message {
    /// A vehicle handed downstream (arrival or admission).
    Vehicle(Vehicle),
    /// The planner's instruction to one vehicle agent.
    Directive(Directive),
    /// A vehicle asking its planner to leave.
    DepartureRequest(DepartureRequest),
    /// A vehicle whose agent has ended, reported to admission control.
    Departure(Departure),
}

impl Message {
    /// Short name of the variant, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Vehicle(_) => "vehicle",
            Message::Directive(_) => "directive",
            Message::DepartureRequest(_) => "departure_request",
            Message::Departure(_) => "departure",
        }
    }
}
