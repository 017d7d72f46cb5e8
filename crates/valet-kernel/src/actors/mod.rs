//! The long-lived pipeline actors and the per-vehicle agent.
//!
//! Each actor owns an [`EndpointSet`](crate::channel::EndpointSet) and a `run`
//! future that the supervisor (or, for vehicle agents, the planner) spawns
//! into a [`TaskScope`](crate::scope::TaskScope):
//!
//! ```text
//! ArrivalSource ──▶ AdmissionController ◀─▶ DirectivePlanner ◀─▶ VehicleAgent (one per car)
//!   sleep(Exp(λ))     policy.evaluate()        open channels
//!   new Vehicle       forward / drop           spawn agent
//!                                              send Directive
//! ```
//!
//! Actors communicate only through their endpoints; none of them shares
//! mutable state with another.

mod admission;
mod arrival_source;
mod planner;
mod vehicle_agent;

pub use admission::AdmissionController;
pub use arrival_source::ArrivalSource;
pub use planner::DirectivePlanner;
pub use vehicle_agent::{departure_requested, VehicleAgent};

/// Peer name of the arrival source.
pub const ARRIVAL_SOURCE: &str = "ArrivalSource";
/// Peer name of the admission controller.
pub const ADMISSION_CONTROLLER: &str = "AdmissionController";
/// Peer name of the directive planner.
pub const DIRECTIVE_PLANNER: &str = "DirectivePlanner";
