//! Valet Kernel: an automated parking facility as a pipeline of actors.
//!
//! Vehicles arrive at stochastic intervals, pass an admission gate, and are
//! handed to a planner that opens a private channel to each one, spawns a
//! per-vehicle agent, and sends it a directive. Actors share nothing; every
//! message travels over a named point-to-point channel, and every task lives
//! inside a cancellable [`TaskScope`].

pub mod actors;
pub mod channel;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod messages;
pub mod policy;
pub mod sampling;
pub mod scope;
pub mod supervisor;
pub mod vehicle;

pub use channel::{
    create_bidirectional, create_unidirectional, ActorId, ChannelCapacity, EndpointSet, Permit,
};
pub use clock::SimClock;
pub use config::{ChannelConfig, ExtensionConfig, SimConfig};
pub use error::{KernelError, Result};
pub use events::{EventKind, EventSink, SimEvent};
pub use messages::Message;
pub use policy::{AcceptAll, AdmissionDecision, AdmissionPolicy, AdmissionState, CapacityLimit, PolicyKind, RejectAll};
pub use sampling::{ArrivalProcess, ExponentialArrivals, ScriptedArrivals};
pub use scope::{FailurePolicy, ScopeSummary, TaskScope};
pub use supervisor::{SimulationHandle, Supervisor};
pub use vehicle::{Departure, DepartureRequest, Directive, Vehicle, VehicleId};
