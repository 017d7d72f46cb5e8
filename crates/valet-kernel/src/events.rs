//! Observation stream.
//!
//! Actors report what happens to each vehicle through an [`EventSink`]. The
//! stream is the machine-readable twin of the console log: tests assert on it
//! and the simulation runner folds it into a run summary. Emitting never
//! blocks, and a sink nobody listens to is free.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::vehicle::VehicleId;

/// What happened to a vehicle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Arrived { depart_time: f64 },
    Admitted,
    Rejected { reason: String },
    ChannelsOpened,
    AgentSpawned,
    DirectiveSent,
    DirectiveReceived,
    TrackingStarted,
    DepartureChecked { requested: bool },
    DepartureRequested,
    Released,
    AgentFinished,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Arrived { .. } => "arrived",
            EventKind::Admitted => "admitted",
            EventKind::Rejected { .. } => "rejected",
            EventKind::ChannelsOpened => "channels_opened",
            EventKind::AgentSpawned => "agent_spawned",
            EventKind::DirectiveSent => "directive_sent",
            EventKind::DirectiveReceived => "directive_received",
            EventKind::TrackingStarted => "tracking_started",
            EventKind::DepartureChecked { .. } => "departure_checked",
            EventKind::DepartureRequested => "departure_requested",
            EventKind::Released => "released",
            EventKind::AgentFinished => "agent_finished",
        }
    }
}

/// One observation, stamped with simulation time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimEvent {
    pub vehicle: VehicleId,
    pub at: f64,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Where actors send their observations.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<SimEvent>>,
}

impl EventSink {
    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// A sink paired with the receiver that observes it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SimEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, vehicle: VehicleId, at: f64, kind: EventKind) {
        if let Some(tx) = &self.tx {
            // A dropped observer is not the actors' problem
            let _ = tx.send(SimEvent { vehicle, at, kind });
        }
    }
}
