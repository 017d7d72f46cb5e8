//! The supervisor: builds the pipeline, wires its static channels, and owns
//! the root scope every actor runs in.
//!
//! ## Usage
//!
//! ```ignore
//! use valet_kernel::{SimConfig, Supervisor};
//!
//! let config = SimConfig::load("valet.toml")?;
//! let handle = Supervisor::new(config)?.start()?;
//!
//! // Stop from elsewhere (Ctrl-C, a deadline, ...)
//! let token = handle.cancellation_token();
//!
//! let summary = handle.join().await?;
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::actors::{
    AdmissionController, ArrivalSource, DirectivePlanner, ADMISSION_CONTROLLER, ARRIVAL_SOURCE,
    DIRECTIVE_PLANNER,
};
use crate::channel::{create_bidirectional, create_unidirectional};
use crate::clock::SimClock;
use crate::config::SimConfig;
use crate::error::{KernelError, Result};
use crate::events::EventSink;
use crate::policy::{AcceptAll, AdmissionPolicy, CapacityLimit, PolicyKind, RejectAll};
use crate::sampling::{ArrivalProcess, ExponentialArrivals};
use crate::scope::{ScopeSummary, TaskScope};
use crate::vehicle::Directive;

/// Name of the root scope.
pub const SUPERVISOR: &str = "Supervisor";

/// Pick the admission policy a config asks for.
///
/// An admission capacity takes precedence over the named policy.
pub fn policy_from_config(config: &SimConfig) -> Arc<dyn AdmissionPolicy> {
    if let Some(capacity) = config.extensions.admission_capacity {
        return Arc::new(CapacityLimit::new(capacity as u64));
    }
    match config.policy {
        PolicyKind::AcceptAll => Arc::new(AcceptAll),
        PolicyKind::RejectAll => Arc::new(RejectAll),
    }
}

/// Builder for one simulation run.
///
/// Collaborators default to what the config describes; tests swap them out
/// with the `with_*` methods before calling [`start`](Self::start).
pub struct Supervisor {
    config: SimConfig,
    arrivals: Box<dyn ArrivalProcess>,
    policy: Arc<dyn AdmissionPolicy>,
    events: EventSink,
}

impl Supervisor {
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;

        let arrivals = ExponentialArrivals::new(config.arrival_rate, config.mean_park_secs, config.seed)?
            .with_max_pause(config.max_emission_pause());
        let policy = policy_from_config(&config);

        Ok(Self {
            config,
            arrivals: Box::new(arrivals),
            policy,
            events: EventSink::disabled(),
        })
    }

    /// Replace the arrival process.
    pub fn with_arrivals(mut self, arrivals: impl ArrivalProcess + 'static) -> Self {
        self.arrivals = Box::new(arrivals);
        self
    }

    /// Replace the admission policy.
    pub fn with_policy(mut self, policy: Arc<dyn AdmissionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Report observations to `events`.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Wire the pipeline and spawn its actors. Must be called inside a tokio runtime.
    ///
    /// Every static channel exists before any actor starts, so the first
    /// arrival always finds admission control listening.
    pub fn start(self) -> Result<SimulationHandle> {
        let Supervisor {
            config,
            arrivals,
            policy,
            events,
        } = self;

        let clock = SimClock::start();
        let mut root = TaskScope::new(SUPERVISOR, config.failure_policy);

        let mut source = ArrivalSource::new(arrivals, clock, events.clone())
            .with_max_vehicles(config.max_vehicles);
        let mut admission = AdmissionController::new(policy.clone(), clock, events.clone());
        let mut planner = DirectivePlanner::new(
            root.child(DIRECTIVE_PLANNER),
            Directive::reference_path(&config.reference_path),
            clock,
            events,
        )
        .with_vehicle_capacity(config.channels.vehicle_capacity)
        .with_tracking_tick(config.tracking_tick())
        .with_departure_requests(config.extensions.departure_requests);

        let capacity = config.channels.static_capacity;
        create_unidirectional(source.endpoints_mut(), admission.endpoints_mut(), capacity)?;
        create_bidirectional(admission.endpoints_mut(), planner.endpoints_mut(), capacity)?;

        info!(
            arrival_rate = config.arrival_rate,
            mean_park_secs = config.mean_park_secs,
            policy = policy.name(),
            max_vehicles = ?config.max_vehicles,
            departure_requests = config.extensions.departure_requests,
            "Starting valet simulation"
        );

        root.spawn(ARRIVAL_SOURCE, source.run());
        root.spawn(ADMISSION_CONTROLLER, admission.run());
        root.spawn(DIRECTIVE_PLANNER, planner.run());

        let token = root.token();
        let task = tokio::spawn(async move {
            let result = root.join().await;
            match &result {
                Ok(summary) => info!(
                    completed = summary.completed,
                    cancelled = summary.cancelled,
                    "Simulation finished"
                ),
                Err(e) => info!(error = %e, "Simulation stopped on failure"),
            }
            result
        });

        Ok(SimulationHandle { token, task })
    }

    /// Start and wait for the run to end.
    pub async fn run(self) -> Result<ScopeSummary> {
        self.start()?.join().await
    }
}

/// A running simulation.
pub struct SimulationHandle {
    token: CancellationToken,
    task: JoinHandle<Result<ScopeSummary>>,
}

impl SimulationHandle {
    /// Cancel every actor and vehicle agent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for the root scope to wind down.
    ///
    /// A cancelled run still resolves to `Ok`; the summary counts the
    /// actors that were cancelled.
    pub async fn join(self) -> Result<ScopeSummary> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(KernelError::TaskPanicked {
                task: SUPERVISOR.to_string(),
            }),
            Err(e) => Err(KernelError::TaskFailed {
                task: SUPERVISOR.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
