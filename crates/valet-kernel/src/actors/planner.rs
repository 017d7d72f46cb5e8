//! DirectivePlanner: opens a private link to each admitted vehicle, spawns its
//! agent, and hands it a directive.
//!
//! ```text
//! Vehicle (from admission)
//!   ├─ create_bidirectional(planner, agent)   keyed by vehicle id
//!   ├─ scope.spawn(VehicleAgent::run)          child of the planner's scope
//!   └─ send Directive                          agent is already listening
//!
//! Agent finished (reaped from the scope), whatever the outcome
//!   ├─ drain its reverse channel for a DepartureRequest
//!   ├─ report a Departure to admission       frees the vehicle's place
//!   └─ drop both endpoints for that vehicle
//! ```

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::channel::{create_bidirectional, ActorId, ChannelCapacity, EndpointSet};
use crate::clock::SimClock;
use crate::error::{KernelError, Result};
use crate::events::{EventKind, EventSink};
use crate::messages::Message;
use crate::scope::{FinishedTask, TaskScope};
use crate::vehicle::{Departure, Directive, Vehicle, VehicleId};

use super::vehicle_agent::VehicleAgent;
use super::{ADMISSION_CONTROLLER, DIRECTIVE_PLANNER};

/// What woke the planner loop.
enum Step {
    Upstream(Option<Message>),
    AgentDone(FinishedTask),
}

/// Turns admitted vehicles into running vehicle agents.
///
/// Owns the scope every vehicle agent is spawned into, so no agent outlives
/// the planner. When admission control goes away the planner stops taking new
/// vehicles and waits for the agents it already started.
pub struct DirectivePlanner {
    endpoints: EndpointSet<Message>,
    scope: TaskScope,
    directive: Directive,
    vehicle_capacity: ChannelCapacity,
    tracking_tick: Duration,
    departure_requests: bool,
    clock: SimClock,
    events: EventSink,
    agents: HashMap<ActorId, VehicleId>,
    spawned: usize,
}

impl DirectivePlanner {
    /// Create a planner that spawns agents into `scope`.
    ///
    /// `scope` should be a child of the scope the planner itself runs in.
    pub fn new(scope: TaskScope, directive: Directive, clock: SimClock, events: EventSink) -> Self {
        Self {
            endpoints: EndpointSet::new(DIRECTIVE_PLANNER),
            scope,
            directive,
            vehicle_capacity: ChannelCapacity::Unbounded,
            tracking_tick: Duration::from_secs(1),
            departure_requests: false,
            clock,
            events,
            agents: HashMap::new(),
            spawned: 0,
        }
    }

    pub fn with_vehicle_capacity(mut self, capacity: ChannelCapacity) -> Self {
        self.vehicle_capacity = capacity;
        self
    }

    pub fn with_tracking_tick(mut self, tick: Duration) -> Self {
        self.tracking_tick = tick;
        self
    }

    /// Let agents send departure requests, and report every departure to
    /// admission control.
    pub fn with_departure_requests(mut self, enabled: bool) -> Self {
        self.departure_requests = enabled;
        self
    }

    pub fn endpoints_mut(&mut self) -> &mut EndpointSet<Message> {
        &mut self.endpoints
    }

    /// Number of vehicle agents spawned so far.
    pub fn spawned(&self) -> usize {
        self.spawned
    }

    pub async fn run(mut self) -> Result<()> {
        let upstream = ActorId::from(ADMISSION_CONTROLLER);
        let mut admitted = self.endpoints.take_inbound(&upstream)?;

        loop {
            let step = tokio::select! {
                msg = admitted.recv() => Step::Upstream(msg),
                Some(done) = self.scope.join_next(), if !self.scope.is_empty() => Step::AgentDone(done),
            };

            match step {
                Step::Upstream(Some(Message::Vehicle(vehicle))) => self.dispatch(vehicle).await?,
                Step::Upstream(Some(other)) => {
                    return Err(KernelError::UnexpectedMessage {
                        owner: self.endpoints.owner().clone(),
                        kind: other.kind(),
                    })
                }
                Step::Upstream(None) => break,
                Step::AgentDone(done) => self.reap(done).await?,
            }
        }

        info!(
            spawned = self.spawned,
            running = self.scope.len(),
            "Admission closed, waiting for vehicle agents"
        );
        while let Some(done) = self.scope.join_next().await {
            self.reap(done).await?;
        }

        let summary = self.scope.summary();
        info!(
            completed = summary.completed,
            cancelled = summary.cancelled,
            failed = summary.failed,
            "Directive planner stopping"
        );
        Ok(())
    }

    /// Link, spawn, then send: the agent holds its receive endpoint before the
    /// directive goes out.
    async fn dispatch(&mut self, vehicle: Vehicle) -> Result<()> {
        let id = vehicle.id;
        let peer = ActorId::from(id);

        let mut agent_endpoints = EndpointSet::new(peer.clone());
        create_bidirectional(&mut self.endpoints, &mut agent_endpoints, self.vehicle_capacity)?;
        self.events.emit(id, self.clock.now(), EventKind::ChannelsOpened);

        let agent = VehicleAgent::new(vehicle, agent_endpoints, self.clock, self.events.clone())
            .with_tracking_tick(self.tracking_tick)
            .with_departure_requests(self.departure_requests);
        self.scope.spawn(peer.to_string(), agent.run());
        self.agents.insert(peer.clone(), id);
        self.spawned += 1;
        self.events.emit(id, self.clock.now(), EventKind::AgentSpawned);

        info!("Sending directive to {}", id);
        self.endpoints
            .send_to(&peer, Message::Directive(self.directive.clone()))
            .await?;
        self.events.emit(id, self.clock.now(), EventKind::DirectiveSent);
        Ok(())
    }

    /// Clean up after a finished agent and apply the scope's failure policy.
    async fn reap(&mut self, done: FinishedTask) -> Result<()> {
        let peer = ActorId::new(done.name.clone());

        // Anything the agent sent before exiting is already queued
        let mut requested = false;
        if let Ok(mut inbound) = self.endpoints.take_inbound(&peer) {
            while let Some(msg) = inbound.try_recv() {
                match msg {
                    Message::DepartureRequest(request) => {
                        debug!(vehicle = %request.vehicle, requested_at = request.requested_at, "Departure requested");
                        requested = true;
                    }
                    other => warn!(vehicle = %peer, kind = other.kind(), "Dropping unexpected message from agent"),
                }
            }
        }
        self.endpoints.remove_peer(&peer);

        debug!(vehicle = %peer, outcome = ?done.outcome, "Vehicle agent finished");
        if let Some(vehicle) = self.agents.remove(&peer) {
            if self.departure_requests {
                let departure = Departure {
                    vehicle,
                    requested,
                    left_at: self.clock.now(),
                };
                self.report_departure(departure).await?;
            }
        }
        self.scope.settle(done)
    }

    async fn report_departure(&mut self, departure: Departure) -> Result<()> {
        let upstream = ActorId::from(ADMISSION_CONTROLLER);
        match self
            .endpoints
            .send_to(&upstream, Message::Departure(departure))
            .await
        {
            Ok(()) => Ok(()),
            // Admission control stops once arrivals end; late departures have nowhere to go
            Err(KernelError::ChannelClosed { .. }) => {
                debug!("Admission controller gone, dropping departure");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
