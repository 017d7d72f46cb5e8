//! VehicleAgent: the per-vehicle worker spawned by the planner.

use std::time::Duration;

use tracing::{debug, info};

use crate::channel::{ActorId, EndpointSet};
use crate::clock::SimClock;
use crate::error::{KernelError, Result};
use crate::events::{EventKind, EventSink};
use crate::messages::Message;
use crate::vehicle::{DepartureRequest, Vehicle};

use super::DIRECTIVE_PLANNER;

/// Whether a vehicle should ask to leave when checked at `now`.
///
/// True while the scheduled departure has not passed yet, i.e.
/// `depart_time >= now`.
pub fn departure_requested(vehicle: &Vehicle, now: f64) -> bool {
    vehicle.depart_time >= now
}

/// Follows one vehicle from its directive to its departure check.
///
/// Phase changes are reported on the event stream rather than kept on the agent.
///
/// The agent owns its [`Vehicle`] outright; nothing else holds a copy that
/// can be mutated. It talks only to the planner, over the private link the
/// planner opened for it.
pub struct VehicleAgent {
    vehicle: Vehicle,
    endpoints: EndpointSet<Message>,
    clock: SimClock,
    events: EventSink,
    tracking_tick: Duration,
    departure_requests: bool,
}

impl VehicleAgent {
    pub fn new(
        vehicle: Vehicle,
        endpoints: EndpointSet<Message>,
        clock: SimClock,
        events: EventSink,
    ) -> Self {
        Self {
            vehicle,
            endpoints,
            clock,
            events,
            tracking_tick: Duration::from_secs(1),
            departure_requests: false,
        }
    }

    pub fn with_tracking_tick(mut self, tick: Duration) -> Self {
        self.tracking_tick = tick;
        self
    }

    /// Send a [`DepartureRequest`] to the planner when the check says so.
    pub fn with_departure_requests(mut self, enabled: bool) -> Self {
        self.departure_requests = enabled;
        self
    }

    pub fn vehicle(&self) -> &Vehicle {
        &self.vehicle
    }

    pub async fn run(mut self) -> Result<()> {
        let planner = ActorId::from(DIRECTIVE_PLANNER);
        let id = self.vehicle.id;

        let directive = match self.endpoints.recv_from(&planner).await? {
            Some(Message::Directive(directive)) => directive,
            Some(other) => {
                return Err(KernelError::UnexpectedMessage {
                    owner: self.endpoints.owner().clone(),
                    kind: other.kind(),
                })
            }
            None => {
                return Err(KernelError::ChannelClosed {
                    owner: self.endpoints.owner().clone(),
                    peer: planner,
                })
            }
        };
        self.vehicle.assign_directive(directive)?;
        self.events
            .emit(id, self.clock.now(), EventKind::DirectiveReceived);

        self.events.emit(id, self.clock.now(), EventKind::TrackingStarted);
        info!("Tracking {}", id);
        tokio::time::sleep(self.tracking_tick).await;

        let now = self.clock.now();
        let requested = departure_requested(&self.vehicle, now);
        self.events
            .emit(id, now, EventKind::DepartureChecked { requested });

        if requested {
            info!("{} is requested", id);
            if self.departure_requests {
                let request = DepartureRequest::for_vehicle(&self.vehicle, now);
                self.endpoints
                    .send_to(&planner, Message::DepartureRequest(request))
                    .await?;
                self.events
                    .emit(id, self.clock.now(), EventKind::DepartureRequested);
            }
        } else {
            debug!(
                vehicle = %id,
                depart_time = self.vehicle.depart_time,
                now,
                "Departure time already passed"
            );
        }

        self.events.emit(id, self.clock.now(), EventKind::AgentFinished);
        Ok(())
    }
}
