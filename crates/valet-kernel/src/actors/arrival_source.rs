//! ArrivalSource: generates vehicles at stochastic intervals.

use std::time::Duration;

use tracing::{debug, info};

use crate::channel::{ActorId, EndpointSet};
use crate::clock::SimClock;
use crate::error::{KernelError, Result};
use crate::events::{EventKind, EventSink};
use crate::messages::Message;
use crate::sampling::ArrivalProcess;
use crate::vehicle::Vehicle;

use super::{ADMISSION_CONTROLLER, ARRIVAL_SOURCE};

/// The outside world: vehicles show up here and are pushed to admission control.
///
/// Runs until the arrival process is exhausted, the optional vehicle limit is
/// reached, or its scope is cancelled. Finishing drops the outbound endpoint,
/// which ends the admission controller's inbound sequence.
pub struct ArrivalSource {
    endpoints: EndpointSet<Message>,
    process: Box<dyn ArrivalProcess>,
    clock: SimClock,
    events: EventSink,
    max_vehicles: Option<usize>,
}

impl ArrivalSource {
    pub fn new(process: Box<dyn ArrivalProcess>, clock: SimClock, events: EventSink) -> Self {
        Self {
            endpoints: EndpointSet::new(ARRIVAL_SOURCE),
            process,
            clock,
            events,
            max_vehicles: None,
        }
    }

    /// Stop after emitting `limit` vehicles.
    pub fn with_max_vehicles(mut self, limit: Option<usize>) -> Self {
        self.max_vehicles = limit;
        self
    }

    pub fn endpoints_mut(&mut self) -> &mut EndpointSet<Message> {
        &mut self.endpoints
    }

    /// Build the vehicle that arrives now.
    fn generate_vehicle(&mut self) -> Result<Vehicle> {
        let arrive_time = self.clock.now();
        Vehicle::new(arrive_time, self.process.park_duration())
    }

    pub async fn run(mut self) -> Result<()> {
        let downstream = ActorId::from(ADMISSION_CONTROLLER);
        let mut emitted = 0usize;

        loop {
            if self.max_vehicles.is_some_and(|limit| emitted >= limit) {
                info!(emitted, "Arrival limit reached, closing the gate");
                break;
            }
            let Some(interval) = self.process.next_interval() else {
                info!(emitted, "Arrival process exhausted");
                break;
            };

            let wait = Duration::try_from_secs_f64(interval).map_err(|e| {
                KernelError::InvalidConfig(format!("bad arrival interval {}: {}", interval, e))
            })?;
            tokio::time::sleep(wait).await;

            let vehicle = self.generate_vehicle()?;
            info!("Vehicle {} arrives at {:.3}", vehicle.id, vehicle.arrive_time);
            self.events.emit(
                vehicle.id,
                vehicle.arrive_time,
                EventKind::Arrived {
                    depart_time: vehicle.depart_time,
                },
            );

            self.endpoints
                .send_to(&downstream, Message::Vehicle(vehicle))
                .await?;
            emitted += 1;

            let pause = self.process.emission_pause();
            if !pause.is_zero() {
                debug!(pause_ms = pause.as_millis() as u64, "Pausing after arrival");
                tokio::time::sleep(pause).await;
            }
        }

        Ok(())
    }
}
