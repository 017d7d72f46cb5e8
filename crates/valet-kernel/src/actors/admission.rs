//! AdmissionController: the accept/reject gate between arrivals and the planner.

use std::sync::Arc;

use tracing::{debug, info};

use crate::channel::{ActorId, EndpointSet, Inbound};
use crate::clock::SimClock;
use crate::error::{KernelError, Result};
use crate::events::{EventKind, EventSink};
use crate::messages::Message;
use crate::policy::{AdmissionDecision, AdmissionPolicy, AdmissionState};
use crate::vehicle::{Departure, Vehicle};

use super::{ADMISSION_CONTROLLER, ARRIVAL_SOURCE, DIRECTIVE_PLANNER};

/// Applies the admission policy to every arrival.
///
/// Accepted vehicles are forwarded unchanged to the planner; rejected ones are
/// logged and dropped. The controller keeps only running counts, never a queue
/// of its own.
///
/// When the planner link is bidirectional the controller also listens for
/// departures coming back up, which lower the occupancy the policy sees. It
/// keeps reading them while a forward waits for room in a bounded planner queue.
pub struct AdmissionController {
    endpoints: EndpointSet<Message>,
    policy: Arc<dyn AdmissionPolicy>,
    state: AdmissionState,
    clock: SimClock,
    events: EventSink,
}

/// Next message from an optional inbound endpoint; pends forever without one.
async fn recv_optional(inbound: &mut Option<Inbound<Message>>) -> Option<Message> {
    match inbound {
        Some(inbound) => inbound.recv().await,
        None => std::future::pending().await,
    }
}

impl AdmissionController {
    pub fn new(policy: Arc<dyn AdmissionPolicy>, clock: SimClock, events: EventSink) -> Self {
        Self {
            endpoints: EndpointSet::new(ADMISSION_CONTROLLER),
            policy,
            state: AdmissionState::default(),
            clock,
            events,
        }
    }

    pub fn endpoints_mut(&mut self) -> &mut EndpointSet<Message> {
        &mut self.endpoints
    }

    pub fn state(&self) -> &AdmissionState {
        &self.state
    }

    /// Consume arrivals until the arrival source goes away.
    pub async fn run(mut self) -> Result<()> {
        let upstream = ActorId::from(ARRIVAL_SOURCE);
        let planner = ActorId::from(DIRECTIVE_PLANNER);

        let mut arrivals = self.endpoints.take_inbound(&upstream)?;
        let mut departures = self.endpoints.take_inbound(&planner).ok();

        loop {
            let msg = tokio::select! {
                msg = arrivals.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                Some(msg) = recv_optional(&mut departures) => {
                    self.on_departure(msg)?;
                    continue;
                }
            };

            match msg {
                Message::Vehicle(vehicle) => self.admit(vehicle, &planner, &mut departures).await?,
                other => return Err(self.unexpected(&other)),
            }
        }

        info!(
            admitted = self.state.admitted,
            rejected = self.state.rejected,
            released = self.state.released,
            "Arrivals closed, admission controller stopping"
        );
        Ok(())
    }

    async fn admit(
        &mut self,
        vehicle: Vehicle,
        planner: &ActorId,
        departures: &mut Option<Inbound<Message>>,
    ) -> Result<()> {
        let now = self.clock.now();

        match self.policy.evaluate(&vehicle, &self.state) {
            AdmissionDecision::Accept => {
                self.state.admitted += 1;
                info!("{} has been accepted", vehicle.id);
                self.events.emit(vehicle.id, now, EventKind::Admitted);
                self.forward(Message::Vehicle(vehicle), planner, departures)
                    .await
            }
            AdmissionDecision::Reject { reason } => {
                self.state.rejected += 1;
                info!(policy = self.policy.name(), reason = %reason, "{} has been rejected", vehicle.id);
                self.events
                    .emit(vehicle.id, now, EventKind::Rejected { reason });
                Ok(())
            }
        }
    }

    /// Send `msg` to the planner, handling departures until its queue has room.
    async fn forward(
        &mut self,
        msg: Message,
        planner: &ActorId,
        departures: &mut Option<Inbound<Message>>,
    ) -> Result<()> {
        loop {
            let departure = tokio::select! {
                permit = self.endpoints.reserve(planner) => {
                    return permit?.send(msg).map_err(|_| KernelError::ChannelClosed {
                        owner: self.endpoints.owner().clone(),
                        peer: planner.clone(),
                    });
                }
                Some(departure) = recv_optional(departures) => departure,
            };
            self.on_departure(departure)?;
        }
    }

    fn on_departure(&mut self, msg: Message) -> Result<()> {
        match msg {
            Message::Departure(departure) => {
                self.release(departure);
                Ok(())
            }
            other => Err(self.unexpected(&other)),
        }
    }

    fn release(&mut self, departure: Departure) {
        self.state.released += 1;
        debug!(
            vehicle = %departure.vehicle,
            requested = departure.requested,
            in_facility = self.state.in_facility(),
            "Vehicle left the facility"
        );
        self.events
            .emit(departure.vehicle, self.clock.now(), EventKind::Released);
    }

    fn unexpected(&self, msg: &Message) -> KernelError {
        KernelError::UnexpectedMessage {
            owner: self.endpoints.owner().clone(),
            kind: msg.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::channel::{create_bidirectional, create_unidirectional, ChannelCapacity};
    use crate::policy::{AcceptAll, CapacityLimit, RejectAll};
    use crate::vehicle::DepartureRequest;

    struct Harness {
        source: EndpointSet<Message>,
        planner: EndpointSet<Message>,
        controller: AdmissionController,
    }

    fn harness(policy: Arc<dyn AdmissionPolicy>, events: EventSink) -> Harness {
        harness_with_capacity(policy, events, ChannelCapacity::Unbounded)
    }

    fn harness_with_capacity(
        policy: Arc<dyn AdmissionPolicy>,
        events: EventSink,
        capacity: ChannelCapacity,
    ) -> Harness {
        let mut source = EndpointSet::new(ARRIVAL_SOURCE);
        let mut planner = EndpointSet::new(DIRECTIVE_PLANNER);
        let mut controller = AdmissionController::new(policy, SimClock::start(), events);
        create_unidirectional(&mut source, controller.endpoints_mut(), capacity).unwrap();
        create_bidirectional(controller.endpoints_mut(), &mut planner, capacity).unwrap();
        Harness {
            source,
            planner,
            controller,
        }
    }

    fn departure_of(vehicle: &Vehicle) -> Departure {
        Departure {
            vehicle: vehicle.id,
            requested: true,
            left_at: vehicle.depart_time,
        }
    }

    async fn send_arrivals(source: &EndpointSet<Message>, count: usize) -> Vec<Vehicle> {
        let mut sent = Vec::new();
        for i in 0..count {
            let vehicle = Vehicle::new(i as f64, 1.0).unwrap();
            sent.push(vehicle.clone());
            source
                .send_to(&ADMISSION_CONTROLLER.into(), Message::Vehicle(vehicle))
                .await
                .unwrap();
        }
        sent
    }

    async fn drain_vehicles(planner: &mut EndpointSet<Message>) -> Vec<Vehicle> {
        let mut inbound = planner.take_inbound(&ADMISSION_CONTROLLER.into()).unwrap();
        let mut received = Vec::new();
        while let Some(msg) = inbound.recv().await {
            match msg {
                Message::Vehicle(v) => received.push(v),
                other => panic!("unexpected {}", other.kind()),
            }
        }
        received
    }

    #[tokio::test]
    async fn test_accept_all_forwards_unchanged_in_order() {
        let Harness {
            source,
            mut planner,
            controller,
        } = harness(Arc::new(AcceptAll), EventSink::disabled());

        let sent = send_arrivals(&source, 5).await;
        drop(source);
        controller.run().await.unwrap();

        assert_eq!(drain_vehicles(&mut planner).await, sent);
    }

    #[tokio::test]
    async fn test_reject_all_forwards_nothing() {
        let (events, mut observed) = EventSink::channel();
        let Harness {
            source,
            mut planner,
            controller,
        } = harness(Arc::new(RejectAll), events);

        send_arrivals(&source, 4).await;
        drop(source);
        controller.run().await.unwrap();

        assert!(drain_vehicles(&mut planner).await.is_empty());
        let mut rejected = 0;
        while let Ok(event) = observed.try_recv() {
            assert!(matches!(event.kind, EventKind::Rejected { .. }));
            rejected += 1;
        }
        assert_eq!(rejected, 4);
    }

    #[tokio::test]
    async fn test_departures_free_capacity() {
        let (events, mut observed) = EventSink::channel();
        let Harness {
            source,
            mut planner,
            controller,
        } = harness(Arc::new(CapacityLimit::new(1)), events);

        let first = Vehicle::new(0.0, 1.0).unwrap();
        let second = Vehicle::new(0.5, 1.0).unwrap();
        let third = Vehicle::new(0.6, 1.0).unwrap();

        let task = tokio::spawn(controller.run());
        let to_controller = ActorId::from(ADMISSION_CONTROLLER);

        source
            .send_to(&to_controller, Message::Vehicle(first.clone()))
            .await
            .unwrap();
        let event = observed.recv().await.unwrap();
        assert_eq!((event.vehicle, event.kind), (first.id, EventKind::Admitted));

        // Full: the second vehicle is turned away
        source
            .send_to(&to_controller, Message::Vehicle(second.clone()))
            .await
            .unwrap();
        let event = observed.recv().await.unwrap();
        assert_eq!(event.vehicle, second.id);
        assert!(matches!(event.kind, EventKind::Rejected { .. }));

        planner
            .send_to(&to_controller, Message::Departure(departure_of(&first)))
            .await
            .unwrap();
        let event = observed.recv().await.unwrap();
        assert_eq!((event.vehicle, event.kind), (first.id, EventKind::Released));

        // The released slot goes to the next arrival
        source
            .send_to(&to_controller, Message::Vehicle(third.clone()))
            .await
            .unwrap();
        let event = observed.recv().await.unwrap();
        assert_eq!((event.vehicle, event.kind), (third.id, EventKind::Admitted));

        drop(source);
        task.await.unwrap().unwrap();

        let forwarded: Vec<_> = drain_vehicles(&mut planner)
            .await
            .into_iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(forwarded, vec![first.id, third.id]);
    }

    #[tokio::test]
    async fn test_departures_are_read_while_planner_queue_is_full() {
        let (events, mut observed) = EventSink::channel();
        let Harness {
            source,
            mut planner,
            controller,
        } = harness_with_capacity(Arc::new(AcceptAll), events, ChannelCapacity::Bounded(1));
        let to_controller = ActorId::from(ADMISSION_CONTROLLER);
        let task = tokio::spawn(controller.run());

        // The planner drains nothing, so the second forward waits for room
        let sent = send_arrivals(&source, 2).await;
        for _ in 0..2 {
            assert_eq!(observed.recv().await.unwrap().kind, EventKind::Admitted);
        }

        // Each of these would wait forever on a controller blocked in its forward
        for vehicle in &sent {
            let delivered = tokio::time::timeout(
                Duration::from_secs(1),
                planner.send_to(&to_controller, Message::Departure(departure_of(vehicle))),
            )
            .await;
            assert!(matches!(delivered, Ok(Ok(()))), "departure was not read");
        }
        for vehicle in &sent {
            let event = observed.recv().await.unwrap();
            assert_eq!((event.vehicle, event.kind), (vehicle.id, EventKind::Released));
        }

        drop(source);
        let forwarded = drain_vehicles(&mut planner).await;
        assert_eq!(forwarded, sent);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_departure_request_is_not_for_admission() {
        let Harness {
            source: _source,
            planner,
            controller,
        } = harness(Arc::new(AcceptAll), EventSink::disabled());
        let vehicle = Vehicle::new(0.0, 1.0).unwrap();
        planner
            .send_to(
                &ADMISSION_CONTROLLER.into(),
                Message::DepartureRequest(DepartureRequest::for_vehicle(&vehicle, 0.5)),
            )
            .await
            .unwrap();

        let err = controller.run().await.unwrap_err();
        assert!(matches!(
            err,
            KernelError::UnexpectedMessage { kind: "departure_request", .. }
        ));
    }

    #[tokio::test]
    async fn test_unexpected_message_is_an_error() {
        let Harness {
            source,
            planner: _planner,
            controller,
        } = harness(Arc::new(AcceptAll), EventSink::disabled());

        source
            .send_to(
                &ADMISSION_CONTROLLER.into(),
                Message::Directive(crate::vehicle::Directive::reference_path(&[])),
            )
            .await
            .unwrap();

        let err = controller.run().await.unwrap_err();
        assert!(matches!(err, KernelError::UnexpectedMessage { kind: "directive", .. }));
    }
}
