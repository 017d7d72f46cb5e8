//! Channel registry: per-actor endpoint sets and the operations that wire them.
//!
//! Every actor owns one [`EndpointSet`], a pair of maps keyed by peer identity:
//!
//! ```text
//!   ArrivalSource                AdmissionController            DirectivePlanner
//!   out[AdmissionController] ──▶ in[ArrivalSource]
//!                                out[DirectivePlanner] ───────▶ in[AdmissionController]
//!                                in[DirectivePlanner]  ◀─────── out[AdmissionController]
//!                                                               out[Car-..] ──▶ VehicleAgent
//!                                                               in[Car-..]  ◀── VehicleAgent
//! ```
//!
//! A bidirectional link is just two unidirectional conduits. The sending half
//! of a conduit is owned by the sender only and the receiving half by the
//! receiver only, so no channel state is ever shared between actors.
//!
//! Unbounded conduits never block a sender. A receiver that stops draining one
//! lets its queue grow without limit; use [`ChannelCapacity::Bounded`] wherever
//! that growth is a concern and senders will suspend instead.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Direction, KernelError, Result};
use crate::vehicle::VehicleId;

/// Identity of an actor, used as the key in its peers' endpoint maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActorId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<VehicleId> for ActorId {
    fn from(id: VehicleId) -> Self {
        // Full uuid: the short display form can collide
        Self(format!("Car-{}", id.as_uuid().simple()))
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Queue capacity of a conduit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelCapacity {
    /// Sends never suspend; the queue grows as needed.
    #[default]
    Unbounded,
    /// Sends suspend while `n` messages are waiting.
    Bounded(usize),
}

impl ChannelCapacity {
    pub fn validate(&self) -> Result<()> {
        match self {
            ChannelCapacity::Bounded(0) => Err(KernelError::InvalidConfig(
                "bounded channel capacity must be at least 1".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for ChannelCapacity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelCapacity::Unbounded => f.write_str("unbounded"),
            ChannelCapacity::Bounded(n) => write!(f, "bounded({})", n),
        }
    }
}

/// Write end of a conduit.
#[derive(Debug)]
pub enum Outbound<M> {
    Bounded(mpsc::Sender<M>),
    Unbounded(mpsc::UnboundedSender<M>),
}

impl<M> Outbound<M> {
    /// Send a message, suspending while a bounded queue is full.
    ///
    /// Hands the message back if the receiving side is gone.
    pub async fn send(&self, msg: M) -> std::result::Result<(), M> {
        match self {
            Outbound::Bounded(tx) => tx.send(msg).await.map_err(|e| e.0),
            Outbound::Unbounded(tx) => tx.send(msg).map_err(|e| e.0),
        }
    }

    /// Wait for room in the queue without committing a message yet.
    ///
    /// `None` if the receiving side is gone. Unbounded conduits always have room.
    pub async fn reserve(&self) -> Option<Permit<'_, M>> {
        match self {
            Outbound::Bounded(tx) => tx.reserve().await.ok().map(Permit::Bounded),
            Outbound::Unbounded(tx) if tx.is_closed() => None,
            Outbound::Unbounded(tx) => Some(Permit::Unbounded(tx)),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Outbound::Bounded(tx) => tx.is_closed(),
            Outbound::Unbounded(tx) => tx.is_closed(),
        }
    }
}

/// A queue slot reserved by [`Outbound::reserve`]. Sending through it never suspends.
#[derive(Debug)]
pub enum Permit<'a, M> {
    Bounded(mpsc::Permit<'a, M>),
    Unbounded(&'a mpsc::UnboundedSender<M>),
}

impl<M> Permit<'_, M> {
    /// Hands the message back if the receiver went away after the reservation.
    pub fn send(self, msg: M) -> std::result::Result<(), M> {
        match self {
            Permit::Bounded(permit) => {
                permit.send(msg);
                Ok(())
            }
            Permit::Unbounded(tx) => tx.send(msg).map_err(|e| e.0),
        }
    }
}

/// Read end of a conduit.
///
/// Consumed as a lazy sequence: [`recv`](Inbound::recv) suspends until the
/// next message and yields `None` once every sender is gone and the queue is
/// drained. The sequence cannot be restarted.
#[derive(Debug)]
pub enum Inbound<M> {
    Bounded(mpsc::Receiver<M>),
    Unbounded(mpsc::UnboundedReceiver<M>),
}

impl<M> Inbound<M> {
    pub async fn recv(&mut self) -> Option<M> {
        match self {
            Inbound::Bounded(rx) => rx.recv().await,
            Inbound::Unbounded(rx) => rx.recv().await,
        }
    }

    /// Take a message that is already queued without waiting.
    pub fn try_recv(&mut self) -> Option<M> {
        match self {
            Inbound::Bounded(rx) => rx.try_recv().ok(),
            Inbound::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}

/// Open a matched sender/receiver pair.
pub fn open<M>(capacity: ChannelCapacity) -> Result<(Outbound<M>, Inbound<M>)> {
    capacity.validate()?;
    Ok(match capacity {
        ChannelCapacity::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Outbound::Unbounded(tx), Inbound::Unbounded(rx))
        }
        ChannelCapacity::Bounded(n) => {
            let (tx, rx) = mpsc::channel(n);
            (Outbound::Bounded(tx), Inbound::Bounded(rx))
        }
    })
}

/// The inbound and outbound endpoints held by one actor, keyed by peer.
///
/// At most one endpoint per peer and direction is held at a time.
#[derive(Debug)]
pub struct EndpointSet<M> {
    owner: ActorId,
    outbound: HashMap<ActorId, Outbound<M>>,
    inbound: HashMap<ActorId, Inbound<M>>,
}

impl<M> EndpointSet<M> {
    pub fn new(owner: impl Into<ActorId>) -> Self {
        Self {
            owner: owner.into(),
            outbound: HashMap::new(),
            inbound: HashMap::new(),
        }
    }

    pub fn owner(&self) -> &ActorId {
        &self.owner
    }

    pub fn has_outbound(&self, peer: &ActorId) -> bool {
        self.outbound.contains_key(peer)
    }

    pub fn has_inbound(&self, peer: &ActorId) -> bool {
        self.inbound.contains_key(peer)
    }

    /// Number of peers this actor can currently send to.
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    pub fn outbound(&self, peer: &ActorId) -> Result<&Outbound<M>> {
        self.outbound
            .get(peer)
            .ok_or_else(|| self.unavailable(peer, Direction::Outbound))
    }

    /// Send `msg` to `peer`.
    ///
    /// Fails fast with [`KernelError::ChannelUnavailable`] when no conduit to
    /// `peer` was ever created.
    pub async fn send_to(&self, peer: &ActorId, msg: M) -> Result<()> {
        self.outbound(peer)?
            .send(msg)
            .await
            .map_err(|_| KernelError::ChannelClosed {
                owner: self.owner.clone(),
                peer: peer.clone(),
            })
    }

    /// Reserve a queue slot towards `peer`, suspending while a bounded queue is full.
    ///
    /// Lets an actor keep serving other inputs while it waits for room.
    pub async fn reserve(&self, peer: &ActorId) -> Result<Permit<'_, M>> {
        self.outbound(peer)?
            .reserve()
            .await
            .ok_or_else(|| KernelError::ChannelClosed {
                owner: self.owner.clone(),
                peer: peer.clone(),
            })
    }

    /// Receive the next message from `peer`, or `None` once that peer is gone.
    pub async fn recv_from(&mut self, peer: &ActorId) -> Result<Option<M>> {
        let owner = &self.owner;
        let inbound = self.inbound.get_mut(peer).ok_or_else(|| {
            KernelError::ChannelUnavailable {
                owner: owner.clone(),
                peer: peer.clone(),
                direction: Direction::Inbound,
            }
        })?;
        Ok(inbound.recv().await)
    }

    /// Move the inbound endpoint for `peer` out of the set.
    ///
    /// Used by actors that consume one peer's messages as a long-running
    /// sequence while still sending through the rest of the set.
    pub fn take_inbound(&mut self, peer: &ActorId) -> Result<Inbound<M>> {
        self.inbound
            .remove(peer)
            .ok_or_else(|| self.unavailable(peer, Direction::Inbound))
    }

    /// Drop both endpoints for `peer`, closing this side of the link.
    pub fn remove_peer(&mut self, peer: &ActorId) {
        self.outbound.remove(peer);
        self.inbound.remove(peer);
    }

    fn unavailable(&self, peer: &ActorId, direction: Direction) -> KernelError {
        KernelError::ChannelUnavailable {
            owner: self.owner.clone(),
            peer: peer.clone(),
            direction,
        }
    }

    fn duplicate(&self, peer: &ActorId, direction: Direction) -> KernelError {
        KernelError::DuplicateEndpoint {
            owner: self.owner.clone(),
            peer: peer.clone(),
            direction,
        }
    }
}

/// Create one conduit from `sender` to `receiver`.
///
/// The write end lands in `sender`'s outbound map under `receiver`'s identity
/// and the read end in `receiver`'s inbound map under `sender`'s identity.
/// Nothing is installed if either slot is already taken.
pub fn create_unidirectional<M>(
    sender: &mut EndpointSet<M>,
    receiver: &mut EndpointSet<M>,
    capacity: ChannelCapacity,
) -> Result<()> {
    let to = receiver.owner.clone();
    let from = sender.owner.clone();

    if sender.outbound.contains_key(&to) {
        return Err(sender.duplicate(&to, Direction::Outbound));
    }
    if receiver.inbound.contains_key(&from) {
        return Err(receiver.duplicate(&from, Direction::Inbound));
    }

    let (tx, rx) = open(capacity)?;
    sender.outbound.insert(to, tx);
    receiver.inbound.insert(from, rx);
    Ok(())
}

/// Create a conduit in each direction between `a` and `b`.
///
/// Either both directions are installed or neither is.
pub fn create_bidirectional<M>(
    a: &mut EndpointSet<M>,
    b: &mut EndpointSet<M>,
    capacity: ChannelCapacity,
) -> Result<()> {
    capacity.validate()?;
    for (x, y) in [(&*a, &*b), (&*b, &*a)] {
        if x.outbound.contains_key(&y.owner) {
            return Err(x.duplicate(&y.owner, Direction::Outbound));
        }
        if y.inbound.contains_key(&x.owner) {
            return Err(y.duplicate(&x.owner, Direction::Inbound));
        }
    }
    create_unidirectional(a, b, capacity)?;
    create_unidirectional(b, a, capacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pair() -> (EndpointSet<u32>, EndpointSet<u32>) {
        (EndpointSet::new("alpha"), EndpointSet::new("beta"))
    }

    #[tokio::test]
    async fn test_unidirectional_installs_under_peer_names() {
        let (mut alpha, mut beta) = pair();
        create_unidirectional(&mut alpha, &mut beta, ChannelCapacity::Unbounded).unwrap();

        let beta_id = ActorId::from("beta");
        let alpha_id = ActorId::from("alpha");
        assert!(alpha.has_outbound(&beta_id));
        assert!(!alpha.has_inbound(&beta_id));
        assert!(beta.has_inbound(&alpha_id));
        assert!(!beta.has_outbound(&alpha_id));

        alpha.send_to(&beta_id, 1).await.unwrap();
        alpha.send_to(&beta_id, 2).await.unwrap();
        assert_eq!(beta.recv_from(&alpha_id).await.unwrap(), Some(1));
        assert_eq!(beta.recv_from(&alpha_id).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_bidirectional_links_both_ways() {
        let (mut alpha, mut beta) = pair();
        create_bidirectional(&mut alpha, &mut beta, ChannelCapacity::Bounded(4)).unwrap();

        alpha.send_to(&"beta".into(), 7).await.unwrap();
        beta.send_to(&"alpha".into(), 9).await.unwrap();
        assert_eq!(beta.recv_from(&"alpha".into()).await.unwrap(), Some(7));
        assert_eq!(alpha.recv_from(&"beta".into()).await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_missing_peer_fails_fast() {
        let (mut alpha, _beta) = pair();
        let err = alpha.send_to(&"gamma".into(), 1).await.unwrap_err();
        assert!(matches!(
            err,
            KernelError::ChannelUnavailable {
                direction: Direction::Outbound,
                ..
            }
        ));

        let err = alpha.recv_from(&"gamma".into()).await.unwrap_err();
        assert!(matches!(
            err,
            KernelError::ChannelUnavailable {
                direction: Direction::Inbound,
                ..
            }
        ));
    }

    #[test]
    fn test_duplicate_link_is_rejected_without_side_effects() {
        let (mut alpha, mut beta) = pair();
        create_unidirectional(&mut alpha, &mut beta, ChannelCapacity::Unbounded).unwrap();

        let err = create_bidirectional(&mut alpha, &mut beta, ChannelCapacity::Unbounded)
            .unwrap_err();
        assert!(matches!(err, KernelError::DuplicateEndpoint { .. }));
        // The reverse direction was not installed either
        assert!(!beta.has_outbound(&"alpha".into()));
        assert!(!alpha.has_inbound(&"beta".into()));
    }

    #[test]
    fn test_zero_capacity_is_invalid() {
        let (mut alpha, mut beta) = pair();
        let err = create_unidirectional(&mut alpha, &mut beta, ChannelCapacity::Bounded(0))
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidConfig(_)));
        assert_eq!(alpha.outbound_len(), 0);
    }

    #[tokio::test]
    async fn test_bounded_send_suspends_when_full() {
        let (mut alpha, mut beta) = pair();
        create_unidirectional(&mut alpha, &mut beta, ChannelCapacity::Bounded(1)).unwrap();
        let beta_id = ActorId::from("beta");

        alpha.send_to(&beta_id, 1).await.unwrap();

        // Nobody drains: the second send parks instead of failing or dropping
        let second = tokio::time::timeout(Duration::from_millis(50), alpha.send_to(&beta_id, 2));
        assert!(second.await.is_err(), "send should still be suspended");

        // Once there is room the message goes through
        let mut inbound = beta.take_inbound(&"alpha".into()).unwrap();
        assert_eq!(inbound.recv().await, Some(1));
        alpha.send_to(&beta_id, 2).await.unwrap();
        assert_eq!(inbound.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_reserve_waits_for_room() {
        let (mut alpha, mut beta) = pair();
        create_unidirectional(&mut alpha, &mut beta, ChannelCapacity::Bounded(1)).unwrap();
        let beta_id = ActorId::from("beta");

        alpha.reserve(&beta_id).await.unwrap().send(1).unwrap();
        let pending = tokio::time::timeout(Duration::from_millis(50), alpha.reserve(&beta_id));
        assert!(pending.await.is_err(), "reserve should wait while the queue is full");

        assert_eq!(beta.recv_from(&"alpha".into()).await.unwrap(), Some(1));
        alpha.reserve(&beta_id).await.unwrap().send(2).unwrap();
        assert_eq!(beta.recv_from(&"alpha".into()).await.unwrap(), Some(2));

        drop(beta);
        assert!(matches!(
            alpha.reserve(&beta_id).await,
            Err(KernelError::ChannelClosed { .. })
        ));
    }

    #[tokio::test]
    async fn test_sequence_ends_when_sender_dropped() {
        let (mut alpha, mut beta) = pair();
        create_unidirectional(&mut alpha, &mut beta, ChannelCapacity::Unbounded).unwrap();
        let mut inbound = beta.take_inbound(&"alpha".into()).unwrap();

        alpha.send_to(&"beta".into(), 5).await.unwrap();
        alpha.remove_peer(&"beta".into());

        assert_eq!(inbound.recv().await, Some(5));
        assert_eq!(inbound.recv().await, None);
    }

    #[tokio::test]
    async fn test_send_to_dropped_receiver_reports_closed() {
        let (mut alpha, mut beta) = pair();
        create_unidirectional(&mut alpha, &mut beta, ChannelCapacity::Unbounded).unwrap();
        drop(beta);

        assert!(alpha.outbound(&"beta".into()).unwrap().is_closed());
        let err = alpha.send_to(&"beta".into(), 1).await.unwrap_err();
        assert!(matches!(err, KernelError::ChannelClosed { .. }));
    }
}
