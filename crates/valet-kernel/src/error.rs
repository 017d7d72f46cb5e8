//! Error types for the kernel.

use std::path::PathBuf;

use thiserror::Error;

use crate::channel::ActorId;
use crate::vehicle::VehicleId;

/// Which side of an endpoint set a lookup was made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound"),
            Direction::Outbound => f.write_str("outbound"),
        }
    }
}

/// Errors raised by the actor substrate and the pipeline built on it.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Send or receive against a peer that no endpoint was ever installed for.
    #[error("{owner} has no {direction} channel for {peer}")]
    ChannelUnavailable {
        owner: ActorId,
        peer: ActorId,
        direction: Direction,
    },

    /// The other side of the channel has been dropped.
    #[error("channel between {owner} and {peer} is closed")]
    ChannelClosed { owner: ActorId, peer: ActorId },

    /// An endpoint for this peer already exists on the owner.
    #[error("{owner} already holds a {direction} endpoint for {peer}")]
    DuplicateEndpoint {
        owner: ActorId,
        peer: ActorId,
        direction: Direction,
    },

    #[error("directive for {0} has already been assigned")]
    DirectiveAlreadySet(VehicleId),

    #[error("vehicle {id} departs at {depart_time:.3} which is not after arrival at {arrive_time:.3}")]
    InvalidVehicle {
        id: VehicleId,
        arrive_time: f64,
        depart_time: f64,
    },

    /// A message arrived on a channel that never carries that kind.
    #[error("{owner} received unexpected {kind} message")]
    UnexpectedMessage { owner: ActorId, kind: &'static str },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config {}: {source}", .path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {reason}", .path.display())]
    ConfigParse { path: PathBuf, reason: String },

    /// A child task returned an error.
    #[error("task {task} failed: {reason}")]
    TaskFailed { task: String, reason: String },

    /// A child task panicked.
    #[error("task {task} panicked")]
    TaskPanicked { task: String },
}

pub type Result<T, E = KernelError> = std::result::Result<T, E>;
