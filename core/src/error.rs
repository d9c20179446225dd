use thiserror::Error;

/// Why a long-poll registration was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    /// The topic does not belong to any configured channel.
    #[error("unknown channel")]
    UnknownChannel,
    /// The per-channel waiter bound is reached.
    #[error("channel has {limit} waiting connections already")]
    ChannelFull { limit: usize },
    /// The distributor is no longer running.
    #[error("distributor closed")]
    Closed,
}

/// Failure to hand an event to a waiting connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The client went away before the event arrived.
    #[error("client disconnected")]
    Disconnected,
}

/// Failure inside a channel source; the supervisor restarts the source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("timestamp formatting failed: {0}")]
    Timestamp(#[from] time::error::Format),
}

/// The event bus was closed; no further events are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event bus closed")]
pub struct BusClosed;
