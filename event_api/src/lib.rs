use serde::{Deserialize, Serialize};
use std::{fmt, num::ParseIntError, str::FromStr};

/// Identifier of a configured channel.
///
/// The pub/sub topic of a channel is the decimal form of its id, so channel
/// `2` publishes on topic `"2"` and its events carry `"channel": "2"`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ChannelId(pub u32);

impl ChannelId {
    /// Topic used to route events for this channel.
    pub fn topic(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChannelId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(ChannelId)
    }
}

/// Payload delivered to a long-poll client when its channel fires.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Event {
    /// Topic of the channel that produced the event.
    pub channel: String,
    /// Per-channel sequence number, starting at 1.
    pub counter: u64,
    /// RFC 3339 timestamp taken when the event was produced.
    pub time: String,
}

/// JSON error object returned for rejected long-poll requests.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}
