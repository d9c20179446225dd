use std::{sync::Arc, time::Duration};

use event_api::{ChannelId, Event};
use rand::Rng;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{debug, info};

use crate::{error::SourceError, events::EventBus};

/// Randomised delay between two events of a channel:
/// `unit × (base + uniform(0..=spread))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelaySchedule {
    pub base: u32,
    pub spread: u32,
    pub unit: Duration,
}

impl Default for DelaySchedule {
    fn default() -> Self {
        Self {
            base: 4,
            spread: 7,
            unit: Duration::from_secs(1),
        }
    }
}

impl DelaySchedule {
    /// Draw the next delay. Saturates instead of overflowing.
    pub fn sample(&self) -> Duration {
        let offset = rand::thread_rng().gen_range(0..=self.spread);
        self.unit.saturating_mul(self.base.saturating_add(offset))
    }

    pub fn min(&self) -> Duration {
        self.unit.saturating_mul(self.base)
    }

    pub fn max(&self) -> Duration {
        self.unit.saturating_mul(self.base.saturating_add(self.spread))
    }

    /// Longest possible delay, or `None` if it does not fit a `Duration`.
    pub fn checked_max(&self) -> Option<Duration> {
        self.base
            .checked_add(self.spread)
            .and_then(|units| self.unit.checked_mul(units))
    }
}

/// Source of event timestamps.
pub type Clock = Arc<dyn Fn() -> OffsetDateTime + Send + Sync>;

/// Wall clock in UTC.
pub fn system_clock() -> Clock {
    Arc::new(OffsetDateTime::now_utc)
}

/// Periodic producer of events for one channel.
///
/// The counter lives and dies with the source; a restarted source begins
/// again at 1.
pub struct ChannelSource {
    channel: ChannelId,
    topic: String,
    counter: u64,
    schedule: DelaySchedule,
    bus: Arc<EventBus>,
    clock: Clock,
}

impl ChannelSource {
    pub fn new(channel: ChannelId, schedule: DelaySchedule, bus: Arc<EventBus>) -> Self {
        Self {
            channel,
            topic: channel.topic(),
            counter: 0,
            schedule,
            bus,
            clock: system_clock(),
        }
    }

    /// Replace the timestamp source.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Number of events emitted so far.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Stamp the next event and advance the counter.
    pub fn next_event(&mut self) -> Result<Event, SourceError> {
        let time = (self.clock)().format(&Rfc3339)?;
        self.counter += 1;
        Ok(Event {
            channel: self.topic.clone(),
            counter: self.counter,
            time,
        })
    }

    /// Sleep, emit, repeat. Returns `Ok` once the bus is closed.
    pub async fn run(mut self) -> Result<(), SourceError> {
        info!(channel = %self.channel, "channel source starting");
        loop {
            tokio::time::sleep(self.schedule.sample()).await;
            let event = self.next_event()?;
            debug!(
                channel = %event.channel,
                counter = event.counter,
                time = %event.time,
                "event emitted"
            );
            if self.bus.publish(&self.topic, event).is_err() {
                info!(channel = %self.channel, "event bus closed; channel source stopping");
                return Ok(());
            }
        }
    }
}
