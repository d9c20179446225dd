use std::collections::HashMap;

use event_api::Event;
use parking_lot::Mutex;
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::debug;

use crate::error::BusClosed;

/// Topic keyed publish/subscribe bus between channel sources and the
/// distributor.
///
/// Every subscription owns an unbounded queue, so `publish` never waits on a
/// slow subscriber and events on one topic reach each subscriber in the order
/// they were published.
pub struct EventBus {
    subscribers: Mutex<Option<HashMap<String, Vec<UnboundedSender<Event>>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Some(HashMap::new())),
        }
    }

    /// Subscribe to a topic, returning a receiver for events.
    ///
    /// Subscribing to a closed bus yields a receiver that is already finished.
    pub fn subscribe(&self, topic: &str) -> UnboundedReceiver<Event> {
        let (tx, rx) = unbounded_channel();
        if let Some(subs) = self.subscribers.lock().as_mut() {
            subs.entry(topic.to_string()).or_default().push(tx);
        }
        rx
    }

    /// Subscribe a handler that runs on its own task for every event on
    /// `topic`, one at a time and in publish order.
    ///
    /// The task ends once the bus is closed and the backlog is drained.
    pub fn subscribe_with<F>(&self, topic: &str, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(Event) + Send + 'static,
    {
        let mut rx = self.subscribe(topic);
        let topic = topic.to_string();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler(event);
            }
            debug!(topic = %topic, "subscription ended");
        })
    }

    /// Publish an event on a topic, returning how many subscribers got it.
    pub fn publish(&self, topic: &str, event: Event) -> Result<usize, BusClosed> {
        let mut guard = self.subscribers.lock();
        let subs = guard.as_mut().ok_or(BusClosed)?;
        match subs.get_mut(topic) {
            Some(list) => {
                list.retain(|tx| tx.send(event.clone()).is_ok());
                Ok(list.len())
            }
            None => Ok(0),
        }
    }

    /// Drop every subscription and refuse further publishes.
    pub fn close(&self) {
        self.subscribers.lock().take();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
