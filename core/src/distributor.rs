use std::collections::HashMap;

use event_api::Event;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    oneshot,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DeliveryError, RegisterError};

/// A held-open client connection parked until its channel fires.
///
/// Exactly one of `respond`, `reject` or drop happens to every waiter handed
/// to the distributor. Dropping a waiter without answering means the server
/// is shutting down.
pub trait Waiter: Send + 'static {
    fn id(&self) -> Uuid;

    /// Answer the connection with an event.
    fn respond(self: Box<Self>, event: &Event) -> Result<(), DeliveryError>;

    /// Answer the connection with a registration failure.
    fn reject(self: Box<Self>, reason: RegisterError);
}

enum Command {
    Register {
        topic: String,
        waiter: Box<dyn Waiter>,
    },
    Deliver {
        topic: String,
        event: Event,
    },
    Waiting {
        topic: String,
        reply: oneshot::Sender<Option<usize>>,
    },
}

/// Outcome of one delivery batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Cloneable handle used by the router and the event bus subscriptions to
/// reach the distributor task.
#[derive(Clone)]
pub struct DistributorHandle {
    tx: UnboundedSender<Command>,
}

impl DistributorHandle {
    /// Park a waiter on `topic`. Never answers the waiter itself; if the
    /// distributor is gone the waiter is rejected with
    /// [`RegisterError::Closed`].
    pub fn register(&self, topic: impl Into<String>, waiter: Box<dyn Waiter>) {
        let cmd = Command::Register {
            topic: topic.into(),
            waiter,
        };
        if let Err(err) = self.tx.send(cmd) {
            if let Command::Register { waiter, .. } = err.0 {
                waiter.reject(RegisterError::Closed);
            }
        }
    }

    /// Queue an event for every connection waiting on `topic`.
    pub fn deliver(&self, topic: impl Into<String>, event: Event) {
        let cmd = Command::Deliver {
            topic: topic.into(),
            event,
        };
        if self.tx.send(cmd).is_err() {
            debug!("distributor closed; dropping event");
        }
    }

    /// Number of connections currently parked on `topic`, or `None` for an
    /// unknown topic or a stopped distributor.
    ///
    /// Commands are handled in order, so the answer reflects every
    /// `register` and `deliver` issued through this handle beforehand.
    pub async fn waiting(&self, topic: impl Into<String>) -> Option<usize> {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Waiting {
            topic: topic.into(),
            reply,
        };
        self.tx.send(cmd).ok()?;
        rx.await.ok().flatten()
    }
}

/// Owner of the per-topic waiting queues.
///
/// Runs as a single task: registration and the draining step of a delivery
/// are handled one command at a time, so a waiter is never lost between the
/// two and never popped twice.
pub struct Distributor {
    queues: HashMap<String, Vec<Box<dyn Waiter>>>,
    limit: Option<usize>,
    rx: UnboundedReceiver<Command>,
}

impl Distributor {
    /// Create a distributor for a fixed set of topics.
    pub fn new<I, T>(topics: I, limit: Option<usize>) -> (Self, DistributorHandle)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let (tx, rx) = unbounded_channel();
        let queues = topics
            .into_iter()
            .map(|t| (t.into(), Vec::new()))
            .collect();
        (Self { queues, limit, rx }, DistributorHandle { tx })
    }

    /// Process commands until cancelled or every handle is dropped, then
    /// discard whatever is still queued.
    pub async fn run(mut self, token: CancellationToken) {
        info!(topics = self.queues.len(), "distributor started");
        loop {
            let cmd = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => cmd,
                    None => break,
                },
            };
            self.handle(cmd);
        }
        self.rx.close();
        let discarded = self.discard_all();
        info!(discarded, "distributor stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Register { topic, waiter } => {
                if let Err(err) = self.register(&topic, waiter) {
                    debug!(topic = %topic, "registration rejected: {err}");
                }
            }
            Command::Deliver { topic, event } => {
                let report = self.deliver(&topic, &event);
                debug!(
                    topic = %topic,
                    counter = event.counter,
                    delivered = report.delivered,
                    failed = report.failed,
                    "delivery batch done"
                );
            }
            Command::Waiting { topic, reply } => {
                let _ = reply.send(self.waiting(&topic));
            }
        }
    }

    /// Append a waiter to the queue of `topic`.
    ///
    /// On failure the waiter has already been rejected; the error is returned
    /// for logging only.
    pub fn register(&mut self, topic: &str, waiter: Box<dyn Waiter>) -> Result<(), RegisterError> {
        let Some(queue) = self.queues.get_mut(topic) else {
            waiter.reject(RegisterError::UnknownChannel);
            return Err(RegisterError::UnknownChannel);
        };
        if let Some(limit) = self.limit {
            if queue.len() >= limit {
                let err = RegisterError::ChannelFull { limit };
                waiter.reject(err.clone());
                return Err(err);
            }
        }
        debug!(topic, waiter = %waiter.id(), "waiter registered");
        queue.push(waiter);
        Ok(())
    }

    /// Take every waiter queued on `topic` and answer each with `event`.
    ///
    /// A failed write is logged and skipped; it never stops the rest of the
    /// batch.
    pub fn deliver(&mut self, topic: &str, event: &Event) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let Some(queue) = self.queues.get_mut(topic) else {
            debug!(topic, "event for unknown topic ignored");
            return report;
        };
        let mut batch = std::mem::take(queue);
        while let Some(waiter) = batch.pop() {
            let id = waiter.id();
            match waiter.respond(event) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Disconnected) => {
                    debug!(topic, waiter = %id, "client disconnected before delivery");
                    report.failed += 1;
                }
            }
        }
        report
    }

    pub fn waiting(&self, topic: &str) -> Option<usize> {
        self.queues.get(topic).map(Vec::len)
    }

    /// Drop every queued waiter, returning how many there were.
    fn discard_all(&mut self) -> usize {
        let mut n = 0;
        for (topic, queue) in self.queues.iter_mut() {
            if !queue.is_empty() {
                warn!(topic = %topic, waiters = queue.len(), "discarding waiters on shutdown");
            }
            n += queue.len();
            queue.clear();
        }
        n
    }
}
