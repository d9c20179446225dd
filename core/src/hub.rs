use std::{net::TcpListener, sync::Arc};

use anyhow::Result;
use axum::Router;
use event_api::ChannelId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::Config,
    distributor::{Distributor, DistributorHandle},
    events::EventBus,
    server::{self, AppState},
    source::{system_clock, ChannelSource, Clock},
    supervisor,
};

/// Running set of channel sources, event bus and distributor.
///
/// Sources and the distributor are separate tasks: a crashing source is
/// restarted on its own and never touches the queues of parked connections.
pub struct Hub {
    channels: Vec<ChannelId>,
    bus: Arc<EventBus>,
    distributor: DistributorHandle,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Hub {
    /// Wire and start everything except the HTTP listener.
    pub fn start(cfg: &Config) -> Self {
        Self::start_with_clock(cfg, system_clock())
    }

    /// Like [`Hub::start`], with every channel source stamping events from
    /// `clock`.
    pub fn start_with_clock(cfg: &Config, clock: Clock) -> Self {
        let token = CancellationToken::new();
        let bus = Arc::new(EventBus::new());
        let mut tasks = Vec::new();

        let topics = cfg.channels.iter().map(ChannelId::topic);
        let (distributor, handle) = Distributor::new(topics, cfg.max_waiters_per_channel);
        tasks.push(tokio::spawn(distributor.run(token.child_token())));

        for channel in &cfg.channels {
            let topic = channel.topic();
            let deliver_to = handle.clone();
            let sub_topic = topic.clone();
            tasks.push(bus.subscribe_with(&topic, move |event| {
                deliver_to.deliver(sub_topic.clone(), event)
            }));
        }

        for channel in cfg.channels.iter().copied() {
            let bus = bus.clone();
            let clock = clock.clone();
            let schedule = cfg.schedule;
            tasks.push(tokio::spawn(supervisor::supervise(
                format!("channel_{channel}"),
                cfg.backoff,
                token.child_token(),
                move || {
                    ChannelSource::new(channel, schedule, bus.clone())
                        .with_clock(clock.clone())
                        .run()
                },
            )));
        }

        info!(channels = ?cfg.channels, "hub started");
        Self {
            channels: cfg.channels.clone(),
            bus,
            distributor: handle,
            token,
            tasks,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn distributor(&self) -> &DistributorHandle {
        &self.distributor
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// HTTP router bound to this hub.
    pub fn router(&self) -> Router {
        server::build_router(AppState::new(
            self.channels.clone(),
            self.distributor.clone(),
        ))
    }

    /// Serve HTTP on `listener` until the hub is shut down.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        server::serve(listener, self.router(), self.token.child_token()).await
    }

    /// Stop sources, answer parked connections and wait for every task.
    pub async fn shutdown(self) {
        info!("hub shutting down");
        self.token.cancel();
        self.bus.close();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("task ended abnormally: {e}");
            }
        }
        info!("hub stopped");
    }
}
