use std::{net::TcpListener, sync::Arc};

use anyhow::Result;
use axum::{
    extract::{RawQuery, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use event_api::{ChannelId, ErrorBody, Event};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    distributor::{DistributorHandle, Waiter},
    error::{DeliveryError, RegisterError},
};

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub channels: Arc<[ChannelId]>,
    pub distributor: DistributorHandle,
    increasing: Arc<Mutex<Vec<u64>>>,
}

impl AppState {
    pub fn new(channels: Vec<ChannelId>, distributor: DistributorHandle) -> Self {
        Self {
            channels: channels.into(),
            distributor,
            increasing: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn is_known(&self, channel: ChannelId) -> bool {
        self.channels.contains(&channel)
    }
}

/// What the distributor did with a parked request.
#[derive(Debug)]
enum Outcome {
    Delivered(Event),
    Rejected(RegisterError),
}

/// Long-poll request suspended in its handler, waiting for the outcome.
///
/// The socket itself stays with the HTTP server, which never reads another
/// request from a connection while a response is outstanding. Only the
/// right to answer moves to the distributor.
struct HttpWaiter {
    id: Uuid,
    tx: oneshot::Sender<Outcome>,
}

impl HttpWaiter {
    fn new() -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let waiter = Self {
            id: Uuid::new_v4(),
            tx,
        };
        (waiter, rx)
    }
}

impl Waiter for HttpWaiter {
    fn id(&self) -> Uuid {
        self.id
    }

    fn respond(self: Box<Self>, event: &Event) -> Result<(), DeliveryError> {
        self.tx
            .send(Outcome::Delivered(event.clone()))
            .map_err(|_| DeliveryError::Disconnected)
    }

    fn reject(self: Box<Self>, reason: RegisterError) {
        let _ = self.tx.send(Outcome::Rejected(reason));
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/channels", get(channels))
        .route("/events", get(events))
        .route("/increasing", get(increasing))
        .fallback(not_found)
        .with_state(state)
}

fn cors() -> [(header::HeaderName, HeaderValue); 1] {
    [(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    )]
}

async fn not_found() -> (StatusCode, Html<&'static str>) {
    (StatusCode::NOT_FOUND, Html("<h1>404 - Not Found</h1>"))
}

async fn channels(State(state): State<AppState>) -> impl IntoResponse {
    (cors(), Json(state.channels.to_vec()))
}

async fn increasing(State(state): State<AppState>) -> impl IntoResponse {
    let payload = {
        let mut data = state.increasing.lock();
        let next = data.len() as u64 + 1;
        data.push(next);
        data.clone()
    };
    (cors(), Json(payload))
}

fn unavailable(msg: &str) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        cors(),
        Json(ErrorBody { error: msg.into() }),
    )
        .into_response()
}

fn unknown_channel() -> Response {
    (
        StatusCode::NOT_FOUND,
        cors(),
        Json(ErrorBody {
            error: "unknown_channel".into(),
        }),
    )
        .into_response()
}

/// `GET /events?channel=<id>`: park the request until the channel fires.
async fn events(State(state): State<AppState>, RawQuery(query): RawQuery) -> Response {
    let query = query.unwrap_or_default();
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    let channel = pairs
        .iter()
        .find(|(k, _)| k == "channel")
        .and_then(|(_, v)| v.parse::<ChannelId>().ok())
        .filter(|c| state.is_known(*c));

    let Some(channel) = channel else {
        debug!(query = %query, "rejecting long-poll for unknown channel");
        return unknown_channel();
    };

    let (waiter, rx) = HttpWaiter::new();
    debug!(channel = %channel, waiter = %waiter.id, "long-poll parked");
    state.distributor.register(channel.topic(), Box::new(waiter));

    match rx.await {
        Ok(Outcome::Delivered(event)) => (
            cors(),
            [(header::CONNECTION, HeaderValue::from_static("close"))],
            Json(event),
        )
            .into_response(),
        Ok(Outcome::Rejected(RegisterError::UnknownChannel)) => unknown_channel(),
        Ok(Outcome::Rejected(RegisterError::ChannelFull { .. })) => unavailable("channel_full"),
        Ok(Outcome::Rejected(RegisterError::Closed)) | Err(_) => unavailable("shutting_down"),
    }
}

/// Serve `router` on an already bound listener until `token` is cancelled.
pub async fn serve(listener: TcpListener, router: Router, token: CancellationToken) -> Result<()> {
    listener.set_nonblocking(true)?;
    info!(addr = %listener.local_addr()?, "http server listening");
    axum::Server::from_tcp(listener)?
        .serve(router.into_make_service())
        .with_graceful_shutdown(token.cancelled_owned())
        .await?;
    info!("http server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waiter_reports_disconnect_when_client_gone() {
        let (waiter, rx) = HttpWaiter::new();
        drop(rx);
        let ev = Event {
            channel: "1".into(),
            counter: 1,
            time: "t".into(),
        };
        assert_eq!(
            Box::new(waiter).respond(&ev),
            Err(DeliveryError::Disconnected)
        );
    }

    #[tokio::test]
    async fn waiter_hands_event_to_handler() {
        let (waiter, rx) = HttpWaiter::new();
        let ev = Event {
            channel: "1".into(),
            counter: 4,
            time: "t".into(),
        };
        Box::new(waiter).respond(&ev).unwrap();
        match rx.await.unwrap() {
            Outcome::Delivered(got) => assert_eq!(got, ev),
            other => panic!("unexpected {other:?}"),
        }
    }
}
