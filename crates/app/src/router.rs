use std::{future::Future, sync::Arc};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{sse::Sse, Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::events::{event_stream, keep_alive, EventHub};
use crate::lifecycle::MapMount;
use crate::problem::ProblemResponse;
use crate::surface::{MapBoard, MapView};
use crate::sync::{SyncController, SyncOutcome};
use crate::telemetry;

const INDEX_HTML: &str = include_str!("../assets/index.html");

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    events: EventHub,
    board: Arc<MapBoard>,
    mount: Arc<MapMount<MapBoard>>,
    controller: Arc<SyncController<MapBoard>>,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        events: EventHub,
        board: Arc<MapBoard>,
        mount: Arc<MapMount<MapBoard>>,
        controller: Arc<SyncController<MapBoard>>,
    ) -> Self {
        Self {
            metrics,
            events,
            board,
            mount,
            controller,
        }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn board(&self) -> &MapBoard {
        &self.board
    }

    pub fn mount(&self) -> &MapMount<MapBoard> {
        &self.mount
    }

    pub fn controller(&self) -> &Arc<SyncController<MapBoard>> {
        &self.controller
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/api/map", get(map_view))
        .route("/api/map/layout", post(layout_ready))
        .route("/api/sync", get(sync_state).post(trigger_sync))
        .route("/api/events", get(events))
        .with_state(state)
}

/// Serves the app until `signal` resolves, then closes the event streams so
/// open pages do not hold the graceful shutdown open.
pub async fn serve<F>(listener: TcpListener, state: AppState, signal: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let events = state.events().clone();
    axum::serve(listener, app_router(state))
        .with_graceful_shutdown(async move {
            signal.await;
            info!(stage = "app", "closing event streams");
            events.close();
        })
        .await
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

async fn map_view(State(state): State<AppState>) -> Result<Json<MapView>, ProblemResponse> {
    state
        .board()
        .snapshot(state.mount().handle())
        .map(Json)
        .ok_or_else(ProblemResponse::map_not_mounted)
}

async fn layout_ready(State(state): State<AppState>) -> Result<impl IntoResponse, ProblemResponse> {
    let invalidated = state
        .mount()
        .layout_ready()
        .map_err(|_| ProblemResponse::map_not_mounted())?;
    Ok(Json(json!({ "invalidated": invalidated })))
}

async fn sync_state(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller().state())
}

/// Runs one sync to completion. The sync is spawned so a client hanging up
/// does not cancel it halfway through placing markers.
async fn trigger_sync(State(state): State<AppState>) -> Result<Json<SyncOutcome>, ProblemResponse> {
    let controller = state.controller().clone();
    let outcome = tokio::spawn(async move { controller.sync_employees().await })
        .await
        .map_err(|err| {
            error!(stage = "api", error = %err, "sync task failed");
            ProblemResponse::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "sync_task_failed",
                err.to_string(),
            )
        })?;

    counter!("api_sync_requests_total", "result" => outcome.result_label()).increment(1);
    match outcome {
        SyncOutcome::AlreadyRunning => Err(ProblemResponse::sync_in_flight()),
        other => Ok(Json(other)),
    }
}

async fn events(State(state): State<AppState>) -> impl IntoResponse {
    let stream = event_stream(state.events(), state.controller().subscribe());
    Sse::new(stream).keep_alive(keep_alive())
}
