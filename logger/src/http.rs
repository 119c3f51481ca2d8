use crate::metrics;
use crate::model::Reading;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::sync::watch;

#[derive(Debug, Clone)]
struct AppState {
    latest: watch::Receiver<Option<Reading>>,
}

pub fn create_router(latest: watch::Receiver<Option<Reading>>) -> Router {
    let state = AppState { latest };

    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/api/v1/readings/latest", get(get_latest))
        .with_state(state)
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}

async fn get_latest(State(state): State<AppState>) -> Response {
    let latest = state.latest.borrow().clone();
    match latest {
        Some(reading) => Json(reading).into_response(),
        None => (StatusCode::NOT_FOUND, "No reading taken yet").into_response(),
    }
}
