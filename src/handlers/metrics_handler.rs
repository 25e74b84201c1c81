use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::server::AppState;

/// Handle /metrics endpoint
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = state.telemetry.meter().render();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics,
    )
}
