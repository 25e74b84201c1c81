use anyhow::Result;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer};
use tracing::info;

use crate::{
    config::{Config, ServerConfig},
    handlers,
    middleware::{
        inject_route_context, trace_requests, track_active_requests, ActiveRequestsTracker,
        RequestTrace,
    },
    service::ProductService,
    signals::shutdown_signal,
    store::InMemoryProductStore,
    telemetry::Telemetry,
};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ProductService>,
    pub telemetry: Arc<Telemetry>,
}

impl AppState {
    /// State backed by a fresh in-memory store
    pub fn new(telemetry: Arc<Telemetry>) -> Self {
        let store = Arc::new(InMemoryProductStore::new());
        let service = Arc::new(ProductService::new(store, &telemetry));
        Self { service, telemetry }
    }
}

/// Start the Products API server
///
/// Serves until SIGINT/SIGTERM, then drains in-flight connections. Telemetry
/// shutdown is left to the caller.
pub async fn start_server(config: &Config, telemetry: Arc<Telemetry>) -> Result<()> {
    let app = create_router(AppState::new(telemetry), &config.server);

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(
        address = %addr,
        request_timeout_secs = config.server.request_timeout_secs,
        "Listening for HTTP requests"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        shutdown_signal().await;
        info!("Shutdown signal received, draining connections...");
    })
    .await?;

    info!("Server stopped");
    Ok(())
}

/// Create the Axum router with all routes and middleware
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    let telemetry = state.telemetry.clone();

    let router = Router::new()
        .route(
            "/products",
            post(handlers::products::create_product).get(handlers::products::list_products),
        )
        .route("/products/:id", get(handlers::products::get_product))
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics_handler::metrics))
        .with_state(state);

    apply_observability(router, telemetry, server.request_timeout(), &server.host)
}

/// Wrap `router` in the request observability stack, innermost first:
/// route context (matched routes only), panic recovery, timeout, server
/// span, then in-flight tracking outermost so panics and timeouts still
/// balance the gauge. `server_address` labels the request metrics.
pub fn apply_observability(
    router: Router,
    telemetry: Arc<Telemetry>,
    request_timeout: Duration,
    server_address: &str,
) -> Router {
    let tracker = ActiveRequestsTracker::from_meter(telemetry.meter(), server_address);
    if !tracker.is_enabled() {
        tracing::warn!("Active requests instrument unavailable, tracking disabled");
    }

    router
        .route_layer(middleware::from_fn(inject_route_context))
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn_with_state(
            RequestTrace::new(telemetry, server_address),
            trace_requests,
        ))
        .layer(middleware::from_fn_with_state(tracker, track_active_requests))
}
