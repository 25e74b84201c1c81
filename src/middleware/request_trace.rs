//! Server span and access log
//!
//! Opens one server span per request, records the request duration and emits
//! exactly one `HTTP request completed` line when the response head is ready.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use http_body::Body as HttpBody;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, Level};

use crate::telemetry::{Attributes, RouteSlot, Span, SpanKind, Telemetry};

/// Log at a level picked at runtime; the field list is written once
macro_rules! access_log {
    ($level:expr, $($fields:tt)+) => {
        match $level {
            Level::ERROR => tracing::error!($($fields)+),
            Level::WARN => tracing::warn!($($fields)+),
            _ => tracing::info!($($fields)+),
        }
    };
}

/// Middleware state
#[derive(Clone)]
pub struct RequestTrace {
    telemetry: Arc<Telemetry>,
    server_address: Arc<str>,
}

impl RequestTrace {
    pub fn new(telemetry: Arc<Telemetry>, server_address: impl Into<Arc<str>>) -> Self {
        Self {
            telemetry,
            server_address: server_address.into(),
        }
    }
}

pub async fn trace_requests(
    State(state): State<RequestTrace>,
    mut req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or_default().to_string();
    let user_agent = header_value(&req, header::USER_AGENT);
    let client_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default();
    let route_slot = RouteSlot::attach(&mut req);

    let span = Span::start(format!("HTTP {method} {path}"), SpanKind::Server, None);
    span.set_attribute("http.method", method.to_string());
    span.set_attribute("http.url", req.uri().to_string());
    span.set_attribute("http.user_agent", user_agent.clone());
    if span.context().is_valid() {
        req.extensions_mut().insert(span.context().clone());
    }

    let response = next.run(req).instrument(span.tracing_span().clone()).await;

    let status = response.status();
    let route = route_slot.get().unwrap_or(&path).to_string();
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    let size = response.body().size_hint().exact();

    span.record_route(&route);
    span.set_attribute("http.status_code", i64::from(status.as_u16()));
    if status.is_server_error() {
        span.set_error(status.canonical_reason().unwrap_or("server error"));
    }

    if let Some(histogram) = state.telemetry.meter().request_duration() {
        let attributes = Attributes::new()
            .with("http.request.method", method.as_str())
            .with("http.route", route.as_str())
            .with("http.response.status_code", status.as_u16().to_string())
            .with("server.address", state.server_address.as_ref());
        histogram.record(duration_ms, &attributes);
    }

    span.in_scope(|_| {
        access_log!(
            level_for(status),
            method = %method,
            http.route = %route,
            path = %path,
            query = %query,
            status = status.as_u16(),
            size = size,
            duration_ms = duration_ms,
            client_ip = %client_ip,
            user_agent = %user_agent,
            "HTTP request completed"
        )
    });
    span.end();

    response
}

fn header_value(req: &Request, name: header::HeaderName) -> String {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn level_for(status: StatusCode) -> Level {
    if status.is_server_error() {
        Level::ERROR
    } else if status.is_client_error() {
        Level::WARN
    } else {
        Level::INFO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::testing::{attribute, recording};
    use axum::{body::Body, middleware, routing::get, Router};
    use opentelemetry::trace::Status;
    use tower::ServiceExt;

    fn app(telemetry: Arc<Telemetry>) -> Router {
        Router::new()
            .route("/ok", get(|| async { "fine" }))
            .route(
                "/boom",
                get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            )
            .layer(middleware::from_fn_with_state(
                RequestTrace::new(telemetry, "127.0.0.1"),
                trace_requests,
            ))
    }

    async fn call(app: Router, uri: &str) -> StatusCode {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        app.oneshot(req).await.unwrap().status()
    }

    #[test]
    fn test_level_for_status() {
        assert_eq!(level_for(StatusCode::OK), Level::INFO);
        assert_eq!(level_for(StatusCode::NOT_FOUND), Level::WARN);
        assert_eq!(level_for(StatusCode::BAD_GATEWAY), Level::ERROR);
    }

    #[tokio::test]
    async fn test_server_span_recorded() {
        let (telemetry, spans, _guard) = recording();
        let telemetry = Arc::new(telemetry);
        assert_eq!(call(app(telemetry.clone()), "/ok?x=1").await, StatusCode::OK);

        let finished = spans.get_finished_spans().unwrap();
        assert_eq!(finished.len(), 1);
        let span = &finished[0];
        assert_eq!(span.name, "HTTP GET /ok");
        assert_eq!(attribute(span, "http.status_code").as_deref(), Some("200"));
        assert_eq!(attribute(span, "http.method").as_deref(), Some("GET"));
        assert_eq!(span.status, Status::Unset);

        let duration = telemetry.meter().request_duration().unwrap();
        assert_eq!(duration.count(), 1);
        let attributes = Attributes::new()
            .with("http.request.method", "GET")
            .with("http.route", "/ok")
            .with("http.response.status_code", "200")
            .with("server.address", "127.0.0.1");
        assert!(duration.distribution(&attributes).is_some());
    }

    #[tokio::test]
    async fn test_server_error_marks_span() {
        let (telemetry, spans, _guard) = recording();
        call(app(Arc::new(telemetry)), "/boom").await;

        let finished = spans.get_finished_spans().unwrap();
        assert!(matches!(finished[0].status, Status::Error { .. }));
    }

    #[tokio::test]
    async fn test_unmatched_path_uses_raw_path() {
        let (telemetry, spans, _guard) = recording();
        assert_eq!(
            call(app(Arc::new(telemetry)), "/missing").await,
            StatusCode::NOT_FOUND
        );

        let finished = spans.get_finished_spans().unwrap();
        assert_eq!(attribute(&finished[0], "http.route").as_deref(), Some("/missing"));
    }
}
