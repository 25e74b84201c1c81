use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::telemetry::{RequestContext, RouteSlot, SpanContext};

/// Post-routing step: publish the matched route pattern to the route slot
/// and the current span, then hand handlers a [`RequestContext`].
///
/// Meant for `Router::route_layer`, so only matched requests pass through.
/// An existing `RequestContext` is left as is.
pub async fn inject_route_context(
    matched: Option<MatchedPath>,
    mut req: Request,
    next: Next,
) -> Response {
    let route: Option<Arc<str>> = matched.map(|m| Arc::from(m.as_str()));

    if let Some(route) = &route {
        RouteSlot::attach(&mut req).set(route.clone());
        tracing::Span::current().record("http.route", route.as_ref());
    }

    if req.extensions().get::<RequestContext>().is_none() {
        let trace = req.extensions().get::<SpanContext>().cloned();
        req.extensions_mut()
            .insert(RequestContext::new(trace, route));
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Extension, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_context_carries_route_pattern() {
        let slot = RouteSlot::default();
        let app = Router::new()
            .route(
                "/products/:id",
                get(|Extension(ctx): Extension<RequestContext>| async move {
                    ctx.route.as_deref().unwrap_or_default().to_string()
                }),
            )
            .route_layer(middleware::from_fn(inject_route_context));

        let mut req = Request::builder()
            .uri("/products/42")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut().insert(slot.clone());

        let response = app.oneshot(req).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        assert_eq!(&body[..], b"/products/:id");
        assert_eq!(slot.get(), Some("/products/:id"));
    }

    #[tokio::test]
    async fn test_existing_context_kept() {
        let app = Router::new()
            .route(
                "/health",
                get(|Extension(ctx): Extension<RequestContext>| async move {
                    ctx.route.as_deref().unwrap_or("none").to_string()
                }),
            )
            .route_layer(middleware::from_fn(inject_route_context));

        let mut req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut().insert(RequestContext::default());

        let response = app.oneshot(req).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"none");
    }
}
