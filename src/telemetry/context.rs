//! Per-request context carried in request extensions

use axum::http::Request;
use std::sync::{Arc, OnceLock};

use super::span::SpanContext;

/// Write-once slot for the matched route pattern.
///
/// Attached to the request by the outermost middleware before routing; the
/// router fills it once the route is matched. Clones share the slot.
#[derive(Debug, Clone, Default)]
pub struct RouteSlot(Arc<OnceLock<Arc<str>>>);

impl RouteSlot {
    /// Return the slot already attached to `req`, attaching a new one if absent
    pub fn attach<B>(req: &mut Request<B>) -> Self {
        if let Some(slot) = req.extensions().get::<RouteSlot>() {
            return slot.clone();
        }
        let slot = RouteSlot::default();
        req.extensions_mut().insert(slot.clone());
        slot
    }

    /// Set the route. Returns false if a route was already set.
    pub fn set(&self, route: impl Into<Arc<str>>) -> bool {
        self.0.set(route.into()).is_ok()
    }

    pub fn get(&self) -> Option<&str> {
        self.0.get().map(|r| r.as_ref())
    }
}

/// Trace correlation and routing info handed to the use-case layer.
///
/// `Default` is the detached context: no active trace and no route.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub trace: Option<SpanContext>,
    pub route: Option<Arc<str>>,
}

impl RequestContext {
    pub fn new(trace: Option<SpanContext>, route: Option<Arc<str>>) -> Self {
        Self { trace, route }
    }

    pub fn is_detached(&self) -> bool {
        self.trace.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_route_slot_is_write_once() {
        let slot = RouteSlot::default();
        assert_eq!(slot.get(), None);
        assert!(slot.set("/products/:id"));
        assert!(!slot.set("/other"));
        assert_eq!(slot.get(), Some("/products/:id"));
    }

    #[test]
    fn test_attach_reuses_existing_slot() {
        let mut req = Request::new(Body::empty());
        let first = RouteSlot::attach(&mut req);
        let second = RouteSlot::attach(&mut req);

        first.set("/products");
        assert_eq!(second.get(), Some("/products"));
    }

    #[test]
    fn test_default_context_is_detached() {
        let ctx = RequestContext::default();
        assert!(ctx.is_detached());
        assert!(ctx.route.is_none());
    }
}
