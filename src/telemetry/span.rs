//! Request and operation spans
//!
//! A [`Span`] is a `tracing` span that the OpenTelemetry layer turns into an
//! SDK span. Its trace and span ids are read back through
//! [`OpenTelemetrySpanExt::context`] and recorded as `trace_id` / `span_id`
//! fields, which is what the JSON log layer correlates on.
//!
//! Ids are only assigned while a subscriber built by
//! [`super::Telemetry::subscriber`] is the current dispatcher. Outside of it
//! the span context is invalid and callers treat the work as detached.

use opentelemetry::trace::TraceContextExt;
pub use opentelemetry::trace::SpanContext;
use opentelemetry::Context;
use tracing::field::{display, Empty};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// `tracing` target of every span opened here; the subscriber filters on it
pub const SPAN_TARGET: &str = module_path!();

/// Span kind (subset of the OpenTelemetry kinds)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    /// Server-side request handler
    Server,
    /// Internal operation
    Internal,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Internal => "internal",
        }
    }
}

/// An in-progress span. Ends on [`Span::end`] or when dropped.
#[derive(Debug)]
pub struct Span {
    inner: tracing::Span,
    context: SpanContext,
}

impl Span {
    /// Start a span. With a valid parent the span joins the parent's trace,
    /// otherwise it is a child of whatever span is current, or a new root.
    pub fn start(name: impl AsRef<str>, kind: SpanKind, parent: Option<&SpanContext>) -> Self {
        let inner = tracing::info_span!(
            target: SPAN_TARGET,
            "span",
            otel.name = name.as_ref(),
            otel.kind = kind.as_str(),
            otel.status_code = Empty,
            otel.status_message = Empty,
            trace_id = Empty,
            span_id = Empty,
            http.route = Empty,
        );

        if let Some(parent) = parent.filter(|p| p.is_valid()) {
            let _ = inner.set_parent(Context::new().with_remote_span_context(parent.clone()));
        }

        let context = inner.context().span().span_context().clone();
        if context.is_valid() {
            inner.record("trace_id", display(context.trace_id()));
            inner.record("span_id", display(context.span_id()));
        }

        Self { inner, context }
    }

    pub fn context(&self) -> &SpanContext {
        &self.context
    }

    /// The underlying `tracing` span
    pub fn tracing_span(&self) -> &tracing::Span {
        &self.inner
    }

    pub fn set_attribute(&self, key: &'static str, value: impl Into<opentelemetry::Value>) {
        self.inner.set_attribute(key, value);
    }

    /// Record the matched route pattern; shows up on correlated log lines
    pub fn record_route(&self, route: &str) {
        self.inner.record("http.route", route);
    }

    pub fn set_ok(&self) {
        self.inner.record("otel.status_code", "ok");
    }

    pub fn set_error(&self, message: &str) {
        self.inner.record("otel.status_code", "error");
        self.inner.record("otel.status_message", message);
    }

    /// Run `f` with this span entered
    pub fn in_scope<T>(&self, f: impl FnOnce(&Self) -> T) -> T {
        self.inner.in_scope(|| f(self))
    }

    pub fn end(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::testing::{attribute, recording};
    use opentelemetry::trace::{SpanKind as OtelSpanKind, Status};

    #[test]
    fn test_root_span_starts_new_trace() {
        let (_telemetry, _spans, _guard) = recording();
        let a = Span::start("a", SpanKind::Server, None);
        let b = Span::start("b", SpanKind::Server, None);

        assert!(a.context().is_valid());
        assert_ne!(a.context().trace_id(), b.context().trace_id());
    }

    #[test]
    fn test_child_span_inherits_trace_id() {
        let (_telemetry, spans, _guard) = recording();
        let root = Span::start("root", SpanKind::Server, None);
        let child = Span::start("child", SpanKind::Internal, Some(root.context()));

        assert_eq!(child.context().trace_id(), root.context().trace_id());
        assert_ne!(child.context().span_id(), root.context().span_id());

        let root_span_id = root.context().span_id();
        child.end();
        let finished = spans.get_finished_spans().unwrap();
        assert_eq!(finished[0].name, "child");
        assert_eq!(finished[0].parent_span_id, root_span_id);
        assert_eq!(finished[0].span_kind, OtelSpanKind::Internal);
    }

    #[test]
    fn test_attributes_and_status_reach_exporter() {
        let (_telemetry, spans, _guard) = recording();
        let span = Span::start("test", SpanKind::Internal, None);
        span.set_attribute("product.id", "p-1");
        span.set_attribute("product.count", 3i64);
        span.set_error("failed");
        span.end();

        let finished = spans.get_finished_spans().unwrap();
        assert_eq!(finished.len(), 1);
        let span = &finished[0];
        assert_eq!(span.name, "test");
        assert_eq!(span.status, Status::error("failed"));
        assert_eq!(attribute(span, "product.id").as_deref(), Some("p-1"));
        assert_eq!(attribute(span, "product.count").as_deref(), Some("3"));
    }

    #[test]
    fn test_drop_ends_span_once() {
        let (_telemetry, spans, _guard) = recording();
        {
            let span = Span::start("dropped", SpanKind::Internal, None);
            span.set_ok();
        }
        let finished = spans.get_finished_spans().unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].status, Status::Ok);
    }

    #[test]
    fn test_no_subscriber_means_detached() {
        let span = Span::start("orphan", SpanKind::Internal, None);
        assert!(!span.context().is_valid());
    }
}
