//! Trace-correlated JSON logging
//!
//! [`CorrelatedJsonLayer`] renders every `tracing` event as one JSON object per
//! line. When the event happens inside a span opened by
//! [`super::Span::start`], the enclosing trace id, span id and route pattern
//! are appended.

use serde_json::{Map, Value};
use std::fmt;
use std::io::Write;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const TRACE_ID: &str = "trace_id";
const SPAN_ID: &str = "span_id";
const HTTP_ROUTE: &str = "http.route";

/// Correlation fields captured from a span's attributes
#[derive(Debug, Default, Clone)]
struct Correlation {
    trace_id: Option<String>,
    span_id: Option<String>,
    route: Option<String>,
}

impl Correlation {
    fn is_empty(&self) -> bool {
        self.trace_id.is_none() && self.span_id.is_none() && self.route.is_none()
    }
}

impl Visit for Correlation {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            TRACE_ID => self.trace_id = Some(value.to_string()),
            SPAN_ID => self.span_id = Some(value.to_string()),
            HTTP_ROUTE => self.route = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            TRACE_ID | SPAN_ID | HTTP_ROUTE => {
                let value = format!("{:?}", value);
                self.record_str(field, value.trim_matches('"'));
            }
            _ => {}
        }
    }
}

/// Collects an event's fields as JSON values
struct JsonVisitor<'a>(&'a mut Map<String, Value>);

impl Visit for JsonVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0
            .insert(field.name().to_string(), Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().to_string(), Value::Bool(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.0
            .insert(field.name().to_string(), Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0
            .insert(field.name().to_string(), Value::String(format!("{:?}", value)));
    }
}

/// JSON-lines log layer with trace correlation
pub struct CorrelatedJsonLayer<W> {
    service_name: String,
    environment: String,
    make_writer: W,
}

impl<W> CorrelatedJsonLayer<W>
where
    W: for<'a> MakeWriter<'a> + 'static,
{
    pub fn new(
        service_name: impl Into<String>,
        environment: impl Into<String>,
        make_writer: W,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            environment: environment.into(),
            make_writer,
        }
    }

    fn render<S>(&self, event: &Event<'_>, ctx: &Context<'_, S>) -> Map<String, Value>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let metadata = event.metadata();
        let mut line = Map::new();
        line.insert(
            "timestamp".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)),
        );
        line.insert("level".to_string(), Value::String(metadata.level().to_string()));
        line.insert("target".to_string(), Value::String(metadata.target().to_string()));
        line.insert("service.name".to_string(), Value::String(self.service_name.clone()));
        line.insert("environment".to_string(), Value::String(self.environment.clone()));

        event.record(&mut JsonVisitor(&mut line));
        if !line.contains_key("message") {
            line.insert("message".to_string(), Value::String(String::new()));
        }

        // Startup and shutdown logs have no span in scope and skip this entirely
        if let Some(scope) = ctx.event_scope(event) {
            let mut correlation = Correlation::default();
            for span in scope {
                let extensions = span.extensions();
                let Some(found) = extensions.get::<Correlation>() else {
                    continue;
                };
                // Innermost span wins for ids; the route usually sits on the server span
                if correlation.trace_id.is_none() {
                    correlation.trace_id = found.trace_id.clone();
                    correlation.span_id = found.span_id.clone();
                }
                if correlation.route.is_none() {
                    correlation.route = found.route.clone();
                }
                if correlation.trace_id.is_some() && correlation.route.is_some() {
                    break;
                }
            }

            let fields = [
                (TRACE_ID, correlation.trace_id),
                (SPAN_ID, correlation.span_id),
                (HTTP_ROUTE, correlation.route),
            ];
            for (key, value) in fields {
                if let Some(value) = value {
                    line.entry(key).or_insert(Value::String(value));
                }
            }
        }

        line
    }
}

impl<S, W> Layer<S> for CorrelatedJsonLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'a> MakeWriter<'a> + 'static,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut correlation = Correlation::default();
        attrs.record(&mut correlation);
        if correlation.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(correlation);
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<Correlation>() {
            Some(correlation) => values.record(correlation),
            None => {
                let mut correlation = Correlation::default();
                values.record(&mut correlation);
                if !correlation.is_empty() {
                    extensions.insert(correlation);
                }
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let line = self.render(event, &ctx);
        let Ok(mut buf) = serde_json::to_vec(&line) else {
            return;
        };
        buf.push(b'\n');

        let mut writer = self.make_writer.make_writer_for(event.metadata());
        // Nowhere left to report a failed log write
        let _ = writer.write_all(&buf);
    }
}
