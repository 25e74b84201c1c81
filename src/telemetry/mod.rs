//! Telemetry provider
//!
//! One [`Telemetry`] value is built at startup and shared by every component
//! that traces, measures or logs. It runs in one of two modes:
//!
//! - exporting: spans and metrics are pushed to an OTLP collector by the SDK
//!   batch processor and periodic reader
//! - no-op: the SDK providers have no exporter, nothing leaves the process
//!
//! Spans get real ids in both modes, so log correlation and `/metrics`
//! rendering behave the same either way.

pub mod context;
mod export;
pub mod logger;
pub mod meter;
pub mod span;

use opentelemetry::metrics::MeterProvider as _;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::error::OTelSdkError;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{Level, Metadata, Subscriber};
use tracing_subscriber::filter::{filter_fn, FilterExt, LevelFilter};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::TelemetryConfig;
pub use context::{RequestContext, RouteSlot};
pub use logger::CorrelatedJsonLayer;
pub use meter::{Attributes, Meter};
pub use span::{Span, SpanContext, SpanKind, SPAN_TARGET};

const INSTRUMENTATION_SCOPE: &str = "products-api";

/// Telemetry errors
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid instrument name: {0:?}")]
    InvalidInstrument(String),

    #[error("failed to build {signal} exporter: {message}")]
    Exporter { signal: &'static str, message: String },

    #[error("telemetry shutdown failed: {0}")]
    Shutdown(#[from] OTelSdkError),

    #[error("telemetry shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("telemetry shutdown task failed: {0}")]
    ShutdownTask(String),

    #[error("failed to install log subscriber: {0}")]
    Subscriber(String),
}

pub struct Telemetry {
    config: TelemetryConfig,
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    meter: Arc<Meter>,
    exporting: bool,
    shut_down: AtomicBool,
}

impl Telemetry {
    /// Build the provider described by `config`.
    ///
    /// Fails when the collector endpoint cannot be turned into an exporter.
    pub fn initialize(config: &TelemetryConfig) -> Result<Self, TelemetryError> {
        if !config.enabled {
            return Ok(Self::disabled(config));
        }

        let resource = export::resource(config);
        let tracer_provider = export::tracer_provider(config, resource.clone())?;
        let meter_provider = export::meter_provider(config, resource)?;

        tracing::info!(
            endpoint = %config.endpoint,
            service_name = %config.service_name,
            environment = %config.environment,
            "Telemetry initialized"
        );

        Ok(Self::assemble(config.clone(), tracer_provider, meter_provider, true))
    }

    /// No-op provider: spans and metrics stay in process
    pub fn disabled(config: &TelemetryConfig) -> Self {
        let resource = export::resource(config);
        let tracer_provider = SdkTracerProvider::builder()
            .with_resource(resource.clone())
            .build();
        let meter_provider = SdkMeterProvider::builder().with_resource(resource).build();

        let config = TelemetryConfig {
            enabled: false,
            ..config.clone()
        };
        Self::assemble(config, tracer_provider, meter_provider, false)
    }

    /// Provider whose spans are handed to `exporter` as soon as they end.
    /// Metrics stay in process.
    pub fn with_span_exporter<E>(config: &TelemetryConfig, exporter: E) -> Self
    where
        E: opentelemetry_sdk::trace::SpanExporter + 'static,
    {
        let resource = export::resource(config);
        let tracer_provider = SdkTracerProvider::builder()
            .with_resource(resource.clone())
            .with_simple_exporter(exporter)
            .build();
        let meter_provider = SdkMeterProvider::builder().with_resource(resource).build();

        Self::assemble(config.clone(), tracer_provider, meter_provider, false)
    }

    fn assemble(
        config: TelemetryConfig,
        tracer_provider: SdkTracerProvider,
        meter_provider: SdkMeterProvider,
        exporting: bool,
    ) -> Self {
        let meter = Arc::new(Meter::new(meter_provider.meter(INSTRUMENTATION_SCOPE)));
        Self {
            config,
            tracer_provider,
            meter_provider,
            meter,
            exporting,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn meter(&self) -> &Arc<Meter> {
        &self.meter
    }

    /// Whether spans and metrics are pushed to a collector
    pub fn is_exporting(&self) -> bool {
        self.exporting
    }

    /// Subscriber made of the OpenTelemetry layer and the correlated JSON
    /// layer writing to `make_writer`.
    ///
    /// Each layer has its own filter. `directives` only decide which events
    /// are logged; spans opened by [`Span::start`] reach both layers at any
    /// log level, so a warning still carries its trace id and route.
    pub fn subscriber<W>(
        &self,
        directives: &str,
        make_writer: W,
    ) -> Result<impl Subscriber + Send + Sync + 'static, TelemetryError>
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        let log_filter = EnvFilter::try_new(directives)
            .map_err(|e| TelemetryError::Subscriber(e.to_string()))?
            .or(filter_fn(is_tracer_span).with_max_level_hint(LevelFilter::INFO));

        let otel = tracing_opentelemetry::layer()
            .with_tracer(self.tracer_provider.tracer(INSTRUMENTATION_SCOPE))
            .with_filter(filter_fn(is_exported).with_max_level_hint(LevelFilter::INFO));

        let logs = CorrelatedJsonLayer::new(
            self.config.service_name.clone(),
            self.config.environment.clone(),
            make_writer,
        )
        .with_filter(log_filter);

        Ok(tracing_subscriber::registry().with(otel).with(logs))
    }

    /// Install [`Telemetry::subscriber`] on stdout as the global default
    pub fn install_logger(&self, directives: &str) -> Result<(), TelemetryError> {
        self.subscriber(directives, std::io::stdout)?
            .try_init()
            .map_err(|e| TelemetryError::Subscriber(e.to_string()))
    }

    /// Flush pending telemetry and stop exporting, waiting at most `timeout`.
    ///
    /// Only the first call does anything.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), TelemetryError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!(timeout_ms = timeout.as_millis() as u64, "Shutting down telemetry");

        let tracer_provider = self.tracer_provider.clone();
        let meter_provider = self.meter_provider.clone();
        // Both shutdowns block until their export threads finish
        let task = tokio::task::spawn_blocking(move || {
            let traces = tracer_provider.shutdown();
            let metrics = meter_provider.shutdown();
            traces.and(metrics)
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result.map_err(TelemetryError::from),
            Ok(Err(e)) => Err(TelemetryError::ShutdownTask(e.to_string())),
            Err(_) => Err(TelemetryError::ShutdownTimeout(timeout)),
        }
    }
}

fn is_tracer_span(metadata: &Metadata<'_>) -> bool {
    metadata.is_span() && metadata.target() == SPAN_TARGET
}

/// Tracer spans, plus this crate's warnings and errors as span events
fn is_exported(metadata: &Metadata<'_>) -> bool {
    is_tracer_span(metadata)
        || (metadata.is_event()
            && metadata.target().starts_with(env!("CARGO_CRATE_NAME"))
            && *metadata.level() <= Level::WARN)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SpanData};
    use tracing::subscriber::DefaultGuard;

    /// Provider recording finished spans in memory, installed for this thread
    pub fn recording() -> (Telemetry, InMemorySpanExporter, DefaultGuard) {
        let spans = InMemorySpanExporter::default();
        let telemetry = Telemetry::with_span_exporter(&TelemetryConfig::default(), spans.clone());
        let guard = tracing::subscriber::set_default(
            telemetry.subscriber("info", std::io::sink).unwrap(),
        );
        (telemetry, spans, guard)
    }

    pub fn attribute(span: &SpanData, key: &str) -> Option<String> {
        span.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.to_string())
    }
}
