//! OTLP/HTTP export pipelines
//!
//! Spans go through the SDK batch processor: finished spans wait in a queue
//! of `max_queue_size` and are dropped once it is full. Metrics are collected
//! by a periodic reader every `export_interval`. Both run on their own
//! threads and post protobuf to `{endpoint}/v1/traces` and
//! `{endpoint}/v1/metrics`.

use opentelemetry::KeyValue;
use opentelemetry_otlp::{MetricExporter, Protocol, SpanExporter, WithExportConfig};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{BatchConfigBuilder, BatchSpanProcessor, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use std::time::Duration;

use super::TelemetryError;
use crate::config::TelemetryConfig;

/// Per-request timeout for collector calls
pub const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn resource(config: &TelemetryConfig) -> Resource {
    Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attributes([
            KeyValue::new("service.version", config.service_version.clone()),
            KeyValue::new("deployment.environment", config.environment.clone()),
        ])
        .build()
}

fn signal_url(config: &TelemetryConfig, signal: &str) -> String {
    format!("{}/v1/{signal}", config.endpoint.trim_end_matches('/'))
}

pub(crate) fn tracer_provider(
    config: &TelemetryConfig,
    resource: Resource,
) -> Result<SdkTracerProvider, TelemetryError> {
    let exporter = SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(signal_url(config, "traces"))
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            signal: "traces",
            message: e.to_string(),
        })?;

    let batch_config = BatchConfigBuilder::default()
        .with_max_queue_size(config.max_queue_size)
        .with_max_export_batch_size(config.max_export_batch_size)
        .with_scheduled_delay(config.export_interval())
        .build();
    let processor = BatchSpanProcessor::builder(exporter)
        .with_batch_config(batch_config)
        .build();

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_span_processor(processor)
        .build())
}

pub(crate) fn meter_provider(
    config: &TelemetryConfig,
    resource: Resource,
) -> Result<SdkMeterProvider, TelemetryError> {
    let exporter = MetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(signal_url(config, "metrics"))
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            signal: "metrics",
            message: e.to_string(),
        })?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(config.export_interval())
        .build();

    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_url() {
        let config = TelemetryConfig {
            endpoint: "http://collector:4318/".to_string(),
            ..TelemetryConfig::default()
        };
        assert_eq!(signal_url(&config, "traces"), "http://collector:4318/v1/traces");
        assert_eq!(signal_url(&config, "metrics"), "http://collector:4318/v1/metrics");
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        let config = TelemetryConfig {
            endpoint: "http://bad host".to_string(),
            ..TelemetryConfig::default()
        };
        let err = tracer_provider(&config, resource(&config)).unwrap_err();
        assert!(matches!(err, TelemetryError::Exporter { signal: "traces", .. }));
    }

    #[test]
    fn test_resource_carries_service_identity() {
        let config = TelemetryConfig {
            environment: "staging".to_string(),
            ..TelemetryConfig::default()
        };
        let resource = resource(&config);
        let get = |key: &'static str| {
            resource
                .get(&opentelemetry::Key::from_static_str(key))
                .map(|v| v.to_string())
        };
        assert_eq!(get("service.name").as_deref(), Some("products-api"));
        assert_eq!(get("deployment.environment").as_deref(), Some("staging"));
    }
}
