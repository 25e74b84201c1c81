//! Metric instruments
//!
//! All instruments are created once when the [`Meter`] is built. Every
//! measurement goes three ways: to the OpenTelemetry instrument (pushed to
//! the collector when exporting), to the Prometheus recorder backing
//! `/metrics`, and to an in-process tally per attribute set.

use dashmap::DashMap;
use metrics::{Key, KeyName, Label, Metadata, Recorder, SharedString, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use opentelemetry::KeyValue;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::TelemetryError;

pub const ACTIVE_REQUESTS: &str = "http.server.active_requests";
pub const REQUEST_DURATION_MS: &str = "http.server.request.duration.ms";
pub const PRODUCT_OPERATIONS: &str = "products.operations";
pub const PRODUCTS_CREATED: &str = "products.created.total";

const DURATION_BUCKETS_MS: &[f64] = &[
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];

/// Ordered attribute set attached to a measurement.
///
/// Two measurements belong to the same series only when their attribute sets
/// are equal key for key and byte for byte.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Attributes(BTreeMap<&'static str, String>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.0.insert(key, value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn key(&self, name: &'static str) -> Key {
        let labels: Vec<Label> = self
            .0
            .iter()
            .map(|(k, v)| Label::new(*k, v.clone()))
            .collect();
        Key::from_parts(name, labels)
    }

    fn key_values(&self) -> Vec<KeyValue> {
        self.0
            .iter()
            .map(|(k, v)| KeyValue::new(*k, v.clone()))
            .collect()
    }
}

/// Running tally of an up/down counter series
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpDownTally {
    pub value: i64,
    pub increments: u64,
    pub decrements: u64,
}

/// Running tally of a histogram series
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Distribution {
    pub count: u64,
    pub sum: f64,
    pub max: f64,
}

fn metadata() -> Metadata<'static> {
    Metadata::new(module_path!(), metrics::Level::INFO, Some(module_path!()))
}

fn validate_name(name: &'static str) -> Result<(), TelemetryError> {
    let valid = !name.is_empty()
        && name.starts_with(|c: char| c.is_ascii_alphabetic())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(TelemetryError::InvalidInstrument(name.to_string()))
    }
}

/// Gauge-like instrument whose value moves in both directions
pub struct UpDownCounter {
    name: &'static str,
    recorder: Arc<PrometheusRecorder>,
    otel: opentelemetry::metrics::UpDownCounter<i64>,
    tallies: DashMap<Attributes, UpDownTally>,
}

impl UpDownCounter {
    pub fn add(&self, delta: i64, attributes: &Attributes) {
        self.otel.add(delta, &attributes.key_values());

        let gauge = self.recorder.register_gauge(&attributes.key(self.name), &metadata());
        if delta >= 0 {
            gauge.increment(delta as f64);
        } else {
            gauge.decrement(delta.unsigned_abs() as f64);
        }

        let mut tally = self.tallies.entry(attributes.clone()).or_default();
        tally.value += delta;
        if delta > 0 {
            tally.increments += 1;
        } else if delta < 0 {
            tally.decrements += 1;
        }
    }

    pub fn tally(&self, attributes: &Attributes) -> Option<UpDownTally> {
        self.tallies.get(attributes).map(|t| *t)
    }

    /// Every series seen so far, sorted by attribute set
    pub fn tallies(&self) -> Vec<(Attributes, UpDownTally)> {
        let mut tallies: Vec<_> = self
            .tallies
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        tallies.sort_by(|a, b| a.0.cmp(&b.0));
        tallies
    }
}

/// Monotonic counter
pub struct Counter {
    name: &'static str,
    recorder: Arc<PrometheusRecorder>,
    otel: opentelemetry::metrics::Counter<u64>,
    totals: DashMap<Attributes, u64>,
}

impl Counter {
    pub fn add(&self, value: u64, attributes: &Attributes) {
        self.otel.add(value, &attributes.key_values());
        self.recorder
            .register_counter(&attributes.key(self.name), &metadata())
            .increment(value);
        *self.totals.entry(attributes.clone()).or_default() += value;
    }

    pub fn value(&self, attributes: &Attributes) -> u64 {
        self.totals.get(attributes).map(|v| *v).unwrap_or_default()
    }

    /// Sum over every series
    pub fn total(&self) -> u64 {
        self.totals.iter().map(|entry| *entry.value()).sum()
    }
}

/// Distribution of recorded values
pub struct Histogram {
    name: &'static str,
    recorder: Arc<PrometheusRecorder>,
    otel: opentelemetry::metrics::Histogram<f64>,
    distributions: DashMap<Attributes, Distribution>,
}

impl Histogram {
    pub fn record(&self, value: f64, attributes: &Attributes) {
        self.otel.record(value, &attributes.key_values());
        self.recorder
            .register_histogram(&attributes.key(self.name), &metadata())
            .record(value);

        let mut dist = self.distributions.entry(attributes.clone()).or_default();
        dist.count += 1;
        dist.sum += value;
        dist.max = dist.max.max(value);
    }

    pub fn distribution(&self, attributes: &Attributes) -> Option<Distribution> {
        self.distributions.get(attributes).map(|d| *d)
    }

    /// Number of values recorded across every series
    pub fn count(&self) -> u64 {
        self.distributions.iter().map(|entry| entry.value().count).sum()
    }
}

/// Instrument factory and owner of the service's instruments.
///
/// An instrument that fails to build is logged and left out; callers degrade
/// to not recording it.
pub struct Meter {
    otel: opentelemetry::metrics::Meter,
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
    active_requests: Option<Arc<UpDownCounter>>,
    request_duration: Option<Arc<Histogram>>,
    product_operations: Option<Arc<Counter>>,
    products_created: Option<Arc<Counter>>,
}

impl Meter {
    /// Build every instrument on top of `otel`
    pub fn new(otel: opentelemetry::metrics::Meter) -> Self {
        // request duration is the only histogram, so global buckets apply to it alone
        let builder = PrometheusBuilder::new()
            .set_buckets(DURATION_BUCKETS_MS)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Invalid histogram buckets, using summaries");
                PrometheusBuilder::new()
            });
        let recorder = Arc::new(builder.build_recorder());
        let handle = recorder.handle();

        let mut meter = Self {
            otel,
            recorder,
            handle,
            active_requests: None,
            request_duration: None,
            product_operations: None,
            products_created: None,
        };

        meter.active_requests = instrument(meter.up_down_counter(
            ACTIVE_REQUESTS,
            "Number of active HTTP server requests",
        ));
        meter.request_duration = instrument(meter.histogram(
            REQUEST_DURATION_MS,
            "HTTP server request duration in milliseconds",
        ));
        meter.product_operations = instrument(meter.counter(
            PRODUCT_OPERATIONS,
            "Total number of product operations",
        ));
        meter.products_created = instrument(meter.counter(
            PRODUCTS_CREATED,
            "Total number of products created",
        ));

        meter
    }

    pub fn up_down_counter(
        &self,
        name: &'static str,
        description: &'static str,
    ) -> Result<UpDownCounter, TelemetryError> {
        validate_name(name)?;
        self.recorder
            .describe_gauge(KeyName::from(name), Some(Unit::Count), SharedString::from(description));
        let otel = self
            .otel
            .i64_up_down_counter(name)
            .with_description(description)
            .with_unit("{request}")
            .build();

        Ok(UpDownCounter {
            name,
            recorder: self.recorder.clone(),
            otel,
            tallies: DashMap::new(),
        })
    }

    pub fn counter(
        &self,
        name: &'static str,
        description: &'static str,
    ) -> Result<Counter, TelemetryError> {
        validate_name(name)?;
        self.recorder
            .describe_counter(KeyName::from(name), None, SharedString::from(description));
        let otel = self.otel.u64_counter(name).with_description(description).build();

        Ok(Counter {
            name,
            recorder: self.recorder.clone(),
            otel,
            totals: DashMap::new(),
        })
    }

    pub fn histogram(
        &self,
        name: &'static str,
        description: &'static str,
    ) -> Result<Histogram, TelemetryError> {
        validate_name(name)?;
        self.recorder.describe_histogram(
            KeyName::from(name),
            Some(Unit::Milliseconds),
            SharedString::from(description),
        );
        let otel = self
            .otel
            .f64_histogram(name)
            .with_description(description)
            .with_unit("ms")
            .with_boundaries(DURATION_BUCKETS_MS.to_vec())
            .build();

        Ok(Histogram {
            name,
            recorder: self.recorder.clone(),
            otel,
            distributions: DashMap::new(),
        })
    }

    pub fn active_requests(&self) -> Option<Arc<UpDownCounter>> {
        self.active_requests.clone()
    }

    pub fn request_duration(&self) -> Option<Arc<Histogram>> {
        self.request_duration.clone()
    }

    pub fn product_operations(&self) -> Option<Arc<Counter>> {
        self.product_operations.clone()
    }

    pub fn products_created(&self) -> Option<Arc<Counter>> {
        self.products_created.clone()
    }

    /// Prometheus exposition text for `/metrics`
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn instrument<T>(result: Result<T, TelemetryError>) -> Option<Arc<T>> {
    match result {
        Ok(instrument) => Some(Arc::new(instrument)),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to create metric instrument");
            None
        }
    }
}
