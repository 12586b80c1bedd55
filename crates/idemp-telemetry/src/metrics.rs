use opentelemetry::KeyValue;
use opentelemetry::metrics::Counter;
use opentelemetry::metrics::Gauge;
use opentelemetry::metrics::Histogram;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::tracing_init::{TELEMETRY_METER_NAME, telemetry_enabled};

/// Label set attached to a recorded metric. Kept intentionally small: the
/// idempotency path only ever tags by backend kind and outcome.
#[derive(Debug, Clone, Default)]
pub struct MetricLabels {
    pub backend: Option<String>,
    pub outcome: Option<String>,
    pub extra: Vec<(&'static str, String)>,
}

impl MetricLabels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    fn to_key_values(&self) -> Vec<KeyValue> {
        let mut kvs = Vec::with_capacity(2 + self.extra.len());
        if let Some(backend) = &self.backend {
            kvs.push(KeyValue::new("backend", backend.clone()));
        }
        if let Some(outcome) = &self.outcome {
            kvs.push(KeyValue::new("outcome", outcome.clone()));
        }
        for (k, v) in &self.extra {
            kvs.push(KeyValue::new(*k, v.clone()));
        }
        kvs
    }
}

struct Instruments {
    counters: Mutex<HashMap<&'static str, Counter<u64>>>,
    gauges: Mutex<HashMap<&'static str, Gauge<i64>>>,
    histograms: Mutex<HashMap<&'static str, Histogram<f64>>>,
}

static INSTRUMENTS: std::sync::OnceLock<Instruments> = std::sync::OnceLock::new();

fn instruments() -> &'static Instruments {
    INSTRUMENTS.get_or_init(|| Instruments {
        counters: Mutex::new(HashMap::new()),
        gauges: Mutex::new(HashMap::new()),
        histograms: Mutex::new(HashMap::new()),
    })
}

fn meter() -> opentelemetry::metrics::Meter {
    opentelemetry::global::meter(TELEMETRY_METER_NAME)
}

pub fn record_counter(name: &'static str, value: u64, labels: &MetricLabels) {
    if !telemetry_enabled() {
        return;
    }
    let inst = instruments();
    let mut guard = inst.counters.lock().unwrap_or_else(|e| e.into_inner());
    let counter = guard
        .entry(name)
        .or_insert_with(|| meter().u64_counter(name).build());
    counter.add(value, &labels.to_key_values());
}

pub fn record_gauge(name: &'static str, value: i64, labels: &MetricLabels) {
    if !telemetry_enabled() {
        return;
    }
    let inst = instruments();
    let mut guard = inst.gauges.lock().unwrap_or_else(|e| e.into_inner());
    let gauge = guard
        .entry(name)
        .or_insert_with(|| meter().i64_gauge(name).build());
    gauge.record(value, &labels.to_key_values());
}

pub fn record_histogram(name: &'static str, value: f64, labels: &MetricLabels) {
    if !telemetry_enabled() {
        return;
    }
    let inst = instruments();
    let mut guard = inst.histograms.lock().unwrap_or_else(|e| e.into_inner());
    let histogram = guard
        .entry(name)
        .or_insert_with(|| meter().f64_histogram(name).build());
    histogram.record(value, &labels.to_key_values());
}
