/*
Copyright 2024-2025 The Spice.ai OSS Authors

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

     https://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use std::{collections::BTreeMap, fmt::Display, sync::Arc, time::Duration};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use snafu::{ensure, OptionExt, Snafu};

mod statistics;

pub use statistics::{SortedSamples, StatisticsCollector};

/// Names of the metrics every load test registers before its first virtual user starts.
pub mod builtin {
    use super::MetricKind;

    pub const HTTP_REQS: &str = "http_reqs";
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
    pub const ITERATIONS: &str = "iterations";
    pub const SUCCESS_RATE: &str = "success_rate";
    pub const ERROR_COUNTER: &str = "error_counter";
    pub const LATENCY_TREND: &str = "latency_trend";

    pub const ALL: &[(&str, MetricKind)] = &[
        (HTTP_REQS, MetricKind::Counter),
        (HTTP_REQ_DURATION, MetricKind::Trend),
        (HTTP_REQ_FAILED, MetricKind::Rate),
        (ITERATIONS, MetricKind::Counter),
        (SUCCESS_RATE, MetricKind::Rate),
        (ERROR_COUNTER, MetricKind::Counter),
        (LATENCY_TREND, MetricKind::Trend),
    ];
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "Metric '{name}' is already registered.\nMetric names must be unique within a load test."
    ))]
    DuplicateMetric { name: String },

    #[snafu(display(
        "Metric '{name}' is not registered.\nRegister the metric before recording samples to it."
    ))]
    UnknownMetric { name: String },

    #[snafu(display("A {sample} sample cannot be recorded to the {kind} metric '{name}'."))]
    IncompatibleSample {
        name: String,
        kind: MetricKind,
        sample: &'static str,
    },

    #[snafu(display(
        "Sample {value} rejected by {kind} metric '{name}'.\nCounters only accept finite, non-negative values and trends only accept finite values."
    ))]
    InvalidSample {
        name: String,
        kind: MetricKind,
        value: f64,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// A monotonic sum.
    Counter,
    /// The share of boolean samples that were true.
    Rate,
    /// A distribution of values, queried through percentiles.
    Trend,
}

impl Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Rate => write!(f, "rate"),
            MetricKind::Trend => write!(f, "trend"),
        }
    }
}

/// A single observation recorded to a metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Value(f64),
    Hit(bool),
}

impl Sample {
    fn describe(self) -> &'static str {
        match self {
            Sample::Value(_) => "numeric",
            Sample::Hit(_) => "boolean",
        }
    }
}

impl From<f64> for Sample {
    fn from(value: f64) -> Self {
        Sample::Value(value)
    }
}

impl From<u64> for Sample {
    fn from(value: u64) -> Self {
        // safety: counter increments are small integers
        #[allow(clippy::cast_precision_loss)]
        let value = value as f64;
        Sample::Value(value)
    }
}

impl From<bool> for Sample {
    fn from(value: bool) -> Self {
        Sample::Hit(value)
    }
}

/// Durations are recorded in milliseconds.
impl From<Duration> for Sample {
    fn from(value: Duration) -> Self {
        Sample::Value(value.as_secs_f64() * 1000.0)
    }
}

#[derive(Debug)]
enum MetricState {
    Counter { value: f64, count: u64 },
    Rate { passes: u64, total: u64 },
    Trend { samples: Vec<f64> },
}

impl MetricState {
    fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => MetricState::Counter {
                value: 0.0,
                count: 0,
            },
            MetricKind::Rate => MetricState::Rate {
                passes: 0,
                total: 0,
            },
            MetricKind::Trend => MetricState::Trend { samples: vec![] },
        }
    }

    fn kind(&self) -> MetricKind {
        match self {
            MetricState::Counter { .. } => MetricKind::Counter,
            MetricState::Rate { .. } => MetricKind::Rate,
            MetricState::Trend { .. } => MetricKind::Trend,
        }
    }

    fn add(&mut self, name: &str, sample: Sample) -> Result<()> {
        match (self, sample) {
            (MetricState::Counter { value, count }, sample) => {
                let increment = match sample {
                    Sample::Value(v) => v,
                    Sample::Hit(hit) => f64::from(u8::from(hit)),
                };
                ensure!(
                    increment.is_finite() && increment >= 0.0,
                    InvalidSampleSnafu {
                        name,
                        kind: MetricKind::Counter,
                        value: increment,
                    }
                );
                *value += increment;
                *count += 1;
            }
            (MetricState::Rate { passes, total }, sample) => {
                let hit = match sample {
                    Sample::Value(v) => v != 0.0,
                    Sample::Hit(hit) => hit,
                };
                *passes += u64::from(hit);
                *total += 1;
            }
            (MetricState::Trend { samples }, Sample::Value(v)) => {
                ensure!(
                    v.is_finite(),
                    InvalidSampleSnafu {
                        name,
                        kind: MetricKind::Trend,
                        value: v,
                    }
                );
                samples.push(v);
            }
            (MetricState::Trend { .. }, sample @ Sample::Hit(_)) => {
                return IncompatibleSampleSnafu {
                    name,
                    kind: MetricKind::Trend,
                    sample: sample.describe(),
                }
                .fail();
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> MetricSnapshot {
        match self {
            MetricState::Counter { value, count } => MetricSnapshot::Counter {
                value: *value,
                count: *count,
            },
            MetricState::Rate { passes, total } => MetricSnapshot::Rate {
                rate: rate(*passes, *total),
                passes: *passes,
                total: *total,
            },
            MetricState::Trend { samples } => {
                MetricSnapshot::Trend(TrendSummary::from_samples(samples.clone()))
            }
        }
    }
}

fn rate(passes: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }

    // safety: sample counts are far below 2^52, so the conversion is exact
    #[allow(clippy::cast_precision_loss)]
    let (passes, total) = (passes as f64, total as f64);
    passes / total
}

/// Holds every metric of a load test.
///
/// A single instance is shared (behind an `Arc`) by all virtual users. Each metric sits behind
/// its own lock, so concurrent adds to different metrics never contend with each other.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    metrics: RwLock<BTreeMap<String, Arc<Mutex<MetricState>>>>,
}

impl MetricsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry that already holds every metric in [`builtin::ALL`].
    #[must_use]
    pub fn with_builtin_metrics() -> Self {
        let registry = Self::new();
        {
            let mut metrics = registry.metrics.write();
            for (name, kind) in builtin::ALL {
                metrics.insert(
                    (*name).to_string(),
                    Arc::new(Mutex::new(MetricState::new(*kind))),
                );
            }
        }
        registry
    }

    pub fn register(&self, name: impl Into<String>, kind: MetricKind) -> Result<()> {
        let name = name.into();
        let mut metrics = self.metrics.write();
        ensure!(!metrics.contains_key(&name), DuplicateMetricSnafu { name });

        metrics.insert(name, Arc::new(Mutex::new(MetricState::new(kind))));
        Ok(())
    }

    pub fn add(&self, name: &str, sample: impl Into<Sample>) -> Result<()> {
        let metric = self
            .metrics
            .read()
            .get(name)
            .cloned()
            .context(UnknownMetricSnafu { name })?;

        let mut state = metric.lock();
        state.add(name, sample.into())
    }

    #[must_use]
    pub fn kind(&self, name: &str) -> Option<MetricKind> {
        self.metrics.read().get(name).map(|m| m.lock().kind())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.metrics.read().contains_key(name)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let metrics = self.metrics.read();
        MetricsSnapshot(
            metrics
                .iter()
                .map(|(name, metric)| (name.clone(), metric.lock().snapshot()))
                .collect(),
        )
    }
}

/// Aggregated view of a trend at the time of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSummary {
    pub count: usize,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub med: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,

    #[serde(skip)]
    samples: SortedSamples,
}

impl TrendSummary {
    fn from_samples(samples: Vec<f64>) -> Self {
        let samples = SortedSamples::from_unsorted(samples);
        Self {
            count: samples.len(),
            sum: samples.sum(),
            min: samples.min().unwrap_or_default(),
            max: samples.max().unwrap_or_default(),
            avg: samples.mean().unwrap_or_default(),
            med: samples.median().unwrap_or_default(),
            p90: samples.percentile(90.0).unwrap_or_default(),
            p95: samples.percentile(95.0).unwrap_or_default(),
            p99: samples.percentile(99.0).unwrap_or_default(),
            samples,
        }
    }

    /// Any percentile of the trend. Empty trends report `0.0`.
    #[must_use]
    pub fn percentile(&self, percentile: f64) -> f64 {
        self.samples.percentile(percentile).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricSnapshot {
    Counter { value: f64, count: u64 },
    Rate { rate: f64, passes: u64, total: u64 },
    Trend(TrendSummary),
}

impl MetricSnapshot {
    #[must_use]
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricSnapshot::Counter { .. } => MetricKind::Counter,
            MetricSnapshot::Rate { .. } => MetricKind::Rate,
            MetricSnapshot::Trend(_) => MetricKind::Trend,
        }
    }
}

/// An immutable copy of every metric in a [`MetricsRegistry`], keyed by metric name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MetricsSnapshot(BTreeMap<String, MetricSnapshot>);

impl MetricsSnapshot {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MetricSnapshot> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetricSnapshot)> {
        self.0.iter()
    }

    /// Convenience accessor for a counter's accumulated value.
    #[must_use]
    pub fn counter(&self, name: &str) -> Option<f64> {
        match self.0.get(name)? {
            MetricSnapshot::Counter { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Convenience accessor for a rate's ratio.
    #[must_use]
    pub fn rate(&self, name: &str) -> Option<f64> {
        match self.0.get(name)? {
            MetricSnapshot::Rate { rate, .. } => Some(*rate),
            _ => None,
        }
    }

    #[must_use]
    pub fn trend(&self, name: &str) -> Option<&TrendSummary> {
        match self.0.get(name)? {
            MetricSnapshot::Trend(summary) => Some(summary),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::expect_used, clippy::float_cmp)]

    use std::{sync::Arc, time::Duration};

    use super::{builtin, Error, MetricKind, MetricsRegistry};

    #[test]
    fn test_register_rejects_duplicate_names() {
        let registry = MetricsRegistry::new();
        registry
            .register("checkout", MetricKind::Counter)
            .expect("first registration should succeed");

        let err = registry
            .register("checkout", MetricKind::Trend)
            .expect_err("second registration should fail");
        assert!(matches!(err, Error::DuplicateMetric { name } if name == "checkout"));
    }

    #[test]
    fn test_builtin_metrics_are_registered() {
        let registry = MetricsRegistry::with_builtin_metrics();
        for (name, kind) in builtin::ALL {
            assert_eq!(registry.kind(name), Some(*kind));
        }

        assert!(matches!(
            registry.register(builtin::HTTP_REQS, MetricKind::Counter),
            Err(Error::DuplicateMetric { .. })
        ));
    }

    #[test]
    fn test_add_to_unknown_metric_fails() {
        let registry = MetricsRegistry::new();
        assert!(matches!(
            registry.add("missing", 1.0),
            Err(Error::UnknownMetric { .. })
        ));
    }

    #[test]
    fn test_counter_accumulates_and_rejects_negative_values() {
        let registry = MetricsRegistry::new();
        registry
            .register("bytes", MetricKind::Counter)
            .expect("register");

        registry.add("bytes", 3.0).expect("add");
        registry.add("bytes", 1_u64).expect("add");
        registry.add("bytes", true).expect("add");
        assert!(matches!(
            registry.add("bytes", -1.0),
            Err(Error::InvalidSample { .. })
        ));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.counter("bytes"), Some(5.0));
    }

    #[test]
    fn test_trend_rejects_boolean_samples() {
        let registry = MetricsRegistry::new();
        registry
            .register("latency", MetricKind::Trend)
            .expect("register");

        assert!(matches!(
            registry.add("latency", true),
            Err(Error::IncompatibleSample { .. })
        ));
    }

    #[test]
    fn test_trend_summary() {
        let registry = MetricsRegistry::new();
        registry
            .register("latency", MetricKind::Trend)
            .expect("register");

        for ms in [40, 10, 30, 20, 50] {
            registry
                .add("latency", Duration::from_millis(ms))
                .expect("add");
        }

        let snapshot = registry.snapshot();
        let trend = snapshot.trend("latency").expect("latency is a trend");
        assert_eq!(trend.count, 5);
        assert_eq!(trend.min, 10.0);
        assert_eq!(trend.max, 50.0);
        assert_eq!(trend.avg, 30.0);
        assert_eq!(trend.med, 30.0);
        assert_eq!(trend.percentile(25.0), 20.0);
    }

    #[test]
    fn test_empty_rate_is_zero() {
        let registry = MetricsRegistry::with_builtin_metrics();
        assert_eq!(registry.snapshot().rate(builtin::SUCCESS_RATE), Some(0.0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rate_is_independent_of_interleaving() {
        let registry = Arc::new(MetricsRegistry::new());
        registry.register("ok", MetricKind::Rate).expect("register");

        // 8 writers, each recording 3 hits for every miss
        let writers = (0..8)
            .map(|writer| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    for i in 0..400 {
                        registry.add("ok", (i + writer) % 4 != 0).expect("add");
                        if i % 50 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect::<Vec<_>>();

        for writer in futures::future::join_all(writers).await {
            writer.expect("writer should not panic");
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.rate("ok"), Some(0.75));
    }

    #[test]
    fn test_trend_snapshot_is_independent_of_insertion_order() {
        let values = [0.1, 0.7, 12.5, 3.3, 0.2, 9.9, 4.4];

        let forward = MetricsRegistry::new();
        forward.register("t", MetricKind::Trend).expect("register");
        for v in values {
            forward.add("t", v).expect("add");
        }

        let backward = MetricsRegistry::new();
        backward.register("t", MetricKind::Trend).expect("register");
        for v in values.iter().rev() {
            backward.add("t", *v).expect("add");
        }

        assert_eq!(forward.snapshot(), backward.snapshot());
    }
}
