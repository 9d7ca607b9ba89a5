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

//! Pass/fail rules over aggregated metrics.
//!
//! A rule is written as `<aggregation> <operator> <value>`, for example `p(95)<500`,
//! `rate<0.05` or `count>=100`.

use std::fmt::Display;

use serde::Serialize;
use snafu::{OptionExt, Snafu};

use crate::metrics::{MetricKind, MetricSnapshot, MetricsRegistry, MetricsSnapshot};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "Threshold '{expression}' for metric '{metric}' is invalid: {reason}\nUse the form '<aggregation><operator><value>', for example 'p(95)<500' or 'rate<0.05'."
    ))]
    InvalidExpression {
        metric: String,
        expression: String,
        reason: String,
    },

    #[snafu(display(
        "Threshold references metric '{metric}', which is not registered.\nCheck the metric name for typos."
    ))]
    UnknownMetric { metric: String },

    #[snafu(display(
        "Threshold aggregation '{aggregation}' cannot be applied to the {kind} metric '{metric}'."
    ))]
    UnsupportedAggregation {
        metric: String,
        aggregation: Aggregation,
        kind: MetricKind,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Count,
    Rate,
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
}

impl Aggregation {
    fn parse(input: &str) -> Option<Self> {
        match input {
            "count" => Some(Aggregation::Count),
            "rate" => Some(Aggregation::Rate),
            "avg" => Some(Aggregation::Avg),
            "min" => Some(Aggregation::Min),
            "max" => Some(Aggregation::Max),
            "med" => Some(Aggregation::Med),
            _ => {
                let percentile = input.strip_prefix("p(")?.strip_suffix(')')?;
                let percentile: f64 = percentile.trim().parse().ok()?;
                (0.0..=100.0)
                    .contains(&percentile)
                    .then_some(Aggregation::Percentile(percentile))
            }
        }
    }

    fn supports(self, kind: MetricKind) -> bool {
        matches!(
            (self, kind),
            (Aggregation::Count, MetricKind::Counter | MetricKind::Trend)
                | (Aggregation::Rate, MetricKind::Rate)
                | (
                    Aggregation::Avg
                        | Aggregation::Min
                        | Aggregation::Max
                        | Aggregation::Med
                        | Aggregation::Percentile(_),
                    MetricKind::Trend
                )
        )
    }

    fn observe(self, snapshot: &MetricSnapshot) -> Option<f64> {
        #[allow(clippy::cast_precision_loss)]
        let observed = match (self, snapshot) {
            (Aggregation::Count, MetricSnapshot::Counter { value, .. }) => *value,
            (Aggregation::Count, MetricSnapshot::Trend(trend)) => trend.count as f64,
            (Aggregation::Rate, MetricSnapshot::Rate { rate, .. }) => *rate,
            (Aggregation::Avg, MetricSnapshot::Trend(trend)) => trend.avg,
            (Aggregation::Min, MetricSnapshot::Trend(trend)) => trend.min,
            (Aggregation::Max, MetricSnapshot::Trend(trend)) => trend.max,
            (Aggregation::Med, MetricSnapshot::Trend(trend)) => trend.med,
            (Aggregation::Percentile(p), MetricSnapshot::Trend(trend)) => trend.percentile(p),
            _ => return None,
        };
        Some(observed)
    }
}

impl Display for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Aggregation::Count => write!(f, "count"),
            Aggregation::Rate => write!(f, "rate"),
            Aggregation::Avg => write!(f, "avg"),
            Aggregation::Min => write!(f, "min"),
            Aggregation::Max => write!(f, "max"),
            Aggregation::Med => write!(f, "med"),
            Aggregation::Percentile(p) => write!(f, "p({p})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    // two character operators must be tried first
    const OPERATORS: [(&'static str, Comparison); 6] = [
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    fn holds(self, observed: f64, expected: f64) -> bool {
        match self {
            Comparison::Lt => observed < expected,
            Comparison::Le => observed <= expected,
            Comparison::Gt => observed > expected,
            Comparison::Ge => observed >= expected,
            Comparison::Eq => (observed - expected).abs() < f64::EPSILON,
            Comparison::Ne => (observed - expected).abs() >= f64::EPSILON,
        }
    }
}

/// A single pass/fail rule for one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRule {
    metric: String,
    expression: String,
    aggregation: Aggregation,
    comparison: Comparison,
    value: f64,
}

impl ThresholdRule {
    pub fn parse(metric: impl Into<String>, expression: &str) -> Result<Self> {
        let metric = metric.into();
        let invalid = |reason: &str| InvalidExpressionSnafu {
            metric: metric.clone(),
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let (position, operator, comparison) = Comparison::OPERATORS
            .iter()
            .filter_map(|(operator, comparison)| {
                expression
                    .find(operator)
                    .map(|position| (position, *operator, *comparison))
            })
            .min_by_key(|(position, operator, _)| (*position, usize::MAX - operator.len()))
            .context(invalid("missing comparison operator"))?;

        let aggregation = expression[..position].trim();
        let aggregation = Aggregation::parse(aggregation)
            .context(invalid(&format!("unknown aggregation '{aggregation}'")))?;

        let value = expression[position + operator.len()..].trim();
        let value = value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .context(invalid(&format!("'{value}' is not a number")))?;

        Ok(Self {
            metric,
            expression: expression.trim().to_string(),
            aggregation,
            comparison,
            value,
        })
    }

    #[must_use]
    pub fn metric(&self) -> &str {
        &self.metric
    }

    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    #[must_use]
    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    /// Checks the rule can be evaluated against the metrics held by `registry`.
    pub fn validate(&self, registry: &MetricsRegistry) -> Result<()> {
        let kind = registry.kind(&self.metric).context(UnknownMetricSnafu {
            metric: self.metric.clone(),
        })?;
        self.check_kind(kind)
    }

    fn check_kind(&self, kind: MetricKind) -> Result<()> {
        if self.aggregation.supports(kind) {
            Ok(())
        } else {
            UnsupportedAggregationSnafu {
                metric: self.metric.clone(),
                aggregation: self.aggregation,
                kind,
            }
            .fail()
        }
    }

    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> Result<ThresholdResult> {
        let metric = snapshot.get(&self.metric).context(UnknownMetricSnafu {
            metric: self.metric.clone(),
        })?;
        self.check_kind(metric.kind())?;

        let observed = self
            .aggregation
            .observe(metric)
            .context(UnsupportedAggregationSnafu {
                metric: self.metric.clone(),
                aggregation: self.aggregation,
                kind: metric.kind(),
            })?;

        Ok(ThresholdResult {
            metric: self.metric.clone(),
            expression: self.expression.clone(),
            passed: self.comparison.holds(observed, self.value),
            observed,
        })
    }
}

impl Display for ThresholdRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.metric, self.expression)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub passed: bool,
    pub observed: f64,
}

impl Display for ThresholdResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}: {} (observed {:.4})",
            if self.passed { "PASS" } else { "FAIL" },
            self.metric,
            self.expression,
            self.observed
        )
    }
}

/// Evaluates every rule against `snapshot`, preserving rule order.
pub fn evaluate(
    rules: &[ThresholdRule],
    snapshot: &MetricsSnapshot,
) -> Result<Vec<ThresholdResult>> {
    rules.iter().map(|rule| rule.evaluate(snapshot)).collect()
}

/// Checks every rule against the metrics held by `registry`.
pub fn validate(rules: &[ThresholdRule], registry: &MetricsRegistry) -> Result<()> {
    rules.iter().try_for_each(|rule| rule.validate(registry))
}

#[cfg(test)]
mod test {
    #![allow(clippy::expect_used, clippy::float_cmp)]

    use super::{evaluate, validate, Aggregation, Comparison, Error, ThresholdRule};
    use crate::metrics::{builtin, MetricKind, MetricsRegistry};

    fn registry_with_latencies() -> MetricsRegistry {
        let registry = MetricsRegistry::with_builtin_metrics();
        for ms in [100.0, 200.0, 300.0, 400.0, 900.0] {
            registry
                .add(builtin::HTTP_REQ_DURATION, ms)
                .expect("add latency");
        }
        for failed in [false, false, false, true] {
            registry
                .add(builtin::HTTP_REQ_FAILED, failed)
                .expect("add failure");
        }
        registry
    }

    #[test]
    fn test_parse_expressions() {
        let rule = ThresholdRule::parse("http_req_duration", "p(95)<500").expect("valid rule");
        assert_eq!(rule.aggregation, Aggregation::Percentile(95.0));
        assert_eq!(rule.comparison, Comparison::Lt);
        assert_eq!(rule.value, 500.0);

        let rule = ThresholdRule::parse("success_rate", " rate >= 0.95 ").expect("valid rule");
        assert_eq!(rule.aggregation, Aggregation::Rate);
        assert_eq!(rule.comparison, Comparison::Ge);
        assert_eq!(rule.value, 0.95);
        assert_eq!(rule.expression(), "rate >= 0.95");

        let rule = ThresholdRule::parse("iterations", "count!=0").expect("valid rule");
        assert_eq!(rule.comparison, Comparison::Ne);
    }

    #[test]
    fn test_parse_rejects_malformed_expressions() {
        for expression in ["p(95)", "p(101)<5", "mean<5", "rate<abc", "<5", "rate<"] {
            assert!(
                matches!(
                    ThresholdRule::parse("m", expression),
                    Err(Error::InvalidExpression { .. })
                ),
                "{expression} should be rejected"
            );
        }
    }

    #[test]
    fn test_evaluate_reports_observed_values_in_rule_order() {
        let registry = registry_with_latencies();
        let rules = vec![
            ThresholdRule::parse(builtin::HTTP_REQ_DURATION, "p(95)<500").expect("rule"),
            ThresholdRule::parse(builtin::HTTP_REQ_FAILED, "rate<0.05").expect("rule"),
            ThresholdRule::parse(builtin::HTTP_REQ_DURATION, "med<=300").expect("rule"),
        ];

        let results = evaluate(&rules, &registry.snapshot()).expect("evaluate");
        assert_eq!(results.len(), 3);

        // rank 3.8 -> midpoint of 400 and 900
        assert!(!results[0].passed);
        assert_eq!(results[0].observed, 650.0);

        assert!(!results[1].passed);
        assert_eq!(results[1].observed, 0.25);

        assert!(results[2].passed);
        assert_eq!(results[2].observed, 300.0);
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let registry = registry_with_latencies();
        let rules = vec![
            ThresholdRule::parse(builtin::HTTP_REQ_DURATION, "avg<500").expect("rule"),
            ThresholdRule::parse(builtin::HTTP_REQ_FAILED, "rate<0.5").expect("rule"),
        ];
        let snapshot = registry.snapshot();

        let first = evaluate(&rules, &snapshot).expect("evaluate");
        let second = evaluate(&rules, &snapshot).expect("evaluate");
        assert_eq!(first, second);
    }

    #[test]
    fn test_unknown_metric_is_rejected() {
        let registry = MetricsRegistry::with_builtin_metrics();
        let rules = vec![ThresholdRule::parse("no_such_metric", "rate<0.1").expect("rule")];

        assert!(matches!(
            validate(&rules, &registry),
            Err(Error::UnknownMetric { .. })
        ));
        assert!(matches!(
            evaluate(&rules, &registry.snapshot()),
            Err(Error::UnknownMetric { .. })
        ));
    }

    #[test]
    fn test_aggregation_must_match_metric_kind() {
        let registry = MetricsRegistry::new();
        registry
            .register("orders", MetricKind::Counter)
            .expect("register");

        let rule = ThresholdRule::parse("orders", "p(99)<10").expect("rule");
        assert!(matches!(
            rule.validate(&registry),
            Err(Error::UnsupportedAggregation { .. })
        ));

        let rule = ThresholdRule::parse("orders", "count>=0").expect("rule");
        rule.validate(&registry).expect("count applies to counters");
    }
}
