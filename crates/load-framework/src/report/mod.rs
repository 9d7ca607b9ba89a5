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

use std::{fmt::Display, time::Duration, time::SystemTime};

use serde::Serialize;
use uuid::Uuid;

use crate::{
    metrics::{MetricSnapshot, MetricsSnapshot},
    thresholds::ThresholdResult,
};

/// Non-fatal conditions observed while a load test ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// The test exceeded its total budget and every scenario was drained early.
    SoftTimeout { budget: Duration },
    /// The test was stopped before its scenarios completed.
    Interrupted,
    /// A virtual user did not finish its iteration within the graceful stop period and was aborted.
    ForcedTermination { scenario: String, virtual_user: u64 },
}

impl Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::SoftTimeout { budget } => {
                write!(f, "Load test exceeded its budget of {budget:?}")
            }
            Warning::Interrupted => write!(f, "Load test was interrupted"),
            Warning::ForcedTermination {
                scenario,
                virtual_user,
            } => write!(
                f,
                "Virtual user {virtual_user} of scenario '{scenario}' was forcibly terminated"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    /// Lists each failing threshold as `metric: expression`.
    Fail { failing: Vec<String> },
}

impl Verdict {
    #[must_use]
    pub fn from_results(results: &[ThresholdResult]) -> Self {
        let failing = results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| format!("{}: {}", r.metric, r.expression))
            .collect::<Vec<_>>();

        if failing.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Fail { failing }
        }
    }

    #[must_use]
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail { failing } => write!(f, "FAIL ({} thresholds)", failing.len()),
        }
    }
}

/// The outcome of a completed load test.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub run_id: Uuid,
    pub name: String,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
    pub duration: Duration,
    pub verdict: Verdict,
    pub thresholds: Vec<ThresholdResult>,
    pub metrics: MetricsSnapshot,
    pub warnings: Vec<Warning>,
}

impl Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Load test '{}' ({}) finished in {:?}: {}",
            self.name, self.run_id, self.duration, self.verdict
        )?;

        for (name, metric) in self.metrics.iter() {
            match metric {
                MetricSnapshot::Counter { value, .. } => writeln!(f, "  {name}: {value}")?,
                MetricSnapshot::Rate {
                    rate,
                    passes,
                    total,
                } => writeln!(f, "  {name}: {:.2}% ({passes}/{total})", rate * 100.0)?,
                MetricSnapshot::Trend(t) => writeln!(
                    f,
                    "  {name}: avg={:.2} min={:.2} med={:.2} max={:.2} p(90)={:.2} p(95)={:.2}",
                    t.avg, t.min, t.med, t.max, t.p90, t.p95
                )?,
            }
        }

        for result in &self.thresholds {
            writeln!(f, "  {result}")?;
        }

        for warning in &self.warnings {
            writeln!(f, "  WARN {warning}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::expect_used)]

    use serde_json::json;

    use super::{Verdict, Warning};
    use crate::thresholds::ThresholdResult;

    fn result(metric: &str, expression: &str, passed: bool) -> ThresholdResult {
        ThresholdResult {
            metric: metric.to_string(),
            expression: expression.to_string(),
            passed,
            observed: 0.0,
        }
    }

    #[test]
    fn test_verdict_lists_failing_thresholds_in_order() {
        let results = vec![
            result("http_req_duration", "p(95)<500", false),
            result("http_req_failed", "rate<0.05", true),
            result("success_rate", "rate>0.95", false),
        ];

        assert_eq!(
            Verdict::from_results(&results),
            Verdict::Fail {
                failing: vec![
                    "http_req_duration: p(95)<500".to_string(),
                    "success_rate: rate>0.95".to_string()
                ]
            }
        );
    }

    #[test]
    fn test_no_thresholds_is_a_pass() {
        assert!(Verdict::from_results(&[]).is_pass());
    }

    #[test]
    fn test_verdict_and_warnings_serialize_tagged() {
        let verdict = Verdict::Fail {
            failing: vec!["http_req_failed: rate<0.05".to_string()],
        };
        assert_eq!(
            serde_json::to_value(&verdict).expect("serializes"),
            json!({ "status": "fail", "failing": ["http_req_failed: rate<0.05"] })
        );

        let warning = Warning::ForcedTermination {
            scenario: "spike".to_string(),
            virtual_user: 12,
        };
        assert_eq!(
            serde_json::to_value(&warning).expect("serializes"),
            json!({ "kind": "forced_termination", "scenario": "spike", "virtual_user": 12 })
        );
        assert_eq!(
            serde_json::to_value(Warning::Interrupted).expect("serializes"),
            json!({ "kind": "interrupted" })
        );
    }
}
