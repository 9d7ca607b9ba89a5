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

use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
    time::Duration,
};

use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt, Snafu};

use crate::{
    metrics::MetricsRegistry,
    probe::Target,
    scenario::{Executor, ScenarioProfile, Stage, ThinkTime},
    thresholds::{self, ThresholdRule},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to read the load test configuration from {}: {source}", path.display()))]
    FailedToRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse the load test configuration: {source}"))]
    FailedToParse { source: serde_yaml::Error },

    #[snafu(display("No targets are configured.\nAdd at least one entry to 'targets'."))]
    NoTargets,

    #[snafu(display("Target URL '{url}' is invalid: {reason}"))]
    InvalidTarget { url: String, reason: String },

    #[snafu(display("HTTP method '{method}' for target '{url}' is invalid."))]
    InvalidMethod { url: String, method: String },

    #[snafu(display("No scenarios are configured.\nAdd at least one entry to 'scenarios'."))]
    NoScenarios,

    #[snafu(display(
        "Scenario '{name}' is defined more than once.\nScenario names must be unique."
    ))]
    DuplicateScenario { name: String },

    #[snafu(display(
        "Invalid duration '{value}' for '{field}': {reason}\nUse a duration such as '500ms', '30s' or '1m'."
    ))]
    InvalidDuration {
        field: String,
        value: String,
        reason: String,
    },

    #[snafu(display("Think time minimum {min:?} is greater than its maximum {max:?}."))]
    InvalidThinkTime { min: Duration, max: Duration },

    #[snafu(display("The tick interval must be greater than zero."))]
    InvalidTickInterval,

    #[snafu(display("{source}"))]
    InvalidThreshold { source: thresholds::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A load test as described by its YAML configuration.
///
/// Durations are kept as written and parsed on access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadTestConfig {
    pub name: String,

    pub targets: Vec<TargetConfig>,

    pub scenarios: Vec<ScenarioConfig>,

    /// Metric name to the threshold expressions evaluated against it.
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<String>>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    /// Requests slower than this count against `success_rate`.
    #[serde(default = "default_sla")]
    pub sla: String,

    #[serde(default)]
    pub think_time: ThinkTimeConfig,

    #[serde(default = "default_tick_interval")]
    pub tick_interval: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_budget: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    pub name: String,

    pub executor: ExecutorConfig,

    #[serde(default = "default_start_time")]
    pub start_time: String,

    #[serde(default = "default_graceful_stop")]
    pub graceful_stop: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExecutorConfig {
    ConstantVus {
        vus: usize,
        duration: String,
    },
    RampingVus {
        #[serde(default)]
        start_vus: usize,
        stages: Vec<StageConfig>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub duration: String,
    pub target: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThinkTimeConfig {
    pub min: String,
    pub max: String,
}

impl Default for ThinkTimeConfig {
    fn default() -> Self {
        Self {
            min: "1s".to_string(),
            max: "4s".to_string(),
        }
    }
}

fn default_request_timeout() -> String {
    "60s".to_string()
}

fn default_sla() -> String {
    "500ms".to_string()
}

fn default_tick_interval() -> String {
    "1s".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_start_time() -> String {
    "0s".to_string()
}

fn default_graceful_stop() -> String {
    "30s".to_string()
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    fundu::parse_duration(value).map_err(|e| Error::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

impl LoadTestConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context(FailedToParseSnafu)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).context(FailedToReadSnafu { path })?;
        Self::from_yaml(&yaml)
    }

    /// Checks every section of the configuration without starting anything.
    ///
    /// Thresholds are checked against the built-in metrics, the only ones a configuration can reference.
    pub fn validate(&self) -> Result<()> {
        self.targets()?;
        self.scenarios()?;
        let rules = self.threshold_rules()?;
        thresholds::validate(&rules, &MetricsRegistry::with_builtin_metrics())
            .context(InvalidThresholdSnafu)?;
        self.request_timeout()?;
        self.sla()?;
        self.think_time()?;
        self.tick_interval()?;
        self.total_budget()?;
        Ok(())
    }

    pub fn targets(&self) -> Result<Vec<Target>> {
        ensure!(!self.targets.is_empty(), NoTargetsSnafu);
        self.targets.iter().map(TargetConfig::to_target).collect()
    }

    pub fn scenarios(&self) -> Result<Vec<ScenarioProfile>> {
        ensure!(!self.scenarios.is_empty(), NoScenariosSnafu);

        let mut names = HashSet::new();
        for scenario in &self.scenarios {
            ensure!(
                names.insert(scenario.name.as_str()),
                DuplicateScenarioSnafu {
                    name: scenario.name.clone()
                }
            );
        }

        self.scenarios
            .iter()
            .map(ScenarioConfig::to_profile)
            .collect()
    }

    /// Threshold rules ordered by metric name, then by their order in the configuration.
    pub fn threshold_rules(&self) -> Result<Vec<ThresholdRule>> {
        self.thresholds
            .iter()
            .flat_map(|(metric, expressions)| {
                expressions
                    .iter()
                    .map(move |expression| ThresholdRule::parse(metric.as_str(), expression))
            })
            .collect::<Result<Vec<_>, _>>()
            .context(InvalidThresholdSnafu)
    }

    pub fn request_timeout(&self) -> Result<Duration> {
        parse_duration("request_timeout", &self.request_timeout)
    }

    pub fn sla(&self) -> Result<Duration> {
        parse_duration("sla", &self.sla)
    }

    pub fn think_time(&self) -> Result<ThinkTime> {
        let min = parse_duration("think_time.min", &self.think_time.min)?;
        let max = parse_duration("think_time.max", &self.think_time.max)?;
        ensure!(min <= max, InvalidThinkTimeSnafu { min, max });
        Ok(ThinkTime::new(min, max))
    }

    pub fn tick_interval(&self) -> Result<Duration> {
        let interval = parse_duration("tick_interval", &self.tick_interval)?;
        ensure!(!interval.is_zero(), InvalidTickIntervalSnafu);
        Ok(interval)
    }

    pub fn total_budget(&self) -> Result<Option<Duration>> {
        self.total_budget
            .as_deref()
            .map(|budget| parse_duration("total_budget", budget))
            .transpose()
    }
}

impl TargetConfig {
    fn to_target(&self) -> Result<Target> {
        let url = Url::parse(&self.url).map_err(|e| Error::InvalidTarget {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        ensure!(
            matches!(url.scheme(), "http" | "https"),
            InvalidTargetSnafu {
                url: self.url.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            }
        );

        let method = Method::from_bytes(self.method.to_uppercase().as_bytes()).map_err(|_| {
            Error::InvalidMethod {
                url: self.url.clone(),
                method: self.method.clone(),
            }
        })?;

        let target = Target::get(url).with_method(method);
        Ok(match &self.body {
            Some(body) => target.with_body(body.as_str()),
            None => target,
        })
    }
}

impl ScenarioConfig {
    fn to_profile(&self) -> Result<ScenarioProfile> {
        let field = |name: &str| format!("scenarios.{}.{name}", self.name);

        let executor = match &self.executor {
            ExecutorConfig::ConstantVus { vus, duration } => Executor::Constant {
                vus: *vus,
                duration: parse_duration(&field("executor.duration"), duration)?,
            },
            ExecutorConfig::RampingVus { start_vus, stages } => Executor::Ramping {
                start_vus: *start_vus,
                stages: stages
                    .iter()
                    .map(|stage| -> Result<Stage> {
                        Ok(Stage::new(
                            parse_duration(&field("executor.stages.duration"), &stage.duration)?,
                            stage.target,
                        ))
                    })
                    .collect::<Result<Vec<_>>>()?,
            },
        };

        Ok(ScenarioProfile::new(self.name.as_str(), executor)
            .with_start_offset(parse_duration(&field("start_time"), &self.start_time)?)
            .with_graceful_stop(parse_duration(&field("graceful_stop"), &self.graceful_stop)?))
    }
}
