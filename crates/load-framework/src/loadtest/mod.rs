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
    collections::HashSet,
    sync::Arc,
    time::{Duration, SystemTime},
};

use snafu::{ensure, ResultExt, Snafu};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::{self, LoadTestConfig},
    diagnostics::{DiagnosticSink, TracingSink},
    metrics::{self, MetricKind, MetricsRegistry, MetricsSnapshot},
    probe::{HttpProbe, Target},
    report::{Report, Verdict, Warning},
    scenario::{ScenarioProfile, ScenarioScheduler, ThinkTime, UserContext},
    thresholds::{self, ThresholdRule},
};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_SLA: Duration = Duration::from_millis(500);
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{source}"))]
    InvalidConfig { source: config::Error },

    #[snafu(display("Load test '{name}' has no targets.\nAdd at least one target."))]
    NoTargets { name: String },

    #[snafu(display("Load test '{name}' has no scenarios.\nAdd at least one scenario."))]
    NoScenarios { name: String },

    #[snafu(display(
        "Scenario '{scenario}' is defined more than once.\nScenario names must be unique."
    ))]
    DuplicateScenario { scenario: String },

    #[snafu(display("The tick interval must be greater than zero."))]
    InvalidTickInterval,

    #[snafu(display("{source}"))]
    InvalidThreshold { source: thresholds::Error },

    #[snafu(display("Failed to register metric: {source}"))]
    FailedToRegisterMetric { source: metrics::Error },

    #[snafu(display("Failed to build the HTTP client: {source}"))]
    FailedToBuildClient { source: reqwest::Error },

    #[snafu(display("The load test scheduler stopped unexpectedly: {source}"))]
    SchedulerFailed { source: tokio::task::JoinError },

    #[snafu(display("Failed to evaluate thresholds: {source}"))]
    FailedToEvaluateThresholds { source: thresholds::Error },
}

impl Error {
    /// Configuration errors are raised before any virtual user starts, and no report is produced.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        !matches!(
            self,
            Error::SchedulerFailed { .. } | Error::FailedToEvaluateThresholds { .. }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub struct NotStarted {
    targets: Vec<Target>,
    scenarios: Vec<ScenarioProfile>,
}

pub struct Running {
    start_time: Instant,
    stop: CancellationToken,
    orchestrator: JoinHandle<Vec<Warning>>,
}

impl Drop for Running {
    fn drop(&mut self) {
        // no-op once the orchestrator has finished
        self.stop.cancel();
        self.orchestrator.abort();
    }
}

pub struct Completed {
    report: Report,
}

pub trait TestState {}

impl TestState for NotStarted {}
impl TestState for Running {}
impl TestState for Completed {}

/// A load test runs one or more scenarios of virtual users against a fixed set of targets,
/// then evaluates thresholds over the metrics they recorded.
pub struct LoadTest<S: TestState> {
    name: String,
    run_id: Uuid,
    started_at: SystemTime,
    request_timeout: Duration,
    sla: Duration,
    think_time: ThinkTime,
    tick_interval: Duration,
    total_budget: Option<Duration>,
    thresholds: Vec<ThresholdRule>,
    registry: Arc<MetricsRegistry>,
    sink: Arc<dyn DiagnosticSink>,

    state: S,
}

impl LoadTest<NotStarted> {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run_id: Uuid::new_v4(),
            started_at: SystemTime::now(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            sla: DEFAULT_SLA,
            think_time: ThinkTime::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            total_budget: None,
            thresholds: vec![],
            registry: Arc::new(MetricsRegistry::new()),
            sink: Arc::new(TracingSink),
            state: NotStarted {
                targets: vec![],
                scenarios: vec![],
            },
        }
    }

    pub fn from_config(config: &LoadTestConfig) -> Result<Self> {
        let test = Self::new(config.name.as_str())
            .with_targets(config.targets().context(InvalidConfigSnafu)?)
            .with_thresholds(config.threshold_rules().context(InvalidConfigSnafu)?)
            .with_request_timeout(config.request_timeout().context(InvalidConfigSnafu)?)
            .with_sla(config.sla().context(InvalidConfigSnafu)?)
            .with_think_time(config.think_time().context(InvalidConfigSnafu)?)
            .with_tick_interval(config.tick_interval().context(InvalidConfigSnafu)?);

        let test = config
            .scenarios()
            .context(InvalidConfigSnafu)?
            .into_iter()
            .fold(test, LoadTest::with_scenario);

        Ok(match config.total_budget().context(InvalidConfigSnafu)? {
            Some(budget) => test.with_total_budget(budget),
            None => test,
        })
    }

    #[must_use]
    pub fn with_target(mut self, target: Target) -> Self {
        self.state.targets.push(target);
        self
    }

    #[must_use]
    pub fn with_targets(mut self, targets: impl IntoIterator<Item = Target>) -> Self {
        self.state.targets.extend(targets);
        self
    }

    #[must_use]
    pub fn with_scenario(mut self, scenario: ScenarioProfile) -> Self {
        self.state.scenarios.push(scenario);
        self
    }

    #[must_use]
    pub fn with_threshold(mut self, rule: ThresholdRule) -> Self {
        self.thresholds.push(rule);
        self
    }

    #[must_use]
    pub fn with_thresholds(mut self, rules: impl IntoIterator<Item = ThresholdRule>) -> Self {
        self.thresholds.extend(rules);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    #[must_use]
    pub fn with_sla(mut self, sla: Duration) -> Self {
        self.sla = sla;
        self
    }

    #[must_use]
    pub fn with_think_time(mut self, think_time: ThinkTime) -> Self {
        self.think_time = think_time;
        self
    }

    #[must_use]
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    #[must_use]
    pub fn with_total_budget(mut self, total_budget: Duration) -> Self {
        self.total_budget = Some(total_budget);
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The registry virtual users record to. Custom metrics registered here before
    /// [`LoadTest::start`] can be referenced by thresholds.
    #[must_use]
    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            !self.state.targets.is_empty(),
            NoTargetsSnafu {
                name: self.name.clone()
            }
        );
        ensure!(
            !self.state.scenarios.is_empty(),
            NoScenariosSnafu {
                name: self.name.clone()
            }
        );
        ensure!(!self.tick_interval.is_zero(), InvalidTickIntervalSnafu);

        let mut names = HashSet::new();
        for scenario in &self.state.scenarios {
            ensure!(
                names.insert(&*scenario.name),
                DuplicateScenarioSnafu {
                    scenario: scenario.name.to_string()
                }
            );
        }

        Ok(())
    }

    fn register_builtin_metrics(&self) -> Result<()> {
        for (name, kind) in metrics::builtin::ALL {
            if self.registry.kind(name) != Some(*kind) {
                self.registry
                    .register(*name, *kind)
                    .context(FailedToRegisterMetricSnafu)?;
            }
        }
        Ok(())
    }

    /// Validates the test and spawns its scenarios. Nothing is sent if validation fails.
    pub async fn start(self) -> Result<LoadTest<Running>> {
        self.validate()?;
        self.register_builtin_metrics()?;
        thresholds::validate(&self.thresholds, &self.registry).context(InvalidThresholdSnafu)?;

        let probe = HttpProbe::new(self.request_timeout).context(FailedToBuildClientSnafu)?;
        let context = Arc::new(UserContext {
            probe,
            targets: self.state.targets.into(),
            registry: Arc::clone(&self.registry),
            sink: Arc::clone(&self.sink),
            sla: self.sla,
            think_time: self.think_time,
        });

        let schedulers = self
            .state
            .scenarios
            .into_iter()
            .map(|profile| ScenarioScheduler::new(profile, Arc::clone(&context)))
            .collect::<Vec<_>>();

        tracing::info!(
            run_id = %self.run_id,
            "Starting load test '{}' with {} scenarios",
            self.name,
            schedulers.len()
        );

        let stop = CancellationToken::new();
        let orchestrator = tokio::spawn(orchestrate(
            schedulers,
            self.tick_interval,
            self.total_budget,
            stop.clone(),
        ));

        Ok(LoadTest {
            name: self.name,
            run_id: self.run_id,
            started_at: SystemTime::now(),
            request_timeout: self.request_timeout,
            sla: self.sla,
            think_time: self.think_time,
            tick_interval: self.tick_interval,
            total_budget: self.total_budget,
            thresholds: self.thresholds,
            registry: self.registry,
            sink: self.sink,
            state: Running {
                start_time: Instant::now(),
                stop,
                orchestrator,
            },
        })
    }
}

impl LoadTest<Running> {
    /// Drains every scenario early. [`LoadTest::wait`] still produces a report.
    pub fn stop(&self) {
        self.state.stop.cancel();
    }

    /// A token that stops the test when cancelled, for use from signal handlers.
    #[must_use]
    pub fn stop_handle(&self) -> CancellationToken {
        self.state.stop.clone()
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.state.start_time.elapsed()
    }

    pub async fn wait(self) -> Result<LoadTest<Completed>> {
        let mut state = self.state;
        let warnings = (&mut state.orchestrator)
            .await
            .context(SchedulerFailedSnafu)?;
        let duration = state.start_time.elapsed();

        let metrics = self.registry.snapshot();
        let results = thresholds::evaluate(&self.thresholds, &metrics)
            .context(FailedToEvaluateThresholdsSnafu)?;
        let verdict = Verdict::from_results(&results);

        tracing::info!(
            run_id = %self.run_id,
            "Load test '{}' finished in {duration:?}: {verdict}",
            self.name
        );

        let report = Report {
            run_id: self.run_id,
            name: self.name.clone(),
            started_at: self.started_at,
            finished_at: SystemTime::now(),
            duration,
            verdict,
            thresholds: results,
            metrics,
            warnings,
        };

        Ok(LoadTest {
            name: self.name,
            run_id: self.run_id,
            started_at: self.started_at,
            request_timeout: self.request_timeout,
            sla: self.sla,
            think_time: self.think_time,
            tick_interval: self.tick_interval,
            total_budget: self.total_budget,
            thresholds: self.thresholds,
            registry: self.registry,
            sink: self.sink,
            state: Completed { report },
        })
    }
}

impl LoadTest<Completed> {
    #[must_use]
    pub fn report(&self) -> &Report {
        &self.state.report
    }

    #[must_use]
    pub fn metrics(&self) -> &MetricsSnapshot {
        &self.state.report.metrics
    }

    #[must_use]
    pub fn into_report(self) -> Report {
        self.state.report
    }
}

impl<S: TestState> LoadTest<S> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Kind of a registered metric, including built-in metrics once the test has started.
    #[must_use]
    pub fn metric_kind(&self, name: &str) -> Option<MetricKind> {
        self.registry.kind(name)
    }
}

impl std::fmt::Display for LoadTest<Completed> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.state.report)
    }
}

/// Builds, runs and reports a load test described by `config`.
pub async fn run(config: &LoadTestConfig) -> Result<Report> {
    Ok(LoadTest::from_config(config)?
        .start()
        .await?
        .wait()
        .await?
        .into_report())
}

async fn orchestrate(
    mut schedulers: Vec<ScenarioScheduler>,
    tick_interval: Duration,
    total_budget: Option<Duration>,
    stop: CancellationToken,
) -> Vec<Warning> {
    let start = Instant::now();
    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut warnings = vec![];
    let mut draining = false;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            () = stop.cancelled(), if !draining => {
                tracing::info!("Load test interrupted, draining all scenarios");
                warnings.push(Warning::Interrupted);
                draining = true;
                let elapsed = start.elapsed();
                schedulers.iter_mut().for_each(|s| s.force_drain(elapsed));
            }
        }

        let elapsed = start.elapsed();
        if let Some(budget) = total_budget {
            if !draining && elapsed >= budget {
                tracing::warn!("Load test exceeded its budget of {budget:?}, draining all scenarios");
                warnings.push(Warning::SoftTimeout { budget });
                draining = true;
                schedulers.iter_mut().for_each(|s| s.force_drain(elapsed));
            }
        }

        for scheduler in &mut schedulers {
            scheduler.tick(elapsed);
            warnings.extend(scheduler.take_warnings());
        }

        if schedulers.iter().all(ScenarioScheduler::is_done) {
            break;
        }
    }

    warnings
}
