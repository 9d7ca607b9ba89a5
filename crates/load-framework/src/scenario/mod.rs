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

use std::{fmt::Display, sync::Arc, time::Duration};

mod scheduler;
mod worker;

pub use scheduler::{ScenarioScheduler, ScenarioState};
pub use worker::{ThinkTime, UserContext};

pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

/// A segment of a ramping timeline. The population moves linearly towards `target` over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    #[must_use]
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

/// How a scenario's virtual user population evolves over its own timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Executor {
    /// A fixed number of virtual users for a fixed duration.
    Constant { vus: usize, duration: Duration },
    /// A piecewise-linear population, starting at `start_vus`.
    Ramping { start_vus: usize, stages: Vec<Stage> },
}

impl Executor {
    #[must_use]
    pub fn total_duration(&self) -> Duration {
        match self {
            Executor::Constant { duration, .. } => *duration,
            Executor::Ramping { stages, .. } => stages.iter().map(|s| s.duration).sum(),
        }
    }

    /// The desired number of virtual users `elapsed` into the scenario.
    ///
    /// Past the end of the last stage the final target holds.
    #[must_use]
    pub fn target_at(&self, elapsed: Duration) -> usize {
        match self {
            Executor::Constant { vus, .. } => *vus,
            Executor::Ramping { start_vus, stages } => {
                let mut from = *start_vus;
                let mut stage_start = Duration::ZERO;
                for stage in stages {
                    let stage_end = stage_start + stage.duration;
                    if elapsed < stage_end {
                        let progress = (elapsed - stage_start).as_secs_f64()
                            / stage.duration.as_secs_f64();
                        return interpolate(from, stage.target, progress);
                    }
                    from = stage.target;
                    stage_start = stage_end;
                }
                from
            }
        }
    }

    #[must_use]
    pub fn max_target(&self) -> usize {
        match self {
            Executor::Constant { vus, .. } => *vus,
            Executor::Ramping { start_vus, stages } => stages
                .iter()
                .map(|s| s.target)
                .fold(*start_vus, usize::max),
        }
    }
}

impl Display for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Executor::Constant { .. } => write!(f, "constant-vus"),
            Executor::Ramping { .. } => write!(f, "ramping-vus"),
        }
    }
}

fn interpolate(from: usize, to: usize, progress: f64) -> usize {
    // safety: populations are small, and the result lies between `from` and `to`
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let target = {
        let (from, to) = (from as f64, to as f64);
        (from + (to - from) * progress.clamp(0.0, 1.0)).round() as usize
    };
    target
}

/// A named load profile with its own population timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioProfile {
    pub name: Arc<str>,
    pub executor: Executor,
    /// Offset from the start of the test at which the scenario begins.
    pub start_offset: Duration,
    /// How long cancelled virtual users may take to finish their iteration before being aborted.
    pub graceful_stop: Duration,
}

impl ScenarioProfile {
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, executor: Executor) -> Self {
        Self {
            name: name.into(),
            executor,
            start_offset: Duration::ZERO,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
        }
    }

    #[must_use]
    pub fn constant(name: impl Into<Arc<str>>, vus: usize, duration: Duration) -> Self {
        Self::new(name, Executor::Constant { vus, duration })
    }

    #[must_use]
    pub fn ramping(name: impl Into<Arc<str>>, start_vus: usize, stages: Vec<Stage>) -> Self {
        Self::new(name, Executor::Ramping { start_vus, stages })
    }

    #[must_use]
    pub fn with_start_offset(mut self, start_offset: Duration) -> Self {
        self.start_offset = start_offset;
        self
    }

    #[must_use]
    pub fn with_graceful_stop(mut self, graceful_stop: Duration) -> Self {
        self.graceful_stop = graceful_stop;
        self
    }

    /// Offset from the start of the test at which the scenario stops scheduling users.
    #[must_use]
    pub fn end_offset(&self) -> Duration {
        self.start_offset + self.executor.total_duration()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{Executor, ScenarioProfile, Stage};

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_single_stage_ramp_interpolates_linearly() {
        let executor = Executor::Ramping {
            start_vus: 0,
            stages: vec![Stage::new(secs(10), 100)],
        };

        assert_eq!(executor.target_at(secs(0)), 0);
        assert_eq!(executor.target_at(secs(5)), 50);
        assert_eq!(executor.target_at(secs(10)), 100);
        assert_eq!(executor.target_at(Duration::from_millis(2_504)), 25);
    }

    #[test]
    fn test_multi_stage_ramp_up_hold_down() {
        let executor = Executor::Ramping {
            start_vus: 0,
            stages: vec![
                Stage::new(secs(30), 100),
                Stage::new(secs(60), 100),
                Stage::new(secs(30), 0),
            ],
        };

        assert_eq!(executor.total_duration(), secs(120));
        assert_eq!(executor.max_target(), 100);
        assert_eq!(executor.target_at(secs(15)), 50);
        assert_eq!(executor.target_at(secs(30)), 100);
        assert_eq!(executor.target_at(secs(75)), 100);
        assert_eq!(executor.target_at(secs(105)), 50);
        assert_eq!(executor.target_at(secs(120)), 0);
    }

    #[test]
    fn test_zero_duration_stage_jumps_to_target() {
        let executor = Executor::Ramping {
            start_vus: 5,
            stages: vec![Stage::new(Duration::ZERO, 20), Stage::new(secs(10), 0)],
        };

        assert_eq!(executor.target_at(secs(0)), 20);
        assert_eq!(executor.target_at(secs(5)), 10);
    }

    #[test]
    fn test_constant_executor_holds_flat_target() {
        let profile =
            ScenarioProfile::constant("constant_load", 50, secs(60)).with_start_offset(secs(5));

        assert_eq!(profile.executor.target_at(secs(0)), 50);
        assert_eq!(profile.executor.target_at(secs(59)), 50);
        assert_eq!(profile.end_offset(), secs(65));
        assert_eq!(profile.executor.to_string(), "constant-vus");
    }
}
