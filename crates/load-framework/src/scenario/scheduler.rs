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

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    worker::{UserContext, VirtualUser},
    ScenarioProfile,
};
use crate::report::Warning;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    /// Waiting for the scenario's start offset.
    Pending,
    /// Following the executor's population timeline.
    Running,
    /// All virtual users are cancelled, waiting for them to stop.
    Draining,
    Done,
}

impl Display for ScenarioState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioState::Pending => write!(f, "pending"),
            ScenarioState::Running => write!(f, "running"),
            ScenarioState::Draining => write!(f, "draining"),
            ScenarioState::Done => write!(f, "done"),
        }
    }
}

struct UserHandle {
    id: u64,
    token: CancellationToken,
    handle: JoinHandle<u64>,
}

struct RetiringUser {
    user: UserHandle,
    deadline: Duration,
}

/// Drives the virtual user population of a single scenario.
///
/// The scheduler is advanced by [`ScenarioScheduler::tick`] with the time elapsed since the
/// start of the load test. Users are retired newest first, and a retired user that does not
/// stop within the scenario's graceful stop period is aborted.
pub struct ScenarioScheduler {
    profile: ScenarioProfile,
    context: Arc<UserContext>,
    state: ScenarioState,
    // oldest first
    active: Vec<UserHandle>,
    retiring: Vec<RetiringUser>,
    next_user_id: u64,
    warnings: Vec<Warning>,
}

impl ScenarioScheduler {
    #[must_use]
    pub fn new(profile: ScenarioProfile, context: Arc<UserContext>) -> Self {
        Self {
            profile,
            context,
            state: ScenarioState::Pending,
            active: Vec::new(),
            retiring: Vec::new(),
            next_user_id: 0,
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.profile.name
    }

    #[must_use]
    pub fn state(&self) -> ScenarioState {
        self.state
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == ScenarioState::Done
    }

    /// Users that have not been asked to stop.
    #[must_use]
    pub fn running_users(&self) -> usize {
        self.active.len()
    }

    /// Users whose task is still alive, including cancelled ones finishing their iteration.
    #[must_use]
    pub fn live_users(&self) -> usize {
        self.active.len() + self.retiring.len()
    }

    pub fn tick(&mut self, elapsed: Duration) {
        if self.state == ScenarioState::Pending && elapsed >= self.profile.start_offset {
            tracing::info!(
                scenario = %self.profile.name,
                "Starting scenario with {} executor",
                self.profile.executor
            );
            self.state = ScenarioState::Running;
        }

        if self.state == ScenarioState::Running {
            let scenario_time = elapsed.saturating_sub(self.profile.start_offset);
            if scenario_time >= self.profile.executor.total_duration() {
                self.begin_drain(elapsed);
            } else {
                let target = self.profile.executor.target_at(scenario_time);
                self.reconcile(target, elapsed);
            }
        }

        self.reap(elapsed);

        if self.state == ScenarioState::Draining && self.live_users() == 0 {
            tracing::info!(scenario = %self.profile.name, "Scenario finished");
            self.state = ScenarioState::Done;
        }
    }

    /// Cancels every user regardless of the executor's timeline.
    pub fn force_drain(&mut self, elapsed: Duration) {
        if matches!(self.state, ScenarioState::Pending | ScenarioState::Running) {
            self.begin_drain(elapsed);
        }
    }

    /// Warnings raised since the last call.
    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    fn begin_drain(&mut self, elapsed: Duration) {
        tracing::info!(
            scenario = %self.profile.name,
            "Draining {} virtual users",
            self.active.len()
        );
        while let Some(user) = self.active.pop() {
            self.retire(user, elapsed);
        }
        self.state = ScenarioState::Draining;
    }

    fn reconcile(&mut self, target: usize, elapsed: Duration) {
        let current = self.active.len();
        if current == target {
            return;
        }

        tracing::debug!(
            scenario = %self.profile.name,
            "Adjusting virtual users from {current} to {target}"
        );

        while self.active.len() < target {
            self.spawn();
        }

        while self.active.len() > target {
            if let Some(user) = self.active.pop() {
                self.retire(user, elapsed);
            }
        }
    }

    fn spawn(&mut self) {
        let id = self.next_user_id;
        self.next_user_id += 1;

        let token = CancellationToken::new();
        let handle = VirtualUser::new(
            id,
            Arc::clone(&self.profile.name),
            Arc::clone(&self.context),
        )
        .start(token.clone());

        self.active.push(UserHandle { id, token, handle });
    }

    fn retire(&mut self, user: UserHandle, elapsed: Duration) {
        user.token.cancel();
        self.retiring.push(RetiringUser {
            user,
            deadline: elapsed + self.profile.graceful_stop,
        });
    }

    fn reap(&mut self, elapsed: Duration) {
        let name = &self.profile.name;

        self.active.retain(|user| {
            if user.handle.is_finished() {
                tracing::warn!(
                    scenario = %name,
                    virtual_user = user.id,
                    "Virtual user exited without being cancelled"
                );
                false
            } else {
                true
            }
        });

        let warnings = &mut self.warnings;
        self.retiring.retain(|retiring| {
            if retiring.user.handle.is_finished() {
                return false;
            }

            if elapsed >= retiring.deadline {
                tracing::warn!(
                    scenario = %name,
                    virtual_user = retiring.user.id,
                    "Virtual user did not stop within the graceful stop period, aborting"
                );
                retiring.user.handle.abort();
                warnings.push(Warning::ForcedTermination {
                    scenario: name.to_string(),
                    virtual_user: retiring.user.id,
                });
                return false;
            }

            true
        });
    }
}

impl Drop for ScenarioScheduler {
    fn drop(&mut self) {
        for user in &self.active {
            user.token.cancel();
            user.handle.abort();
        }
        for retiring in &self.retiring {
            retiring.user.handle.abort();
        }
    }
}
