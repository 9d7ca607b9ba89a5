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

use std::{fmt::Display, time::SystemTime};

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::probe::ProbeResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    Status(u16),
    Transport(String),
}

impl Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::Status(status) => write!(f, "{status}"),
            FailureCause::Transport(error) => write!(f, "{error}"),
        }
    }
}

/// A request that failed its success check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub scenario: String,
    pub url: String,
    pub cause: FailureCause,
    pub body_excerpt: String,
    pub timestamp: SystemTime,
}

impl FailureRecord {
    #[must_use]
    pub fn from_probe(scenario: &str, result: &ProbeResult) -> Self {
        let (cause, body_excerpt) = match &result.outcome {
            Ok(response) => (
                FailureCause::Status(response.status),
                response.body_excerpt.clone(),
            ),
            Err(e) => (FailureCause::Transport(e.to_string()), String::new()),
        };

        Self {
            scenario: scenario.to_string(),
            url: result.url.clone(),
            cause,
            body_excerpt,
            timestamp: result.timestamp,
        }
    }
}

/// Append-only destination for [`FailureRecord`]s, owned outside the engine.
pub trait DiagnosticSink: Send + Sync + std::fmt::Debug {
    fn record(&self, record: FailureRecord);
}

/// Writes each record as a structured `WARN` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, record: FailureRecord) {
        tracing::warn!(
            target: "load_framework::diagnostics",
            scenario = %record.scenario,
            url = %record.url,
            cause = %record.cause,
            "Error on {}: {} - {}",
            record.url,
            record.cause,
            record.body_excerpt
        );
    }
}

/// Forwards records to an unbounded channel, for external collectors.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: UnboundedSender<FailureRecord>,
}

impl ChannelSink {
    #[must_use]
    pub fn channel() -> (Self, UnboundedReceiver<FailureRecord>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl DiagnosticSink for ChannelSink {
    fn record(&self, record: FailureRecord) {
        // a closed receiver means nobody is collecting anymore
        let _ = self.sender.send(record);
    }
}
