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

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    diagnostics::{DiagnosticSink, FailureRecord},
    metrics::{builtin, MetricsRegistry, Sample},
    probe::{HttpProbe, ProbeResult, Target},
    utils::{cancellable_sleep, uniform_duration},
};

/// Pause between iterations, drawn uniformly from `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkTime {
    pub min: Duration,
    pub max: Duration,
}

impl ThinkTime {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn sample(&self) -> Duration {
        uniform_duration(self.min, self.max)
    }
}

impl Default for ThinkTime {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(4))
    }
}

/// Everything a virtual user shares with the rest of the load test.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub probe: HttpProbe,
    pub targets: Arc<[Target]>,
    pub registry: Arc<MetricsRegistry>,
    pub sink: Arc<dyn DiagnosticSink>,
    /// Requests slower than this count against `success_rate`.
    pub sla: Duration,
    pub think_time: ThinkTime,
}

pub(crate) struct VirtualUser {
    id: u64,
    scenario: Arc<str>,
    context: Arc<UserContext>,
}

impl VirtualUser {
    pub fn new(id: u64, scenario: Arc<str>, context: Arc<UserContext>) -> Self {
        Self {
            id,
            scenario,
            context,
        }
    }

    /// Spawns the iteration loop. The handle resolves to the number of completed iterations.
    pub fn start(self, token: CancellationToken) -> JoinHandle<u64> {
        tokio::spawn(self.run(token))
    }

    pub async fn run(self, token: CancellationToken) -> u64 {
        let mut iterations = 0;

        // cancellation is only observed between iterations and during think time
        while !token.is_cancelled() {
            for target in self.context.targets.iter() {
                let result = self.context.probe.probe(target).await;
                self.record(&result);
            }

            iterations += 1;
            self.add(builtin::ITERATIONS, 1_u64);

            if !cancellable_sleep(self.context.think_time.sample(), &token).await {
                break;
            }
        }

        tracing::trace!(
            scenario = %self.scenario,
            virtual_user = self.id,
            "Virtual user stopped after {iterations} iterations"
        );
        iterations
    }

    fn record(&self, result: &ProbeResult) {
        let http_success = result.is_http_success();
        let success = http_success && result.duration < self.context.sla;

        self.add(builtin::HTTP_REQS, 1_u64);
        self.add(builtin::HTTP_REQ_DURATION, result.duration);
        self.add(builtin::LATENCY_TREND, result.duration);
        self.add(builtin::HTTP_REQ_FAILED, !http_success);
        self.add(builtin::SUCCESS_RATE, success);

        if !success {
            self.add(builtin::ERROR_COUNTER, 1_u64);
            self.context
                .sink
                .record(FailureRecord::from_probe(&self.scenario, result));
        }
    }

    fn add(&self, name: &str, sample: impl Into<Sample>) {
        if let Err(e) = self.context.registry.add(name, sample) {
            tracing::error!(
                scenario = %self.scenario,
                virtual_user = self.id,
                "Failed to record sample: {e}"
            );
        }
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::expect_used)]

    use std::{sync::Arc, time::Duration};

    use reqwest::Url;
    use tokio_util::sync::CancellationToken;
    use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

    use super::{ThinkTime, UserContext, VirtualUser};
    use crate::{
        diagnostics::{ChannelSink, FailureCause, TracingSink},
        metrics::{builtin, MetricsRegistry},
        probe::{HttpProbe, Target},
    };

    async fn server_responding(template: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(template)
            .mount(&server)
            .await;
        server
    }

    fn context(server: &MockServer, paths: &[&str], sink: Arc<ChannelSink>) -> Arc<UserContext> {
        let targets = paths
            .iter()
            .map(|p| Target::get(Url::parse(&format!("{}{p}", server.uri())).expect("valid url")))
            .collect::<Vec<_>>();

        Arc::new(UserContext {
            probe: HttpProbe::new(Duration::from_secs(5)).expect("client builds"),
            targets: targets.into(),
            registry: Arc::new(MetricsRegistry::with_builtin_metrics()),
            sink,
            sla: Duration::from_millis(500),
            think_time: ThinkTime::new(Duration::from_millis(5), Duration::from_millis(10)),
        })
    }

    #[tokio::test]
    async fn test_every_iteration_visits_each_target() {
        let server = server_responding(ResponseTemplate::new(200)).await;
        let (sink, _rx) = ChannelSink::channel();
        let context = context(&server, &["/", "/posts", "/about"], Arc::new(sink));

        let token = CancellationToken::new();
        let handle = VirtualUser::new(0, "smoke".into(), Arc::clone(&context)).start(token.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();

        let iterations = handle.await.expect("virtual user should not panic");
        assert!(iterations > 0);

        let snapshot = context.registry.snapshot();
        #[allow(clippy::cast_precision_loss)]
        let (iterations, requests) = (iterations as f64, (iterations * 3) as f64);
        assert_eq!(snapshot.counter(builtin::ITERATIONS), Some(iterations));
        assert_eq!(snapshot.counter(builtin::HTTP_REQS), Some(requests));
        assert_eq!(snapshot.rate(builtin::SUCCESS_RATE), Some(1.0));
        assert_eq!(snapshot.rate(builtin::HTTP_REQ_FAILED), Some(0.0));
        assert_eq!(snapshot.counter(builtin::ERROR_COUNTER), Some(0.0));
    }

    #[tokio::test]
    async fn test_failed_requests_reach_the_sink() {
        let server =
            server_responding(ResponseTemplate::new(500).set_body_string("database down")).await;
        let (sink, mut rx) = ChannelSink::channel();
        let context = context(&server, &["/"], Arc::new(sink));

        let token = CancellationToken::new();
        let handle = VirtualUser::new(7, "errors".into(), Arc::clone(&context)).start(token.clone());
        let record = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("a failure should be recorded")
            .expect("sink stays open");
        token.cancel();
        handle.await.expect("virtual user should not panic");

        assert_eq!(record.scenario, "errors");
        assert_eq!(record.cause, FailureCause::Status(500));
        assert_eq!(record.body_excerpt, "database down");

        let snapshot = context.registry.snapshot();
        assert!(snapshot.counter(builtin::ERROR_COUNTER).unwrap_or_default() >= 1.0);
        assert_eq!(snapshot.rate(builtin::HTTP_REQ_FAILED), Some(1.0));
        assert_eq!(snapshot.rate(builtin::SUCCESS_RATE), Some(0.0));
    }

    #[tokio::test]
    async fn test_pre_cancelled_user_sends_nothing() {
        let server = server_responding(ResponseTemplate::new(200)).await;
        let context = context(&server, &["/"], Arc::new(ChannelSink::channel().0));

        let token = CancellationToken::new();
        token.cancel();
        let iterations = VirtualUser::new(0, "idle".into(), Arc::clone(&context))
            .run(token)
            .await;

        assert_eq!(iterations, 0);
        assert_eq!(context.registry.snapshot().counter(builtin::HTTP_REQS), Some(0.0));
    }

    #[tokio::test]
    async fn test_slow_success_counts_against_sla_only() {
        let server =
            server_responding(ResponseTemplate::new(200).set_delay(Duration::from_millis(50)))
                .await;
        let base = context(&server, &["/"], Arc::new(ChannelSink::channel().0));
        let context = Arc::new(UserContext {
            sla: Duration::from_millis(10),
            sink: Arc::new(TracingSink),
            ..(*base).clone()
        });

        // cancelled while the request is in flight, the iteration still completes
        let token = CancellationToken::new();
        let handle = VirtualUser::new(1, "sla".into(), Arc::clone(&context)).start(token.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        let iterations = handle.await.expect("virtual user should not panic");
        assert_eq!(iterations, 1);

        let snapshot = context.registry.snapshot();
        assert_eq!(snapshot.counter(builtin::HTTP_REQS), Some(1.0));
        assert_eq!(snapshot.rate(builtin::HTTP_REQ_FAILED), Some(0.0));
        assert_eq!(snapshot.rate(builtin::SUCCESS_RATE), Some(0.0));
        assert_eq!(snapshot.counter(builtin::ERROR_COUNTER), Some(1.0));
    }
}
