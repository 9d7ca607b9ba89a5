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

use rand::Rng;
use std::{future::Future, time::Duration};
use tokio_util::sync::CancellationToken;

pub async fn wait_until_true<F, Fut>(max_wait: Duration, mut f: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();

    while start.elapsed() < max_wait {
        if f().await {
            return true;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}

/// Sleeps for `duration` unless `token` is cancelled first.
///
/// Returns `true` if the full duration elapsed, `false` if the sleep was cut short.
pub async fn cancellable_sleep(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        () = token.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

/// A uniformly distributed duration in `[min, max]`.
pub(crate) fn uniform_duration(min: Duration, max: Duration) -> Duration {
    if min >= max {
        return min;
    }

    rand::thread_rng().gen_range(min..=max)
}
