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

use anyhow::Context;
use load_framework::{LoadTest, LoadTestConfig};

use super::{EXIT_FAIL, EXIT_PASS};
use crate::args::RunArgs;

pub(crate) async fn run(args: &RunArgs) -> anyhow::Result<u8> {
    let config = LoadTestConfig::from_file(&args.common.config)?;
    let running = LoadTest::from_config(&config)?.start().await?;

    let stop = running.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received Ctrl-C, stopping the load test");
            stop.cancel();
        }
    });

    let completed = running.wait().await?;
    let report = completed.report();

    if args.json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{report}");
    }

    if let Some(output) = &args.output {
        std::fs::write(output, serde_json::to_vec_pretty(report)?)
            .with_context(|| format!("Failed to write the report to {}", output.display()))?;
    }

    Ok(if report.verdict.is_pass() {
        EXIT_PASS
    } else {
        EXIT_FAIL
    })
}
