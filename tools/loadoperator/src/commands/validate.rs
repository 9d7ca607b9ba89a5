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

use load_framework::LoadTestConfig;

use super::EXIT_PASS;
use crate::args::ConfigArgs;

pub(crate) fn validate(args: &ConfigArgs) -> anyhow::Result<u8> {
    let config = LoadTestConfig::from_file(&args.config)?;
    config.validate()?;

    println!(
        "Configuration '{}' is valid: {} targets, {} scenarios, {} thresholds",
        config.name,
        config.targets.len(),
        config.scenarios.len(),
        config.thresholds.values().map(Vec::len).sum::<usize>()
    );

    Ok(EXIT_PASS)
}
