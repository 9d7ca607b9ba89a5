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

#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod diagnostics;
pub mod loadtest;
pub mod metrics;
pub mod probe;
pub mod report;
pub mod scenario;
pub mod thresholds;
pub mod utils;

pub use config::LoadTestConfig;
pub use loadtest::{run, LoadTest};
pub use report::{Report, Verdict, Warning};
pub use serde_yaml;
