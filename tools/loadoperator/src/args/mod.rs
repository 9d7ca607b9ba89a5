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

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Subcommand)]
pub enum Commands {
    // Run a load test and print its report
    Run(RunArgs),
    // Validate a load test configuration without sending any requests
    Validate(ConfigArgs),
}

/// Arguments common to all [`Commands`].
#[derive(Parser, Debug, Clone)]
pub struct ConfigArgs {
    /// Path to the load test configuration file
    #[arg(short, long, default_value = "loadtest.yaml")]
    pub(crate) config: PathBuf,
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub(crate) common: ConfigArgs,

    /// Print the report as JSON instead of a text summary
    #[arg(long)]
    pub(crate) json: bool,

    /// An optional path to also write the JSON report to
    #[arg(short, long)]
    pub(crate) output: Option<PathBuf>,
}
