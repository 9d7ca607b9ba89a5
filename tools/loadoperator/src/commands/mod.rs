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

use load_framework::{config, loadtest};

pub(crate) mod run;
pub(crate) mod validate;

pub(crate) const EXIT_PASS: u8 = 0;
pub(crate) const EXIT_FAIL: u8 = 1;
pub(crate) const EXIT_CONFIG_ERROR: u8 = 2;

/// Maps a command failure to the process exit status.
pub(crate) fn exit_code_for(err: &anyhow::Error) -> u8 {
    let is_config_error = err.downcast_ref::<config::Error>().is_some()
        || err
            .downcast_ref::<loadtest::Error>()
            .is_some_and(loadtest::Error::is_config_error);

    if is_config_error {
        EXIT_CONFIG_ERROR
    } else {
        EXIT_FAIL
    }
}

#[cfg(test)]
mod test {
    use load_framework::{config, loadtest};

    use super::{exit_code_for, EXIT_CONFIG_ERROR, EXIT_FAIL};

    #[test]
    fn test_config_errors_exit_with_two() {
        let err = anyhow::Error::new(config::Error::NoTargets);
        assert_eq!(exit_code_for(&err), EXIT_CONFIG_ERROR);

        let err = anyhow::Error::new(loadtest::Error::DuplicateScenario {
            scenario: "load".to_string(),
        });
        assert_eq!(exit_code_for(&err), EXIT_CONFIG_ERROR);
    }

    #[test]
    fn test_other_errors_exit_with_one() {
        let err = anyhow::anyhow!("report could not be written");
        assert_eq!(exit_code_for(&err), EXIT_FAIL);
    }
}
