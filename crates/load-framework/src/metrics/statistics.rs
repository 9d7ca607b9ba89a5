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

use std::sync::Arc;

const FLOAT_ERROR_MARGIN: f64 = 0.0001;

pub trait StatisticsCollector<T> {
    fn percentile(&self, percentile: f64) -> Option<T>;
    fn median(&self) -> Option<T>;
}

/// An immutable, ascending-ordered set of trend samples.
///
/// Aggregates are always computed over the sorted order, so two sets built from the same
/// multiset of values produce bit-identical statistics regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortedSamples(Arc<[f64]>);

impl SortedSamples {
    #[must_use]
    pub fn from_unsorted(mut samples: Vec<f64>) -> Self {
        samples.sort_by(f64::total_cmp);
        Self(samples.into())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn min(&self) -> Option<f64> {
        self.0.first().copied()
    }

    #[must_use]
    pub fn max(&self) -> Option<f64> {
        self.0.last().copied()
    }

    #[must_use]
    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        if self.0.is_empty() {
            return None;
        }

        // safety: sample counts are far below 2^52, so the conversion is exact
        #[allow(clippy::cast_precision_loss)]
        let len = self.0.len() as f64;
        Some(self.sum() / len)
    }
}

impl StatisticsCollector<f64> for SortedSamples {
    fn percentile(&self, percentile: f64) -> Option<f64> {
        if self.0.is_empty() {
            return None;
        }

        let percentile = percentile.clamp(0.0, 100.0);

        // safety: the rank is within [0, len - 1], so truncation and sign loss cannot occur
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        {
            let rank = (percentile / 100.0) * ((self.0.len() - 1) as f64);
            if (rank - rank.round()).abs() < FLOAT_ERROR_MARGIN {
                Some(self.0[rank.round() as usize])
            } else {
                let lower = self.0[rank.floor() as usize];
                let upper = self.0[rank.ceil() as usize];
                Some((lower + upper) / 2.0)
            }
        }
    }

    fn median(&self) -> Option<f64> {
        self.percentile(50.0)
    }
}

#[cfg(test)]
mod test {
    use super::{SortedSamples, StatisticsCollector};

    #[test]
    fn test_normal_percentiles_are_correct() {
        let samples = SortedSamples::from_unsorted(vec![1.0, 2.0, 3.0, 4.0, 5.0]);

        assert_eq!(samples.percentile(75.0), Some(4.0));
        assert_eq!(samples.percentile(50.0), Some(3.0));
        assert_eq!(samples.percentile(25.0), Some(2.0));
        assert_eq!(samples.percentile(0.0), Some(1.0));
        assert_eq!(samples.percentile(100.0), Some(5.0));
    }

    #[test]
    fn test_unordered_percentiles() {
        let samples = SortedSamples::from_unsorted(vec![4.0, 3.0, 5.0, 2.0, 1.0]);

        assert_eq!(samples.percentile(75.0), Some(4.0));
        assert_eq!(samples.median(), Some(3.0));
        assert_eq!(samples.percentile(25.0), Some(2.0));
        assert_eq!(samples.min(), Some(1.0));
        assert_eq!(samples.max(), Some(5.0));
    }

    #[test]
    fn test_midpoint_percentiles_are_correct() {
        let samples = SortedSamples::from_unsorted(vec![
            10.0, // Q0 - Q1 is 15
            20.0, // Q2 - Q3 is 25
            30.0, // Q4
        ]);

        assert_eq!(samples.percentile(50.0), Some(20.0));
        assert_eq!(samples.percentile(25.0), Some(15.0));
        assert_eq!(samples.percentile(75.0), Some(25.0));
    }

    #[test]
    fn test_empty_samples_have_no_statistics() {
        let samples = SortedSamples::default();

        assert!(samples.is_empty());
        assert_eq!(samples.percentile(95.0), None);
        assert_eq!(samples.mean(), None);
        assert!(samples.sum().abs() < f64::EPSILON);
    }
}
