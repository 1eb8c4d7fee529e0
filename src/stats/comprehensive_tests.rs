//! Property-based tests for latency statistics and grading

use super::{population_std_dev, throughput_mbps, StatisticsEngine};
use crate::{models::metrics::LatencyStatistics, types::Grade};
use proptest::collection::vec;
use proptest::prelude::*;

/// Property-based test generators
mod generators {
    use super::*;

    /// Plausible latency values in milliseconds
    pub fn latency_ms() -> impl Strategy<Value = f64> {
        0.1f64..5000.0
    }

    /// Non-empty latency sample lists
    pub fn sample_lists() -> impl Strategy<Value = Vec<f64>> {
        vec(latency_ms(), 1..200)
    }

    /// Ratios, including values far beyond the last grade threshold
    pub fn ratios() -> impl Strategy<Value = f64> {
        prop_oneof![0.0f64..10.0, 10.0f64..1e9]
    }
}

mod property_tests {
    use super::*;

    proptest! {
        /// Mean should always be between min and max
        #[test]
        fn mean_between_min_max(samples in generators::sample_lists()) {
            let stats = LatencyStatistics::from_millis(&samples);
            prop_assert!(stats.mean_ms >= stats.min_ms - 1e-9);
            prop_assert!(stats.mean_ms <= stats.max_ms + 1e-9);
            prop_assert_eq!(stats.sample_count, samples.len());
        }

        /// Standard deviation is non-negative and bounded by the range
        #[test]
        fn std_dev_bounded(samples in generators::sample_lists()) {
            let stats = LatencyStatistics::from_millis(&samples);
            prop_assert!(stats.std_dev_ms >= 0.0);
            prop_assert!(stats.std_dev_ms <= (stats.max_ms - stats.min_ms) + 1e-9);
        }

        /// A constant sample list has no jitter
        #[test]
        fn constant_samples_have_no_jitter(value in generators::latency_ms(), len in 1usize..50) {
            let samples = vec![value; len];
            prop_assert!(population_std_dev(&samples, value).abs() < 1e-9);
        }

        /// Every ratio maps to exactly one grade, consistent with the thresholds
        #[test]
        fn grade_is_total_and_ordered(ratio in generators::ratios()) {
            let grade = Grade::from_ratio(ratio);
            let expected = if ratio <= 1.2 {
                Grade::APlus
            } else if ratio <= 1.5 {
                Grade::A
            } else if ratio <= 2.0 {
                Grade::B
            } else if ratio <= 3.0 {
                Grade::C
            } else if ratio <= 5.0 {
                Grade::D
            } else {
                Grade::F
            };
            prop_assert_eq!(grade, expected);
        }

        /// Grades never improve as the ratio grows
        #[test]
        fn grade_monotonic(a in generators::ratios(), b in generators::ratios()) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(Grade::from_ratio(low) <= Grade::from_ratio(high));
        }

        /// Throughput scales linearly with bytes and never goes negative
        #[test]
        fn throughput_non_negative(bytes in 0u64..10_000_000_000, secs in -10.0f64..1000.0) {
            let mbps = throughput_mbps(bytes, secs);
            prop_assert!(mbps >= 0.0);
            if secs <= 0.0 {
                prop_assert_eq!(mbps, 0.0);
            }
        }

        /// Analysis succeeds for any non-empty pair of sample lists
        #[test]
        fn analysis_is_consistent(
            baseline in generators::sample_lists(),
            loaded in generators::sample_lists(),
        ) {
            let engine = StatisticsEngine::with_defaults();
            let analysis = engine.analyze(&baseline, &loaded).unwrap();
            prop_assert!(analysis.ratio >= 0.0);
            prop_assert_eq!(analysis.grade, Grade::from_ratio(analysis.ratio));
            prop_assert!(analysis.jitter_ms >= 0.0);
            prop_assert!(!analysis.explanation.is_empty());
        }
    }
}

mod edge_cases {
    use super::*;

    #[test]
    fn boundary_ratios_hit_upper_grade() {
        for (bound, grade) in Grade::THRESHOLDS {
            assert_eq!(Grade::from_ratio(bound), grade);
        }
    }

    #[test]
    fn huge_latency_values_do_not_overflow() {
        let stats = LatencyStatistics::from_millis(&[1e12, 1e12, 1e12]);
        assert!(stats.mean_ms.is_finite());
        assert_eq!(stats.std_dev_ms, 0.0);
    }

    #[test]
    fn timeout_substitutes_push_loaded_mean_up() {
        let engine = StatisticsEngine::with_defaults();
        let analysis = engine.analyze(&[25.0; 12], &[2400.0, 2900.0, 2100.0]).unwrap();
        assert_eq!(analysis.grade, Grade::F);
        assert!(analysis.severe);
    }
}
