//! Type definitions and aliases

use serde::{Deserialize, Serialize};
use std::fmt;

// Re-export commonly used types
pub use crate::error::{AppError, Result};

/// Bufferbloat letter grade derived from the loaded/baseline latency ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    /// Ordered upper bounds, inclusive. Anything above the last bound is F.
    pub const THRESHOLDS: [(f64, Grade); 5] = [
        (1.2, Grade::APlus),
        (1.5, Grade::A),
        (2.0, Grade::B),
        (3.0, Grade::C),
        (5.0, Grade::D),
    ];

    /// Map a bufferbloat ratio to its grade
    pub fn from_ratio(ratio: f64) -> Self {
        Self::THRESHOLDS
            .iter()
            .find(|(bound, _)| ratio <= *bound)
            .map(|(_, grade)| *grade)
            .unwrap_or(Grade::F)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }

    /// Short verdict used next to the letter
    pub fn verdict(&self) -> &'static str {
        match self {
            Grade::APlus => "Excellent",
            Grade::A => "Very good",
            Grade::B => "Good",
            Grade::C => "Fair",
            Grade::D => "Poor",
            Grade::F => "Very poor",
        }
    }

    /// Explanation text for a grade, given the latency increase in percent
    pub fn explanation(&self, increase_percent: i64) -> String {
        match self {
            Grade::APlus => format!(
                "Excellent! Minimal bufferbloat. Latency increased by only {}%, which is barely noticeable for real-time applications.",
                increase_percent
            ),
            Grade::A => format!(
                "Very good! Low bufferbloat. The {}% latency increase is minor and should not affect most applications.",
                increase_percent
            ),
            Grade::B => format!(
                "Good. Moderate bufferbloat. The {}% latency increase may cause occasional issues with real-time applications.",
                increase_percent
            ),
            Grade::C => format!(
                "Fair. Noticeable bufferbloat. The {}% latency increase will likely cause problems with gaming and video calls.",
                increase_percent
            ),
            Grade::D => format!(
                "Poor. Significant bufferbloat. The {}% latency increase will cause noticeable delays in real-time applications.",
                increase_percent
            ),
            Grade::F => format!(
                "Bad. Severe bufferbloat. The {}% latency increase makes real-time applications nearly unusable. \
                 Consider upgrading your router or enabling Smart Queue Management (SQM).",
                increase_percent
            ),
        }
    }

    /// Explanation used when loaded latency reaches the severe threshold, whatever the grade
    pub fn severe_explanation(loaded_ms: f64, increase_percent: i64) -> String {
        format!(
            "Severe bufferbloat detected! Latency rose to {:.0}ms under load ({}% increase). \
             Gaming, video calls and VoIP will be nearly unusable while the link is busy.",
            loaded_ms, increase_percent
        )
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phases of one test run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestPhase {
    Idle,
    Upload,
    Baseline,
    Loaded,
    Teardown,
    Scoring,
    Complete,
    Failed,
}

impl TestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestPhase::Idle => "idle",
            TestPhase::Upload => "upload",
            TestPhase::Baseline => "baseline",
            TestPhase::Loaded => "loaded",
            TestPhase::Teardown => "teardown",
            TestPhase::Scoring => "scoring",
            TestPhase::Complete => "complete",
            TestPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for TestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
