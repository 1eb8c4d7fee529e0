//! Latency probing against the lightweight ping endpoint

use super::MeasurementClient;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

/// One round-trip measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySample {
    pub millis: f64,
    /// The probe hit its timeout and `millis` is a substituted value
    pub timed_out: bool,
}

impl LatencySample {
    pub fn measured(millis: f64) -> Self {
        Self { millis, timed_out: false }
    }

    pub fn timed_out(millis: f64) -> Self {
        Self { millis, timed_out: true }
    }
}

/// Times single round trips with a hard timeout.
///
/// A timed-out probe reports `timeout + random(0..jitter)` so heavy
/// bufferbloat shows up as a large value rather than a missing sample.
#[derive(Clone)]
pub struct LatencyProbe {
    client: Arc<dyn MeasurementClient>,
    timeout: Duration,
    jitter: Duration,
}

impl std::fmt::Debug for LatencyProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyProbe")
            .field("timeout", &self.timeout)
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl LatencyProbe {
    pub fn new(client: Arc<dyn MeasurementClient>, timeout: Duration, jitter: Duration) -> Self {
        Self { client, timeout, jitter }
    }

    /// Substitute value for a probe that timed out
    pub fn timeout_substitute_ms(&self) -> f64 {
        let jitter_ms = self.jitter.as_secs_f64() * 1000.0 * rand::random::<f64>();
        self.timeout.as_secs_f64() * 1000.0 + jitter_ms
    }

    /// Probe once; transport and status errors are returned to the caller
    pub async fn try_measure(&self) -> Result<LatencySample> {
        let start = Instant::now();
        match timeout(self.timeout, self.client.ping_light()).await {
            Ok(Ok(())) => Ok(LatencySample::measured(start.elapsed().as_secs_f64() * 1000.0)),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(LatencySample::timed_out(self.timeout_substitute_ms())),
        }
    }
}
