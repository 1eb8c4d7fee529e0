//! Pacing for throttled downloads and bandwidth-capped transfers

use std::time::Duration;
use tokio::time::Instant;

/// Paces a byte stream to a target rate by comparing bytes sent against
/// the bytes the target rate allows for the elapsed time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiter {
    target_bytes_per_sec: u64,
    max_sleep: Duration,
}

impl RateLimiter {
    pub fn new(target_bytes_per_sec: u64, max_sleep: Duration) -> Self {
        Self {
            target_bytes_per_sec: target_bytes_per_sec.max(1),
            max_sleep,
        }
    }

    /// Limiter for a cap given in Mbps, where 1 Mbps is 2^20 bits per second
    pub fn from_mbps(mbps: f64, max_sleep: Duration) -> Self {
        let bytes_per_sec = mbps * crate::defaults::BYTES_PER_MIB as f64 / 8.0;
        // Float-to-int `as` saturates; NaN becomes 0 and is clamped to 1 by `new`
        Self::new(bytes_per_sec as u64, max_sleep)
    }

    pub fn target_bytes_per_sec(&self) -> u64 {
        self.target_bytes_per_sec
    }

    /// Bytes the target rate allows after `elapsed`
    pub fn expected_bytes(&self, elapsed: Duration) -> f64 {
        elapsed.as_secs_f64() * self.target_bytes_per_sec as f64
    }

    /// How long to pause after sending `bytes_sent` bytes in `elapsed`.
    ///
    /// Returns `None` when the stream is at or below the target rate. The
    /// pause is capped at `max_sleep` so a paused producer still notices a
    /// disconnected consumer quickly; call this after every chunk.
    pub fn delay_for(&self, bytes_sent: u64, elapsed: Duration) -> Option<Duration> {
        let ahead = bytes_sent as f64 - self.expected_bytes(elapsed);
        if ahead <= 0.0 {
            return None;
        }

        let delay = Duration::from_secs_f64(ahead / self.target_bytes_per_sec as f64);
        Some(delay.min(self.max_sleep))
    }

    /// Sleep until `bytes_sent` since `started_at` is back within the target rate
    pub async fn pace(&self, bytes_sent: u64, started_at: Instant) {
        while let Some(delay) = self.delay_for(bytes_sent, started_at.elapsed()) {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(
            crate::defaults::DOWNLOAD_TARGET_BYTES_PER_SEC,
            crate::defaults::MAX_RATE_LIMIT_SLEEP,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_is_capped() {
        let limiter = RateLimiter::default();
        // Uncapped this would be (2_560_000 - 1_280_000) / 1_280_000 = 1.0s
        let delay = limiter.delay_for(2_560_000, Duration::from_secs(1));
        assert_eq!(delay, Some(Duration::from_millis(200)));
    }

    #[test]
    fn test_no_delay_at_or_below_target() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.delay_for(1_280_000, Duration::from_secs(1)), None);
        assert_eq!(limiter.delay_for(640_000, Duration::from_secs(1)), None);
        assert_eq!(limiter.delay_for(0, Duration::ZERO), None);
    }

    #[test]
    fn test_small_overshoot_gives_proportional_delay() {
        let limiter = RateLimiter::default();
        // 128_000 bytes ahead at 1_280_000 B/s is 100ms
        let delay = limiter.delay_for(1_408_000, Duration::from_secs(1)).unwrap();
        assert!((delay.as_secs_f64() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_first_chunk_sleeps_immediately() {
        let limiter = RateLimiter::default();
        // First 32 KiB chunk with no elapsed time: 32768 / 1_280_000 s
        let delay = limiter.delay_for(32 * 1024, Duration::ZERO).unwrap();
        assert!((delay.as_secs_f64() - 0.0256).abs() < 1e-6);
    }

    #[test]
    fn test_from_mbps_uses_binary_megabits() {
        let limiter = RateLimiter::from_mbps(8.0, Duration::from_millis(200));
        assert_eq!(limiter.target_bytes_per_sec(), 1_048_576);

        let huge = RateLimiter::from_mbps(f64::MAX, Duration::from_millis(200));
        assert_eq!(huge.target_bytes_per_sec(), u64::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pace_waits_past_the_sleep_cap() {
        // 1 MiB at 1 MiB/s needs a full second even though each sleep is capped at 200ms
        let limiter = RateLimiter::from_mbps(8.0, Duration::from_millis(200));
        let started_at = Instant::now();
        limiter.pace(1_048_576, started_at).await;

        let waited = started_at.elapsed().as_secs_f64();
        assert!((1.0..1.05).contains(&waited), "waited {}s", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pace_returns_at_once_when_behind() {
        let limiter = RateLimiter::default();
        let started_at = Instant::now();
        limiter.pace(0, started_at).await;
        assert_eq!(started_at.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_zero_rate_is_clamped() {
        let limiter = RateLimiter::new(0, Duration::from_millis(200));
        assert_eq!(limiter.target_bytes_per_sec(), 1);
        assert_eq!(limiter.delay_for(10, Duration::ZERO), Some(Duration::from_millis(200)));
    }
}
