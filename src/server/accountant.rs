//! Shared byte and stream accounting for the measurement server

use crate::stats::throughput_mbps;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

/// Proof of a download stream registration.
///
/// Ending a stream consumes its ticket, so each registration can be ended at
/// most once. Tickets from before a `reset()` belong to an older epoch and no
/// longer affect the active count.
#[derive(Debug, PartialEq, Eq)]
pub struct StreamTicket {
    epoch: u64,
}

#[derive(Debug, Default)]
struct AccountingState {
    download_bytes: u64,
    upload_bytes: u64,
    active_download_streams: u64,
    download_window_start: Option<Instant>,
    upload_window_start: Option<Instant>,
    epoch: u64,
}

/// Consistent point-in-time view of the accounting state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountingSnapshot {
    pub download_speed_mbps: f64,
    pub upload_speed_mbps: f64,
    pub download_bytes: u64,
    pub upload_bytes: u64,
    /// Seconds since the download window opened
    pub download_elapsed: f64,
    /// Seconds since the upload window opened
    pub upload_elapsed: f64,
    pub streams_active: u64,
    /// Unix timestamp in seconds
    pub timestamp: f64,
}

/// Process-wide counters shared by every request handler.
///
/// All reads and writes go through one mutex, so concurrent streams never lose
/// updates and a snapshot never mixes fields from different moments.
#[derive(Debug, Default)]
pub struct StreamAccountant {
    state: Mutex<AccountingState>,
}

impl StreamAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    // No critical section can panic halfway through an update, so a poisoned
    // lock still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, AccountingState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count a new download stream and open the download window if needed
    pub fn register_download_stream_start(&self) -> StreamTicket {
        let mut state = self.lock();
        state.active_download_streams += 1;
        if state.download_window_start.is_none() {
            state.download_window_start = Some(Instant::now());
        }
        StreamTicket { epoch: state.epoch }
    }

    /// End a download stream; returns the remaining active count
    pub fn register_download_stream_end(&self, ticket: StreamTicket) -> u64 {
        let mut state = self.lock();
        if ticket.epoch == state.epoch {
            state.active_download_streams = state.active_download_streams.saturating_sub(1);
        }
        state.active_download_streams
    }

    pub fn add_download_bytes(&self, bytes: u64) {
        let mut state = self.lock();
        state.download_bytes = state.download_bytes.saturating_add(bytes);
        if state.download_window_start.is_none() {
            state.download_window_start = Some(Instant::now());
        }
    }

    /// Open the upload window if this is the first upload since reset
    pub fn register_upload_start(&self) {
        let mut state = self.lock();
        if state.upload_window_start.is_none() {
            state.upload_window_start = Some(Instant::now());
        }
    }

    pub fn add_upload_bytes(&self, bytes: u64) {
        let mut state = self.lock();
        state.upload_bytes = state.upload_bytes.saturating_add(bytes);
        if state.upload_window_start.is_none() {
            state.upload_window_start = Some(Instant::now());
        }
    }

    /// Zero every counter and start a new epoch; returns the previous download byte count
    pub fn reset(&self) -> u64 {
        let mut state = self.lock();
        let previous = state.download_bytes;
        let epoch = state.epoch.wrapping_add(1);
        *state = AccountingState {
            epoch,
            ..AccountingState::default()
        };
        previous
    }

    pub fn active_download_streams(&self) -> u64 {
        self.lock().active_download_streams
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    pub fn snapshot(&self) -> AccountingSnapshot {
        self.snapshot_at(Instant::now())
    }

    /// Snapshot with elapsed windows measured up to `now`
    pub fn snapshot_at(&self, now: Instant) -> AccountingSnapshot {
        let state = self.lock();

        let window = |start: Option<Instant>| {
            start.map(|s| now.saturating_duration_since(s).as_secs_f64()).unwrap_or(0.0)
        };
        let download_elapsed = window(state.download_window_start);
        let upload_elapsed = window(state.upload_window_start);

        AccountingSnapshot {
            download_speed_mbps: throughput_mbps(state.download_bytes, download_elapsed),
            upload_speed_mbps: throughput_mbps(state.upload_bytes, upload_elapsed),
            download_bytes: state.download_bytes,
            upload_bytes: state.upload_bytes,
            download_elapsed,
            upload_elapsed,
            streams_active: state.active_download_streams,
            timestamp: unix_timestamp(),
        }
    }
}

/// Current Unix time in fractional seconds
pub fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
