//! Battery discharge timers.

use psu_device::DischargeState;
use std::time::{Duration, Instant};

/// Tracks how long one battery has been discharging.
///
/// Starts on the first `Discharging` observation and resets on `Charging`.
/// `Floating` and `Unknown` leave a running timer alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DischargeTimer {
    started_at: Option<Instant>,
}

impl DischargeTimer {
    /// Idle timer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one classification taken at `now`.
    pub fn observe(&mut self, state: DischargeState, now: Instant) {
        match state {
            DischargeState::Discharging => {
                self.started_at.get_or_insert(now);
            }
            DischargeState::Charging => self.started_at = None,
            DischargeState::Floating | DischargeState::Unknown => {}
        }
    }

    /// True while a discharge episode is open.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Time spent discharging as of `now`.
    #[must_use]
    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.started_at
            .map(|started| now.saturating_duration_since(started))
    }
}

/// Longest running discharge across `timers`.
#[must_use]
pub fn longest_discharge(timers: &[DischargeTimer], now: Instant) -> Option<Duration> {
    timers.iter().filter_map(|t| t.elapsed(now)).max()
}
