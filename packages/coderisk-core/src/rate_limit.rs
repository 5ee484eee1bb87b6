//! Adaptive source-host rate limiting (§4.1, §5).
//!
//! The limiter watches the host's remaining-quota signal (e.g. the GitHub
//! `X-RateLimit-Remaining` header) and steps its own emission rate down in
//! tiers well before the host would start rejecting requests, rather than
//! reacting only after a 429. Shared as a core type (SPEC_FULL.md §C.1) so
//! both `coderisk-clients`' SourceHostClient and any future host adapter
//! apply the same policy instead of re-deriving the thresholds.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Emission rate tiers, keyed to remaining-quota thresholds observed against
/// a 5000/hour budget (§4.1): steady state at 86% utilization (~1.18 req/s),
/// stepping down as the remaining budget gets thin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateTier {
    pub remaining_floor: u32,
    pub requests_per_sec: f64,
}

pub const DEFAULT_TIERS: [RateTier; 3] = [
    RateTier { remaining_floor: 1000, requests_per_sec: 1.18 },
    RateTier { remaining_floor: 500, requests_per_sec: 0.83 },
    RateTier { remaining_floor: 100, requests_per_sec: 0.5 },
];

struct State {
    remaining: u32,
    last_emit: Option<Instant>,
}

/// Token-bucket-shaped limiter whose rate is re-derived from the most
/// recently observed quota on every `acquire` call, rather than fixed at
/// construction.
pub struct AdaptiveTokenBucket {
    tiers: Vec<RateTier>,
    state: Mutex<State>,
}

impl AdaptiveTokenBucket {
    pub fn new(initial_remaining: u32) -> Self {
        Self {
            tiers: DEFAULT_TIERS.to_vec(),
            state: Mutex::new(State { remaining: initial_remaining, last_emit: None }),
        }
    }

    /// Called after every response to fold in the host's fresh quota signal.
    pub fn observe_remaining(&self, remaining: u32) {
        self.state.lock().unwrap().remaining = remaining;
    }

    fn current_rate(&self, remaining: u32) -> f64 {
        self.tiers
            .iter()
            .filter(|t| remaining <= t.remaining_floor)
            .map(|t| t.requests_per_sec)
            .fold(f64::INFINITY, f64::min)
            .min(self.tiers[0].requests_per_sec)
    }

    /// Returns how long the caller should sleep before issuing the next
    /// request, given the current tier and time elapsed since the last one.
    pub fn wait_duration(&self) -> Duration {
        let mut state = self.state.lock().unwrap();
        let rate = self.current_rate(state.remaining);
        let min_interval = Duration::from_secs_f64(1.0 / rate);

        let now = Instant::now();
        let wait = match state.last_emit {
            Some(last) => {
                let elapsed = now.duration_since(last);
                min_interval.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        };
        state.last_emit = Some(now + wait);
        wait
    }

    /// Async call sites use this directly. The only tokio dependency in
    /// this crate is `time::sleep`, below — no runtime, no tasks, no I/O.
    pub async fn acquire(&self) {
        let wait = self.wait_duration();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_state_rate_above_1000_remaining() {
        let bucket = AdaptiveTokenBucket::new(4500);
        assert_eq!(bucket.current_rate(4500), 1.18);
    }

    #[test]
    fn rate_steps_down_as_quota_thins() {
        let bucket = AdaptiveTokenBucket::new(4500);
        assert_eq!(bucket.current_rate(900), 0.83);
        assert_eq!(bucket.current_rate(400), 0.5);
        assert_eq!(bucket.current_rate(50), 0.5);
    }

    #[test]
    fn observe_remaining_updates_subsequent_rate() {
        let bucket = AdaptiveTokenBucket::new(4500);
        bucket.observe_remaining(80);
        assert_eq!(bucket.current_rate(bucket.state.lock().unwrap().remaining), 0.5);
    }
}
