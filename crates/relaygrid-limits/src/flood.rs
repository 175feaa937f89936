//! Soft decaying-counter limiter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

/// How often [`FloodMonitor::run`] decays the counters.
pub const DECAY_INTERVAL: Duration = Duration::from_secs(15 * 60);

const DECAY_FACTOR: f64 = 0.66;

/// Per-caller count of jobs started but not yet committed.
#[derive(Clone)]
pub struct FloodMonitor {
    threshold: i64,
    counters: Arc<Mutex<HashMap<String, u64>>>,
}

impl FloodMonitor {
    /// `threshold <= 0` disables flood detection.
    pub fn new(threshold: i64) -> Self {
        Self {
            threshold,
            counters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn increment(&self, token: &str) {
        *self
            .counters
            .lock()
            .expect("flood lock")
            .entry(token.to_string())
            .or_insert(0) += 1;
    }

    /// Lower the counter, never below zero.
    pub fn decrement(&self, token: &str) {
        if let Some(count) = self.counters.lock().expect("flood lock").get_mut(token) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn count(&self, token: &str) -> u64 {
        self.counters
            .lock()
            .expect("flood lock")
            .get(token)
            .copied()
            .unwrap_or(0)
    }

    pub fn is_flooding(&self, token: &str) -> bool {
        if self.threshold <= 0 {
            return false;
        }
        let flooding = self.count(token) as i64 > self.threshold;
        if flooding {
            warn!(token, threshold = self.threshold, "caller is flooding");
        }
        flooding
    }

    /// Scale every counter by 0.66 (rounded down) and drop those at zero.
    pub fn decay(&self) {
        let mut counters = self.counters.lock().expect("flood lock");
        for count in counters.values_mut() {
            *count = (*count as f64 * DECAY_FACTOR).floor() as u64;
        }
        counters.retain(|_, count| *count > 0);
        debug!(callers = counters.len(), "flood counters decayed");
    }

    /// Decay every [`DECAY_INTERVAL`] until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(DECAY_INTERVAL) => self.decay(),
                _ = shutdown.changed() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flooding_is_strictly_above_threshold() {
        let m = FloodMonitor::new(2);
        m.increment("t");
        m.increment("t");
        assert!(!m.is_flooding("t"));
        m.increment("t");
        assert!(m.is_flooding("t"));
    }

    #[test]
    fn non_positive_threshold_disables() {
        let m = FloodMonitor::new(0);
        for _ in 0..50 {
            m.increment("t");
        }
        assert!(!m.is_flooding("t"));
    }

    #[test]
    fn decrement_floors_at_zero() {
        let m = FloodMonitor::new(5);
        m.decrement("t");
        m.increment("t");
        m.decrement("t");
        m.decrement("t");
        assert_eq!(m.count("t"), 0);
    }

    #[test]
    fn decay_scales_and_removes_zeros() {
        let m = FloodMonitor::new(5);
        for _ in 0..10 {
            m.increment("busy");
        }
        m.increment("idle");

        m.decay();
        assert_eq!(m.count("busy"), 6);
        assert_eq!(m.count("idle"), 0);
        assert!(!m.counters.lock().unwrap().contains_key("idle"));
    }
}
