//! Hard sliding-window limiter.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use relaygrid_state::epoch_millis;

/// Admissions older than this no longer count against the ceiling.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Caps how many jobs a caller may start within [`WINDOW`].
///
/// A ceiling of `None` admits everything and `Some(0)` admits nothing.
/// Rejected attempts are not recorded, so a caller that is over the limit
/// regains admission as soon as an earlier slot expires or is released
/// with [`decrease`](Self::decrease).
#[derive(Clone)]
pub struct ConcurrencyMonitor {
    limit: Option<u32>,
    admissions: Arc<Mutex<HashMap<String, VecDeque<u64>>>>,
}

impl ConcurrencyMonitor {
    pub fn new(limit: Option<u32>) -> Self {
        Self {
            limit,
            admissions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    /// Try to admit one job for `token`.
    pub fn admit(&self, token: &str) -> bool {
        self.admit_at(token, epoch_millis())
    }

    /// [`admit`](Self::admit) with an explicit clock in milliseconds.
    pub fn admit_at(&self, token: &str, now_ms: u64) -> bool {
        let Some(limit) = self.limit else {
            return true;
        };
        if limit == 0 {
            return false;
        }

        let window_ms = WINDOW.as_millis() as u64;
        let mut admissions = self.admissions.lock().expect("admissions lock");
        let entries = admissions.entry(token.to_string()).or_default();
        while entries
            .front()
            .is_some_and(|&t| now_ms.saturating_sub(t) > window_ms)
        {
            entries.pop_front();
        }

        if entries.len() as u64 + 1 > u64::from(limit) {
            debug!(token, in_window = entries.len(), limit, "admission rejected");
            return false;
        }
        entries.push_back(now_ms);
        true
    }

    /// Release the oldest admission held by `token`.
    pub fn decrease(&self, token: &str) {
        let mut admissions = self.admissions.lock().expect("admissions lock");
        if let Some(entries) = admissions.get_mut(token) {
            entries.pop_front();
            if entries.is_empty() {
                admissions.remove(token);
            }
        }
    }

    /// Admissions currently recorded for `token`, including expired ones
    /// not yet pruned.
    pub fn recorded(&self, token: &str) -> usize {
        self.admissions
            .lock()
            .expect("admissions lock")
            .get(token)
            .map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_limit_always_admits() {
        let m = ConcurrencyMonitor::new(None);
        for _ in 0..100 {
            assert!(m.admit("t"));
        }
        assert_eq!(m.recorded("t"), 0);
    }

    #[test]
    fn zero_limit_always_rejects() {
        let m = ConcurrencyMonitor::new(Some(0));
        assert!(!m.admit("t"));
    }

    #[test]
    fn three_admit_fourth_rejected_then_decrease_frees_a_slot() {
        let m = ConcurrencyMonitor::new(Some(3));
        let t0 = 1_000_000;

        assert!(m.admit_at("t", t0));
        assert!(m.admit_at("t", t0 + 1_000));
        assert!(m.admit_at("t", t0 + 2_000));
        assert!(!m.admit_at("t", t0 + 3_000));

        m.decrease("t");
        assert!(m.admit_at("t", t0 + 4_000));
        assert!(!m.admit_at("t", t0 + 5_000));
    }

    #[test]
    fn expired_admissions_are_pruned() {
        let m = ConcurrencyMonitor::new(Some(1));
        let t0 = 1_000_000;
        assert!(m.admit_at("t", t0));
        assert!(!m.admit_at("t", t0 + 30_000));
        assert!(m.admit_at("t", t0 + WINDOW.as_millis() as u64 + 1));
    }

    #[test]
    fn callers_are_independent() {
        let m = ConcurrencyMonitor::new(Some(1));
        assert!(m.admit_at("a", 0));
        assert!(m.admit_at("b", 0));
        assert!(!m.admit_at("a", 1));
    }

    #[test]
    fn decrease_on_unknown_caller_is_noop() {
        let m = ConcurrencyMonitor::new(Some(1));
        m.decrease("ghost");
        assert_eq!(m.recorded("ghost"), 0);
    }
}
