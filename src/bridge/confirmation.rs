//! Per-chain confirmation clock behind the pre-sign safety delay.
//!
//! After a transaction confirms on a chain, the next signing operation on
//! that same chain waits out the remainder of a bounded window. Chains are
//! independent: activity on one never delays another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

/// Time source, injected so delay arithmetic is testable without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Records when the last transaction confirmed on each chain.
pub struct ConfirmationTracker {
    last_confirmed: HashMap<u64, Instant>,
    clock: Arc<dyn Clock>,
}

impl ConfirmationTracker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            last_confirmed: HashMap::new(),
            clock,
        }
    }

    /// Record that a transaction just confirmed on `chain_id`.
    pub fn mark_confirmed(&mut self, chain_id: u64) {
        let now = self.clock.now();
        self.last_confirmed.insert(chain_id, now);
        debug!(chain_id, "recorded transaction confirmation");
    }

    /// Remaining wait before the next signing operation on `chain_id`:
    /// the unelapsed part of `max_delay` since the last confirmation,
    /// zero for chains with no recorded confirmation.
    pub fn delay_for(&self, chain_id: u64, max_delay: Duration) -> Duration {
        match self.last_confirmed.get(&chain_id) {
            Some(confirmed_at) => {
                let elapsed = self.clock.now().saturating_duration_since(*confirmed_at);
                max_delay.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        }
    }

    /// Forget all chains.
    pub fn reset(&mut self) {
        self.last_confirmed.clear();
    }
}

impl Default for ConfirmationTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Clock the test advances by hand.
    struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Instant::now()),
            })
        }

        fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    const MAX: Duration = Duration::from_millis(1500);

    #[test]
    fn test_unknown_chain_has_zero_delay() {
        let tracker = ConfirmationTracker::new();
        assert_eq!(tracker.delay_for(1, MAX), Duration::ZERO);
    }

    #[test]
    fn test_fresh_confirmation_requires_full_delay() {
        let clock = ManualClock::new();
        let mut tracker = ConfirmationTracker::with_clock(clock);
        tracker.mark_confirmed(1);
        assert_eq!(tracker.delay_for(1, MAX), MAX);
    }

    #[test]
    fn test_delay_shrinks_as_time_passes() {
        let clock = ManualClock::new();
        let mut tracker = ConfirmationTracker::with_clock(clock.clone());
        tracker.mark_confirmed(1);
        clock.advance(Duration::from_millis(600));
        assert_eq!(tracker.delay_for(1, MAX), Duration::from_millis(900));
    }

    #[test]
    fn test_delay_bottoms_out_at_zero() {
        let clock = ManualClock::new();
        let mut tracker = ConfirmationTracker::with_clock(clock.clone());
        tracker.mark_confirmed(1);
        clock.advance(Duration::from_millis(4000));
        assert_eq!(tracker.delay_for(1, MAX), Duration::ZERO);
    }

    #[test]
    fn test_chains_do_not_delay_each_other() {
        let clock = ManualClock::new();
        let mut tracker = ConfirmationTracker::with_clock(clock);
        tracker.mark_confirmed(1);
        assert_eq!(tracker.delay_for(1, MAX), MAX);
        assert_eq!(tracker.delay_for(137, MAX), Duration::ZERO);
    }

    #[test]
    fn test_reconfirmation_restarts_the_window() {
        let clock = ManualClock::new();
        let mut tracker = ConfirmationTracker::with_clock(clock.clone());
        tracker.mark_confirmed(1);
        clock.advance(Duration::from_millis(1400));
        tracker.mark_confirmed(1);
        assert_eq!(tracker.delay_for(1, MAX), MAX);
    }

    #[test]
    fn test_reset_forgets_all_chains() {
        let clock = ManualClock::new();
        let mut tracker = ConfirmationTracker::with_clock(clock);
        tracker.mark_confirmed(1);
        tracker.mark_confirmed(137);
        tracker.reset();
        assert_eq!(tracker.delay_for(1, MAX), Duration::ZERO);
        assert_eq!(tracker.delay_for(137, MAX), Duration::ZERO);
    }
}
