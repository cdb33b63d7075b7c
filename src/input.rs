//! Timer-driven pump for the local player's input, respecting the same lag
//! window the server enforces. A caller constructs one `InputScheduler` per
//! connection and drives it from the connection's `tokio::select!` loop.

use std::collections::VecDeque;

use crate::field::KeyState;

/// Buffers locally-polled keys until they're due to be sent, and decides how
/// many ticks can be sent at once without running past the lag window. The
/// server computes `field_tick + 1 >= match_tick + max_lag_ticks` per key; a
/// client wanting to avoid a rejected `Input` keeps its own field's tick from
/// running that far ahead of the last match tick it has heard about.
pub struct InputScheduler {
    pending: VecDeque<KeyState>,
    next_tick: u64,
    max_lag_ticks: u64,
}

impl InputScheduler {
    pub fn new(max_lag_ticks: u64) -> Self {
        Self {
            pending: VecDeque::new(),
            next_tick: 1,
            max_lag_ticks,
        }
    }

    /// Records one freshly-polled key for the next local tick in sequence.
    pub fn push(&mut self, key: KeyState) {
        self.pending.push_back(key);
    }

    /// Returns `(first_tick, keys)` for a batch ready to send as one `Input`
    /// packet, capping the batch so `first_tick + keys.len()` never runs the
    /// local field's tick past `match_tick + max_lag_ticks - 1`. Returns
    /// `None` when nothing is pending or the whole window is already spent.
    pub fn drain_ready(&mut self, match_tick: u64) -> Option<(u64, Vec<KeyState>)> {
        if self.pending.is_empty() {
            return None;
        }
        let ceiling = match_tick + self.max_lag_ticks;
        if self.next_tick >= ceiling {
            return None;
        }
        let budget = (ceiling - self.next_tick) as usize;
        let take = self.pending.len().min(budget).max(0);
        if take == 0 {
            return None;
        }
        let first_tick = self.next_tick;
        let keys: Vec<KeyState> = self.pending.drain(..take).collect();
        self.next_tick += keys.len() as u64;
        Some((first_tick, keys))
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_nothing_when_empty() {
        let mut s = InputScheduler::new(20);
        assert!(s.drain_ready(0).is_none());
    }

    #[test]
    fn drains_a_full_batch_within_the_lag_window() {
        let mut s = InputScheduler::new(20);
        for _ in 0..5 {
            s.push(KeyState::default());
        }
        let (first_tick, keys) = s.drain_ready(0).unwrap();
        assert_eq!(first_tick, 1);
        assert_eq!(keys.len(), 5);
    }

    #[test]
    fn caps_the_batch_at_the_lag_window_ceiling() {
        let mut s = InputScheduler::new(3);
        for _ in 0..10 {
            s.push(KeyState::default());
        }
        let (first_tick, keys) = s.drain_ready(0).unwrap();
        assert_eq!(first_tick, 1);
        assert_eq!(keys.len(), 2);
        assert!(s.drain_ready(0).is_none());
        assert_eq!(s.pending_len(), 8);
    }
}
