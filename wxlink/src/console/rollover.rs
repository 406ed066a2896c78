//! Day-boundary bookkeeping.
//!
//! The meteorological day rolls over at a configured local hour (not
//! necessarily midnight), and daily counters reset at midnight proper.
//! Records arrive at sub-hour granularity, so both hooks are edge
//! triggered: a "done" flag arms when the hour moves away from the
//! boundary and fires exactly once when it returns.

use time::PrimitiveDateTime;

/// Hooks owed for one observed record timestamp.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RolloverActions {
    pub day_rollover: bool,
    pub midnight_reset: bool,
}

/// One session's rollover state. Lives for the duration of one archive
/// replay or one live-polling session.
#[derive(Debug)]
pub struct RolloverState {
    rollover_hour: u8,
    rollover_done: bool,
    midnight_done: bool,
}

impl RolloverState {
    pub fn new(rollover_hour: u8) -> Self {
        debug_assert!(rollover_hour <= 23);
        Self {
            rollover_hour,
            rollover_done: false,
            midnight_done: false,
        }
    }

    /// Observe a record timestamp and report which hooks are due.
    ///
    /// Timestamps must be fed in chronological order; the replay engine's
    /// monotonic cursor guarantees this for archive records.
    pub fn observe(&mut self, timestamp: PrimitiveDateTime) -> RolloverActions {
        let hour = timestamp.hour();
        let mut actions = RolloverActions::default();

        if hour == self.rollover_hour {
            if !self.rollover_done {
                self.rollover_done = true;
                actions.day_rollover = true;
            }
        } else {
            self.rollover_done = false;
        }

        if hour == 0 {
            if !self.midnight_done {
                self.midnight_done = true;
                actions.midnight_reset = true;
            }
        } else {
            self.midnight_done = false;
        }

        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn fires_once_within_the_rollover_hour() {
        let mut state = RolloverState::new(9);
        assert!(state.observe(datetime!(2024-03-01 09:00)).day_rollover);
        assert!(!state.observe(datetime!(2024-03-01 09:05)).day_rollover);
        assert!(!state.observe(datetime!(2024-03-01 09:55)).day_rollover);
    }

    #[test]
    fn rearms_after_the_hour_passes() {
        let mut state = RolloverState::new(9);
        assert!(state.observe(datetime!(2024-03-01 09:30)).day_rollover);
        assert!(!state.observe(datetime!(2024-03-01 10:00)).day_rollover);
        assert!(state.observe(datetime!(2024-03-02 09:00)).day_rollover);
    }

    #[test]
    fn midnight_and_rollover_are_independent() {
        let mut state = RolloverState::new(9);
        let first = state.observe(datetime!(2024-03-01 00:00));
        assert!(first.midnight_reset);
        assert!(!first.day_rollover);
        let at_nine = state.observe(datetime!(2024-03-01 09:00));
        assert!(at_nine.day_rollover);
        assert!(!at_nine.midnight_reset);
    }

    #[test]
    fn rollover_at_midnight_fires_both() {
        let mut state = RolloverState::new(0);
        let actions = state.observe(datetime!(2024-03-01 00:05));
        assert!(actions.day_rollover);
        assert!(actions.midnight_reset);
    }
}
