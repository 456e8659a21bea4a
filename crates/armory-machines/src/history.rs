//! Current state plus a bounded transition history.
//!
//! Every machine keeps one [`TransitionLog`]. Transitions are validated
//! against [`MachineState::can_transition_to`] before they are applied, and
//! the last [`MAX_HISTORY_SIZE`] of them are kept for diagnostics.
//!
//! Timestamps are passed in rather than read from the clock so the machine
//! cores stay deterministic under test.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::{MachineError, Result};

/// Maximum number of state transitions to keep in history.
pub const MAX_HISTORY_SIZE: usize = 100;

/// A state enum driven by a [`TransitionLog`].
pub trait MachineState: Copy + Eq + fmt::Debug + fmt::Display {
    /// Whether the machine may move from `self` to `next`.
    fn can_transition_to(&self, next: &Self) -> bool;
}

/// Record of one state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S> {
    pub from: S,
    pub to: S,
    pub timestamp: Instant,
}

#[derive(Debug, Clone)]
pub struct TransitionLog<S> {
    current: S,
    entered_at: Instant,
    history: VecDeque<Transition<S>>,
}

impl<S: MachineState> TransitionLog<S> {
    pub fn new(initial: S, now: Instant) -> Self {
        Self {
            current: initial,
            entered_at: now,
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    pub fn current(&self) -> S {
        self.current
    }

    pub fn is(&self, state: S) -> bool {
        self.current == state
    }

    /// Time spent in the current state as of `now`.
    pub fn time_in_current_state(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.entered_at)
    }

    /// Oldest first.
    pub fn history(&self) -> &VecDeque<Transition<S>> {
        &self.history
    }

    /// The most recent transitions, up to `count`, oldest first.
    pub fn last_transitions(&self, count: usize) -> Vec<Transition<S>> {
        let skip = self.history.len().saturating_sub(count);
        self.history.iter().skip(skip).copied().collect()
    }

    /// Validate and apply a transition.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::InvalidStateTransition`] and leaves the state
    /// unchanged when the move is not allowed.
    pub fn transition_to(&mut self, next: S, now: Instant) -> Result<Transition<S>> {
        if !self.current.can_transition_to(&next) {
            return Err(MachineError::InvalidStateTransition {
                from: self.current.to_string(),
                to: next.to_string(),
            });
        }

        let transition = Transition {
            from: self.current,
            to: next,
            timestamp: now,
        };
        self.current = next;
        self.entered_at = now;

        self.history.push_back(transition);
        if self.history.len() > MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Light {
        Off,
        On,
        Broken,
    }

    impl fmt::Display for Light {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt::Debug::fmt(self, f)
        }
    }

    impl MachineState for Light {
        fn can_transition_to(&self, next: &Self) -> bool {
            !matches!((self, next), (Light::Broken, _))
        }
    }

    #[test]
    fn test_transition_is_recorded() {
        let start = Instant::now();
        let mut log = TransitionLog::new(Light::Off, start);

        let transition = log.transition_to(Light::On, start + Duration::from_secs(1)).unwrap();
        assert_eq!(transition.from, Light::Off);
        assert_eq!(transition.to, Light::On);
        assert!(log.is(Light::On));
        assert_eq!(log.history().len(), 1);
        assert_eq!(
            log.time_in_current_state(start + Duration::from_secs(3)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let now = Instant::now();
        let mut log = TransitionLog::new(Light::Broken, now);

        let err = log.transition_to(Light::On, now).unwrap_err();
        assert_eq!(err.to_string(), "Invalid state transition from Broken to On");
        assert_eq!(log.current(), Light::Broken);
        assert!(log.history().is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let now = Instant::now();
        let mut log = TransitionLog::new(Light::Off, now);
        for i in 0..(MAX_HISTORY_SIZE + 10) {
            let next = if i % 2 == 0 { Light::On } else { Light::Off };
            log.transition_to(next, now).unwrap();
        }
        assert_eq!(log.history().len(), MAX_HISTORY_SIZE);

        let last = log.last_transitions(2);
        assert_eq!(last.len(), 2);
        assert_eq!(last[1].to, Light::Off);
        assert_eq!(last[0].to, Light::On);
    }
}
