//! Deadline tracking for bounded receive loops.

use std::time::{Duration, Instant};

/// A point in time armed once from a timeout.
///
/// Receive loops query [`Deadline::remaining`] on every iteration instead of counting a timeout
/// down, so repeated polling does not accumulate drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    /// `None` if the timeout does not fit into an [`Instant`], the deadline never elapses then.
    at: Option<Instant>,
}

impl Deadline {
    /// Arms a deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
        }
    }

    /// Returns whether the deadline has passed.
    pub fn is_elapsed(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Returns the time left until the deadline, [`Duration::ZERO`] once it has passed.
    pub fn remaining(&self) -> Duration {
        match self.at {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        }
    }
}
