use std::time::{Duration, Instant};

use crate::state::Transform;

use super::clock::{quantum_for_rate, SessionClock};

/// A local update that is due to go out now, stamped with the time of sending.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outbound {
    pub timestamp: u32,
    pub transform: Transform,
}

/// Throttles local updates to a fixed rate, keeping only the newest update that was not yet
/// allowed out.
#[derive(Debug)]
pub struct UpdateScheduler {
    quantum: Duration,
    clock: Option<SessionClock>,
    pending: Option<Transform>,
}

impl UpdateScheduler {
    pub fn new(update_rate: u32) -> Self {
        Self {
            quantum: quantum_for_rate(update_rate),
            clock: None,
            pending: None,
        }
    }

    pub fn quantum(&self) -> Duration {
        self.quantum
    }

    pub fn clock(&self) -> Option<&SessionClock> {
        self.clock.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.clock.is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn millis_since_start(&self, now: Instant) -> Option<u32> {
        self.clock.as_ref().map(|clock| clock.millis_since_start(now))
    }

    /// Offers a new local update. The very first update of a session starts the clock and goes
    /// out immediately with timestamp 0; later ones go out only when the budget allows and are
    /// otherwise held as the single pending update.
    pub fn submit(&mut self, transform: Transform, now: Instant) -> Option<Outbound> {
        let Some(clock) = self.clock.as_mut() else {
            self.clock = Some(SessionClock::start(now, self.quantum));
            self.pending = None;
            return Some(Outbound {
                timestamp: 0,
                transform,
            });
        };

        clock.advance(now);
        if clock.consume() {
            self.pending = None;
            Some(Outbound {
                timestamp: clock.millis_since_start(now),
                transform,
            })
        } else {
            self.pending = Some(transform);
            None
        }
    }

    /// Advances the budget and releases the pending update if it is now due.
    pub fn advance(&mut self, now: Instant) -> Option<Outbound> {
        let clock = self.clock.as_mut()?;
        clock.advance(now);

        if self.pending.is_some() && clock.consume() {
            let transform = self.pending.take()?;
            return Some(Outbound {
                timestamp: clock.millis_since_start(now),
                transform,
            });
        }
        None
    }

    pub fn reset(&mut self) {
        self.clock = None;
        self.pending = None;
    }
}
