use std::time::{Duration, Instant};

/// Cap on the send budget, in quanta.
const MAX_BUDGET_QUANTA: u64 = 2;

pub fn quantum_for_rate(rate: u32) -> Duration {
    let rate = rate.max(1) as u64;
    Duration::from_nanos((1_000_000_000 + rate / 2) / rate)
}

/// Elapsed time since the first update of a session plus the nanosecond budget that throttles
/// outbound updates.
#[derive(Debug, Clone)]
pub struct SessionClock {
    epoch: Instant,
    checkpoint: Instant,
    budget_nanos: u64,
    quantum_nanos: u64,
}

impl SessionClock {
    pub fn start(now: Instant, quantum: Duration) -> Self {
        Self {
            epoch: now,
            checkpoint: now,
            budget_nanos: 0,
            quantum_nanos: quantum.as_nanos().max(1) as u64,
        }
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Milliseconds since the session epoch. Wraps like the wire timestamp does.
    pub fn millis_since_start(&self, now: Instant) -> u32 {
        now.saturating_duration_since(self.epoch).as_millis() as u32
    }

    /// Adds the time since the last checkpoint to the budget.
    pub fn advance(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.checkpoint);
        let max_budget = self.quantum_nanos * MAX_BUDGET_QUANTA;
        self.budget_nanos = self
            .budget_nanos
            .saturating_add(elapsed.as_nanos() as u64)
            .min(max_budget);
        self.checkpoint = self.checkpoint.max(now);
    }

    pub fn can_send(&self) -> bool {
        self.budget_nanos >= self.quantum_nanos
    }

    /// Spends one quantum if the budget allows it.
    pub fn consume(&mut self) -> bool {
        if self.can_send() {
            self.budget_nanos -= self.quantum_nanos;
            true
        } else {
            false
        }
    }

    pub fn budget(&self) -> Duration {
        Duration::from_nanos(self.budget_nanos)
    }

    pub fn quantum(&self) -> Duration {
        Duration::from_nanos(self.quantum_nanos)
    }
}
