mod clock;
mod scheduler;

pub use clock::{quantum_for_rate, SessionClock};
pub use scheduler::{Outbound, UpdateScheduler};

pub const DEFAULT_UPDATE_RATE: u32 = 60;
