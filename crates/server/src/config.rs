use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Keeps a full relay reply inside one packet.
    pub max_players: usize,
    /// Updates kept per player.
    pub max_updates: usize,
    pub idle_sleep: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_players: 22,
            max_updates: 20,
            idle_sleep: Duration::from_millis(1),
        }
    }
}
