use std::collections::{BTreeMap, HashMap, HashSet};

use ghost::net::codec::{MAX_STATES_PER_PACKET, WireReader};
use ghost::{CodecError, PeerInfo, STATE_LEN};

use crate::config::ServerConfig;

/// One update as received, plus the players it has already been relayed to.
#[derive(Debug)]
pub struct PlayerState {
    bytes: [u8; STATE_LEN],
    sent_to: HashSet<u8>,
}

impl PlayerState {
    /// Splits out the sender id and timestamp of a raw update.
    pub fn from_bytes(bytes: [u8; STATE_LEN]) -> Result<(u8, u32, Self), CodecError> {
        let mut reader = WireReader::new(&bytes);
        let id = reader.read_u8()?;
        let millis = reader.read_u32()?;
        Ok((
            id,
            millis,
            Self {
                bytes,
                sent_to: HashSet::new(),
            },
        ))
    }
}

#[derive(Debug)]
struct Player {
    color: [u8; 3],
    name: String,
    states: BTreeMap<u32, PlayerState>,
}

impl Player {
    fn new(color: [u8; 3], name: String) -> Self {
        Self {
            color,
            name,
            states: BTreeMap::new(),
        }
    }

    fn info(&self, id: u8) -> PeerInfo {
        PeerInfo {
            id,
            color: self.color,
            name: self.name.clone(),
        }
    }

    fn update(&mut self, millis: u32, state: PlayerState, max_updates: usize) {
        if self.states.contains_key(&millis) {
            return;
        }

        if self.states.len() < max_updates {
            self.states.insert(millis, state);
            return;
        }

        // when full, only take updates newer than the oldest kept one
        if self
            .states
            .first_key_value()
            .is_some_and(|(&oldest, _)| oldest < millis)
        {
            self.states.insert(millis, state);
            self.states.pop_first();
        }
    }
}

/// Most players one server holds: a reply carries one record per other player and must fit
/// in a single packet.
pub const MAX_PLAYERS: usize = MAX_STATES_PER_PACKET + 1;

/// Registry of connected players and the updates they have sent.
#[derive(Debug)]
pub struct Relay {
    players: HashMap<u8, Player>,
    max_players: usize,
    max_updates: usize,
    seed: u64,
}

impl Relay {
    pub fn new(config: &ServerConfig) -> Self {
        let max_players = config.max_players.clamp(1, MAX_PLAYERS);
        if max_players != config.max_players {
            log::warn!(
                "max_players {} out of range, using {}",
                config.max_players,
                max_players
            );
        }

        Self {
            players: HashMap::new(),
            max_players,
            max_updates: config.max_updates.max(1),
            seed: rand_u64(),
        }
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players
    }

    /// Admits a player under a fresh random id. Returns the id and everyone already online, or
    /// `None` when the server is full.
    pub fn connect(&mut self, color: [u8; 3], name: String) -> Option<(u8, Vec<PeerInfo>)> {
        if self.is_full() {
            return None;
        }

        let id = loop {
            let id = self.next_random() as u8;
            if !self.players.contains_key(&id) {
                break id;
            }
        };

        let mut others: Vec<PeerInfo> = self
            .players
            .iter()
            .map(|(&other, player)| player.info(other))
            .collect();
        others.sort_by_key(|info| info.id);

        self.players.insert(id, Player::new(color, name));
        Some((id, others))
    }

    pub fn disconnect(&mut self, id: u8) -> bool {
        self.players.remove(&id).is_some()
    }

    /// Stores an update and returns, for each other player, the newest of their updates the
    /// sender has not been given yet. `None` if the sender is not connected.
    pub fn update(&mut self, bytes: [u8; STATE_LEN]) -> Option<Vec<[u8; STATE_LEN]>> {
        let (id, millis, state) = PlayerState::from_bytes(bytes).ok()?;
        let max_updates = self.max_updates;
        self.players
            .get_mut(&id)?
            .update(millis, state, max_updates);

        Some(self.filtered_states(id))
    }

    fn filtered_states(&mut self, id: u8) -> Vec<[u8; STATE_LEN]> {
        let mut filtered = Vec::with_capacity(self.players.len());
        for (&player_id, player) in &mut self.players {
            if player_id == id {
                continue;
            }

            if let Some(state) = player
                .states
                .values_mut()
                .rev()
                .find(|state| !state.sent_to.contains(&id))
            {
                state.sent_to.insert(id);
                filtered.push(state.bytes);
            }
        }
        filtered
    }

    fn next_random(&mut self) -> u64 {
        // splitmix64 step
        self.seed = self.seed.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.seed;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }
}

fn rand_u64() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::time::Instant;

    let mut hasher = DefaultHasher::new();
    Instant::now().hash(&mut hasher);
    hasher.finish()
}
