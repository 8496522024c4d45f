pub mod config;
pub mod error;
pub mod ghost;
pub mod net;
pub mod session;
pub mod state;
pub mod sync;
pub mod zone;

pub use config::GhostConfig;
pub use error::{CodecError, ConfigError, ProtocolError, TransportError};
pub use ghost::{GhostFrame, GhostPose, GhostRecord, GhostStore};
pub use net::{
    ClientMessage, Connector, ControlChannel, ControlEvent, DatagramChannel, NetConnector,
    NetworkStats, PeerInfo, ServerMessage, WireReader, WireWriter, DEFAULT_PORT,
    MAX_SERVER_PACKET_LEN, MAX_STATES_PER_PACKET, STATE_LEN,
};
pub use session::{ConnectionState, GhostSession, SessionEvent};
pub use state::{State, Transform};
pub use sync::{SessionClock, UpdateScheduler, DEFAULT_UPDATE_RATE};
pub use zone::zone_hash;
