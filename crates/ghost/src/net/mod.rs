pub mod codec;
mod message;
mod stats;
mod transport;

pub use codec::{
    WireReader, WireWriter, MAX_SERVER_PACKET_LEN, MAX_STATES_PER_PACKET, MIN_SERVER_PACKET_LEN,
    STATE_LEN,
};
pub use message::{ClientMessage, PeerInfo, ServerMessage};
pub use stats::NetworkStats;
pub use transport::{
    Connector, ControlChannel, ControlEvent, DatagramChannel, LinePoll, LineStream,
    NetConnector, TcpControl, UdpDatagram,
};

pub const DEFAULT_PORT: u16 = 27015;
