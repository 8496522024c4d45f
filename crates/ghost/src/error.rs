use std::io;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("packet of invalid size {0}")]
    InvalidLength(usize),
    #[error("read of {wanted} bytes at offset {pos} past end of {len}-byte buffer")]
    UnexpectedEnd { pos: usize, wanted: usize, len: usize },
    #[error("write of {wanted} bytes at offset {pos} past end of {len}-byte buffer")]
    BufferFull { pos: usize, wanted: usize, len: usize },
}

/// Failure to establish one of the two session channels.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("control channel: {0}")]
    Control(#[source] io::Error),
    #[error("datagram channel: {0}")]
    Datagram(#[source] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("received {0} before Connected")]
    BeforeConnected(&'static str),
    #[error("received Connected after connection was already established")]
    DuplicateConnected,
    #[error("malformed control message: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
