use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: u8,
    pub color: [u8; 3],
    pub name: String,
}

/// Control frames sent by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    Connected { id: u8, players: Vec<PeerInfo> },
    PlayerJoined { id: u8, color: [u8; 3], name: String },
    PlayerLeft { id: u8 },
}

/// Control frames sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    Connect { color: [u8; 3], name: String },
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "Connected",
            ServerMessage::PlayerJoined { .. } => "PlayerJoined",
            ServerMessage::PlayerLeft { .. } => "PlayerLeft",
        }
    }

    /// Parses one control frame and checks the parts serde cannot: a roster must not list the
    /// receiving player or the same id twice.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let message: Self =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        if let ServerMessage::Connected { id, players } = &message {
            let mut seen = HashSet::with_capacity(players.len());
            for player in players {
                if player.id == *id {
                    return Err(ProtocolError::Malformed(format!(
                        "roster contains own id {id}"
                    )));
                }
                if !seen.insert(player.id) {
                    return Err(ProtocolError::Malformed(format!(
                        "roster lists id {} twice",
                        player.id
                    )));
                }
            }
        }

        Ok(message)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
