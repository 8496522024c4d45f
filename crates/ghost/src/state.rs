use glam::DVec3;

/// Position and rotation of a player. Rotation components are Euler angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub position: DVec3,
    pub rotation: DVec3,
}

impl Transform {
    pub fn new(position: DVec3, rotation: DVec3) -> Self {
        Self { position, rotation }
    }
}

/// A single timestamped sample of a player, as carried by one wire record.
///
/// `timestamp` is milliseconds since the sending player's own session start and is only
/// comparable with other states from the same player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct State {
    pub peer_id: u8,
    pub timestamp: u32,
    pub zone: u32,
    pub transform: Transform,
}

impl State {
    pub fn new(peer_id: u8, timestamp: u32, zone: u32, transform: Transform) -> Self {
        Self {
            peer_id,
            timestamp,
            zone,
            transform,
        }
    }

    #[inline]
    pub fn position(&self) -> DVec3 {
        self.transform.position
    }

    #[inline]
    pub fn rotation(&self) -> DVec3 {
        self.transform.rotation
    }
}
