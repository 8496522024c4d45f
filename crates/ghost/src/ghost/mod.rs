mod interpolate;
mod record;
mod store;

use glam::DVec3;

pub use interpolate::sample;
pub use record::{GhostRecord, MAX_OFFSETS, MAX_STATES};
pub use store::{GhostStore, IngestReport};

/// A ghost as the host should draw it this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct GhostPose {
    pub id: u8,
    pub color: [u8; 3],
    pub name: String,
    pub position: DVec3,
    pub rotation: DVec3,
}

/// Result of one visibility query: ghosts to show and ids the host should despawn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GhostFrame {
    pub visible: Vec<GhostPose>,
    pub removed: Vec<u8>,
}
