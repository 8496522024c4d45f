use std::collections::{HashMap, HashSet};

use crate::error::CodecError;
use crate::net::codec::{
    read_state_body, record_count, RECORD_AFTER_ID_LEN, RECORD_AFTER_TIMESTAMP_LEN,
};
use crate::net::{PeerInfo, WireReader};

use super::record::GhostRecord;
use super::GhostFrame;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub accepted: usize,
    pub skipped: usize,
}

/// All known ghosts, plus the ids the host currently has on screen.
#[derive(Debug)]
pub struct GhostStore {
    ghosts: HashMap<u8, GhostRecord>,
    spawned: HashSet<u8>,
    buffer_ms: i64,
}

impl GhostStore {
    pub fn new(buffer_ms: u32) -> Self {
        Self {
            ghosts: HashMap::new(),
            spawned: HashSet::new(),
            buffer_ms: buffer_ms as i64,
        }
    }

    /// Registers a peer, replacing any previous record under the same id.
    pub fn insert_peer(&mut self, info: PeerInfo) {
        self.ghosts.insert(info.id, GhostRecord::from_info(info));
    }

    pub fn remove_peer(&mut self, id: u8) -> Option<GhostRecord> {
        self.ghosts.remove(&id)
    }

    pub fn get(&self, id: u8) -> Option<&GhostRecord> {
        self.ghosts.get(&id)
    }

    pub fn contains(&self, id: u8) -> bool {
        self.ghosts.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.ghosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ghosts.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &GhostRecord> {
        self.ghosts.values()
    }

    /// Drops every record. The spawned set survives so the host still gets its removals.
    pub fn clear(&mut self) {
        self.ghosts.clear();
    }

    pub fn clear_spawned(&mut self) {
        self.spawned.clear();
    }

    pub fn is_spawned(&self, id: u8) -> bool {
        self.spawned.contains(&id)
    }

    /// Feeds one relay packet received at `local_millis` into the records.
    ///
    /// A packet with a bad length is rejected whole. Records for unknown ids, and records the
    /// target ghost does not accept, are stepped over.
    pub fn ingest(&mut self, packet: &[u8], local_millis: u32) -> Result<IngestReport, CodecError> {
        let count = record_count(packet.len())?;
        let mut reader = WireReader::new(packet);
        let mut report = IngestReport::default();

        for _ in 0..count {
            let peer_id = reader.read_u8()?;
            let Some(ghost) = self.ghosts.get_mut(&peer_id) else {
                reader.skip(RECORD_AFTER_ID_LEN)?;
                report.skipped += 1;
                continue;
            };

            let timestamp = reader.read_u32()?;
            if !ghost.can_insert(timestamp) {
                reader.skip(RECORD_AFTER_TIMESTAMP_LEN)?;
                report.skipped += 1;
                continue;
            }

            let state = read_state_body(&mut reader, peer_id, timestamp)?;
            ghost.insert(state, local_millis);
            report.accepted += 1;
        }

        Ok(report)
    }

    /// Samples every ghost for the current frame and works out spawns and removals.
    ///
    /// `local_millis` is `None` until the local session clock has started, in which case no
    /// ghost is displayable.
    pub fn frame(&mut self, local_millis: Option<u32>, zone: u32) -> GhostFrame {
        let mut frame = GhostFrame::default();

        for (&id, ghost) in &mut self.ghosts {
            let Some(state) = local_millis.and_then(|millis| ghost.refresh(millis, self.buffer_ms))
            else {
                continue;
            };
            if state.zone != zone {
                continue;
            }
            frame.visible.push(ghost.pose(&state));
            self.spawned.insert(id);
        }

        let ghosts = &self.ghosts;
        self.spawned.retain(|id| {
            let still_here = ghosts
                .get(id)
                .and_then(|ghost| ghost.cached_state())
                .is_some_and(|state| state.zone == zone);
            if !still_here {
                frame.removed.push(*id);
            }
            still_here
        });

        frame.visible.sort_by_key(|pose| pose.id);
        frame.removed.sort_unstable();
        frame
    }
}
