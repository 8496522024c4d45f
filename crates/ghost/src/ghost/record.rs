use std::collections::VecDeque;

use crate::net::PeerInfo;
use crate::state::State;

use super::interpolate::sample;
use super::GhostPose;

/// States kept per ghost.
pub const MAX_STATES: usize = 20;
/// Clock offset samples averaged per ghost.
pub const MAX_OFFSETS: usize = 100;

/// Everything known about one remote player.
#[derive(Debug, Clone)]
pub struct GhostRecord {
    id: u8,
    color: [u8; 3],
    name: String,
    states: VecDeque<State>,
    // sender timestamp minus local receive time, for the last MAX_OFFSETS new-latest states
    offsets: VecDeque<i64>,
    total_offset: i64,
    cached: Option<State>,
}

impl GhostRecord {
    pub fn new(id: u8, color: [u8; 3], name: impl Into<String>) -> Self {
        Self {
            id,
            color,
            name: name.into(),
            states: VecDeque::with_capacity(MAX_STATES + 1),
            offsets: VecDeque::with_capacity(MAX_OFFSETS + 1),
            total_offset: 0,
            cached: None,
        }
    }

    pub fn from_info(info: PeerInfo) -> Self {
        Self::new(info.id, info.color, info.name)
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn color(&self) -> [u8; 3] {
        self.color
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn states(&self) -> &VecDeque<State> {
        &self.states
    }

    pub fn offset_count(&self) -> usize {
        self.offsets.len()
    }

    pub fn latest_timestamp(&self) -> Option<u32> {
        self.states.back().map(|s| s.timestamp)
    }

    /// Duplicates are refused, and once the buffer is full a state has to be newer than the
    /// oldest one kept.
    pub fn can_insert(&self, timestamp: u32) -> bool {
        if self.states.iter().any(|s| s.timestamp == timestamp) {
            return false;
        }
        match self.states.front() {
            Some(oldest) if self.states.len() >= MAX_STATES => oldest.timestamp < timestamp,
            _ => true,
        }
    }

    /// Inserts a state received at `local_millis`. Callers check [`Self::can_insert`] first.
    pub fn insert(&mut self, state: State, local_millis: u32) {
        let is_latest = self
            .latest_timestamp()
            .is_none_or(|latest| state.timestamp > latest);
        if is_latest {
            self.push_offset(state.timestamp as i64 - local_millis as i64);
        }

        // new states nearly always belong at the back
        let index = self
            .states
            .iter()
            .rposition(|s| s.timestamp < state.timestamp)
            .map_or(0, |i| i + 1);
        self.states.insert(index, state);

        if self.states.len() > MAX_STATES {
            self.states.pop_front();
        }
    }

    /// Inserts the state if admissible and reports whether it was.
    pub fn offer(&mut self, state: State, local_millis: u32) -> bool {
        if !self.can_insert(state.timestamp) {
            return false;
        }
        self.insert(state, local_millis);
        true
    }

    fn push_offset(&mut self, offset: i64) {
        self.total_offset += offset;
        self.offsets.push_back(offset);
        if self.offsets.len() > MAX_OFFSETS {
            if let Some(oldest) = self.offsets.pop_front() {
                self.total_offset -= oldest;
            }
        }
    }

    pub fn average_offset(&self) -> Option<i64> {
        if self.offsets.is_empty() {
            return None;
        }
        Some(self.total_offset / self.offsets.len() as i64)
    }

    /// Local time translated into this ghost's clock, held back by `buffer_ms`.
    pub fn query_millis(&self, local_millis: u32, buffer_ms: i64) -> Option<i64> {
        self.average_offset()
            .map(|offset| local_millis as i64 + offset - buffer_ms)
    }

    /// Recomputes the displayed state for `local_millis` and caches it.
    pub fn refresh(&mut self, local_millis: u32, buffer_ms: i64) -> Option<State> {
        let query = self.query_millis(local_millis, buffer_ms)?;
        let state = sample(&self.states, query)?;
        self.cached = Some(state);
        Some(state)
    }

    pub fn cached_state(&self) -> Option<&State> {
        self.cached.as_ref()
    }

    pub fn pose(&self, state: &State) -> GhostPose {
        GhostPose {
            id: self.id,
            color: self.color,
            name: self.name.clone(),
            position: state.position(),
            rotation: state.rotation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use glam::DVec3;

    use crate::state::Transform;

    fn state(timestamp: u32) -> State {
        State::new(
            1,
            timestamp,
            7,
            Transform::new(DVec3::splat(timestamp as f64), DVec3::ZERO),
        )
    }

    fn timestamps(record: &GhostRecord) -> Vec<u32> {
        record.states().iter().map(|s| s.timestamp).collect()
    }

    fn assert_sorted_and_bounded(record: &GhostRecord) {
        let ts = timestamps(record);
        assert!(ts.len() <= MAX_STATES);
        assert!(ts.windows(2).all(|w| w[0] < w[1]), "{ts:?}");
    }

    #[test]
    fn test_insert_keeps_order() {
        let mut record = GhostRecord::new(1, [0; 3], "a");
        for ts in [50, 10, 30, 20, 40, 60, 15] {
            assert!(record.offer(state(ts), 0));
        }
        assert_eq!(timestamps(&record), vec![10, 15, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn test_duplicate_is_noop() {
        let mut record = GhostRecord::new(1, [0; 3], "a");
        record.offer(state(10), 0);
        record.offer(state(20), 5);

        let before = timestamps(&record);
        let offsets_before = record.offset_count();
        assert!(!record.offer(state(10), 100));
        assert!(!record.offer(state(20), 100));
        assert_eq!(timestamps(&record), before);
        assert_eq!(record.offset_count(), offsets_before);
    }

    #[test]
    fn test_capacity_window() {
        let mut record = GhostRecord::new(1, [0; 3], "a");
        for ts in (1..=MAX_STATES as u32).map(|i| i * 10) {
            record.offer(state(ts), 0);
        }
        assert_eq!(record.states().len(), MAX_STATES);

        // older than everything kept
        assert!(!record.offer(state(5), 0));
        // newer than the oldest, lands in the middle and evicts the oldest
        assert!(record.offer(state(15), 0));
        assert_eq!(record.states().front().unwrap().timestamp, 15);
        assert!(record.offer(state(1000), 0));
        assert_eq!(record.states().front().unwrap().timestamp, 20);
        assert_sorted_and_bounded(&record);
    }

    #[test]
    fn test_random_insertions_stay_sorted() {
        let mut record = GhostRecord::new(1, [0; 3], "a");
        // deterministic scramble of 0..500
        let mut ts: u32 = 7;
        for _ in 0..500 {
            ts = (ts * 37 + 11) % 503;
            record.offer(state(ts), ts);
            assert_sorted_and_bounded(&record);
        }
    }

    #[test]
    fn test_offset_only_on_new_latest() {
        let mut record = GhostRecord::new(1, [0; 3], "a");
        record.offer(state(1000), 400);
        assert_eq!(record.average_offset(), Some(600));

        // backfill must not move the estimate
        record.offer(state(900), 0);
        assert_eq!(record.offset_count(), 1);
        assert_eq!(record.average_offset(), Some(600));

        record.offer(state(1100), 300);
        assert_eq!(record.offset_count(), 2);
        assert_eq!(record.average_offset(), Some(700));
    }

    #[test]
    fn test_offset_window_is_fifo() {
        let mut record = GhostRecord::new(1, [0; 3], "a");
        // first sample is an outlier that falls out of the window
        record.offer(state(1_000_000), 0);
        for i in 1..=MAX_OFFSETS as u32 {
            record.offer(state(1_000_000 + i), 1_000_000 + i - 50);
        }
        assert_eq!(record.offset_count(), MAX_OFFSETS);
        assert_eq!(record.average_offset(), Some(50));
    }

    #[test]
    fn test_negative_offset_average_truncates() {
        let mut record = GhostRecord::new(1, [0; 3], "a");
        record.offer(state(0), 1);
        record.offer(state(1), 3);
        // (-1 + -2) / 2
        assert_eq!(record.average_offset(), Some(-1));
    }

    #[test]
    fn test_refresh_requires_samples() {
        let mut record = GhostRecord::new(1, [0; 3], "a");
        assert!(record.refresh(1000, 100).is_none());
        assert!(record.cached_state().is_none());

        record.offer(state(500), 500);
        let refreshed = record.refresh(1000, 100).unwrap();
        assert_eq!(refreshed.timestamp, 500);
        assert_eq!(record.cached_state(), Some(&refreshed));
    }
}
