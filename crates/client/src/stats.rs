use std::collections::VecDeque;
use std::time::Instant;

const SAMPLE_COUNT: usize = 60;

/// Rolling frame rate plus the ghost counts of the last frame.
pub struct FrameStats {
    frame_times: VecDeque<Instant>,
    fps: f32,
    visible: usize,
    spawned_total: usize,
    removed_total: usize,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameStats {
    pub fn new() -> Self {
        Self {
            frame_times: VecDeque::with_capacity(SAMPLE_COUNT),
            fps: 0.0,
            visible: 0,
            spawned_total: 0,
            removed_total: 0,
        }
    }

    pub fn record_frame(&mut self, now: Instant) {
        if self.frame_times.len() >= SAMPLE_COUNT {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(now);

        if let Some(oldest) = self.frame_times.front() {
            let elapsed = now.duration_since(*oldest).as_secs_f32();
            if elapsed > 0.0 {
                self.fps = (self.frame_times.len() - 1) as f32 / elapsed;
            }
        }
    }

    pub fn record_ghosts(&mut self, visible: usize, spawned: usize, removed: usize) {
        self.visible = visible;
        self.spawned_total += spawned;
        self.removed_total += removed;
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn visible(&self) -> usize {
        self.visible
    }

    pub fn spawned_total(&self) -> usize {
        self.spawned_total
    }

    pub fn removed_total(&self) -> usize {
        self.removed_total
    }
}
