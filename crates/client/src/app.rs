use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use glam::DVec3;

use ghost::{Connector, GhostFrame, GhostSession, SessionEvent, Transform};

use crate::stats::FrameStats;

const FRAME_TIME: Duration = Duration::from_micros(16_667);
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Synthetic local player walking a circle in the XY plane.
#[derive(Debug, Clone, Copy)]
pub struct CirclePath {
    pub center: DVec3,
    pub radius: f64,
    /// Degrees per second.
    pub speed: f64,
}

impl CirclePath {
    pub fn pose_at(&self, elapsed: Duration) -> Transform {
        let degrees = (self.speed * elapsed.as_secs_f64()).rem_euclid(360.0);
        let angle = degrees.to_radians();
        let position = self.center + DVec3::new(angle.cos(), angle.sin(), 0.0) * self.radius;
        // face along the direction of travel
        let yaw = (degrees + 90.0).rem_euclid(360.0);
        Transform::new(position, DVec3::new(0.0, yaw, 0.0))
    }
}

/// Headless host: plays the role of the game, loading a level, moving the local player and
/// "drawing" ghosts to the log.
pub struct App<C: Connector> {
    session: GhostSession<C>,
    level: String,
    path: CirclePath,
    on_screen: HashSet<u8>,
    stats: FrameStats,
    last_report: Option<Instant>,
}

impl<C: Connector> App<C> {
    pub fn new(session: GhostSession<C>, level: String, path: CirclePath) -> Self {
        Self {
            session,
            level,
            path,
            on_screen: HashSet::new(),
            stats: FrameStats::new(),
            last_report: None,
        }
    }

    pub fn run(&mut self, duration: Option<Duration>) {
        let start = Instant::now();
        self.session.on_level_load(&self.level);

        while duration.is_none_or(|d| start.elapsed() < d) {
            let frame_start = Instant::now();
            self.frame(start, frame_start);

            let spent = frame_start.elapsed();
            if spent < FRAME_TIME {
                thread::sleep(FRAME_TIME - spent);
            }
        }

        self.leave();
    }

    fn frame(&mut self, start: Instant, now: Instant) {
        self.session.tick(now);
        self.handle_events();

        let pose = self.path.pose_at(now - start);
        self.session.submit_local_pose(pose, now);

        let frame = self.session.visible_ghosts(now);
        self.draw(&frame);

        self.stats.record_frame(now);
        if self
            .last_report
            .is_none_or(|last| now - last >= REPORT_INTERVAL)
        {
            self.last_report = Some(now);
            self.report(&frame);
        }
    }

    fn handle_events(&mut self) {
        for event in self.session.drain_events() {
            match event {
                SessionEvent::Connecting => log::debug!("Waiting for player id"),
                SessionEvent::Connected { id, peers } => {
                    log::info!("Playing as {:02x} with {} others", id, peers);
                }
                SessionEvent::PeerJoined { id, name } => log::info!("{} ({:02x}) joined", name, id),
                SessionEvent::PeerLeft { id } => log::info!("{:02x} left", id),
                SessionEvent::ConnectFailed { reason } => log::warn!("Connect failed: {}", reason),
                SessionEvent::Disconnected { reason } => {
                    log::info!("Session ended: {}", reason.as_str());
                }
            }
        }
    }

    fn draw(&mut self, frame: &GhostFrame) {
        let mut spawned = 0;
        for pose in &frame.visible {
            if self.on_screen.insert(pose.id) {
                spawned += 1;
                log::info!(
                    "Spawn ghost {} ({:02x}) color #{:02x}{:02x}{:02x}",
                    pose.name,
                    pose.id,
                    pose.color[0],
                    pose.color[1],
                    pose.color[2]
                );
            }
        }
        for id in &frame.removed {
            self.on_screen.remove(id);
            log::info!("Despawn ghost {:02x}", id);
        }
        self.stats
            .record_ghosts(frame.visible.len(), spawned, frame.removed.len());
    }

    fn report(&self, frame: &GhostFrame) {
        let net = self.session.stats();
        log::debug!(
            "{:.0} fps, {} ghosts visible, {} sent, {} received ({} rejected), {} states accepted",
            self.stats.fps(),
            self.stats.visible(),
            net.packets_sent,
            net.packets_received,
            net.packets_rejected,
            net.states_accepted
        );
        for pose in &frame.visible {
            log::debug!(
                "  {} at ({:.1}, {:.1}, {:.1}) yaw {:.0}",
                pose.name,
                pose.position.x,
                pose.position.y,
                pose.position.z,
                pose.rotation.y
            );
        }
    }

    /// Loads a terminal level so the session shuts down the way a player quitting would.
    fn leave(&mut self) {
        match self.session.config().terminal_levels.first().cloned() {
            Some(level) => self.session.on_level_load(&level),
            None => log::warn!("No terminal level configured, leaving without one"),
        }
        let now = Instant::now();
        self.session.tick(now);
        self.handle_events();

        let frame = self.session.visible_ghosts(now);
        self.draw(&frame);
        log::info!(
            "Saw {} ghosts spawn and {} despawn",
            self.stats.spawned_total(),
            self.stats.removed_total()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io;

    use ghost::{
        ConnectionState, ControlChannel, ControlEvent, DatagramChannel, GhostConfig,
        TransportError,
    };

    struct Quiet;

    impl ControlChannel for Quiet {
        fn send(&mut self, _text: &str) -> io::Result<()> {
            Ok(())
        }

        fn poll(&mut self) -> Vec<ControlEvent> {
            Vec::new()
        }
    }

    impl DatagramChannel for Quiet {
        fn send(&mut self, data: &[u8]) -> io::Result<usize> {
            Ok(data.len())
        }

        fn receive(&mut self) -> io::Result<Vec<Vec<u8>>> {
            Ok(Vec::new())
        }
    }

    struct QuietConnector;

    impl Connector for QuietConnector {
        type Control = Quiet;
        type Datagram = Quiet;

        fn open_control(&mut self) -> Result<Quiet, TransportError> {
            Ok(Quiet)
        }

        fn open_datagram(&mut self) -> Result<Quiet, TransportError> {
            Ok(Quiet)
        }
    }

    fn app(terminal_levels: &[&str]) -> App<QuietConnector> {
        let config = GhostConfig {
            terminal_levels: terminal_levels.iter().map(|l| l.to_string()).collect(),
            ..GhostConfig::default()
        };
        let path = CirclePath {
            center: DVec3::ZERO,
            radius: 1.0,
            speed: 10.0,
        };
        App::new(
            GhostSession::new(config, QuietConnector),
            "Zone_Library".to_owned(),
            path,
        )
    }

    #[test]
    fn test_leave_uses_configured_terminal_level() {
        let mut app = app(&["Credits"]);
        app.session.on_level_load(&app.level);
        app.session.tick(Instant::now());
        assert_eq!(app.session.state(), ConnectionState::Connecting);

        app.leave();
        assert_eq!(app.session.state(), ConnectionState::Disconnected);
        assert!(!app.session.has_transport());
    }

    #[test]
    fn test_circle_path_pose() {
        let path = CirclePath {
            center: DVec3::new(10.0, 0.0, 5.0),
            radius: 2.0,
            speed: 90.0,
        };

        let start = path.pose_at(Duration::ZERO);
        assert!((start.position - DVec3::new(12.0, 0.0, 5.0)).length() < 1e-9);
        assert_eq!(start.rotation.y, 90.0);

        let quarter = path.pose_at(Duration::from_secs(1));
        assert!((quarter.position - DVec3::new(10.0, 2.0, 5.0)).length() < 1e-9);
        assert_eq!(quarter.rotation.y, 180.0);

        let full = path.pose_at(Duration::from_secs(4));
        assert!((full.position - start.position).length() < 1e-9);
    }
}
