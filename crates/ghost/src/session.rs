use std::collections::VecDeque;
use std::time::Instant;

use crate::config::GhostConfig;
use crate::error::ProtocolError;
use crate::ghost::{GhostFrame, GhostStore};
use crate::net::codec::{encode_state, record_count};
use crate::net::{
    ClientMessage, Connector, ControlChannel, ControlEvent, DatagramChannel, NetworkStats,
    PeerInfo, ServerMessage,
};
use crate::state::{State, Transform};
use crate::sync::{Outbound, UpdateScheduler};
use crate::zone::zone_hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    LevelExit,
    ServerClosed,
    ProtocolViolation,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::LevelExit => "left the level",
            DisconnectReason::ServerClosed => "server closed the connection",
            DisconnectReason::ProtocolViolation => "protocol violation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectFailed { reason: String },
    Connecting,
    Connected { id: u8, peers: usize },
    PeerJoined { id: u8, name: String },
    PeerLeft { id: u8 },
    Disconnected { reason: DisconnectReason },
}

/// Client side of a ghost session.
///
/// Driven by the host once per frame: [`Self::tick`], then [`Self::submit_local_pose`] and
/// [`Self::visible_ghosts`] in any order. Connection changes requested during a frame are
/// applied at the start of the next tick, disconnect before connect.
pub struct GhostSession<C: Connector> {
    config: GhostConfig,
    connector: C,
    control: Option<C::Control>,
    datagram: Option<C::Datagram>,
    state: ConnectionState,
    queue_connect: bool,
    queue_disconnect: Option<DisconnectReason>,
    // assigned by Connected; nothing is sent until it is set
    local_id: Option<u8>,
    zone: u32,
    store: GhostStore,
    scheduler: UpdateScheduler,
    stats: NetworkStats,
    pending_events: VecDeque<SessionEvent>,
}

impl<C: Connector> GhostSession<C> {
    pub fn new(config: GhostConfig, connector: C) -> Self {
        Self {
            store: GhostStore::new(config.ghost_buffer_ms),
            scheduler: UpdateScheduler::new(config.update_rate),
            connector,
            control: None,
            datagram: None,
            state: ConnectionState::Disconnected,
            queue_connect: false,
            queue_disconnect: None,
            local_id: None,
            zone: 0,
            stats: NetworkStats::default(),
            pending_events: VecDeque::new(),
            config,
        }
    }

    pub fn config(&self) -> &GhostConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn has_transport(&self) -> bool {
        self.control.is_some() || self.datagram.is_some()
    }

    pub fn local_id(&self) -> Option<u8> {
        self.local_id
    }

    pub fn zone(&self) -> u32 {
        self.zone
    }

    pub fn store(&self) -> &GhostStore {
        &self.store
    }

    pub fn scheduler(&self) -> &UpdateScheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = SessionEvent> + '_ {
        self.pending_events.drain(..)
    }

    /// Called by the host whenever a level finishes loading.
    pub fn on_level_load(&mut self, level: &str) {
        // a level load destroys every ghost actor the host had
        self.store.clear_spawned();
        self.zone = zone_hash(level);

        if self.config.is_terminal_level(level) {
            self.request_disconnect(DisconnectReason::LevelExit);
        } else {
            self.queue_connect = true;
        }
        log::debug!("Loaded level {} (zone {:08x})", level, self.zone);
    }

    fn request_disconnect(&mut self, reason: DisconnectReason) {
        self.queue_disconnect.get_or_insert(reason);
    }

    pub fn tick(&mut self, now: Instant) {
        if let Some(reason) = self.queue_disconnect.take() {
            self.disconnect(reason);
        }
        if std::mem::take(&mut self.queue_connect) {
            self.connect();
        }

        if self.local_id.is_some() {
            if let Some(outbound) = self.scheduler.advance(now) {
                self.send_update(outbound);
            }
        }

        self.poll_control();
        self.poll_datagram(now);
    }

    fn connect(&mut self) {
        if self.has_transport() {
            return;
        }

        log::info!(
            "Connecting to {}:{}",
            self.config.address,
            self.config.port
        );

        let request = ClientMessage::Connect {
            color: self.config.color,
            name: self.config.name.clone(),
        };
        let request = match request.to_json() {
            Ok(text) => text,
            Err(e) => {
                self.connect_failed(format!("encoding connect request: {}", e));
                return;
            }
        };

        let mut control = match self.connector.open_control() {
            Ok(control) => control,
            Err(e) => {
                self.connect_failed(e.to_string());
                return;
            }
        };
        let datagram = match self.connector.open_datagram() {
            Ok(datagram) => datagram,
            Err(e) => {
                self.connect_failed(e.to_string());
                return;
            }
        };

        if let Err(e) = control.send(&request) {
            self.connect_failed(format!("control channel: {}", e));
            return;
        }

        self.control = Some(control);
        self.datagram = Some(datagram);
        self.state = ConnectionState::Connecting;
        self.pending_events.push_back(SessionEvent::Connecting);
    }

    fn connect_failed(&mut self, reason: String) {
        log::error!("Error connecting: {}", reason);
        self.state = ConnectionState::Disconnected;
        self.pending_events
            .push_back(SessionEvent::ConnectFailed { reason });
    }

    fn disconnect(&mut self, reason: DisconnectReason) {
        let was_active = self.has_transport();

        self.control = None;
        self.datagram = None;
        self.state = ConnectionState::Disconnected;
        self.local_id = None;
        // the spawned set is kept so the host is told to remove what it spawned
        self.store.clear();
        self.scheduler.reset();

        if was_active {
            log::info!("Disconnected: {}", reason.as_str());
            self.pending_events
                .push_back(SessionEvent::Disconnected { reason });
        }
    }

    fn poll_control(&mut self) {
        let Some(control) = self.control.as_mut() else {
            return;
        };

        for event in control.poll() {
            match event {
                ControlEvent::Message(text) => self.handle_control_message(&text),
                ControlEvent::Malformed(reason) => {
                    log::warn!("{}", ProtocolError::Malformed(reason));
                    self.request_disconnect(DisconnectReason::ProtocolViolation);
                }
                ControlEvent::Closed => {
                    log::info!("Control channel closed by server");
                    self.request_disconnect(DisconnectReason::ServerClosed);
                }
                ControlEvent::Error(e) => log::error!("Control channel error: {}", e),
            }
        }
    }

    /// Applies one control frame. Anything out of order or malformed ends the session at the
    /// next tick.
    pub fn handle_control_message(&mut self, text: &str) {
        let result = ServerMessage::parse(text).and_then(|message| self.apply(message));
        if let Err(e) = result {
            log::warn!("{}", e);
            self.request_disconnect(DisconnectReason::ProtocolViolation);
        }
    }

    fn apply(&mut self, message: ServerMessage) -> Result<(), ProtocolError> {
        let kind = message.kind();
        match message {
            ServerMessage::Connected { id, players } => {
                if self.local_id.is_some() {
                    return Err(ProtocolError::DuplicateConnected);
                }
                self.local_id = Some(id);
                self.state = ConnectionState::Connected;

                let peers = players.len();
                for player in players {
                    self.store.insert_peer(player);
                }

                log::info!("Connected with player id {} ({} others online)", id, peers);
                self.pending_events
                    .push_back(SessionEvent::Connected { id, peers });
            }
            ServerMessage::PlayerJoined { id, color, name } => {
                let local_id = self.local_id.ok_or(ProtocolError::BeforeConnected(kind))?;
                if id == local_id {
                    return Err(ProtocolError::Malformed(format!(
                        "PlayerJoined for own id {id}"
                    )));
                }

                log::info!("Player {} joined as {}", id, name);
                self.pending_events.push_back(SessionEvent::PeerJoined {
                    id,
                    name: name.clone(),
                });
                self.store.insert_peer(PeerInfo { id, color, name });
            }
            ServerMessage::PlayerLeft { id } => {
                self.local_id.ok_or(ProtocolError::BeforeConnected(kind))?;

                log::info!("Player {} left", id);
                self.store.remove_peer(id);
                self.pending_events.push_back(SessionEvent::PeerLeft { id });
            }
        }
        Ok(())
    }

    fn poll_datagram(&mut self, now: Instant) {
        let Some(datagram) = self.datagram.as_mut() else {
            return;
        };

        match datagram.receive() {
            Ok(packets) => {
                for packet in packets {
                    self.ingest_datagram(&packet, now);
                }
            }
            // not fatal; the control channel decides when the session is over
            Err(e) => log::error!("UDP error: {}", e),
        }
    }

    /// Feeds one relay packet received at `now` into the ghost store.
    pub fn ingest_datagram(&mut self, packet: &[u8], now: Instant) {
        self.stats.record_received(packet.len());

        if let Err(e) = record_count(packet.len()) {
            self.stats.packets_rejected += 1;
            log::warn!("Dropping packet: {}", e);
            return;
        }

        // offsets are measured against our own session clock
        let Some(local_millis) = self.scheduler.millis_since_start(now) else {
            return;
        };

        match self.store.ingest(packet, local_millis) {
            Ok(report) => {
                self.stats.states_accepted += report.accepted as u64;
                self.stats.states_skipped += report.skipped as u64;
            }
            Err(e) => {
                self.stats.packets_rejected += 1;
                log::warn!("Dropping packet: {}", e);
            }
        }
    }

    /// Offers the local player's pose. Returns the session time in milliseconds, or 0 while no
    /// player id has been assigned.
    pub fn submit_local_pose(&mut self, transform: Transform, now: Instant) -> u32 {
        if self.local_id.is_none() {
            return 0;
        }

        if let Some(outbound) = self.scheduler.submit(transform, now) {
            self.send_update(outbound);
        }
        self.scheduler.millis_since_start(now).unwrap_or(0)
    }

    fn send_update(&mut self, outbound: Outbound) {
        let Some(id) = self.local_id else {
            return;
        };
        let state = State::new(id, outbound.timestamp, self.zone, outbound.transform);

        let bytes = match encode_state(&state) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("Failed to encode update: {}", e);
                return;
            }
        };

        if let Some(datagram) = self.datagram.as_mut() {
            match datagram.send(&bytes) {
                Ok(sent) => self.stats.record_sent(sent),
                Err(e) => log::error!("UDP error: {}", e),
            }
        }
    }

    /// Ghosts to draw this frame in the current zone, and ids the host should despawn.
    pub fn visible_ghosts(&mut self, now: Instant) -> GhostFrame {
        let local_millis = self.scheduler.millis_since_start(now);
        self.store.frame(local_millis, self.zone)
    }
}
