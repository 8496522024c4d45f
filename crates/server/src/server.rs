use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::time::Duration;

use ghost::net::{LineStream, LinePoll};
use ghost::{ClientMessage, STATE_LEN, ServerMessage};

use crate::config::ServerConfig;
use crate::events::{DisconnectReason, ServerEvent};
use crate::relay::Relay;

const RECV_BUFFER_LEN: usize = 1024;

#[derive(Debug)]
struct Connection {
    stream: LineStream,
    addr: SocketAddr,
    // set once the Connect frame has been accepted
    player_id: Option<u8>,
}

/// What a control connection asked for during one poll.
enum ControlAction {
    Connect { color: [u8; 3], name: String },
    Close(DisconnectReason),
}

/// Relay server: a TCP listener for session control and a UDP socket for updates, both on the
/// same port.
pub struct RelayServer {
    listener: TcpListener,
    socket: UdpSocket,
    relay: Relay,
    config: ServerConfig,
    connections: BTreeMap<u64, Connection>,
    next_connection: u64,
    recv_buffer: [u8; RECV_BUFFER_LEN],
    stats: ServerStats,
    pending_events: VecDeque<ServerEvent>,
}

impl RelayServer {
    pub fn bind(bind_addr: &str, port: u16, config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind((bind_addr, port))?;
        listener.set_nonblocking(true)?;

        // port 0 resolves to whatever the listener got
        let socket = UdpSocket::bind(listener.local_addr()?)?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            listener,
            socket,
            relay: Relay::new(&config),
            config,
            connections: BTreeMap::new(),
            next_connection: 0,
            recv_buffer: [0u8; RECV_BUFFER_LEN],
            stats: ServerStats::default(),
            pending_events: VecDeque::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn idle_sleep(&self) -> Duration {
        self.config.idle_sleep
    }

    pub fn tick_once(&mut self) {
        if let Err(e) = self.accept_connections() {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("Accept error: {}", e),
            });
        }

        self.poll_connections();

        if let Err(e) = self.process_datagrams() {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("UDP error: {}", e),
            });
        }
    }

    fn accept_connections(&mut self) -> io::Result<()> {
        loop {
            let (stream, addr) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            };

            let stream = LineStream::new(stream)?;
            self.pending_events
                .push_back(ServerEvent::ClientConnecting { addr });

            let key = self.next_connection;
            self.next_connection += 1;
            self.connections.insert(
                key,
                Connection {
                    stream,
                    addr,
                    player_id: None,
                },
            );
        }
    }

    fn poll_connections(&mut self) {
        let keys: Vec<u64> = self.connections.keys().copied().collect();

        for key in keys {
            let Some(connection) = self.connections.get_mut(&key) else {
                continue;
            };

            let actions = match connection.stream.poll_lines() {
                Ok(poll) => read_actions(poll, connection.player_id.is_some()),
                Err(e) => {
                    log::debug!("Stream error from {}: {}", connection.addr, e);
                    vec![ControlAction::Close(DisconnectReason::StreamError)]
                }
            };

            for action in actions {
                match action {
                    ControlAction::Connect { color, name } => self.admit(key, color, name),
                    ControlAction::Close(reason) => {
                        self.close_connection(key, reason);
                        break;
                    }
                }
            }
        }
    }

    fn admit(&mut self, key: u64, color: [u8; 3], name: String) {
        let Some(addr) = self.connections.get(&key).map(|c| c.addr) else {
            return;
        };

        let Some((id, players)) = self.relay.connect(color, name.clone()) else {
            self.pending_events.push_back(ServerEvent::ConnectionDenied {
                addr,
                reason: "server full".to_owned(),
            });
            // dropping the stream closes it
            self.connections.remove(&key);
            return;
        };

        let connected = ServerMessage::Connected { id, players };
        if let Some(connection) = self.connections.get_mut(&key) {
            connection.player_id = Some(id);
            match connected.to_json() {
                Ok(text) => {
                    if let Err(e) = connection.stream.send_line(&text) {
                        log::debug!("Failed to send Connected to {}: {}", addr, e);
                    }
                }
                Err(e) => log::error!("Failed to encode Connected for {}: {}", addr, e),
            }
        }

        self.broadcast(id, &ServerMessage::PlayerJoined { id, color, name: name.clone() });
        self.pending_events
            .push_back(ServerEvent::ClientConnected { id, addr, name });
    }

    fn close_connection(&mut self, key: u64, reason: DisconnectReason) {
        let Some(connection) = self.connections.remove(&key) else {
            return;
        };
        let Some(id) = connection.player_id else {
            return;
        };

        if self.relay.disconnect(id) {
            self.broadcast(id, &ServerMessage::PlayerLeft { id });
            self.pending_events
                .push_back(ServerEvent::ClientDisconnected { id, reason });
        }
    }

    /// Sends a control frame to every admitted player except `except`.
    fn broadcast(&mut self, except: u8, message: &ServerMessage) {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to encode {}: {}", message.kind(), e);
                return;
            }
        };
        for connection in self.connections.values_mut() {
            if connection.player_id.is_none_or(|id| id == except) {
                continue;
            }
            if let Err(e) = connection.stream.send_line(&text) {
                log::debug!("Failed to send {} to {}: {}", message.kind(), connection.addr, e);
            }
        }
    }

    fn process_datagrams(&mut self) -> io::Result<()> {
        loop {
            let (size, addr) = match self.socket.recv_from(&mut self.recv_buffer) {
                Ok(received) => received,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                // a previous reply bounced; nothing to do for the sender
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            };
            self.stats.packets_received += 1;

            let Ok(update) = <[u8; STATE_LEN]>::try_from(&self.recv_buffer[..size]) else {
                log::debug!("Ignoring {} byte packet from {}", size, addr);
                continue;
            };

            let Some(states) = self.relay.update(update) else {
                continue;
            };
            if states.is_empty() {
                continue;
            }

            let reply = states.concat();
            match self.socket.send_to(&reply, addr) {
                Ok(_) => self.stats.packets_sent += 1,
                Err(e) => log::debug!("Failed to relay to {}: {}", addr, e),
            }
        }
    }

    /// Closes every control connection; the relay forgets all players.
    pub fn shutdown_connections(&mut self) {
        let keys: Vec<u64> = self.connections.keys().copied().collect();
        for key in keys {
            self.close_connection(key, DisconnectReason::Shutdown);
        }
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            player_count: self.relay.len(),
            max_players: self.relay.max_players(),
            ..self.stats.clone()
        }
    }
}

fn read_actions(poll: LinePoll, admitted: bool) -> Vec<ControlAction> {
    let mut actions = Vec::new();
    let mut admitted = admitted;

    if let Some(reason) = poll.rejected.first() {
        log::debug!("Rejecting control frame: {}", reason);
        actions.push(ControlAction::Close(DisconnectReason::StreamError));
        return actions;
    }

    for line in poll.lines {
        if admitted {
            log::debug!("Ignoring control frame after Connect: {}", line);
            continue;
        }
        match ClientMessage::parse(&line) {
            Ok(ClientMessage::Connect { color, name }) => {
                admitted = true;
                actions.push(ControlAction::Connect { color, name });
            }
            Err(e) => {
                log::debug!("Rejecting control frame: {}", e);
                actions.push(ControlAction::Close(DisconnectReason::StreamError));
                return actions;
            }
        }
    }

    if poll.closed {
        actions.push(ControlAction::Close(DisconnectReason::Graceful));
    }
    actions
}

#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub player_count: usize,
    pub max_players: usize,
    pub packets_received: u64,
    pub packets_sent: u64,
}
