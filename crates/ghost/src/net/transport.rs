use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::TransportError;

use super::codec::MAX_SERVER_PACKET_LEN;

const MAX_LINE_LEN: usize = 64 * 1024;
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Message(String),
    /// A frame arrived that is not valid text.
    Malformed(String),
    Closed,
    Error(String),
}

/// Reliable, ordered text channel carrying session events. Polling never blocks.
pub trait ControlChannel {
    fn send(&mut self, text: &str) -> io::Result<()>;
    fn poll(&mut self) -> Vec<ControlEvent>;
}

/// Unreliable packet channel to the relay. One call to `send` is one packet; `receive` drains
/// whatever packets are queued without blocking.
pub trait DatagramChannel {
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;
    fn receive(&mut self) -> io::Result<Vec<Vec<u8>>>;
}

/// Opens the two channels of a session.
pub trait Connector {
    type Control: ControlChannel;
    type Datagram: DatagramChannel;

    fn open_control(&mut self) -> Result<Self::Control, TransportError>;
    fn open_datagram(&mut self) -> Result<Self::Datagram, TransportError>;
}

#[derive(Debug, Default)]
pub struct LinePoll {
    pub lines: Vec<String>,
    /// Frames dropped for not being UTF-8, as error descriptions.
    pub rejected: Vec<String>,
    pub closed: bool,
}

/// Newline-delimited text frames over a non-blocking TCP stream.
#[derive(Debug)]
pub struct LineStream {
    stream: TcpStream,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
}

impl LineStream {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            inbound: Vec::new(),
            outbound: Vec::new(),
        })
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.outbound.extend_from_slice(line.as_bytes());
        self.outbound.push(b'\n');
        self.flush()
    }

    /// Writes as much buffered output as the socket accepts right now.
    pub fn flush(&mut self) -> io::Result<()> {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn poll_lines(&mut self) -> io::Result<LinePoll> {
        let mut poll = LinePoll::default();
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    poll.closed = true;
                    break;
                }
                Ok(n) => self.inbound.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        while let Some(end) = self.inbound.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.inbound.drain(..=end).collect();
            line.truncate(end);
            match String::from_utf8(line) {
                Ok(text) => {
                    let text = text.trim_end_matches('\r');
                    if !text.is_empty() {
                        poll.lines.push(text.to_owned());
                    }
                }
                Err(e) => poll
                    .rejected
                    .push(format!("control frame is not UTF-8: {}", e.utf8_error())),
            }
        }

        if self.inbound.len() > MAX_LINE_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "control frame exceeds maximum length",
            ));
        }

        Ok(poll)
    }
}

#[derive(Debug)]
enum ControlState {
    Connecting {
        socket: Socket,
        since: Instant,
        // frames sent before the handshake finished
        queued: Vec<String>,
    },
    Open(LineStream),
    Closed,
}

/// Control channel over TCP. The connect is started without blocking and completes inside
/// [`ControlChannel::poll`]; a failed or timed out connect is reported as `Closed`.
#[derive(Debug)]
pub struct TcpControl {
    state: ControlState,
    timeout: Duration,
}

impl TcpControl {
    pub fn connect(addr: SocketAddr, timeout: Duration) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;

        let state = match socket.connect(&SockAddr::from(addr)) {
            Ok(()) => ControlState::Open(LineStream::new(socket.into())?),
            Err(ref e) if connect_in_progress(e) => ControlState::Connecting {
                socket,
                since: Instant::now(),
                queued: Vec::new(),
            },
            Err(e) => return Err(e),
        };

        Ok(Self { state, timeout })
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ControlState::Open(_))
    }

    /// Moves a pending connect forward. Returns an error once the connect has failed.
    fn finish_connect(&mut self) -> io::Result<()> {
        let ControlState::Connecting { socket, since, .. } = &self.state else {
            return Ok(());
        };

        if let Some(e) = socket.take_error()? {
            return Err(e);
        }
        match socket.peer_addr() {
            Ok(_) => {}
            Err(ref e) if e.kind() == io::ErrorKind::NotConnected => {
                if since.elapsed() >= self.timeout {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"));
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let ControlState::Connecting { socket, queued, .. } =
            std::mem::replace(&mut self.state, ControlState::Closed)
        else {
            return Ok(());
        };
        let mut stream = LineStream::new(socket.into())?;
        for line in &queued {
            stream.send_line(line)?;
        }
        self.state = ControlState::Open(stream);
        Ok(())
    }
}

#[cfg(unix)]
fn connect_in_progress(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == Some(libc::EINPROGRESS)
}

#[cfg(not(unix))]
fn connect_in_progress(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}

impl ControlChannel for TcpControl {
    fn send(&mut self, text: &str) -> io::Result<()> {
        match &mut self.state {
            ControlState::Connecting { queued, .. } => {
                queued.push(text.to_owned());
                Ok(())
            }
            ControlState::Open(stream) => stream.send_line(text),
            ControlState::Closed => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    fn poll(&mut self) -> Vec<ControlEvent> {
        let mut events = Vec::new();

        if let Err(e) = self.finish_connect() {
            self.state = ControlState::Closed;
            events.push(ControlEvent::Error(e.to_string()));
            events.push(ControlEvent::Closed);
            return events;
        }

        let ControlState::Open(stream) = &mut self.state else {
            return events;
        };

        if let Err(e) = stream.flush() {
            events.push(ControlEvent::Error(e.to_string()));
        }

        match stream.poll_lines() {
            Ok(poll) => {
                events.extend(poll.rejected.into_iter().map(ControlEvent::Malformed));
                events.extend(poll.lines.into_iter().map(ControlEvent::Message));
                if poll.closed {
                    self.state = ControlState::Closed;
                    events.push(ControlEvent::Closed);
                }
            }
            Err(e) => {
                self.state = ControlState::Closed;
                events.push(ControlEvent::Error(e.to_string()));
                events.push(ControlEvent::Closed);
            }
        }

        events
    }
}

#[derive(Debug)]
pub struct UdpDatagram {
    socket: UdpSocket,
    // one byte over the largest valid packet so oversized packets are seen as such
    recv_buffer: [u8; MAX_SERVER_PACKET_LEN + 1],
}

impl UdpDatagram {
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let bind_addr: SocketAddr = if addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.connect(addr)?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            recv_buffer: [0u8; MAX_SERVER_PACKET_LEN + 1],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DatagramChannel for UdpDatagram {
    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.socket.send(data)
    }

    fn receive(&mut self) -> io::Result<Vec<Vec<u8>>> {
        let mut packets = Vec::new();

        loop {
            match self.socket.recv(&mut self.recv_buffer) {
                Ok(size) => packets.push(self.recv_buffer[..size].to_vec()),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if packets.is_empty() => return Err(e),
                Err(e) => {
                    log::debug!("UDP receive stopped early: {}", e);
                    break;
                }
            }
        }

        Ok(packets)
    }
}

/// Connects both channels to the same host and port, control over TCP and datagrams over UDP.
#[derive(Debug, Clone)]
pub struct NetConnector {
    address: String,
    port: u16,
    connect_timeout: Duration,
    // resolved when the control channel opens, reused for the datagram channel
    resolved: Option<SocketAddr>,
}

impl NetConnector {
    pub fn new(address: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            port,
            connect_timeout,
            resolved: None,
        }
    }

    fn resolve(&self) -> io::Result<SocketAddr> {
        // a literal address never touches DNS
        if let Ok(ip) = self.address.parse::<std::net::IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        (self.address.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address found for {}:{}", self.address, self.port),
                )
            })
    }
}

impl Connector for NetConnector {
    type Control = TcpControl;
    type Datagram = UdpDatagram;

    fn open_control(&mut self) -> Result<TcpControl, TransportError> {
        let addr = self.resolve().map_err(TransportError::Control)?;
        self.resolved = Some(addr);
        log::debug!("Opening control channel to {}", addr);
        TcpControl::connect(addr, self.connect_timeout).map_err(TransportError::Control)
    }

    fn open_datagram(&mut self) -> Result<UdpDatagram, TransportError> {
        let addr = match self.resolved.take() {
            Some(addr) => addr,
            None => self.resolve().map_err(TransportError::Datagram)?,
        };
        log::debug!("Opening datagram channel to {}", addr);
        UdpDatagram::connect(addr).map_err(TransportError::Datagram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;

    fn poll_until<T>(timeout_ms: u64, mut f: impl FnMut() -> Option<T>) -> Option<T> {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if let Some(value) = f() {
                return Some(value);
            }
            thread::sleep(Duration::from_millis(1));
        }
        None
    }

    #[test]
    fn test_line_stream_frames_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut control = TcpControl::connect(addr, Duration::from_secs(1)).unwrap();
        let (mut server_side, _) = listener.accept().unwrap();

        server_side.write_all(b"first\r\nsec").unwrap();
        server_side.write_all(b"ond\n\nthird").unwrap();

        let mut lines = Vec::new();
        poll_until(500, || {
            for event in control.poll() {
                if let ControlEvent::Message(line) = event {
                    lines.push(line);
                }
            }
            (lines.len() >= 2).then_some(())
        })
        .expect("lines not received");

        assert_eq!(lines, vec!["first".to_owned(), "second".to_owned()]);

        control.send("hello").unwrap();
        let mut buf = [0u8; 6];
        server_side.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello\n");
    }

    #[test]
    fn test_control_reports_close_once() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut control = TcpControl::connect(addr, Duration::from_secs(1)).unwrap();
        let (server_side, _) = listener.accept().unwrap();
        drop(server_side);

        poll_until(500, || control.poll().contains(&ControlEvent::Closed).then_some(()))
            .expect("close not reported");
        assert!(control.poll().is_empty());
    }

    #[test]
    fn test_control_rejects_invalid_utf8_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut control = TcpControl::connect(addr, Duration::from_secs(1)).unwrap();
        let (mut server_side, _) = listener.accept().unwrap();
        server_side.write_all(b"\xff\xfe\nafter\n").unwrap();

        let mut events = Vec::new();
        poll_until(500, || {
            events.extend(control.poll());
            (events.len() >= 2).then_some(())
        })
        .expect("frames not received");

        assert!(matches!(events[0], ControlEvent::Malformed(_)));
        assert_eq!(events[1], ControlEvent::Message("after".to_owned()));
    }

    #[test]
    fn test_refused_connect_closes() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        match TcpControl::connect(addr, Duration::from_secs(1)) {
            Err(_) => {}
            Ok(mut control) => {
                poll_until(1000, || control.poll().contains(&ControlEvent::Closed).then_some(()))
                    .expect("refused connect not reported");
                assert!(!control.is_open());
                assert!(control.send("late").is_err());
            }
        }
    }

    #[test]
    fn test_connect_does_not_block_and_times_out() {
        // non-routable, so the handshake never completes
        let addr: SocketAddr = "10.255.255.1:9".parse().unwrap();
        let start = Instant::now();
        let result = TcpControl::connect(addr, Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_millis(500));

        if let Ok(mut control) = result {
            control.send("queued").unwrap();
            poll_until(2000, || control.poll().contains(&ControlEvent::Closed).then_some(()))
                .expect("connect never gave up");
        }
    }

    #[test]
    fn test_frames_sent_while_connecting_are_delivered() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut control = TcpControl::connect(addr, Duration::from_secs(1)).unwrap();
        control.send("early").unwrap();
        let (mut server_side, _) = listener.accept().unwrap();
        server_side
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();

        let mut received = Vec::new();
        poll_until(1000, || {
            control.poll();
            let mut buf = [0u8; 16];
            if let Ok(n) = server_side.read(&mut buf) {
                received.extend_from_slice(&buf[..n]);
            }
            (received.len() >= 6).then_some(())
        })
        .expect("queued frame not flushed");
        assert_eq!(received, b"early\n");
    }

    #[test]
    fn test_udp_datagram_keeps_packet_boundaries() {
        let relay = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut datagram = UdpDatagram::connect(relay.local_addr().unwrap()).unwrap();

        datagram.send(&[7u8; 24]).unwrap();
        let mut buf = [0u8; 1024];
        let (size, from) = relay.recv_from(&mut buf).unwrap();
        assert_eq!(size, 24);

        relay.send_to(&[1u8; 48], from).unwrap();
        relay.send_to(&[2u8; 600], from).unwrap();

        let mut packets = Vec::new();
        poll_until(500, || {
            packets.extend(datagram.receive().unwrap());
            (packets.len() >= 2).then_some(())
        })
        .expect("packets not received");

        assert_eq!(packets[0].len(), 48);
        assert_eq!(packets[1].len(), MAX_SERVER_PACKET_LEN + 1);
    }
}
