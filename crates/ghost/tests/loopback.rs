use std::io::{Read, Write};
use std::net::{TcpListener, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use glam::DVec3;

use ghost::net::codec::{decode_packet, encode_state};
use ghost::{
    ClientMessage, ConnectionState, GhostConfig, GhostSession, NetConnector, State, Transform,
    zone_hash,
};

const LEVEL: &str = "Zone_Library";

/// Binds UDP and TCP on the same loopback port, retrying if the TCP side is taken.
fn bind_relay() -> (UdpSocket, TcpListener, u16) {
    for _ in 0..20 {
        let udp = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = udp.local_addr().unwrap().port();
        if let Ok(tcp) = TcpListener::bind(("127.0.0.1", port)) {
            return (udp, tcp, port);
        }
    }
    panic!("no free port for relay");
}

fn wait_for<T>(timeout_ms: u64, mut f: impl FnMut() -> Option<T>) -> Option<T> {
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
fn test_session_over_loopback() {
    let (relay_udp, listener, port) = bind_relay();
    relay_udp
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let config = GhostConfig {
        port,
        name: "Ada".to_owned(),
        ..GhostConfig::default()
    };
    let connector = NetConnector::new("127.0.0.1", port, config.connect_timeout());
    let mut session = GhostSession::new(config, connector);

    session.on_level_load(LEVEL);
    session.tick(Instant::now());
    assert_eq!(session.state(), ConnectionState::Connecting);

    let (mut stream, _) = listener.accept().unwrap();
    stream
        .set_read_timeout(Some(Duration::from_millis(10)))
        .unwrap();

    // the Connect frame goes out once the session sees the handshake finish
    let mut received = Vec::new();
    let line = wait_for(2000, || {
        session.tick(Instant::now());
        let mut chunk = [0u8; 256];
        if let Ok(n) = stream.read(&mut chunk) {
            received.extend_from_slice(&chunk[..n]);
        }
        let end = received.iter().position(|&b| b == b'\n')?;
        Some(String::from_utf8(received[..end].to_vec()).unwrap())
    })
    .expect("Connect frame never arrived");
    assert_eq!(
        ClientMessage::parse(&line).unwrap(),
        ClientMessage::Connect {
            color: [255, 255, 255],
            name: "Ada".to_owned()
        }
    );

    stream
        .write_all(
            b"{\"type\":\"Connected\",\"id\":1,\"players\":[{\"id\":2,\"color\":[0,128,255],\"name\":\"Sybil\"}]}\n",
        )
        .unwrap();

    wait_for(2000, || {
        session.tick(Instant::now());
        session.is_connected().then_some(())
    })
    .expect("session never connected");
    assert_eq!(session.local_id(), Some(1));

    let local = Transform::new(DVec3::new(1.0, 2.0, 3.0), DVec3::ZERO);
    session.submit_local_pose(local, Instant::now());

    let mut buf = [0u8; 1024];
    let (size, client_addr) = relay_udp.recv_from(&mut buf).unwrap();
    let update = decode_packet(&buf[..size]).unwrap();
    assert_eq!(update.len(), 1);
    assert_eq!(update[0].peer_id, 1);
    assert_eq!(update[0].timestamp, 0);
    assert_eq!(update[0].zone, zone_hash(LEVEL));

    let remote = State::new(
        2,
        10_000,
        zone_hash(LEVEL),
        Transform::new(DVec3::new(-4.0, 0.5, 8.0), DVec3::new(0.0, 45.0, 0.0)),
    );
    relay_udp
        .send_to(&encode_state(&remote).unwrap(), client_addr)
        .unwrap();

    let frame = wait_for(2000, || {
        let now = Instant::now();
        session.tick(now);
        let frame = session.visible_ghosts(now);
        (!frame.visible.is_empty()).then_some(frame)
    })
    .expect("ghost never became visible");

    assert_eq!(frame.visible.len(), 1);
    let ghost = &frame.visible[0];
    assert_eq!(ghost.id, 2);
    assert_eq!(ghost.name, "Sybil");
    assert_eq!(ghost.color, [0, 128, 255]);
    assert_eq!(ghost.position, DVec3::new(-4.0, 0.5, 8.0));
    assert_eq!(session.stats().states_accepted, 1);

    drop(stream);
    wait_for(2000, || {
        session.tick(Instant::now());
        (session.state() == ConnectionState::Disconnected).then_some(())
    })
    .expect("server close not noticed");
    assert_eq!(session.visible_ghosts(Instant::now()).removed, vec![2]);
}
