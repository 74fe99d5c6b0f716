#![expect(missing_docs, reason = "test")]

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::thread;
use std::time::{Duration, Instant};

use ethchan::{Error, Step, TCP_CHANNEL_CAPACITY, TcpChannel, TcpChannelPool};
use pretty_assertions::assert_eq;
use socket2::SockRef;

fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

#[test]
fn pool_hands_out_capacity_channels() {
    let mut pool = TcpChannelPool::new();

    for _ in 0..TCP_CHANNEL_CAPACITY {
        let handle = pool.acquire().unwrap();
        let channel = pool.get(handle).unwrap();
        assert!(!channel.is_connected());
        assert!(!channel.has_socket());
    }

    assert!(matches!(
        pool.acquire(),
        Err(Error::PoolExhausted {
            capacity: TCP_CHANNEL_CAPACITY
        })
    ));
}

#[test]
fn open_send_close() {
    let (listener, port) = listener();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).unwrap();
        received
    });

    let mut channel = TcpChannel::new();
    channel.open("127.0.0.1", port).unwrap();
    assert!(channel.is_connected());
    assert_eq!(
        channel.server_address(),
        Some(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
    );

    assert_eq!(channel.send_data(b"hello ").unwrap(), 6);
    assert_eq!(channel.send_data(b"world").unwrap(), 5);
    channel.close().unwrap();

    assert_eq!(server.join().unwrap(), b"hello world");
}

#[test]
fn large_send_is_delivered_completely() {
    let (listener, port) = listener();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).unwrap();
        received.len()
    });

    let payload = vec![0x5Au8; 4 * 1024 * 1024];
    let mut channel = TcpChannel::new();
    channel.open("127.0.0.1", port).unwrap();

    assert_eq!(channel.send_data(&payload).unwrap(), payload.len());
    channel.close().unwrap();

    assert_eq!(server.join().unwrap(), payload.len());
}

#[test]
fn close_restores_defaults_and_allows_reopen() {
    let (listener, port) = listener();
    let server = thread::spawn(move || {
        for _ in 0..2 {
            let (mut stream, _) = listener.accept().unwrap();
            let mut sink = Vec::new();
            stream.read_to_end(&mut sink).unwrap();
        }
    });

    let mut channel = TcpChannel::new();
    channel.open("127.0.0.1", port).unwrap();
    channel.close().unwrap();

    assert!(!channel.is_connected());
    assert!(!channel.has_socket());

    channel.open("127.0.0.1", port).unwrap();
    assert!(channel.is_connected());
    channel.close().unwrap();

    server.join().unwrap();
}

#[test]
fn close_after_peer_reset_allows_reopen() {
    let (listener, port) = listener();
    let mut channel = TcpChannel::new();
    channel.open("127.0.0.1", port).unwrap();
    let (accepted, _) = listener.accept().unwrap();
    SockRef::from(&accepted)
        .set_linger(Some(Duration::ZERO))
        .unwrap();
    drop(accepted);

    let mut buffer = [0u8; 16];
    assert!(matches!(
        channel.recv_data(&mut buffer, Duration::from_secs(1)),
        Err(Error::Io(_))
    ));

    channel.close().unwrap();
    assert!(!channel.is_connected());
    assert!(!channel.has_socket());

    channel.open("127.0.0.1", port).unwrap();
    assert!(channel.is_connected());
}

#[test]
fn open_twice_is_rejected() {
    let (listener, port) = listener();
    let mut channel = TcpChannel::new();
    channel.open("127.0.0.1", port).unwrap();
    let (_accepted, _) = listener.accept().unwrap();

    assert!(matches!(
        channel.open("127.0.0.1", port),
        Err(Error::AlreadyConnected)
    ));
    assert!(channel.is_connected());
}

#[test]
fn refused_connection_leaves_channel_disconnected() {
    let (listener, port) = listener();
    drop(listener);

    let mut channel = TcpChannel::new();
    assert!(matches!(
        channel.open("127.0.0.1", port),
        Err(Error::Configuration {
            step: Step::Connect,
            ..
        })
    ));
    assert!(!channel.is_connected());
    assert!(!channel.has_socket());
}

#[test]
fn connect_timeout_allows_reachable_server() {
    let (listener, port) = listener();
    let mut channel = TcpChannel::new();
    channel.set_connect_timeout(Some(Duration::from_secs(1)));

    channel.open("127.0.0.1", port).unwrap();

    assert!(channel.is_connected());
    drop(listener);
}

#[test]
fn connect_timeout_bounds_unreachable_server() {
    let timeout = Duration::from_millis(200);
    let mut channel = TcpChannel::new();
    channel.set_connect_timeout(Some(timeout));

    let start = Instant::now();
    let result = channel.open("10.255.255.1", 9);
    let elapsed = start.elapsed();

    assert!(matches!(
        result,
        Err(Error::Configuration {
            step: Step::Connect,
            ..
        })
    ));
    assert!(
        elapsed < timeout + Duration::from_millis(300),
        "open took {elapsed:?}"
    );
    assert!(!channel.is_connected());
    assert!(!channel.has_socket());
}

#[test]
fn recv_data_reads_reply() {
    let (listener, port) = listener();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = [0u8; 4];
        stream.read_exact(&mut request).unwrap();
        assert_eq!(&request, b"ping");
        stream.write_all(b"pong").unwrap();
        stream
    });

    let mut channel = TcpChannel::new();
    channel.open("127.0.0.1", port).unwrap();
    channel.send_data(b"ping").unwrap();

    let mut buffer = [0u8; 16];
    let received = channel
        .recv_data(&mut buffer, Duration::from_secs(2))
        .unwrap();
    assert_eq!(&buffer[..received], b"pong");

    let _stream = server.join().unwrap();
    channel.close().unwrap();
}

#[test]
fn recv_data_times_out_on_silent_peer() {
    let (listener, port) = listener();
    let mut channel = TcpChannel::new();
    channel.open("127.0.0.1", port).unwrap();
    let (_accepted, _) = listener.accept().unwrap();

    let mut buffer = [0u8; 16];
    let start = Instant::now();
    let received = channel
        .recv_data(&mut buffer, Duration::from_millis(150))
        .unwrap();

    assert_eq!(received, 0);
    assert!(start.elapsed() >= Duration::from_millis(150));
    assert!(start.elapsed() < Duration::from_millis(400));
}

#[test]
fn recv_data_reports_closed_peer() {
    let (listener, port) = listener();
    let mut channel = TcpChannel::new();
    channel.open("127.0.0.1", port).unwrap();
    let (accepted, _) = listener.accept().unwrap();
    drop(accepted);

    let mut buffer = [0u8; 16];
    assert!(matches!(
        channel.recv_data(&mut buffer, Duration::from_secs(1)),
        Err(Error::ConnectionClosed)
    ));
}

#[test]
fn send_after_close_is_rejected() {
    let (listener, port) = listener();
    let mut channel = TcpChannel::new();
    channel.open("127.0.0.1", port).unwrap();
    let (_accepted, _) = listener.accept().unwrap();
    channel.close().unwrap();

    assert!(matches!(
        channel.send_data(b"late"),
        Err(Error::NotConnected)
    ));
}
