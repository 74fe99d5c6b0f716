//! UDP and TCP channels.
//!
//! Both channel kinds share the deadline-bounded receive loop implemented here: wait for the
//! socket to become readable for at most the time left until the deadline, read once, repeat.

use core::time::Duration;
use std::io::{ErrorKind, Read};
use std::net::{Ipv4Addr, TcpStream};

use socket2::Socket;

use crate::time::Deadline;
use crate::{Error, Result};

pub mod tcp;
pub mod udp;

/// Shortest wait handed to the socket.
///
/// A zero read timeout means "block forever" to the socket layer, so shorter remainders are
/// rounded up to this. A receive returns at most this late after its deadline.
pub const POLL_GRANULARITY: Duration = Duration::from_millis(1);

/// Parses a dotted-quad IPv4 address, reporting failures with the `operation` prefix.
pub(crate) fn parse_ipv4(operation: &str, address: &str) -> Result<Ipv4Addr> {
    address.parse().map_err(|_| {
        tracing::error!(address, "{operation}: invalid IPv4 address");
        Error::InvalidAddress(address.to_owned())
    })
}

/// Rejects zero timeouts before any I/O is attempted.
pub(crate) fn check_timeout(operation: &str, timeout: Duration) -> Result<()> {
    if timeout.is_zero() {
        tracing::error!("{operation}: invalid timeout value");
        return Err(Error::InvalidTimeout);
    }
    Ok(())
}

/// A socket that supports a single read bounded by a timeout.
pub(crate) trait TimedRead {
    /// Bounds the next reads to `wait`.
    fn set_wait(&self, wait: Duration) -> std::io::Result<()>;

    /// Performs one read.
    fn read_once(&self, buffer: &mut [u8]) -> std::io::Result<usize>;
}

impl TimedRead for Socket {
    fn set_wait(&self, wait: Duration) -> std::io::Result<()> {
        self.set_read_timeout(Some(wait))
    }

    fn read_once(&self, buffer: &mut [u8]) -> std::io::Result<usize> {
        let mut socket = self;
        socket.read(buffer)
    }
}

impl TimedRead for TcpStream {
    fn set_wait(&self, wait: Duration) -> std::io::Result<()> {
        self.set_read_timeout(Some(wait))
    }

    fn read_once(&self, buffer: &mut [u8]) -> std::io::Result<usize> {
        let mut stream = self;
        stream.read(buffer)
    }
}

/// Waits up to `wait` for the socket to become readable and reads once.
///
/// Returns `None` if nothing became readable in time.
pub(crate) fn read_within(
    reader: &impl TimedRead,
    buffer: &mut [u8],
    wait: Duration,
) -> std::io::Result<Option<usize>> {
    reader.set_wait(wait.max(POLL_GRANULARITY))?;
    match reader.read_once(buffer) {
        Ok(read) => Ok(Some(read)),
        Err(error)
            if matches!(
                error.kind(),
                ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
            ) =>
        {
            Ok(None)
        }
        Err(error) => Err(error),
    }
}

/// Reads once as soon as the socket becomes readable, giving up at `deadline`.
///
/// Returns `None` if the deadline elapsed first.
pub(crate) fn read_until(
    reader: &impl TimedRead,
    buffer: &mut [u8],
    deadline: Deadline,
) -> std::io::Result<Option<usize>> {
    loop {
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return Ok(None);
        }
        if let Some(read) = read_within(reader, buffer, remaining)? {
            return Ok(Some(read));
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::net::UdpSocket;
    use std::time::{Duration, Instant};

    use socket2::Socket;
    use tracing_test::traced_test;

    use super::{check_timeout, parse_ipv4, read_until, read_within};
    use crate::Error;
    use crate::time::Deadline;

    fn bound_pair() -> (UdpSocket, Socket) {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.connect(receiver.local_addr().unwrap()).unwrap();
        (sender, Socket::from(receiver))
    }

    #[test]
    #[traced_test]
    fn rejects_malformed_addresses() {
        assert_eq!(
            parse_ipv4("test", "10.1.2.3").unwrap(),
            std::net::Ipv4Addr::new(10, 1, 2, 3)
        );
        assert!(matches!(
            parse_ipv4("test", "10.1.2"),
            Err(Error::InvalidAddress(address)) if address == "10.1.2"
        ));
        assert!(logs_contain("test: invalid IPv4 address"));
    }

    #[test]
    #[traced_test]
    fn zero_timeout_is_rejected() {
        assert!(check_timeout("test", Duration::from_millis(1)).is_ok());
        assert!(matches!(
            check_timeout("test", Duration::ZERO),
            Err(Error::InvalidTimeout)
        ));
        assert!(logs_contain("test: invalid timeout value"));
    }

    #[test]
    fn read_within_times_out_without_data() {
        let (_sender, receiver) = bound_pair();
        let mut buffer = [0u8; 16];

        let start = Instant::now();
        let read = read_within(&receiver, &mut buffer, Duration::from_millis(50)).unwrap();

        assert_eq!(read, None);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn read_until_returns_pending_data() {
        let (sender, receiver) = bound_pair();
        sender.send(b"abc").unwrap();
        let mut buffer = [0u8; 16];

        let read = read_until(
            &receiver,
            &mut buffer,
            Deadline::after(Duration::from_secs(1)),
        )
        .unwrap();

        assert_eq!(read, Some(3));
        assert_eq!(&buffer[..3], b"abc");
    }

    #[test]
    fn read_until_gives_up_at_deadline() {
        let (_sender, receiver) = bound_pair();
        let mut buffer = [0u8; 16];

        let start = Instant::now();
        let read = read_until(
            &receiver,
            &mut buffer,
            Deadline::after(Duration::from_millis(100)),
        )
        .unwrap();

        assert_eq!(read, None);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(300));
    }
}
