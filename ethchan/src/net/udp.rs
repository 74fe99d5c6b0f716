//! UDP channels.
//!
//! A [`UdpChannel`] owns at most one datagram socket. The transmit and receive directions are set
//! up independently with [`UdpChannel::init_tx`] and [`UdpChannel::init_rx`], both of which create
//! the socket on first use and reuse it afterwards.

use core::fmt::{Debug, Formatter};
use core::time::Duration;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::IntoChannelError;
use crate::net::{check_timeout, parse_ipv4, read_until, read_within};
use crate::pool::{Channel, ChannelPool};
use crate::time::Deadline;
use crate::{Error, Result, Step};

/// Number of UDP channels a [`UdpChannelPool`] holds.
pub const UDP_CHANNEL_CAPACITY: usize = 7;

/// Size of the scratch buffer used by [`UdpChannel::recv_from`] and [`UdpChannel::flush`].
pub const RECEIVE_BUFFER_SIZE: usize = 4096;

/// Default wait per poll while flushing.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Pool of [`UDP_CHANNEL_CAPACITY`] UDP channels.
pub type UdpChannelPool = ChannelPool<UdpChannel, UDP_CHANNEL_CAPACITY>;

/// UDP channel descriptor.
pub struct UdpChannel {
    /// The underlying socket, `None` until a direction is initialized.
    socket: Option<Socket>,
    tx_ready: bool,
    rx_ready: bool,
    /// Destination of [`Self::send_data`].
    server_address: Option<SocketAddrV4>,
    /// Local address the socket is bound to for receiving.
    client_address: Option<SocketAddrV4>,
    receive_buffer: Box<[u8; RECEIVE_BUFFER_SIZE]>,
    flush_interval: Duration,
}

impl Default for UdpChannel {
    fn default() -> Self {
        Self {
            socket: None,
            tx_ready: false,
            rx_ready: false,
            server_address: None,
            client_address: None,
            receive_buffer: Box::new([0; RECEIVE_BUFFER_SIZE]),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl Debug for UdpChannel {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UdpChannel")
            .field("has_socket", &self.socket.is_some())
            .field("tx_ready", &self.tx_ready)
            .field("rx_ready", &self.rx_ready)
            .field("server_address", &self.server_address)
            .field("client_address", &self.client_address)
            .finish_non_exhaustive()
    }
}

impl Channel for UdpChannel {
    const KIND: &'static str = "udp";
}

impl UdpChannel {
    /// Creates a channel without a socket and with both directions uninitialized.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether [`Self::init_tx`] succeeded.
    pub fn is_tx_ready(&self) -> bool {
        self.tx_ready
    }

    /// Returns whether [`Self::init_rx`] succeeded.
    pub fn is_rx_ready(&self) -> bool {
        self.rx_ready
    }

    /// Returns whether the underlying socket has been created.
    pub fn has_socket(&self) -> bool {
        self.socket.is_some()
    }

    /// Returns the destination configured by [`Self::init_tx`].
    pub fn server_address(&self) -> Option<SocketAddrV4> {
        self.server_address
    }

    /// Returns the local address configured by [`Self::init_rx`].
    pub fn client_address(&self) -> Option<SocketAddrV4> {
        self.client_address
    }

    /// Returns the address the socket is actually bound to.
    ///
    /// This resolves the port chosen by the system when [`Self::init_rx`] was given port `0`.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .as_ref()
            .ok_or(Error::SocketNotBound)?
            .local_addr()
            .map_err(Error::Io)?
            .as_socket()
            .ok_or(Error::SocketNotBound)
    }

    /// Sets the wait per poll used by [`Self::flush`].
    pub fn set_flush_interval(&mut self, interval: Duration) {
        self.flush_interval = interval;
    }

    /// Returns the socket, creating it on first use.
    fn ensure_socket(&mut self, operation: &str) -> Result<&Socket> {
        let socket = match self.socket.take() {
            Some(socket) => socket,
            None => {
                let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
                    .map_err(|error| error.into_channel_error(operation, Step::Create))?;
                tracing::debug!("{operation}: datagram socket created");
                socket
            }
        };
        Ok(self.socket.insert(socket))
    }

    /// Initializes the transmit direction towards `address:port`.
    ///
    /// `address` is a dotted-quad IPv4 address. Calling this again reuses the existing socket and
    /// only replaces the destination.
    pub fn init_tx(&mut self, address: &str, port: u16) -> Result<()> {
        self.tx_ready = false;
        self.ensure_socket("udp init_tx")?;
        let address = parse_ipv4("udp init_tx", address)?;
        self.init_tx_to(SocketAddrV4::new(address, port))
    }

    /// Initializes the transmit direction towards `destination`.
    pub fn init_tx_to(&mut self, destination: SocketAddrV4) -> Result<()> {
        self.tx_ready = false;
        self.ensure_socket("udp init_tx")?;

        self.server_address = Some(destination);
        self.tx_ready = true;
        tracing::debug!(%destination, "udp init_tx: transmit direction ready");
        Ok(())
    }

    /// Initializes the receive direction on `port`.
    ///
    /// The socket is always bound to the wildcard address `0.0.0.0`; `address` is accepted for
    /// symmetry with [`Self::init_tx`] only. Port `0` binds an ephemeral port, see
    /// [`Self::local_addr`].
    pub fn init_rx(&mut self, address: &str, port: u16) -> Result<()> {
        self.rx_ready = false;
        let socket = self.ensure_socket("udp init_rx")?;

        let client_address = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        tracing::debug!(
            requested = address,
            %client_address,
            "udp init_rx: binding to the wildcard address"
        );

        // Lets a restarted process rebind while the old socket lingers.
        socket
            .set_reuse_address(true)
            .map_err(|error| error.into_channel_error("udp init_rx", Step::ReuseAddress))?;
        socket
            .bind(&SockAddr::from(client_address))
            .map_err(|error| error.into_channel_error("udp init_rx", Step::Bind))?;

        self.client_address = Some(client_address);
        self.rx_ready = true;
        tracing::debug!(%client_address, "udp init_rx: receive direction ready");
        Ok(())
    }

    /// Sends `data` as one datagram to the configured destination.
    ///
    /// Returns the number of bytes sent. Fails with [`Error::TxNotReady`] without touching the
    /// socket unless [`Self::init_tx`] succeeded.
    pub fn send_data(&self, data: &[u8]) -> Result<usize> {
        let (true, Some(socket), Some(destination)) =
            (self.tx_ready, self.socket.as_ref(), self.server_address)
        else {
            tracing::error!("udp send_data: transmit channel is not initialized");
            return Err(Error::TxNotReady);
        };

        socket
            .send_to(data, &SockAddr::from(destination))
            .map_err(|error| error.into_channel_error("udp send_data", Step::Send))
    }

    /// Receives one datagram through the scratch buffer and copies it into `buffer`.
    ///
    /// Waits at most `timeout` for a non-empty datagram. Returns the size of the datagram received,
    /// or `0` if nothing arrived in time. At most `buffer.len()` bytes are copied.
    pub fn recv_from(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        const OPERATION: &str = "udp recv_from";

        let Self {
            socket,
            rx_ready,
            receive_buffer,
            ..
        } = self;
        let socket = receive_socket(OPERATION, *rx_ready, socket.as_ref(), timeout)?;

        let received = receive_datagram(
            OPERATION,
            socket,
            &mut receive_buffer[..],
            Deadline::after(timeout),
        )?;

        let copied = received.min(buffer.len());
        buffer[..copied].copy_from_slice(&receive_buffer[..copied]);
        if copied < received {
            tracing::warn!(
                received,
                copied,
                "{OPERATION}: datagram truncated to the destination buffer"
            );
        }
        Ok(received)
    }

    /// Receives one datagram directly into `buffer`.
    ///
    /// The length of `buffer` is the expected datagram size, any excess bytes of a larger
    /// datagram are discarded. Waits at most `timeout`; returns the number of bytes received or
    /// `0` if nothing arrived in time.
    pub fn recv_data(&self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        const OPERATION: &str = "udp recv_data";

        let socket = receive_socket(OPERATION, self.rx_ready, self.socket.as_ref(), timeout)?;

        if buffer.is_empty() {
            tracing::warn!("{OPERATION}: empty destination buffer, nothing to receive");
            return Ok(0);
        }

        receive_datagram(OPERATION, socket, buffer, Deadline::after(timeout))
    }

    /// Discards every datagram queued on the socket, then zeroes the scratch buffer.
    ///
    /// Polls with the flush interval until a poll finds nothing. Returns the number of discarded
    /// datagrams. The scratch buffer is zeroed even if the receive direction is not initialized.
    pub fn flush(&mut self) -> Result<usize> {
        let Self {
            socket,
            rx_ready,
            receive_buffer,
            flush_interval,
            ..
        } = self;

        let result = match (*rx_ready, socket.as_ref()) {
            (true, Some(socket)) => drain(socket, &mut receive_buffer[..], *flush_interval),
            _ => {
                tracing::error!("udp flush: receive channel is not initialized");
                Err(Error::RxNotReady)
            }
        };

        receive_buffer.fill(0);
        result
    }

    /// Closes the socket and returns the channel to its initial state.
    pub fn close(&mut self) {
        *self = Self::default();
        tracing::debug!("udp close: channel reset");
    }
}

/// Checks the receive preconditions and returns the socket to read from.
fn receive_socket<'s>(
    operation: &str,
    rx_ready: bool,
    socket: Option<&'s Socket>,
    timeout: Duration,
) -> Result<&'s Socket> {
    let (true, Some(socket)) = (rx_ready, socket) else {
        tracing::error!("{operation}: receive channel is not initialized");
        return Err(Error::RxNotReady);
    };
    check_timeout(operation, timeout)?;
    Ok(socket)
}

/// Receives the first non-empty datagram before `deadline`, `0` if none arrived.
fn receive_datagram(
    operation: &str,
    socket: &Socket,
    buffer: &mut [u8],
    deadline: Deadline,
) -> Result<usize> {
    loop {
        match read_until(socket, buffer, deadline) {
            // Zero-length datagrams carry nothing for the caller.
            Ok(Some(0)) => continue,
            Ok(Some(received)) => return Ok(received),
            Ok(None) => return Ok(0),
            Err(error) => return Err(error.into_channel_error(operation, Step::Receive)),
        }
    }
}

/// Reads and discards datagrams until a poll of `interval` finds nothing.
fn drain(socket: &Socket, buffer: &mut [u8], interval: Duration) -> Result<usize> {
    let mut discarded = 0;
    loop {
        match read_within(socket, buffer, interval) {
            Ok(Some(_)) => discarded += 1,
            Ok(None) => break,
            Err(error) => return Err(error.into_channel_error("udp flush", Step::Receive)),
        }
    }
    if discarded > 0 {
        tracing::debug!(discarded, "udp flush: pending datagrams discarded");
    }
    Ok(discarded)
}
