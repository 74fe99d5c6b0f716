//! TCP channels.
//!
//! A [`TcpChannel`] holds at most one client connection at a time. [`TcpChannel::close`] returns
//! it to the disconnected state so it can be opened again.

use core::fmt::{Debug, Formatter};
use core::time::Duration;
use std::io::{ErrorKind, Write};
use std::net::{Shutdown, SocketAddrV4, TcpStream};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::IntoChannelError;
use crate::net::{check_timeout, parse_ipv4, read_until};
use crate::pool::{Channel, ChannelPool};
use crate::time::Deadline;
use crate::{Error, Result, Step};

/// Number of TCP channels a [`TcpChannelPool`] holds.
pub const TCP_CHANNEL_CAPACITY: usize = 10;

/// Pool of [`TCP_CHANNEL_CAPACITY`] TCP channels.
pub type TcpChannelPool = ChannelPool<TcpChannel, TCP_CHANNEL_CAPACITY>;

/// TCP channel descriptor.
#[derive(Default)]
pub struct TcpChannel {
    /// The connected stream, `None` while disconnected.
    stream: Option<TcpStream>,
    connected: bool,
    server_address: Option<SocketAddrV4>,
    /// Bound on the connecting handshake, `None` blocks until the system gives up.
    connect_timeout: Option<Duration>,
}

impl Debug for TcpChannel {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TcpChannel")
            .field("connected", &self.connected)
            .field("server_address", &self.server_address)
            .finish_non_exhaustive()
    }
}

impl Channel for TcpChannel {
    const KIND: &'static str = "tcp";
}

impl TcpChannel {
    /// Creates a disconnected channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether a connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Returns whether the channel holds a socket.
    pub fn has_socket(&self) -> bool {
        self.stream.is_some()
    }

    /// Returns the remote endpoint of the last [`Self::open`].
    pub fn server_address(&self) -> Option<SocketAddrV4> {
        self.server_address
    }

    /// Bounds the connecting handshake of subsequent opens.
    pub fn set_connect_timeout(&mut self, timeout: Option<Duration>) {
        self.connect_timeout = timeout;
    }

    /// Connects to `address:port`, `address` being a dotted-quad IPv4 address.
    ///
    /// Fails with [`Error::AlreadyConnected`] without side effects if a connection is open.
    pub fn open(&mut self, address: &str, port: u16) -> Result<()> {
        if self.connected {
            tracing::error!("tcp open: socket already open");
            return Err(Error::AlreadyConnected);
        }
        let address = parse_ipv4("tcp open", address)?;
        self.open_to(SocketAddrV4::new(address, port))
    }

    /// Connects to `server`.
    pub fn open_to(&mut self, server: SocketAddrV4) -> Result<()> {
        if self.connected {
            tracing::error!("tcp open: socket already open");
            return Err(Error::AlreadyConnected);
        }

        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(|error| error.into_channel_error("tcp open", Step::Create))?;

        self.server_address = Some(server);
        let target = SockAddr::from(server);
        let connected = match self.connect_timeout {
            Some(timeout) => socket.connect_timeout(&target, timeout),
            None => socket.connect(&target),
        };
        connected.map_err(|error| error.into_channel_error("tcp open", Step::Connect))?;

        self.stream = Some(TcpStream::from(socket));
        self.connected = true;
        tracing::debug!(%server, "tcp open: connected");
        Ok(())
    }

    /// Shuts down both directions of the connection.
    ///
    /// Does nothing if no connection is open. A connection the peer already tore down is reset
    /// as closed; on any other failure the channel stays connected.
    pub fn close(&mut self) -> Result<()> {
        let Some(stream) = self.stream.as_ref().filter(|_| self.connected) else {
            return Ok(());
        };

        match stream.shutdown(Shutdown::Both) {
            Ok(()) => {}
            Err(error) if error.kind() == ErrorKind::NotConnected => {
                tracing::error!(%error, "tcp close: shutdown() failed, peer already disconnected");
            }
            Err(error) => return Err(error.into_channel_error("tcp close", Step::Shutdown)),
        }

        self.stream = None;
        self.connected = false;
        tracing::debug!("tcp close: disconnected");
        Ok(())
    }

    /// Sends all of `data`.
    ///
    /// Partial writes are continued until the whole buffer is sent. Returns the number of bytes
    /// sent; fails with [`Error::ShortWrite`] if the peer stops accepting data.
    pub fn send_data(&self, data: &[u8]) -> Result<usize> {
        let mut stream = self.connected_stream("tcp send_data")?;

        let mut sent = 0;
        while sent < data.len() {
            match stream.write(&data[sent..]) {
                Ok(0) => {
                    tracing::warn!(
                        sent,
                        requested = data.len(),
                        "tcp send_data: error sending data"
                    );
                    return Err(Error::ShortWrite {
                        sent,
                        requested: data.len(),
                    });
                }
                Ok(written) => sent += written,
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) => return Err(error.into_channel_error("tcp send_data", Step::Send)),
            }
        }
        Ok(sent)
    }

    /// Receives whatever the peer sent, waiting at most `timeout`.
    ///
    /// Returns the number of bytes read into `buffer`, `0` if nothing arrived in time. Fails with
    /// [`Error::ConnectionClosed`] once the peer has closed its side.
    pub fn recv_data(&self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        const OPERATION: &str = "tcp recv_data";

        let stream = self.connected_stream(OPERATION)?;
        check_timeout(OPERATION, timeout)?;
        if buffer.is_empty() {
            return Ok(0);
        }

        match read_until(stream, buffer, Deadline::after(timeout)) {
            Ok(Some(0)) => {
                tracing::warn!("{OPERATION}: connection closed by peer");
                Err(Error::ConnectionClosed)
            }
            Ok(Some(received)) => Ok(received),
            Ok(None) => Ok(0),
            Err(error) => Err(error.into_channel_error(OPERATION, Step::Receive)),
        }
    }

    fn connected_stream(&self, operation: &str) -> Result<&TcpStream> {
        match self.stream.as_ref() {
            Some(stream) if self.connected => Ok(stream),
            _ => {
                tracing::error!("{operation}: socket not connected");
                Err(Error::NotConnected)
            }
        }
    }
}
