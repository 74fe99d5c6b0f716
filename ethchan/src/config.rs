//! Channel plans: named channel endpoints loaded from TOML.
//!
//! ```toml
//! [settings]
//! receive_timeout_ms = 1000
//! flush_interval_ms = 100
//! connect_timeout_ms = 2000
//!
//! [udp.telemetry]
//! destination = "192.168.1.20:5000"
//! listen_port = 5001
//!
//! [tcp.control]
//! server = "192.168.1.20:6000"
//! ```
//!
//! Pool capacities are compile-time constants and cannot be set here.

use core::time::Duration;
use std::collections::BTreeMap;
use std::net::SocketAddrV4;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::net::udp::DEFAULT_FLUSH_INTERVAL;
use crate::{Error, Result, TcpChannel, UdpChannel};

/// Default receive timeout when the plan does not set one.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Named UDP and TCP endpoints plus shared settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelPlan {
    /// Settings applied to every channel set up from this plan.
    #[serde(default)]
    pub settings: Settings,

    /// UDP endpoints by name.
    #[serde(default)]
    pub udp: BTreeMap<String, UdpEndpoint>,

    /// TCP endpoints by name.
    #[serde(default)]
    pub tcp: BTreeMap<String, TcpEndpoint>,
}

/// Timing settings of a [`ChannelPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Receive timeout in milliseconds.
    pub receive_timeout_ms: u64,
    /// Wait per poll while flushing, in milliseconds.
    pub flush_interval_ms: u64,
    /// Bound on TCP connection setup in milliseconds, unbounded if absent.
    pub connect_timeout_ms: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            receive_timeout_ms: DEFAULT_RECEIVE_TIMEOUT.as_millis() as u64,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL.as_millis() as u64,
            connect_timeout_ms: None,
        }
    }
}

impl Settings {
    /// Returns the receive timeout.
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// Returns the wait per poll while flushing.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Returns the TCP connect timeout.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

/// A UDP channel entry: where to send and which local port to receive on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UdpEndpoint {
    /// Destination of sends, the transmit direction stays uninitialized if absent.
    pub destination: Option<SocketAddrV4>,
    /// Local port to receive on, the receive direction stays uninitialized if absent.
    pub listen_port: Option<u16>,
}

impl UdpEndpoint {
    /// Initializes the directions of `channel` this endpoint describes.
    pub fn apply(&self, channel: &mut UdpChannel, settings: &Settings) -> Result<()> {
        channel.set_flush_interval(settings.flush_interval());
        if let Some(destination) = self.destination {
            channel.init_tx_to(destination)?;
        }
        if let Some(port) = self.listen_port {
            channel.init_rx("0.0.0.0", port)?;
        }
        Ok(())
    }
}

/// A TCP channel entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpEndpoint {
    /// Server to connect to.
    pub server: SocketAddrV4,
}

impl TcpEndpoint {
    /// Connects `channel` to this endpoint's server.
    pub fn open(&self, channel: &mut TcpChannel, settings: &Settings) -> Result<()> {
        channel.set_connect_timeout(settings.connect_timeout());
        channel.open_to(self.server)
    }
}

impl ChannelPlan {
    /// Reads and parses the plan at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs_err::read_to_string(path).map_err(|error| {
            tracing::error!(%error, "channel plan: failed to read");
            Error::PlanRead(error)
        })?;
        let plan = text.parse()?;
        tracing::debug!(path = %path.display(), "channel plan: loaded");
        Ok(plan)
    }

    /// Returns the UDP endpoint called `name`.
    pub fn udp(&self, name: &str) -> Result<&UdpEndpoint> {
        self.udp.get(name).ok_or_else(|| unknown_channel(name))
    }

    /// Returns the TCP endpoint called `name`.
    pub fn tcp(&self, name: &str) -> Result<&TcpEndpoint> {
        self.tcp.get(name).ok_or_else(|| unknown_channel(name))
    }
}

impl FromStr for ChannelPlan {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|error| {
            tracing::error!(%error, "channel plan: failed to parse");
            Error::PlanParse(error)
        })
    }
}

fn unknown_channel(name: &str) -> Error {
    tracing::error!(name, "channel plan: unknown channel");
    Error::UnknownChannel(name.to_owned())
}
