//! Fixed-capacity pools of UDP and TCP channels for test instrumentation.
//!
//! A channel wraps one socket together with its addressing and readiness state. Channels live in
//! a [`ChannelPool`] sized at compile time and are addressed through [`ChannelHandle`]s:
//!
//! ```no_run
//! use core::time::Duration;
//! use ethchan::UdpChannelPool;
//!
//! # fn main() -> ethchan::Result<()> {
//! let mut pool = UdpChannelPool::new();
//! let handle = pool.acquire()?;
//! let channel = pool.get_mut(handle)?;
//!
//! channel.init_rx("0.0.0.0", 5001)?;
//! channel.init_tx("192.168.1.20", 5000)?;
//! channel.send_data(b"ping")?;
//!
//! let mut buffer = [0u8; 64];
//! let received = channel.recv_data(&mut buffer, Duration::from_millis(500))?;
//! # let _ = received;
//! # Ok(())
//! # }
//! ```
//!
//! All I/O is blocking. Receives wait at most until a deadline armed from the caller's timeout.
//! Every failure is returned to the caller and reported through [`tracing`].

#![forbid(unsafe_code)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod config;
mod error;
pub mod net;
pub mod pool;
pub mod time;

pub use error::{Error, Result, Step};
pub use net::tcp::{TCP_CHANNEL_CAPACITY, TcpChannel, TcpChannelPool};
pub use net::udp::{RECEIVE_BUFFER_SIZE, UDP_CHANNEL_CAPACITY, UdpChannel, UdpChannelPool};
pub use pool::{Channel, ChannelHandle, ChannelPool};
