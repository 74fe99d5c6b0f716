//! `ethchan` CLI
//!
//! Sends and receives single payloads through pooled channels, either towards explicit addresses
//! or through the named channels of a channel plan.

#![forbid(unsafe_code)]

use std::io::Write;
use std::net::SocketAddrV4;
use std::time::Duration;

use anyhow::{Context, bail};
use camino::Utf8PathBuf;
use ethchan::config::ChannelPlan;
use ethchan::{RECEIVE_BUFFER_SIZE, TcpChannelPool, UdpChannelPool};

/// ethchan command line interface
///
/// Exchanges raw UDP datagrams and TCP payloads for manual instrumentation.
#[derive(clap::Parser, Debug)]
#[command(disable_help_subcommand = true, version)]
pub struct Arguments {
    /// Channel plan naming the channels usable with `--channel`.
    #[arg(long, env = "ETHCHAN_CONFIG")]
    config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Send one UDP datagram.
    UdpSend {
        #[command(flatten)]
        destination: Destination,

        /// The payload, sent as UTF-8 text unless `--hex` is given.
        payload: String,

        /// Interpret the payload as hex-encoded bytes.
        #[arg(long)]
        hex: bool,
    },

    /// Wait for one UDP datagram and print it hex-encoded.
    UdpRecv {
        #[command(flatten)]
        listen: Listen,

        /// Receive timeout in milliseconds, defaults to the channel plan setting.
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Maximum number of bytes to receive.
        #[arg(long, default_value_t = RECEIVE_BUFFER_SIZE)]
        max_size: usize,

        /// Discard datagrams queued before the receive.
        #[arg(long)]
        flush: bool,
    },

    /// Discard every queued UDP datagram.
    UdpFlush {
        #[command(flatten)]
        listen: Listen,
    },

    /// Connect, send one TCP payload and close.
    TcpSend {
        #[command(flatten)]
        destination: Destination,

        /// The payload, sent as UTF-8 text unless `--hex` is given.
        payload: String,

        /// Interpret the payload as hex-encoded bytes.
        #[arg(long)]
        hex: bool,
    },
}

/// Where to send to.
#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
struct Destination {
    /// Destination IPv4 address and port.
    #[arg(long)]
    to: Option<SocketAddrV4>,

    /// Name of a channel in the channel plan.
    #[arg(long)]
    channel: Option<String>,
}

/// Where to receive on.
#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
struct Listen {
    /// Local UDP port.
    #[arg(long)]
    port: Option<u16>,

    /// Name of a channel in the channel plan.
    #[arg(long)]
    channel: Option<String>,
}

impl Arguments {
    /// Runs the command, writing results to `output`.
    pub fn run(self, output: &mut impl Write) -> anyhow::Result<()> {
        let plan = match &self.config {
            Some(path) => {
                ChannelPlan::load(path).with_context(|| format!("loading channel plan {path}"))?
            }
            None => ChannelPlan::default(),
        };

        match self.command {
            Command::UdpSend {
                destination,
                payload,
                hex,
            } => {
                let payload = decode_payload(&payload, hex)?;
                let sent = udp_send(&plan, destination, &payload)?;
                writeln!(output, "sent {sent} bytes")?;
            }
            Command::UdpRecv {
                listen,
                timeout_ms,
                max_size,
                flush,
            } => {
                let timeout = timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| plan.settings.receive_timeout());
                let received = udp_recv(&plan, listen, timeout, max_size, flush)?;
                writeln!(output, "{}", hex::encode(received))?;
            }
            Command::UdpFlush { listen } => {
                let discarded = udp_flush(&plan, listen)?;
                writeln!(output, "discarded {discarded} datagrams")?;
            }
            Command::TcpSend {
                destination,
                payload,
                hex,
            } => {
                let payload = decode_payload(&payload, hex)?;
                let sent = tcp_send(&plan, destination, &payload)?;
                writeln!(output, "sent {sent} bytes")?;
            }
        }

        Ok(())
    }
}

fn decode_payload(payload: &str, is_hex: bool) -> anyhow::Result<Vec<u8>> {
    if is_hex {
        hex::decode(payload.trim()).context("decoding hex payload")
    } else {
        Ok(payload.as_bytes().to_vec())
    }
}

fn udp_send(plan: &ChannelPlan, destination: Destination, payload: &[u8]) -> anyhow::Result<usize> {
    let mut pool = UdpChannelPool::new();
    let handle = pool_handle(&mut pool)?;
    let channel = pool.get_mut(handle)?;

    match destination {
        Destination { to: Some(to), .. } => channel.init_tx_to(to)?,
        Destination {
            channel: Some(name),
            ..
        } => {
            plan.udp(&name)?.apply(channel, &plan.settings)?;
            if !channel.is_tx_ready() {
                bail!("channel {name:?} has no destination");
            }
        }
        Destination { .. } => bail!("either --to or --channel is required"),
    }

    Ok(channel.send_data(payload)?)
}

fn udp_listen(
    pool: &mut UdpChannelPool,
    plan: &ChannelPlan,
    listen: Listen,
) -> anyhow::Result<ethchan::ChannelHandle<ethchan::UdpChannel>> {
    let handle = pool_handle(pool)?;
    let channel = pool.get_mut(handle)?;

    match listen {
        Listen {
            port: Some(port), ..
        } => {
            channel.set_flush_interval(plan.settings.flush_interval());
            channel.init_rx("0.0.0.0", port)?;
        }
        Listen {
            channel: Some(name),
            ..
        } => {
            plan.udp(&name)?.apply(channel, &plan.settings)?;
            if !channel.is_rx_ready() {
                bail!("channel {name:?} has no listen port");
            }
        }
        Listen { .. } => bail!("either --port or --channel is required"),
    }

    Ok(handle)
}

fn udp_recv(
    plan: &ChannelPlan,
    listen: Listen,
    timeout: Duration,
    max_size: usize,
    flush: bool,
) -> anyhow::Result<Vec<u8>> {
    let mut pool = UdpChannelPool::new();
    let handle = udp_listen(&mut pool, plan, listen)?;
    let channel = pool.get_mut(handle)?;

    if flush {
        let discarded = channel.flush()?;
        tracing::info!(discarded, "flushed before receiving");
    }

    let mut buffer = vec![0u8; max_size];
    let received = channel.recv_data(&mut buffer, timeout)?;
    if received == 0 {
        bail!("no datagram received within {timeout:?}");
    }
    buffer.truncate(received);
    Ok(buffer)
}

fn udp_flush(plan: &ChannelPlan, listen: Listen) -> anyhow::Result<usize> {
    let mut pool = UdpChannelPool::new();
    let handle = udp_listen(&mut pool, plan, listen)?;
    Ok(pool.get_mut(handle)?.flush()?)
}

fn tcp_send(plan: &ChannelPlan, destination: Destination, payload: &[u8]) -> anyhow::Result<usize> {
    let mut pool = TcpChannelPool::new();
    let handle = pool_handle(&mut pool)?;
    let channel = pool.get_mut(handle)?;

    match destination {
        Destination { to: Some(to), .. } => {
            channel.set_connect_timeout(plan.settings.connect_timeout());
            channel.open_to(to)?;
        }
        Destination {
            channel: Some(name),
            ..
        } => plan.tcp(&name)?.open(channel, &plan.settings)?,
        Destination { .. } => bail!("either --to or --channel is required"),
    }

    let sent = channel.send_data(payload).context("sending payload")?;
    channel.close().context("closing connection")?;
    Ok(sent)
}

fn pool_handle<C: ethchan::Channel, const N: usize>(
    pool: &mut ethchan::ChannelPool<C, N>,
) -> anyhow::Result<ethchan::ChannelHandle<C>> {
    pool.acquire().context("acquiring a channel")
}
