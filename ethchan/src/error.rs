use core::fmt::{Display, Formatter};

/// A result with the [`Error`] error.
pub type Result<T> = core::result::Result<T, Error>;

/// A socket primitive that failed while setting up or using a channel.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone, Hash)]
pub enum Step {
    /// Creating the socket.
    Create,
    /// Enabling `SO_REUSEADDR`.
    ReuseAddress,
    /// Binding to the local address.
    Bind,
    /// Connecting to the remote address.
    Connect,
    /// Shutting down both directions of a connection.
    Shutdown,
    /// Sending data.
    Send,
    /// Receiving data.
    Receive,
}

impl Display for Step {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Step::Create => write!(f, "socket()"),
            Step::ReuseAddress => write!(f, "setsockopt(SO_REUSEADDR)"),
            Step::Bind => write!(f, "bind()"),
            Step::Connect => write!(f, "connect()"),
            Step::Shutdown => write!(f, "shutdown()"),
            Step::Send => write!(f, "send()"),
            Step::Receive => write!(f, "recv()"),
        }
    }
}

/// Errors reported by channel pools, channels and channel plans.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Every slot of the pool is allocated.
    #[error("requested too many channels, the pool holds {capacity}")]
    PoolExhausted {
        /// Capacity of the exhausted pool.
        capacity: usize,
    },

    /// The handle does not refer to a currently allocated slot.
    #[error("the channel handle is stale or out of range")]
    InvalidHandle,

    /// The underlying socket could not be created.
    #[error("failed to create socket")]
    SocketCreation(#[source] std::io::Error),

    /// A socket configuration step failed.
    #[error("{step} failed")]
    Configuration {
        /// The failing step.
        step: Step,
        /// The error reported by the operating system.
        #[source]
        source: std::io::Error,
    },

    /// The textual address is not a valid IPv4 address.
    #[error("invalid IPv4 address {0:?}")]
    InvalidAddress(String),

    /// The channel has no socket bound to a local address.
    #[error("the socket is not bound to a local address")]
    SocketNotBound,

    /// The transmit direction has not been initialized.
    #[error("the transmit direction is not initialized")]
    TxNotReady,

    /// The receive direction has not been initialized.
    #[error("the receive direction is not initialized")]
    RxNotReady,

    /// The channel is not connected.
    #[error("the socket is not connected")]
    NotConnected,

    /// The channel is already connected.
    #[error("the socket is already connected")]
    AlreadyConnected,

    /// The peer closed the connection.
    #[error("the connection was closed by the peer")]
    ConnectionClosed,

    /// A receive was requested with a zero timeout.
    #[error("invalid timeout value")]
    InvalidTimeout,

    /// The peer stopped accepting data before the whole buffer was sent.
    #[error("sent {sent} of {requested} bytes")]
    ShortWrite {
        /// Bytes written before the transfer stalled.
        sent: usize,
        /// Bytes the caller asked to send.
        requested: usize,
    },

    /// A send or receive failed.
    #[error("I/O failure")]
    Io(#[source] std::io::Error),

    /// No channel of that name exists in the channel plan.
    #[error("unknown channel {0:?}")]
    UnknownChannel(String),

    /// The channel plan could not be read.
    #[error("failed to read the channel plan")]
    PlanRead(#[source] std::io::Error),

    /// The channel plan is not valid TOML or does not match the expected layout.
    #[error("invalid channel plan")]
    PlanParse(#[from] toml::de::Error),
}

/// Helper trait to report socket errors and convert them into channel errors.
///
/// We cannot implement `From` as the failing step must travel with the error.
pub(crate) trait IntoChannelError {
    /// Logs the failure with the `operation` prefix and converts it into an [`Error`].
    fn into_channel_error(self, operation: &str, step: Step) -> Error;
}

impl IntoChannelError for std::io::Error {
    fn into_channel_error(self, operation: &str, step: Step) -> Error {
        tracing::error!(error = %self, "{operation}: {step} failed");
        match step {
            Step::Create => Error::SocketCreation(self),
            Step::Send | Step::Receive => Error::Io(self),
            step => Error::Configuration { step, source: self },
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::io::ErrorKind;

    use super::{Error, IntoChannelError, Step};

    #[test]
    fn steps_map_onto_error_classes() {
        let error = std::io::Error::from(ErrorKind::PermissionDenied);
        assert!(matches!(
            error.into_channel_error("test", Step::Create),
            Error::SocketCreation(_)
        ));

        let error = std::io::Error::from(ErrorKind::AddrInUse);
        assert!(matches!(
            error.into_channel_error("test", Step::Bind),
            Error::Configuration {
                step: Step::Bind,
                ..
            }
        ));

        let error = std::io::Error::from(ErrorKind::BrokenPipe);
        assert!(matches!(
            error.into_channel_error("test", Step::Send),
            Error::Io(_)
        ));
    }

    #[test]
    fn display() {
        let error = Error::Configuration {
            step: Step::ReuseAddress,
            source: std::io::Error::from(ErrorKind::Other),
        };
        assert_eq!(error.to_string(), "setsockopt(SO_REUSEADDR) failed");
        assert_eq!(
            Error::PoolExhausted { capacity: 7 }.to_string(),
            "requested too many channels, the pool holds 7"
        );
    }
}
