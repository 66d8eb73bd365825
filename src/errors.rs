//! All the errors defined by this crate.

use std::io::{self, ErrorKind};
use thiserror::Error;

/// An error from the RCON wire format.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RconProtocolError {
    /// Payload too long to fit in a single packet.
    ///
    /// | Direction   | Body length limit |
    /// | ----------- | ----------------- |
    /// | Serverbound | 4086              |
    /// | Clientbound | 1 MiB - 10        |
    #[error("payload too long ({len} bytes, max {max})")]
    PayloadTooLong {
        /// Length of the offending body in bytes.
        len: usize,
        /// Largest body the protocol accepts in this direction.
        max: usize,
    },

    /// The length prefix of a recieved packet is smaller than an empty packet
    /// or larger than anything a server is allowed to send.
    #[error("invalid packet length {0}")]
    InvalidLength(i32),

    /// The two null bytes that end every packet were missing.
    #[error("missing packet terminator")]
    MissingTerminator,
}

/// Every error an RCON [`Client`](crate::rcon::Client) can produce.
///
/// Variants are error *kinds*; code that needs to react to a dropped
/// connection should use [`RconError::is_connection_closed`] instead of
/// inspecting the underlying I/O error.
#[derive(Error, Debug)]
pub enum RconError {
    /// The TCP connection could not be established.
    #[error("failed to dial {address}: {source}")]
    Dial {
        /// `host:port` that was dialed.
        address: String,
        /// Underlying I/O error (a timeout surfaces as [`ErrorKind::TimedOut`]).
        #[source]
        source: io::Error,
    },

    /// The server closed the connection or the stream ended mid-packet.
    #[error("connection closed")]
    ConnectionClosed,

    /// Any other I/O fault on an established connection.
    #[error("connection error: {0}")]
    Connection(#[source] io::Error),

    /// Authentication failed. You probably entered the wrong RCON password.
    #[error("authentication failed")]
    AuthFailed,

    /// A packet could not be built or parsed.
    #[error(transparent)]
    Encoding(#[from] RconProtocolError),

    /// A subscription command failed while the broadcast listener started.
    #[error("subscription command {command:?} failed: {source}")]
    Subscription {
        /// The command that was being run.
        command: String,
        /// Why it failed.
        #[source]
        source: Box<RconError>,
    },

    /// A non-broadcast pattern did not compile.
    #[error("invalid non-broadcast pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// The client has no live main connection. Call `connect` first.
    #[error("not connected")]
    NotConnected,

    /// The task owning the connection has stopped.
    #[error("connection task shut down")]
    Shutdown,
}

impl RconError {
    /// Whether this error means the peer is gone, which is what triggers
    /// reconnection when it is enabled.
    #[must_use]
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, RconError::ConnectionClosed)
    }
}

impl From<io::Error> for RconError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected => RconError::ConnectionClosed,
            _ => RconError::Connection(err),
        }
    }
}

/// Sending half of the channel background tasks report their errors on.
pub type ErrorSender = tokio::sync::mpsc::UnboundedSender<RconError>;
