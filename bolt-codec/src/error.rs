use std::io;
use std::result;
use std::time::Duration;

use thiserror::Error;

/// Represents errors that can be exposed by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A frame header holds fields outside the bounds of the protocol.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The peer sent a sequence of frames that the protocol forbids.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The server refused to upgrade the connection, or answered the upgrade incorrectly.
    #[error("server rejected the handshake with HTTP {status}: {reason}")]
    HandshakeRejected {
        /// The HTTP status code of the server's response.
        status: u16,
        /// The reason phrase sent by the server, or a description of what was wrong with the response.
        reason: String,
    },

    /// The server's response to the upgrade request is not valid HTTP.
    #[error("invalid HTTP response: {0}")]
    Http(#[from] httparse::Error),

    /// No pong arrived within the heartbeat grace period.
    #[error("connection lost: no pong received within {0:?}")]
    ConnectionLost(Duration),

    /// Reading from or writing to the underlying stream failed.
    #[error(transparent)]
    Transport(#[from] io::Error),

    /// A message was sent while the connection was not open.
    #[error("the connection is not open")]
    NotConnected,

    /// The URL to connect to is not a `ws://` or `wss://` URL with a host.
    #[error("invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    /// An extra request header has a name or value that cannot be sent in an HTTP request.
    #[error("invalid HTTP header: {0}")]
    InvalidHeader(String),
}

impl Error {
    /// Returns `true` if this error ends the connection.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::NotConnected | Self::InvalidUrl(_) | Self::InvalidHeader(_))
    }

    /// Returns the HTTP status carried by a handshake rejection.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HandshakeRejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedFrame(message.into())
    }

    pub(crate) fn violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }
}

/// Represents results returned by the functions in this crate.
pub type Result<T> = result::Result<T, Error>;
