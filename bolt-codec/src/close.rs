use std::{fmt, str};

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// Status code used to indicate why an endpoint is closing the WebSocket connection.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum CloseCode {
    /// The purpose for which the connection was established has been fulfilled.
    Normal,
    /// The endpoint is going away, such as a server going down.
    Away,
    /// The endpoint is terminating the connection due to a protocol error.
    Protocol,
    /// The endpoint received a type of data it cannot accept.
    Unsupported,
    /// No status code was present in the close frame. Never sent on the wire.
    Status,
    /// The connection was dropped without a close frame. Never sent on the wire.
    Abnormal,
    /// The endpoint received data that was not consistent with the type of the message, such as
    /// non-UTF-8 data within a text message.
    Invalid,
    /// The endpoint received a message that violates its policy.
    Policy,
    /// The endpoint received a message that is too big for it to process.
    Size,
    /// The client expected the server to negotiate an extension that it did not.
    Extension,
    /// The server encountered an unexpected condition.
    Error,
    /// The server is restarting.
    Restart,
    /// The server is overloaded; try again later.
    Again,
    #[doc(hidden)]
    Tls,
    #[doc(hidden)]
    Reserved(u16),
    #[doc(hidden)]
    Iana(u16),
    #[doc(hidden)]
    Library(u16),
    #[doc(hidden)]
    Bad(u16),
}

impl CloseCode {
    /// Check if this `CloseCode` may appear in a close frame.
    #[must_use]
    pub fn is_allowed(self) -> bool {
        !matches!(
            self,
            Self::Bad(_) | Self::Reserved(_) | Self::Status | Self::Abnormal | Self::Tls
        )
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code: u16 = (*self).into();
        write!(f, "{}", code)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Restart => 1012,
            CloseCode::Again => 1013,
            CloseCode::Tls => 1015,
            CloseCode::Reserved(code) | CloseCode::Iana(code) | CloseCode::Library(code) | CloseCode::Bad(code) => code,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> CloseCode {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1002 => CloseCode::Protocol,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::Status,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::Invalid,
            1008 => CloseCode::Policy,
            1009 => CloseCode::Size,
            1010 => CloseCode::Extension,
            1011 => CloseCode::Error,
            1012 => CloseCode::Restart,
            1013 => CloseCode::Again,
            1015 => CloseCode::Tls,
            1016..=2999 => CloseCode::Reserved(code),
            3000..=3999 => CloseCode::Iana(code),
            4000..=4999 => CloseCode::Library(code),
            _ => CloseCode::Bad(code),
        }
    }
}

/// The status code and reason carried by a close frame.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CloseFrame {
    code: CloseCode,
    reason: String,
}

impl CloseFrame {
    /// Returns a `CloseFrame` struct.
    pub fn new<S: Into<String>>(code: CloseCode, reason: S) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Parses the payload of a close frame.
    ///
    /// An empty payload carries no status and yields `None`.
    ///
    /// # Errors
    ///
    /// Fails when the payload is a lone byte, holds a code that may not be sent, or its reason is not UTF-8.
    pub fn parse(payload: &[u8]) -> Result<Option<Self>> {
        match payload {
            [] => Ok(None),
            [_] => Err(Error::violation("close frame payload must not be a single byte")),
            [hi, lo, reason @ ..] => {
                let code = CloseCode::from(u16::from_be_bytes([*hi, *lo]));
                if !code.is_allowed() {
                    return Err(Error::violation(format!("close code {} is not allowed on the wire", code)));
                }

                let reason = str::from_utf8(reason)
                    .map_err(|e| Error::violation(format!("close reason is not UTF-8: {}", e)))?;

                Ok(Some(Self::new(code, reason)))
            }
        }
    }

    /// Returns the status code.
    pub fn code(&self) -> CloseCode {
        self.code
    }

    /// Returns the reason as text string.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Encodes the code and reason as a close frame payload.
    #[must_use]
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.reason.len());
        buf.put_u16(self.code.into());
        buf.put_slice(self.reason.as_bytes());
        buf.freeze()
    }
}

impl fmt::Display for CloseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}
