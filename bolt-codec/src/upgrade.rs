use base64::display::Base64Display;
use bytes::{Buf, BytesMut};
use httparse::{Header, Response};
use sha1::Sha1;
use tokio_util::codec::Decoder;

use crate::{Error, Result};

type Sha1Digest = [u8; sha1::DIGEST_LENGTH];

const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

fn build_ws_accept(key: &str) -> Sha1Digest {
    let mut s = Sha1::new();
    s.update(key.as_bytes());
    s.update(WS_GUID);
    s.digest().bytes()
}

/// Returns the `Sec-WebSocket-Accept` value a server must send back for a given `Sec-WebSocket-Key`.
#[must_use]
pub fn accept_key(key: &str) -> String {
    base64::encode_config(&build_ws_accept(key), base64::STANDARD)
}

/// The variants of the WebSocket protocol that a client can ask for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// RFC 6455, sent as `Sec-WebSocket-Version: 13`.
    Rfc6455,
    /// The hybi-10 draft, which shares the RFC 6455 framing but announces itself as version 8.
    Hybi10,
}

impl ProtocolVersion {
    /// Returns the value of the `Sec-WebSocket-Version` header.
    #[must_use]
    pub fn version(self) -> u8 {
        match self {
            Self::Rfc6455 => 13,
            Self::Hybi10 => 8,
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::Rfc6455
    }
}

fn rejected(status: u16, reason: impl Into<String>) -> Error {
    Error::HandshakeRejected {
        status,
        reason: reason.into(),
    }
}

fn header<'a, 'header: 'a>(headers: &'a [Header<'header>], name: &'a str) -> Result<&'header [u8]> {
    let header = headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| rejected(101, format!("server didn't respond with {name} header", name = name)))?;

    Ok(header.value)
}

fn validate_server_response(expected_ws_accept: &Sha1Digest, data: &[u8]) -> Result<Option<usize>> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut response = Response::new(&mut headers);
    let status = response.parse(data)?;
    let response_len = match status {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Ok(None),
    };

    let code = response.code.unwrap_or_default();
    if code != 101 {
        return Err(rejected(code, response.reason.unwrap_or_default()));
    }

    let ws_accept_header = header(response.headers, "Sec-WebSocket-Accept")?;
    let ws_accept = base64::decode_config(ws_accept_header, base64::STANDARD).unwrap_or_default();
    if ws_accept[..] != expected_ws_accept[..] {
        return Err(rejected(
            101,
            format!(
                "server responded with incorrect Sec-WebSocket-Accept header: expected {expected}, got {actual}",
                expected = Base64Display::with_config(expected_ws_accept, base64::STANDARD),
                actual = String::from_utf8_lossy(ws_accept_header),
            ),
        ));
    }

    Ok(Some(response_len))
}

/// The client's half of the opening handshake.
///
/// Holds the `Sec-WebSocket-Key` sent to the server and decodes the server's response to the HTTP
/// `Connection: Upgrade` request. Decoding consumes only the response head; anything after it is the
/// start of the WebSocket stream and stays in the buffer.
pub struct Handshake {
    key: String,
    ws_accept: Sha1Digest,
}

impl Handshake {
    /// Creates a handshake with a fresh random key.
    #[must_use]
    pub fn new() -> Self {
        Self::with_key(rand::random())
    }

    /// Creates a handshake with the given 16 key bytes.
    #[must_use]
    pub fn with_key(key: [u8; 16]) -> Self {
        let key = base64::encode_config(&key, base64::STANDARD);
        let ws_accept = build_ws_accept(&key);
        Handshake { key, ws_accept }
    }

    /// Returns the base64 value of the `Sec-WebSocket-Key` header.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the value that the client expects to see in the server's `Sec-WebSocket-Accept` header.
    #[must_use]
    pub fn ws_accept(&self) -> String {
        base64::encode_config(&self.ws_accept, base64::STANDARD)
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for Handshake {
    type Item = ();
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<()>> {
        if let Some(response_len) = validate_server_response(&self.ws_accept, src)? {
            src.advance(response_len);
            tracing::debug!(response_len, trailing = src.len(), "server accepted the upgrade");
            Ok(Some(()))
        } else {
            Ok(None)
        }
    }
}
