use std::time::Duration;

use bolt_codec::ProtocolVersion;
use url::Url;

use crate::{Error, Result};

const DEFAULT_HEARTBEAT_GRACE: Duration = Duration::from_secs(2);

// RFC 7230 `tchar`
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// How fatal errors reach the caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FailureMode {
    /// The call that hit the error returns it.
    Raise,
    /// The error is queued as an [`Event::Error`](enum.Event.html) and the call returns `Ok`.
    Event,
}

/// The settings of a connection. Built once by a [`ClientBuilder`](struct.ClientBuilder.html) and never changed.
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) url: Url,
    pub(crate) key: Option<[u8; 16]>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) heartbeat_interval: Option<Duration>,
    pub(crate) heartbeat_grace: Duration,
    pub(crate) failure_mode: FailureMode,
    pub(crate) strict: bool,
    pub(crate) protocol: ProtocolVersion,
    pub(crate) max_payload_len: usize,
}

impl Config {
    /// Returns the URL of the WebSocket endpoint.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the host to connect to.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Returns the port to connect to: the one in the URL, or 80 for `ws://` and 443 for `wss://`.
    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }

    /// Returns `true` for `wss://` URLs, which the transport must wrap in TLS.
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }

    /// Returns the extra headers sent with the upgrade request.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Returns the interval between heartbeat pings, if heartbeats are enabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }

    /// Returns how long to wait for a pong before declaring the connection lost.
    pub fn heartbeat_grace(&self) -> Duration {
        self.heartbeat_grace
    }

    /// Returns how fatal errors reach the caller.
    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Returns `true` if sending while the connection is not open is an error rather than a no-op.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Returns the protocol variant announced in the upgrade request.
    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Returns the longest frame payload that will be accepted.
    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }
}

/// Configures a WebSocket connection.
///
/// `ws://...` and `wss://...` URLs are supported.
#[derive(Clone, Debug)]
pub struct ClientBuilder {
    pub(crate) config: Config,
}

impl ClientBuilder {
    /// Creates a `ClientBuilder` that connects to a given WebSocket URL.
    ///
    /// # Errors
    ///
    /// This method returns an `Err` result if URL parsing fails, or the URL is not a `ws://` or `wss://` URL with a
    /// host.
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;
        Self::from_url(url)
    }

    /// Creates a `ClientBuilder` that connects to a given WebSocket URL.
    ///
    /// # Errors
    ///
    /// This method returns an `Err` result if the URL is not a `ws://` or `wss://` URL with a host.
    pub fn from_url(url: Url) -> Result<Self> {
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::InvalidUrl(format!("{}: scheme must be ws or wss", url)));
        }

        if url.host_str().map_or(true, str::is_empty) {
            return Err(Error::InvalidUrl(format!("{}: missing host", url)));
        }

        Ok(ClientBuilder {
            config: Config {
                url,
                key: None,
                headers: Vec::new(),
                heartbeat_interval: None,
                heartbeat_grace: DEFAULT_HEARTBEAT_GRACE,
                failure_mode: FailureMode::Raise,
                strict: false,
                protocol: ProtocolVersion::default(),
                max_payload_len: usize::MAX,
            },
        })
    }

    /// Adds an extra HTTP header to the upgrade request.
    ///
    /// # Errors
    ///
    /// This method returns an `Err` result if the name is not an HTTP token, or the value contains a CR, LF or NUL
    /// byte.
    pub fn add_header<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        if name.is_empty() || !name.bytes().all(is_token_byte) {
            return Err(Error::InvalidHeader(format!("{:?} is not a valid header name", name)));
        }

        if value.bytes().any(|b| matches!(b, b'\r' | b'\n' | b'\0')) {
            return Err(Error::InvalidHeader(format!("value of {} contains a control character", name)));
        }

        self.config.headers.push((name, value));
        Ok(self)
    }

    /// Sets the `Origin` header, replacing any set before.
    ///
    /// # Errors
    ///
    /// As for [`add_header`](#method.add_header).
    pub fn origin<S: Into<String>>(mut self, origin: S) -> Result<Self> {
        self.config.headers.retain(|(name, _)| !name.eq_ignore_ascii_case("Origin"));
        self.add_header("Origin", origin)
    }

    /// Sends a ping every `interval` once connected, and drops the connection if no pong follows.
    #[must_use]
    pub fn heartbeat(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = Some(interval);
        self
    }

    /// Sets how long to wait for a pong after each heartbeat ping. Defaults to 2 seconds.
    #[must_use]
    pub fn heartbeat_grace(mut self, grace: Duration) -> Self {
        self.config.heartbeat_grace = grace;
        self
    }

    /// Sets how fatal errors reach the caller. Defaults to [`FailureMode::Raise`](enum.FailureMode.html).
    #[must_use]
    pub fn failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.config.failure_mode = failure_mode;
        self
    }

    /// Makes sending while the connection is not open an error. By default it is silently dropped.
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.config.strict = strict;
        self
    }

    /// Selects the protocol variant announced in the upgrade request. Defaults to RFC 6455.
    #[must_use]
    pub fn protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.config.protocol = protocol;
        self
    }

    /// Rejects frames whose payload is longer than `max_payload_len` bytes.
    #[must_use]
    pub fn max_payload_len(mut self, max_payload_len: usize) -> Self {
        self.config.max_payload_len = max_payload_len;
        self
    }

    /// Returns the finished configuration.
    #[must_use]
    pub fn build(self) -> Config {
        self.config
    }

    // Not pub - used by the tests
    #[cfg(test)]
    pub(crate) fn key(mut self, key: &[u8]) -> Self {
        let mut a = [0; 16];
        a.copy_from_slice(key);
        self.config.key = Some(a);
        self
    }
}
