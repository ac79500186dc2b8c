#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

//! An event-driven WebSocket client with heartbeats.
//!
//! The heart of this crate is [`Connection`](struct.Connection.html), a state machine for one client connection. It
//! sends the HTTP upgrade request, validates the response, decodes frames as they arrive in arbitrary chunks,
//! reassembles fragmented messages, answers pings, runs the closing handshake and, optionally, watches the connection
//! with periodic pings. It performs no I/O itself: bytes and timer expiries are pushed into it, and it writes through a
//! [`Transport`](trait.Transport.html) and schedules through [`Timers`](trait.Timers.html).
//!
//! [`AsyncClient`](struct.AsyncClient.html) drives a `Connection` over any Tokio stream. TLS for `wss://...` servers
//! is left to the caller: wrap the stream and pass it to
//! [`ClientBuilder::async_connect_on`](struct.ClientBuilder.html#method.async_connect_on).

mod client;
mod config;
mod connection;
mod heartbeat;
mod request;

#[cfg(test)]
mod testing;

pub use crate::client::{AsyncClient, DelayTimers, Outbox};
pub use crate::config::{ClientBuilder, Config, FailureMode};
pub use crate::connection::{Connection, ConnectionState, Event, Transport};
pub use crate::heartbeat::{HeartbeatAction, HeartbeatMonitor, TimerId, TimerKind, Timers};

pub use bolt_codec::{CloseCode, CloseFrame, Error, Frame, Message, Opcode, ProtocolVersion, Result};

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use crate::{AsyncClient, ClientBuilder, Config, Connection, DelayTimers, Event, Outbox};

    assert_impl_all!(ClientBuilder: Send, Sync, Clone);
    assert_impl_all!(Config: Send, Sync, Clone);
    assert_impl_all!(Event: Send, Sync);
    assert_impl_all!(Connection<Outbox, DelayTimers>: Send);
    assert_impl_all!(AsyncClient<tokio::io::DuplexStream>: Send);
}
