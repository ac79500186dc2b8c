use std::collections::VecDeque;
use std::fmt;
use std::io;

use bolt_codec::{CloseCode, CloseFrame, Frame, FrameCodec, Handshake, Message, MessageAssembler, Opcode};
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::heartbeat::{HeartbeatAction, HeartbeatMonitor, TimerId, Timers};
use crate::request::build_request;
use crate::{Config, Error, FailureMode, Result};

/// The duplex byte stream underneath a connection.
///
/// Bytes read from the stream are handed to [`Connection::on_data`](struct.Connection.html#method.on_data), and the
/// end of the stream to [`Connection::on_close`](struct.Connection.html#method.on_close).
pub trait Transport {
    /// Writes all of `data` to the stream.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Ends the stream.
    fn close(&mut self) -> io::Result<()>;
}

/// The lifecycle of a connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The upgrade request has been sent and the response has not arrived.
    Connecting,
    /// The handshake succeeded; messages flow both ways.
    Connected,
    /// A close frame has been sent or received, and the stream is being shut down.
    Closing,
    /// The stream has ended.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        })
    }
}

/// Notifications raised by a connection, in the order they happened.
#[derive(Debug)]
pub enum Event {
    /// The connection entered the `Connecting` state.
    Connecting,
    /// The connection entered the `Connected` state.
    Connect,
    /// The connection entered the `Closing` state.
    Closing,
    /// The connection entered the `Closed` state. Holds the server's close frame, if it sent one with a status.
    Close(Option<CloseFrame>),
    /// Follows each of the named state events, carrying the new state.
    StateChange(ConnectionState),
    /// A complete message arrived.
    Message(Message),
    /// A fatal error, raised this way under [`FailureMode::Event`](enum.FailureMode.html).
    Error(Error),
}

/// The client side of one WebSocket connection, driven by transport and timer events.
///
/// A `Connection` does no I/O of its own. Whatever owns the stream calls [`on_data`](#method.on_data) with each
/// chunk of bytes read, [`on_close`](#method.on_close) when the stream ends and [`on_timer`](#method.on_timer) when a
/// heartbeat timer fires. Bytes are written through the [`Transport`](trait.Transport.html) and timers scheduled
/// through [`Timers`](trait.Timers.html). Notifications are queued, to be taken with
/// [`next_event`](#method.next_event).
pub struct Connection<T, M> {
    config: Config,
    state: ConnectionState,
    transport: T,
    timers: M,
    handshake: Option<Handshake>,
    opened: bool,
    upgraded: bool,
    read_buf: BytesMut,
    write_buf: BytesMut,
    codec: FrameCodec,
    assembler: MessageAssembler,
    heartbeat: Option<HeartbeatMonitor>,
    close_frame: Option<CloseFrame>,
    events: VecDeque<Event>,
}

impl<T: Transport, M: Timers> Connection<T, M> {
    /// Creates a connection over an established stream. It starts out `Closed`; call [`open`](#method.open) to send
    /// the upgrade request.
    pub fn new(config: Config, transport: T, timers: M) -> Self {
        let heartbeat = config
            .heartbeat_interval()
            .map(|interval| HeartbeatMonitor::new(interval, config.heartbeat_grace()));

        Connection {
            codec: FrameCodec::with_max_payload_len(config.max_payload_len()),
            config,
            state: ConnectionState::Closed,
            transport,
            timers,
            handshake: None,
            opened: false,
            upgraded: false,
            read_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
            assembler: MessageAssembler::new(),
            heartbeat,
            close_frame: None,
            events: VecDeque::new(),
        }
    }

    /// Sends the HTTP upgrade request and enters the `Connecting` state.
    ///
    /// Only the first call has any effect.
    ///
    /// # Errors
    ///
    /// Under [`FailureMode::Raise`](enum.FailureMode.html), fails if writing the request fails.
    pub fn open(&mut self) -> Result<()> {
        if self.opened {
            tracing::debug!(state = %self.state, "connection already opened");
            return Ok(());
        }

        self.opened = true;
        let handshake = match self.config.key {
            Some(key) => Handshake::with_key(key),
            None => Handshake::new(),
        };

        let request = build_request(&self.config, handshake.key());
        self.handshake = Some(handshake);
        self.set_state(ConnectionState::Connecting);

        if let Err(e) = self.transport.write(request.as_bytes()) {
            return self.fail(e.into());
        }

        Ok(())
    }

    /// Handles bytes read from the stream.
    ///
    /// While connecting the bytes are fed to the handshake; after that, to the frame decoder. Any number of
    /// frames, including none or part of one, may arrive in one call.
    ///
    /// # Errors
    ///
    /// Under [`FailureMode::Raise`](enum.FailureMode.html), returns the fatal error that closed the connection.
    pub fn on_data(&mut self, data: &[u8]) -> Result<()> {
        if self.state == ConnectionState::Closed {
            tracing::trace!(len = data.len(), "ignoring data on closed connection");
            return Ok(());
        }

        self.read_buf.extend_from_slice(data);
        match self.process() {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e),
        }
    }

    /// Handles the end of the stream. The connection is `Closed` afterwards, whatever state it was in.
    pub fn on_close(&mut self) {
        self.stop_heartbeat();
        self.handshake = None;
        self.set_state(ConnectionState::Closed);
    }

    /// Handles a failure reported by the stream.
    ///
    /// # Errors
    ///
    /// Under [`FailureMode::Raise`](enum.FailureMode.html), returns the error.
    pub fn on_error(&mut self, error: io::Error) -> Result<()> {
        if self.state == ConnectionState::Closed {
            tracing::debug!(%error, "ignoring stream error on closed connection");
            return Ok(());
        }

        self.fail(error.into())
    }

    /// Handles an expired timer.
    ///
    /// # Errors
    ///
    /// Under [`FailureMode::Raise`](enum.FailureMode.html), fails with `ConnectionLost` when a pong is overdue.
    pub fn on_timer(&mut self, id: TimerId) -> Result<()> {
        let action = match self.heartbeat.as_mut() {
            Some(heartbeat) => heartbeat.on_timer(id, &mut self.timers),
            None => HeartbeatAction::Ignore,
        };

        match action {
            HeartbeatAction::Ignore => Ok(()),
            HeartbeatAction::SendPing => {
                tracing::debug!("sending heartbeat ping");
                self.write_or_fail(&Frame::ping(Bytes::new()))
            }
            HeartbeatAction::Lost => {
                let grace = self.config.heartbeat_grace();
                self.fail(Error::ConnectionLost(grace))
            }
        }
    }

    /// Sends a text or binary message.
    ///
    /// # Errors
    ///
    /// Fails with `NotConnected` in strict mode when the connection is not open, or under
    /// [`FailureMode::Raise`](enum.FailureMode.html) when writing fails.
    pub fn send(&mut self, message: Message) -> Result<()> {
        self.send_frame(message.to_frame())
    }

    /// Sends a text message.
    ///
    /// # Errors
    ///
    /// As for [`send`](#method.send).
    pub fn send_text<S: Into<String>>(&mut self, text: S) -> Result<()> {
        self.send(Message::text(text))
    }

    /// Sends a binary message.
    ///
    /// # Errors
    ///
    /// As for [`send`](#method.send).
    pub fn send_binary<B: Into<Bytes>>(&mut self, data: B) -> Result<()> {
        self.send(Message::binary(data))
    }

    /// Sends a ping. The server's pong counts as a heartbeat.
    ///
    /// # Errors
    ///
    /// As for [`send`](#method.send).
    pub fn ping<B: Into<Bytes>>(&mut self, data: B) -> Result<()> {
        self.send_frame(Frame::ping(data))
    }

    /// Sends a single frame, such as one fragment of a message.
    ///
    /// # Errors
    ///
    /// As for [`send`](#method.send).
    pub fn send_frame(&mut self, frame: Frame) -> Result<()> {
        if !self.check_connected(frame.opcode())? {
            return Ok(());
        }

        self.write_or_fail(&frame)
    }

    /// Starts the closing handshake: sends a close frame and enters the `Closing` state. The connection is
    /// `Closed` once the server has answered and the stream has ended.
    ///
    /// # Errors
    ///
    /// As for [`send`](#method.send).
    pub fn close(&mut self, reason: Option<CloseFrame>) -> Result<()> {
        if !self.check_connected(Opcode::Close)? {
            return Ok(());
        }

        self.stop_heartbeat();
        self.write_or_fail(&Frame::close(reason.as_ref()))?;
        if self.state == ConnectionState::Connected {
            self.set_state(ConnectionState::Closing);
        }

        Ok(())
    }

    /// Takes the oldest queued notification.
    pub fn next_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns `true` once the server has accepted the upgrade, even if the connection has since closed.
    pub fn is_upgraded(&self) -> bool {
        self.upgraded
    }

    /// Returns the close frame sent by the server, if any.
    pub fn close_frame(&self) -> Option<&CloseFrame> {
        self.close_frame.as_ref()
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Returns the timers.
    pub fn timers(&self) -> &M {
        &self.timers
    }

    /// Returns the timers.
    pub fn timers_mut(&mut self) -> &mut M {
        &mut self.timers
    }

    /// Removes the first queued error, if any.
    pub(crate) fn take_error(&mut self) -> Option<Error> {
        let index = self.events.iter().position(|event| matches!(event, Event::Error(_)))?;
        match self.events.remove(index) {
            Some(Event::Error(error)) => Some(error),
            _ => None,
        }
    }

    fn process(&mut self) -> Result<()> {
        loop {
            match self.state {
                ConnectionState::Connecting => {
                    let handshake = match self.handshake.as_mut() {
                        Some(handshake) => handshake,
                        None => return Ok(()),
                    };

                    if handshake.decode(&mut self.read_buf)?.is_none() {
                        return Ok(());
                    }

                    // Anything left in read_buf was pipelined behind the response and is the start of the
                    // WebSocket stream.
                    self.handshake = None;
                    self.upgraded = true;
                    self.set_state(ConnectionState::Connected);
                    if let Some(heartbeat) = self.heartbeat.as_mut() {
                        heartbeat.start(&mut self.timers);
                    }
                }
                ConnectionState::Connected | ConnectionState::Closing => {
                    let frame = match self.codec.decode(&mut self.read_buf)? {
                        Some(frame) => frame,
                        None => return Ok(()),
                    };

                    self.handle_frame(frame)?;
                }
                ConnectionState::Closed => return Ok(()),
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        match frame.opcode() {
            Opcode::Ping => {
                tracing::debug!(len = frame.payload_len(), "received ping");
                if self.state == ConnectionState::Connected {
                    self.write_frame(&Frame::pong(frame.into_payload()))?;
                }
            }
            Opcode::Pong => {
                tracing::debug!(len = frame.payload_len(), state = %self.state, "received pong");
                if self.state == ConnectionState::Connected {
                    if let Some(heartbeat) = self.heartbeat.as_mut() {
                        heartbeat.on_pong(&mut self.timers);
                    }
                }
            }
            Opcode::Close => {
                let close_frame = CloseFrame::parse(frame.payload())?;
                tracing::debug!(?close_frame, state = %self.state, "received close frame");
                if self.state == ConnectionState::Connected {
                    let reply = match &close_frame {
                        Some(close_frame) => Frame::close_with_code(close_frame.code()),
                        None => Frame::close(None),
                    };

                    self.stop_heartbeat();
                    self.write_frame(&reply)?;
                    self.set_state(ConnectionState::Closing);
                }

                self.close_frame = close_frame;
                self.transport.close()?;
            }
            Opcode::Continuation | Opcode::Text | Opcode::Binary => {
                if let Some(message) = self.assembler.accept(frame)? {
                    self.events.push_back(Event::Message(message));
                }
            }
        }

        Ok(())
    }

    fn check_connected(&mut self, opcode: Opcode) -> Result<bool> {
        if self.state == ConnectionState::Connected {
            return Ok(true);
        }

        if self.config.is_strict() {
            return Err(Error::NotConnected);
        }

        tracing::debug!(state = %self.state, ?opcode, "dropping frame sent while not connected");
        Ok(false)
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write_buf.clear();
        self.codec.encode(frame, &mut self.write_buf)?;
        self.transport.write(&self.write_buf)?;
        Ok(())
    }

    fn write_or_fail(&mut self, frame: &Frame) -> Result<()> {
        match self.write_frame(frame) {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e),
        }
    }

    fn stop_heartbeat(&mut self) {
        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.stop(&mut self.timers);
        }
    }

    fn fail(&mut self, error: Error) -> Result<()> {
        tracing::warn!(%error, state = %self.state, "connection failed");
        self.stop_heartbeat();
        self.handshake = None;

        if self.state == ConnectionState::Connected
            && matches!(error, Error::MalformedFrame(_) | Error::ProtocolViolation(_))
            && self.write_frame(&Frame::close_with_code(CloseCode::Protocol)).is_ok()
        {
            self.set_state(ConnectionState::Closing);
        }

        if let Err(e) = self.transport.close() {
            tracing::debug!(error = %e, "failed to close transport");
        }

        self.set_state(ConnectionState::Closed);
        match self.config.failure_mode() {
            FailureMode::Raise => Err(error),
            FailureMode::Event => {
                self.events.push_back(Event::Error(error));
                Ok(())
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }

        tracing::debug!(from = %self.state, to = %state, "state change");
        self.state = state;

        let event = match state {
            ConnectionState::Connecting => Event::Connecting,
            ConnectionState::Connected => Event::Connect,
            ConnectionState::Closing => Event::Closing,
            ConnectionState::Closed => Event::Close(self.close_frame.clone()),
        };

        self.events.push_back(event);
        self.events.push_back(Event::StateChange(state));
    }
}
