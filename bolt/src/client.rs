use std::collections::HashMap;
use std::io;
use std::task::{Context, Poll};
use std::time::Duration;

use bolt_codec::{CloseFrame, Message};
use bytes::{Bytes, BytesMut};
use futures_util::future::poll_fn;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::time::delay_queue::{DelayQueue, Key};

use crate::{ClientBuilder, Connection, ConnectionState, Error, Event, Result, TimerId, Timers, Transport};

const READ_BUF_LEN: usize = 8 * 1024;

/// Collects the bytes a connection writes until the client flushes them to the stream.
#[derive(Debug, Default)]
pub struct Outbox {
    buf: BytesMut,
    close_requested: bool,
    shut_down: bool,
}

impl Transport for Outbox {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.close_requested {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream is closing"));
        }

        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.close_requested = true;
        Ok(())
    }
}

/// Heartbeat timers on the Tokio clock.
#[derive(Debug, Default)]
pub struct DelayTimers {
    queue: DelayQueue<TimerId>,
    keys: HashMap<TimerId, Key>,
}

impl DelayTimers {
    fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<TimerId> {
        match self.queue.poll_expired(cx) {
            Poll::Ready(Some(expired)) => {
                let id = expired.into_inner();
                self.keys.remove(&id);
                Poll::Ready(id)
            }
            // An empty queue is ready with `None`; nothing can expire until the next `schedule`.
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        }
    }
}

impl Timers for DelayTimers {
    fn schedule(&mut self, id: TimerId, after: Duration) {
        let key = self.queue.insert(id, after);
        self.keys.insert(id, key);
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(key) = self.keys.remove(&id) {
            self.queue.remove(&key);
        }
    }
}

enum Input {
    Read(io::Result<usize>),
    Timer(TimerId),
}

/// A WebSocket connection over a Tokio stream.
///
/// The client only makes progress while it is being awaited: reading, answering pings and sending heartbeats all
/// happen inside [`receive`](#method.receive) and [`receive_message`](#method.receive_message).
pub struct AsyncClient<S> {
    stream: S,
    connection: Connection<Outbox, DelayTimers>,
    read_buf: Box<[u8]>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncClient<S> {
    /// Waits for the next event. Returns `Ok(None)` once the connection is closed and every event has been taken.
    ///
    /// # Errors
    ///
    /// Under [`FailureMode::Raise`](enum.FailureMode.html), returns the fatal error that closed the connection.
    pub async fn receive(&mut self) -> Result<Option<Event>> {
        loop {
            if let Some(event) = self.connection.next_event() {
                return Ok(Some(event));
            }

            if self.connection.state() == ConnectionState::Closed {
                self.flush().await?;
                return Ok(None);
            }

            self.turn().await?;
        }
    }

    /// Waits for the next message, skipping other events. Returns `Ok(None)` once the connection is closed.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that closed the connection, whichever the failure mode.
    pub async fn receive_message(&mut self) -> Result<Option<Message>> {
        while let Some(event) = self.receive().await? {
            match event {
                Event::Message(message) => return Ok(Some(message)),
                Event::Error(error) => return Err(error),
                _ => {}
            }
        }

        Ok(None)
    }

    /// Sends a message.
    ///
    /// # Errors
    ///
    /// As for [`Connection::send`](struct.Connection.html#method.send).
    pub async fn send(&mut self, message: Message) -> Result<()> {
        self.connection.send(message)?;
        self.flush().await
    }

    /// Sends a ping.
    ///
    /// # Errors
    ///
    /// As for [`Connection::send`](struct.Connection.html#method.send).
    pub async fn ping<B: Into<Bytes>>(&mut self, data: B) -> Result<()> {
        self.connection.ping(data)?;
        self.flush().await
    }

    /// Starts the closing handshake. Keep calling [`receive`](#method.receive) until it returns `Ok(None)` to
    /// finish it.
    ///
    /// # Errors
    ///
    /// As for [`Connection::send`](struct.Connection.html#method.send).
    pub async fn close(&mut self, reason: Option<CloseFrame>) -> Result<()> {
        self.connection.close(reason)?;
        self.flush().await
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Returns the connection state machine.
    pub fn connection(&self) -> &Connection<Outbox, DelayTimers> {
        &self.connection
    }

    /// Returns the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    async fn turn(&mut self) -> Result<()> {
        self.flush().await?;
        if self.connection.state() == ConnectionState::Closed {
            return Ok(());
        }

        let input = {
            let stream = &mut self.stream;
            let buf = &mut self.read_buf;
            let timers = self.connection.timers_mut();
            tokio::select! {
                result = stream.read(buf) => Input::Read(result),
                id = poll_fn(|cx| timers.poll_expired(cx)) => Input::Timer(id),
            }
        };

        match input {
            Input::Read(Ok(0)) => {
                tracing::debug!("stream ended");
                self.connection.on_close();
            }
            Input::Read(Ok(n)) => self.connection.on_data(&self.read_buf[..n])?,
            Input::Read(Err(e)) => self.connection.on_error(e)?,
            Input::Timer(id) => self.connection.on_timer(id)?,
        }

        self.flush().await
    }

    async fn flush(&mut self) -> Result<()> {
        let outbox = self.connection.transport_mut();
        let data = outbox.buf.split();
        let shut_down = outbox.close_requested && !outbox.shut_down;
        outbox.shut_down |= shut_down;

        if !data.is_empty() {
            let result = match self.stream.write_all(&data).await {
                Ok(()) => self.stream.flush().await,
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                return self.connection.on_error(e);
            }
        }

        if shut_down {
            if let Err(e) = self.stream.shutdown().await {
                tracing::debug!(error = %e, "failed to shut down stream");
            }

            self.connection.on_close();
        }

        Ok(())
    }
}

impl ClientBuilder {
    /// Connects to the server over plain TCP.
    ///
    /// `wss://...` URLs are not supported by this method: establish the TLS stream yourself and pass it to
    /// [`async_connect_on`](#method.async_connect_on).
    ///
    /// # Errors
    ///
    /// This method returns an `Err` result if connecting to the server or the handshake fails.
    pub async fn async_connect_insecure(self) -> Result<AsyncClient<TcpStream>> {
        let stream = {
            let config = &self.config;
            TcpStream::connect((config.host(), config.port())).await?
        };

        self.async_connect_on(stream).await
    }

    /// Takes over an already established stream and uses it to send and receive WebSocket messages.
    ///
    /// This method assumes that the TLS connection has already been established, if needed. It sends an HTTP
    /// `Connection: Upgrade` request and waits for the `101 Switching Protocols` response. The `Connecting` and
    /// `Connect` events are left queued on the returned client.
    ///
    /// # Errors
    ///
    /// This method returns an `Err` result if writing or reading from the stream fails, or the server rejects the
    /// upgrade.
    pub async fn async_connect_on<S: AsyncRead + AsyncWrite + Unpin>(self, stream: S) -> Result<AsyncClient<S>> {
        let mut client = AsyncClient {
            stream,
            connection: Connection::new(self.build(), Outbox::default(), DelayTimers::default()),
            read_buf: vec![0; READ_BUF_LEN].into_boxed_slice(),
        };

        client.connection.open()?;
        while client.connection.state() == ConnectionState::Connecting {
            client.turn().await?;
        }

        if let Some(error) = client.connection.take_error() {
            return Err(error);
        }

        if !client.connection.is_upgraded() {
            return Err(Error::Transport(io::ErrorKind::UnexpectedEof.into()));
        }

        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bolt_codec::{CloseCode, Frame, FrameCodec, Opcode};
    use bytes::BytesMut;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio_util::codec::Decoder;

    use crate::{ClientBuilder, ConnectionState, Error, Event, FailureMode};

    static RESPONSE: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n\
                               Upgrade: websocket\r\n\
                               Connection: Upgrade\r\n\
                               Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
                               \r\n";

    fn builder() -> ClientBuilder {
        ClientBuilder::new("ws://localhost/chat")
            .unwrap()
            .key(b"the sample nonce")
    }

    async fn read_request(server: &mut DuplexStream) -> String {
        let mut request = Vec::new();
        while !request.ends_with(b"\r\n\r\n") {
            let mut byte = [0];
            server.read_exact(&mut byte).await.unwrap();
            request.push(byte[0]);
        }

        String::from_utf8(request).unwrap()
    }

    async fn read_frame(server: &mut DuplexStream, buf: &mut BytesMut, codec: &mut FrameCodec) -> Frame {
        loop {
            if let Some(frame) = codec.decode(buf).unwrap() {
                return frame;
            }

            let n = server.read_buf(buf).await.unwrap();
            assert_ne!(0, n, "stream ended before a frame arrived");
        }
    }

    #[tokio::test]
    async fn connects_and_receives_pipelined_message() {
        let (client, mut server) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            let request = read_request(&mut server).await;
            assert!(request.contains("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n"));

            let mut response = RESPONSE.to_vec();
            response.extend_from_slice(b"\x81\x05hello");
            server.write_all(&response).await.unwrap();
            server
        });

        let mut client = builder().async_connect_on(client).await.unwrap();
        assert_eq!(ConnectionState::Connected, client.state());

        let message = client.receive_message().await.unwrap().unwrap();
        assert_eq!(Some("hello"), message.as_text());
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn rejected_upgrade() {
        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            read_request(&mut server).await;
            server.write_all(b"HTTP/1.1 404 Not Found\r\n\r\n").await.unwrap();
            server
        });

        let error = builder().async_connect_on(client).await.err().unwrap();
        assert!(matches!(error, Error::HandshakeRejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn rejected_upgrade_as_event() {
        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            read_request(&mut server).await;
            server.write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n").await.unwrap();
            server
        });

        let error = builder()
            .failure_mode(FailureMode::Event)
            .async_connect_on(client)
            .await
            .err()
            .unwrap();

        assert_eq!(Some(403), error.status());
    }

    #[tokio::test]
    async fn stream_ends_during_handshake() {
        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            read_request(&mut server).await;
        });

        let error = builder().async_connect_on(client).await.err().unwrap();
        assert!(matches!(error, Error::Transport(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn answers_ping_and_echoes_close() {
        let (client, mut server) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            read_request(&mut server).await;
            server.write_all(RESPONSE).await.unwrap();
            server.write_all(b"\x89\x02hi\x88\x02\x03\xe8").await.unwrap();

            let mut buf = BytesMut::new();
            let mut codec = FrameCodec::new();
            let pong = read_frame(&mut server, &mut buf, &mut codec).await;
            let close = read_frame(&mut server, &mut buf, &mut codec).await;
            (pong, close)
        });

        let mut client = builder().async_connect_on(client).await.unwrap();
        let mut states = Vec::new();
        let mut close_frame = None;
        while let Some(event) = client.receive().await.unwrap() {
            match event {
                Event::StateChange(state) => states.push(state),
                Event::Close(frame) => close_frame = frame,
                _ => {}
            }
        }

        assert_eq!(
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Closing,
                ConnectionState::Closed
            ],
            states
        );
        assert_eq!(Some(CloseCode::Normal), close_frame.map(|frame| frame.code()));

        let (pong, close) = server.await.unwrap();
        assert_eq!(Opcode::Pong, pong.opcode());
        assert_eq!(&b"hi"[..], &pong.payload()[..]);
        assert_eq!(Opcode::Close, close.opcode());
        assert_eq!(&b"\x03\xe8"[..], &close.payload()[..]);
    }

    #[tokio::test]
    async fn sends_masked_message() {
        let (client, mut server) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            read_request(&mut server).await;
            server.write_all(RESPONSE).await.unwrap();

            let mut buf = BytesMut::new();
            read_frame(&mut server, &mut buf, &mut FrameCodec::new()).await
        });

        let mut client = builder().async_connect_on(client).await.unwrap();
        client.send(bolt_codec::Message::text("hello")).await.unwrap();

        let frame = server.await.unwrap();
        assert!(frame.is_masked());
        assert_eq!(&b"hello"[..], &frame.payload()[..]);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_lost_when_server_is_silent() {
        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            read_request(&mut server).await;
            server.write_all(RESPONSE).await.unwrap();

            // Read the ping but never answer it.
            let mut buf = BytesMut::new();
            let ping = read_frame(&mut server, &mut buf, &mut FrameCodec::new()).await;
            assert_eq!(Opcode::Ping, ping.opcode());
            tokio::time::sleep(Duration::from_secs(3600)).await;
            drop(server);
        });

        let mut client = builder()
            .heartbeat(Duration::from_secs(30))
            .heartbeat_grace(Duration::from_secs(2))
            .async_connect_on(client)
            .await
            .unwrap();

        let error = client.receive_message().await.err().unwrap();
        assert!(matches!(error, Error::ConnectionLost(grace) if grace == Duration::from_secs(2)));
        assert_eq!(ConnectionState::Closed, client.state());
    }
}
