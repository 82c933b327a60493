//! Connection handling for a control processor
//!
//! Owns the transport, the registration state and the join callbacks.
//! Inbound data is serviced by polling: `poll()` reads until the line goes
//! quiet for one read timeout, then hands control back to the caller.

use std::fmt;
use std::net::Shutdown;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;

use super::callbacks::CallbackRegistry;
use super::heartbeat::Heartbeat;
use super::writer::FrameWriter;
use super::NetworkConfig;
use crate::protocol::{
    decode_data, encode_analog, encode_digital, Action, CodecError, ConnectionState, Decoder,
    Frame, FrameType, JoinError, Registration, RegistrationError, UPDATE_REQUEST,
};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Invalid join: {0}")]
    Join(#[from] JoinError),

    #[error("Registration failed: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Connection closed")]
    Closed,

    #[error("Connection timeout")]
    Timeout,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Coarse classification of a connection error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Operation timed out; usually expected on an idle line
    Timeout,
    /// Peer reset or closed the transport
    Disconnected,
    /// Bytes that do not form a valid frame or join
    Malformed,
    /// Fatal handshake error
    Protocol,
    /// Connection already closed locally
    Closed,
    /// Any other I/O failure
    Io,
}

impl ConnectionError {
    pub fn kind(&self) -> FailureKind {
        use std::io::ErrorKind;

        match self {
            ConnectionError::Io(e) => match e.kind() {
                ErrorKind::TimedOut | ErrorKind::WouldBlock => FailureKind::Timeout,
                ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof
                | ErrorKind::NotConnected => FailureKind::Disconnected,
                _ => FailureKind::Io,
            },
            ConnectionError::Codec(_) | ConnectionError::Join(_) => FailureKind::Malformed,
            ConnectionError::Registration(_) => FailureKind::Protocol,
            ConnectionError::Closed => FailureKind::Closed,
            ConnectionError::Timeout => FailureKind::Timeout,
        }
    }

    /// Whether the error ends the connection
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            FailureKind::Disconnected | FailureKind::Protocol | FailureKind::Closed
        )
    }
}

/// Why a connection stopped being usable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// A heartbeat could not be written
    HeartbeatFailed(String),
    /// The peer closed the transport
    PeerClosed,
    /// Reads kept failing
    ReadFailed(String),
    /// The device broke the registration handshake
    Protocol(RegistrationError),
    /// `close()` was called
    LocalClose,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::HeartbeatFailed(e) => write!(f, "heartbeat failed: {}", e),
            DisconnectReason::PeerClosed => write!(f, "closed by peer"),
            DisconnectReason::ReadFailed(e) => write!(f, "read failed: {}", e),
            DisconnectReason::Protocol(e) => write!(f, "{}", e),
            DisconnectReason::LocalClose => write!(f, "closed locally"),
        }
    }
}

/// Shared connection-lost notification. The first reason reported wins.
#[derive(Clone)]
pub struct LostSignal {
    tx: Arc<watch::Sender<Option<DisconnectReason>>>,
}

impl LostSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Record a reason unless one is already set
    pub fn notify(&self, reason: DisconnectReason) {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    pub fn reason(&self) -> Option<DisconnectReason> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<DisconnectReason>> {
        self.tx.subscribe()
    }
}

impl Default for LostSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Read half of a transport
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Frames sent, heartbeats included
    pub frames_sent: u64,
    /// Frames received
    pub frames_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
}

/// A session with a control processor
pub struct Connection {
    config: NetworkConfig,
    reader: BoxedReader,
    writer: FrameWriter,
    decoder: Decoder,
    registration: Registration,
    callbacks: CallbackRegistry,
    heartbeat: Heartbeat,
    lost: LostSignal,
    /// Duplicate handle on the TCP socket, for shutting down both directions
    control: Option<std::net::TcpStream>,
    read_failures: u32,
    frames_received: u64,
    bytes_received: u64,
}

impl Connection {
    /// Connect to `host:port` presenting `program_id`, with default settings
    pub async fn open(host: &str, port: u16, program_id: u8) -> ConnectionResult<Self> {
        let config = NetworkConfig::new(host)
            .with_port(port)
            .with_program_id(program_id);
        Self::connect(config).await
    }

    /// Connect over TCP using `config`
    pub async fn connect(config: NetworkConfig) -> ConnectionResult<Self> {
        let addr = super::resolve_host(&config.host, config.port).await?;
        tracing::info!("Connecting to {}", addr);

        let stream = match tokio::time::timeout(config.connect_timeout(), TcpStream::connect(addr))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ConnectionError::Io(e)),
            Err(_) => return Err(ConnectionError::Timeout),
        };
        stream.set_nodelay(true)?;

        let stream = stream.into_std()?;
        let control = stream.try_clone()?;
        let stream = TcpStream::from_std(stream)?;

        Self::start(stream, config, Some(control)).await
    }

    /// Run the protocol over an already open transport.
    ///
    /// Starts the heartbeat and services any frames the device sent on
    /// connect before returning.
    pub async fn from_stream<S>(stream: S, config: NetworkConfig) -> ConnectionResult<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::start(stream, config, None).await
    }

    async fn start<S>(
        stream: S,
        config: NetworkConfig,
        control: Option<std::net::TcpStream>,
    ) -> ConnectionResult<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let writer = FrameWriter::new(Box::new(writer));
        let lost = LostSignal::new();
        let heartbeat = Heartbeat::spawn(writer.clone(), config.heartbeat_interval(), lost.clone());

        let mut conn = Self {
            registration: Registration::new(config.program_id),
            decoder: Decoder::new(),
            reader: Box::new(reader),
            writer,
            callbacks: CallbackRegistry::new(),
            heartbeat,
            lost,
            control,
            read_failures: 0,
            frames_received: 0,
            bytes_received: 0,
            config,
        };

        conn.poll().await?;
        Ok(conn)
    }

    /// Current registration state
    pub fn state(&self) -> ConnectionState {
        self.registration.state()
    }

    pub fn is_registered(&self) -> bool {
        self.state() == ConnectionState::Registered
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            frames_sent: self.writer.frames_sent(),
            frames_received: self.frames_received,
            bytes_sent: self.writer.bytes_sent(),
            bytes_received: self.bytes_received,
        }
    }

    /// Notification fired once when the connection is lost or closed
    pub fn connection_lost(&self) -> watch::Receiver<Option<DisconnectReason>> {
        self.lost.subscribe()
    }

    /// Register a callback for digital join changes
    pub fn add_digital_callback<F>(&mut self, callback: F)
    where
        F: FnMut(u16, bool) + Send + 'static,
    {
        self.callbacks.add_digital(Box::new(callback));
    }

    /// Register a callback for analog join changes
    pub fn add_analog_callback<F>(&mut self, callback: F)
    where
        F: FnMut(u16, u16) + Send + 'static,
    {
        self.callbacks.add_analog(Box::new(callback));
    }

    /// Set a digital join. Returns bytes written, 0 on failure.
    pub async fn send_digital(&self, join: u16, state: bool) -> usize {
        match encode_digital(join, state) {
            Ok(payload) => self.send_best_effort(FrameType::Data, &payload).await,
            Err(e) => {
                tracing::warn!("Not sending digital join: {}", e);
                0
            }
        }
    }

    /// Set an analog join. Returns bytes written, 0 on failure.
    pub async fn send_analog(&self, join: u16, value: u16) -> usize {
        match encode_analog(join, value) {
            Ok(payload) => self.send_best_effort(FrameType::Data, &payload).await,
            Err(e) => {
                tracing::warn!("Not sending analog join: {}", e);
                0
            }
        }
    }

    pub async fn send_heartbeat(&self) -> usize {
        self.send_best_effort(FrameType::Heartbeat, &crate::protocol::HEARTBEAT_PAYLOAD)
            .await
    }

    /// Ask the device to resend the state of every join
    pub async fn send_update_request(&self) -> usize {
        self.send_best_effort(FrameType::Data, &UPDATE_REQUEST).await
    }

    async fn send_best_effort(&self, frame_type: FrameType, payload: &[u8]) -> usize {
        if self.state() == ConnectionState::Closed {
            tracing::debug!("Dropping {:?} frame on closed connection", frame_type);
            return 0;
        }

        match self.writer.send(frame_type.as_byte(), payload).await {
            Ok(sent) => sent,
            Err(e) => {
                tracing::warn!("Send of {:?} frame failed ({:?}): {}", frame_type, e.kind(), e);
                0
            }
        }
    }

    /// Service inbound data until a read times out.
    ///
    /// Returns the number of frames processed. A read error ends only this
    /// pass unless `max_read_failures` is reached in a row; end of stream and
    /// fatal handshake errors close the connection.
    pub async fn poll(&mut self) -> ConnectionResult<usize> {
        if let Some(reason) = self.lost.reason() {
            if self.state() != ConnectionState::Closed {
                tracing::info!("Connection lost: {}", reason);
                self.shut_down();
            }
        }
        if self.state() == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }

        let mut buf = vec![0u8; self.config.read_buffer_size.max(1)];
        let mut processed = 0;

        loop {
            let read = tokio::time::timeout(self.config.read_timeout(), self.reader.read(&mut buf));
            let n = match read.await {
                Err(_) => break,
                Ok(Ok(0)) => {
                    tracing::info!("Connection closed by peer");
                    self.fail(DisconnectReason::PeerClosed);
                    return Err(ConnectionError::Closed);
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    self.read_failures += 1;
                    tracing::warn!(
                        "Read failed ({}/{}): {}",
                        self.read_failures,
                        self.config.max_read_failures,
                        e
                    );
                    if self.read_failures >= self.config.max_read_failures {
                        self.fail(DisconnectReason::ReadFailed(e.to_string()));
                    }
                    return Err(ConnectionError::Io(e));
                }
            };

            self.read_failures = 0;
            self.bytes_received += n as u64;

            for frame in self.decoder.push(&buf[..n]) {
                self.frames_received += 1;
                processed += 1;
                self.handle_frame(frame).await?;
            }
        }

        Ok(processed)
    }

    async fn handle_frame(&mut self, frame: Frame) -> ConnectionResult<()> {
        tracing::trace!(
            "Received frame {:#04x} ({} bytes)",
            frame.frame_type,
            frame.len()
        );

        match self.registration.handle(&frame) {
            Ok(Action::None) => {}
            Ok(Action::Identify(payload)) => {
                tracing::debug!(
                    "Registering as program ID {:#04x}",
                    self.registration.program_id()
                );
                self.send_best_effort(FrameType::Register, &payload).await;
            }
            Ok(Action::Registered) => {
                tracing::info!("Registered with control processor");
                self.send_heartbeat().await;
                self.send_update_request().await;
            }
            Ok(Action::Data(payload)) => {
                if let Some(event) = decode_data(&payload) {
                    self.callbacks.dispatch(event);
                }
            }
            Err(e) => {
                tracing::error!("Fatal protocol error: {}", e);
                self.fail(DisconnectReason::Protocol(e.clone()));
                return Err(e.into());
            }
        }

        Ok(())
    }

    fn fail(&mut self, reason: DisconnectReason) {
        self.lost.notify(reason);
        self.shut_down();
    }

    fn shut_down(&mut self) {
        self.registration.close();
        self.heartbeat.stop();
        self.decoder.clear();
    }

    /// Stop the heartbeat and shut down both directions of the transport
    pub async fn close(&mut self) -> ConnectionResult<()> {
        self.lost.notify(DisconnectReason::LocalClose);
        self.shut_down();
        self.heartbeat
            .shutdown_timeout(self.config.heartbeat_interval())
            .await;

        let result = self.writer.shutdown().await;
        self.reader = Box::new(tokio::io::empty());
        if let Some(socket) = self.control.take() {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                if e.kind() != std::io::ErrorKind::NotConnected {
                    tracing::warn!("Socket shutdown failed: {}", e);
                }
            }
        }
        tracing::info!("Connection closed");

        match result {
            Ok(()) => Ok(()),
            // Already torn down by the peer
            Err(e) if e.kind() == FailureKind::Disconnected => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.heartbeat.stop();
    }
}
