//! Framed sockets carrying session traffic.
//!
//! A [`FrameSocket`] moves opaque byte frames in both directions; what the
//! frames mean is the codec's concern. The websocket implementation is the
//! production transport; [`memory::socket_pair`] provides an in-process pair
//! for tests and embedded use.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

/// Errors surfaced by a session socket.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum SocketError {
    /// The connection is closed, by the peer or locally.
    #[error("connection closed")]
    Closed,
    /// The transport failed.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// A bidirectional framed message socket.
///
/// `recv` and `send` may be driven concurrently from different tasks; both
/// fail once the socket is closed.
#[async_trait]
pub trait FrameSocket: Send + Sync {
    /// Receives the next frame.
    ///
    /// # Errors
    ///
    /// Returns a [`SocketError`] when the peer is gone or the transport
    /// failed; the session treats either as terminal.
    async fn recv(&self) -> Result<Vec<u8>, SocketError>;

    /// Sends one frame.
    ///
    /// # Errors
    ///
    /// Returns a [`SocketError`] when the frame cannot be delivered.
    async fn send(&self, frame: &[u8]) -> Result<(), SocketError>;

    /// Closes the socket. Idempotent; pending `recv`/`send` calls fail.
    async fn close(&self);
}

/// Websocket-backed [`FrameSocket`].
///
/// The stream is split so the session's read and write loops can drive their
/// halves independently.
pub struct WsFrameSocket<S> {
    writer: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    reader: Mutex<SplitStream<WebSocketStream<S>>>,
    closed: CancellationToken,
}

impl<S> WsFrameSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an accepted or connected websocket stream.
    #[must_use]
    pub fn new(stream: WebSocketStream<S>) -> Self {
        let (writer, reader) = stream.split();
        Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            closed: CancellationToken::new(),
        }
    }
}

impl WsFrameSocket<MaybeTlsStream<TcpStream>> {
    /// Dials a websocket endpoint and wraps the resulting stream.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Transport`] when the connection fails.
    pub async fn connect(url: &str) -> Result<Self, SocketError> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|err| SocketError::Transport(err.to_string()))?;
        Ok(Self::new(stream))
    }
}

#[async_trait]
impl<S> FrameSocket for WsFrameSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&self) -> Result<Vec<u8>, SocketError> {
        let mut reader = self.reader.lock().await;
        loop {
            let message = tokio::select! {
                message = reader.next() => message,
                () = self.closed.cancelled() => return Err(SocketError::Closed),
            };

            match message {
                Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
                Some(Ok(Message::Binary(data))) => return Ok(data),
                Some(Ok(Message::Close(_))) | None => return Err(SocketError::Closed),
                // Ping/pong frames are answered by the transport layer.
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(SocketError::Transport(err.to_string())),
            }
        }
    }

    async fn send(&self, frame: &[u8]) -> Result<(), SocketError> {
        if self.closed.is_cancelled() {
            return Err(SocketError::Closed);
        }
        let mut writer = self.writer.lock().await;
        tokio::select! {
            result = writer.send(Message::Binary(frame.to_vec())) => {
                result.map_err(|err| SocketError::Transport(err.to_string()))
            }
            () = self.closed.cancelled() => Err(SocketError::Closed),
        }
    }

    async fn close(&self) {
        self.closed.cancel();
        if let Ok(mut writer) = self.writer.try_lock() {
            let _ = writer.close().await;
        }
    }
}

/// In-process frame sockets.
pub mod memory {
    use super::{async_trait, CancellationToken, FrameSocket, SocketError};
    use tokio::sync::{mpsc, Mutex};

    const FRAME_BUFFER: usize = 64;

    /// One end of an in-process socket pair.
    pub struct MemorySocket {
        tx: mpsc::Sender<Vec<u8>>,
        rx: Mutex<mpsc::Receiver<Vec<u8>>>,
        closed: CancellationToken,
    }

    /// Creates a connected pair of in-process sockets.
    ///
    /// Closing either end fails pending operations on both, like tearing
    /// down a real connection does.
    #[must_use]
    pub fn socket_pair() -> (MemorySocket, MemorySocket) {
        let (left_tx, left_rx) = mpsc::channel(FRAME_BUFFER);
        let (right_tx, right_rx) = mpsc::channel(FRAME_BUFFER);
        let closed = CancellationToken::new();

        (
            MemorySocket {
                tx: left_tx,
                rx: Mutex::new(right_rx),
                closed: closed.clone(),
            },
            MemorySocket {
                tx: right_tx,
                rx: Mutex::new(left_rx),
                closed,
            },
        )
    }

    #[async_trait]
    impl FrameSocket for MemorySocket {
        async fn recv(&self) -> Result<Vec<u8>, SocketError> {
            let mut rx = self.rx.lock().await;
            tokio::select! {
                frame = rx.recv() => frame.ok_or(SocketError::Closed),
                () = self.closed.cancelled() => Err(SocketError::Closed),
            }
        }

        async fn send(&self, frame: &[u8]) -> Result<(), SocketError> {
            if self.closed.is_cancelled() {
                return Err(SocketError::Closed);
            }
            tokio::select! {
                sent = self.tx.send(frame.to_vec()) => sent.map_err(|_| SocketError::Closed),
                () = self.closed.cancelled() => Err(SocketError::Closed),
            }
        }

        async fn close(&self) {
            self.closed.cancel();
        }
    }
}
