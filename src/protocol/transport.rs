//! WebSocket transport to the OBS control endpoint.
//!
//! Owns the raw socket: connect, send frame, receive frame, close. Frame
//! semantics (handshake, correlation, events) live in
//! [`super::client::ProtocolClient`].

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::{Error, Result};

/// A single WebSocket connection to OBS.
pub struct Transport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

/// What the transport hands up: a text frame, or the close that ends the
/// session.
#[derive(Debug)]
pub enum Frame {
    Text(String),
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },
}

impl Transport {
    /// Opens a WebSocket connection to `ws://host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the host is unreachable or refuses
    /// the connection.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let url = format!("ws://{host}:{port}");
        debug!(%url, "opening WebSocket connection");

        let (ws, _) = connect_async(&url)
            .await
            .map_err(|e| Error::connection(host, port, e.to_string()))?;

        Ok(Self { ws })
    }

    /// Like [`Transport::connect`], but bounded by `deadline` so a silent
    /// host cannot stall the caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] on failure or when the deadline passes.
    pub async fn connect_timeout(
        host: &str,
        port: u16,
        deadline: std::time::Duration,
    ) -> Result<Self> {
        match tokio::time::timeout(deadline, Self::connect(host, port)).await {
            Ok(result) => result,
            Err(_) => Err(Error::connection(
                host,
                port,
                format!("no response within {} ms", deadline.as_millis()),
            )),
        }
    }

    /// Sends a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on mid-session I/O failure; the caller
    /// must treat this as a disconnect.
    pub async fn send(&mut self, payload: String) -> Result<()> {
        self.ws
            .send(Message::Text(payload))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    /// Receives the next text frame, yielding until one (or the close)
    /// arrives. Ping/pong and binary frames are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on mid-session I/O failure.
    pub async fn recv(&mut self) -> Result<Frame> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Frame::Text(text)),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), Some(f.reason.into_owned())),
                        None => (None, None),
                    };
                    debug!(?code, ?reason, "WebSocket closed by peer");
                    return Ok(Frame::Closed { code, reason });
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(Error::Transport(e.to_string())),
                None => {
                    return Ok(Frame::Closed {
                        code: None,
                        reason: None,
                    })
                }
            }
        }
    }

    /// Sends a close frame and shuts the socket down. Errors are ignored;
    /// the session is over either way.
    pub async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}
