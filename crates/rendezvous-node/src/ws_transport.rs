//! WebSocket transport (axum). Binary messages carry frames; ping/pong carry
//! keepalive.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;

use crate::transport::{Transport, TransportError, TransportEvent};

pub struct WsTransport {
    socket: WebSocket,
    remote: SocketAddr,
    path: String,
    open: bool,
}

impl WsTransport {
    pub fn new(socket: WebSocket, remote: SocketAddr, path: impl Into<String>) -> Self {
        Self {
            socket,
            remote,
            path: path.into(),
            open: true,
        }
    }
}

impl Transport for WsTransport {
    async fn recv(&mut self) -> TransportEvent {
        loop {
            let msg = match self.socket.recv().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    self.open = false;
                    return TransportEvent::Error(e.to_string());
                }
                None => {
                    self.open = false;
                    return TransportEvent::Closed {
                        code: None,
                        reason: "stream ended".into(),
                    };
                }
            };
            match msg {
                Message::Binary(data) => return TransportEvent::Frame(Bytes::from(data)),
                // Text frames are treated as raw bytes.
                Message::Text(text) => {
                    return TransportEvent::Frame(Bytes::from(text.into_bytes()));
                }
                Message::Pong(_) => return TransportEvent::ProbeAck,
                // Pong replies are queued by the websocket layer.
                Message::Ping(_) => continue,
                Message::Close(frame) => {
                    self.open = false;
                    let (code, reason) = match frame {
                        Some(f) => (Some(f.code), f.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    return TransportEvent::Closed { code, reason };
                }
            }
        }
    }

    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.socket
            .send(Message::Binary(frame.to_vec()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn send_probe(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.socket
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(e) = self.socket.send(Message::Close(None)).await {
            tracing::debug!(remote = %self.remote, error = %e, "ws: close failed");
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn describe(&self) -> String {
        format!("{} {}", self.remote, self.path)
    }
}
