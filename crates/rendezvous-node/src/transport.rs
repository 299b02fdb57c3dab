//! Transport abstraction consumed by the session state machine.
//!
//! A transport is one accepted, message-framed, bidirectional connection.
//! The listener wraps whatever it accepted (WebSocket today) in this trait
//! and hands it to [`crate::session::admit_session`].

use std::future::Future;

use bytes::Bytes;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("transport io error: {0}")]
    Io(String),
}

/// Something that happened on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete inbound frame.
    Frame(Bytes),
    /// The remote acknowledged a liveness probe (e.g. WebSocket pong).
    ProbeAck,
    /// The remote closed the connection. Delivered at most once.
    Closed { code: Option<u16>, reason: String },
    /// The connection failed.
    Error(String),
}

pub trait Transport: Send + 'static {
    /// Wait for the next event. Must be cancel safe.
    fn recv(&mut self) -> impl Future<Output = TransportEvent> + Send;

    /// Send one frame.
    fn send(&mut self, frame: Bytes) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Send a liveness probe. Acknowledged by [`TransportEvent::ProbeAck`].
    fn send_probe(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Close the connection. Called exactly once, at the end of cleanup.
    fn close(&mut self) -> impl Future<Output = ()> + Send;

    /// Whether frames can still be written.
    fn is_open(&self) -> bool;

    /// Human readable description for log lines, e.g. `1.2.3.4:5000 /callapp`.
    fn describe(&self) -> String;
}
