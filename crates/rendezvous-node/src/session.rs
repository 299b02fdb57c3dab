//! Peer session -- one per transport connection.
//!
//! Owns the protocol handshake, keepalive and cleanup. Runs as a single task:
//! inbound frames, queued outbound frames and keepalive ticks are handled one
//! at a time, so frames are processed and written in order.
//!
//! State: Uninitialized -> Connecting -> Connected -> Disconnecting -> Disconnected

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rendezvous_protocol::{
    decode_frame, encode_frame, ConnectionId, EventData, EventType, Frame, NetworkEvent,
    DEFAULT_REMOTE_VERSION, PROTOCOL_VERSION,
};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::peer_pool::{Member, PeerPool, SessionId};
use crate::transport::{Transport, TransportEvent};

/// Keepalive probe interval.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Disconnected => "disconnected",
        }
    }
}

pub struct PeerSession<T: Transport> {
    id: SessionId,
    pool: PeerPool,
    transport: T,
    info: String,
    state: SessionState,
    remote_version: u8,
    probe_acked: bool,
    keepalive: Option<Interval>,
    /// Bound on a single transport write, probe or close.
    write_timeout: Duration,
    outbound_tx: mpsc::Sender<Frame>,
    outbound_rx: mpsc::Receiver<Frame>,
    stalled: Arc<Notify>,
    shutdown: Option<broadcast::Receiver<()>>,
}

/// Admit a transport into `pool`. The returned session is `Connected` with
/// its keepalive armed; drive it with [`PeerSession::run`].
pub async fn admit_session<T: Transport>(
    pool: &PeerPool,
    transport: T,
    keepalive_interval: Duration,
) -> PeerSession<T> {
    let mut state = SessionState::Uninitialized;
    let info = transport.describe();
    let (outbound_tx, outbound_rx) = mpsc::channel(pool.config().outbound_capacity);

    state = transition(&info, state, SessionState::Connecting);
    let (id, stalled, pool_size) = {
        let mut reg = pool.lock().await;
        let id = reg.add_connection(info.clone(), outbound_tx.clone());
        let stalled = reg.member(id).map(Member::stalled).unwrap_or_default();
        (id, stalled, reg.count())
    };

    let mut keepalive =
        tokio::time::interval_at(Instant::now() + keepalive_interval, keepalive_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    state = transition(&info, state, SessionState::Connected);
    tracing::info!(session = %info, id, pool_size, "session: connected");

    PeerSession {
        id,
        pool: pool.clone(),
        transport,
        info,
        state,
        remote_version: DEFAULT_REMOTE_VERSION,
        probe_acked: true,
        keepalive: Some(keepalive),
        write_timeout: keepalive_interval,
        outbound_tx,
        outbound_rx,
        stalled,
        shutdown: None,
    }
}

/// Admit and run to completion. A message on `shutdown` ends the session.
pub async fn serve_session<T: Transport>(
    pool: PeerPool,
    transport: T,
    keepalive: Duration,
    shutdown: Option<broadcast::Receiver<()>>,
) {
    let mut session = admit_session(&pool, transport, keepalive).await;
    if let Some(shutdown) = shutdown {
        session = session.with_shutdown(shutdown);
    }
    session.run().await;
}

fn transition(info: &str, from: SessionState, to: SessionState) -> SessionState {
    tracing::trace!(session = %info, from = from.name(), to = to.name(), "session: state");
    to
}

async fn next_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn shutdown_signal(shutdown: &mut Option<broadcast::Receiver<()>>) {
    match shutdown {
        // Closed and lagged both mean the server is going away.
        Some(rx) => {
            let _ = rx.recv().await;
        }
        None => std::future::pending().await,
    }
}

impl<T: Transport> PeerSession<T> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn remote_version(&self) -> u8 {
        self.remote_version
    }

    pub fn info(&self) -> &str {
        &self.info
    }

    /// End the session when `shutdown` receives a message or its sender goes away.
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Drive the session until the transport goes away, keepalive fails, the
    /// outbound queue overflows or the server shuts down.
    pub async fn run(mut self) {
        while self.state == SessionState::Connected {
            tokio::select! {
                event = self.transport.recv() => self.handle_transport_event(event).await,
                Some(frame) = self.outbound_rx.recv() => self.write_frame(frame).await,
                _ = next_tick(&mut self.keepalive) => self.on_keepalive_tick().await,
                _ = self.stalled.notified() => self.cleanup("outbound queue full").await,
                _ = shutdown_signal(&mut self.shutdown) => self.cleanup("server shutdown").await,
            }
        }
        self.cleanup("session ended").await;
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(frame) => self.handle_frame(&frame).await,
            TransportEvent::ProbeAck => {
                tracing::trace!(session = %self.info, "INC: pong");
                self.probe_acked = true;
            }
            TransportEvent::Closed { code, reason } => {
                tracing::info!(session = %self.info, ?code, %reason, "session: closed by remote");
                self.cleanup("closed").await;
            }
            TransportEvent::Error(error) => {
                tracing::warn!(session = %self.info, %error, "session: transport error");
                self.cleanup("transport error").await;
            }
        }
    }

    /// Decode one inbound frame. Meta-frames are answered here; events go to
    /// [`Self::handle_incoming_event`]. Undecodable frames are logged and dropped.
    async fn handle_frame(&mut self, raw: &[u8]) {
        match decode_frame(raw) {
            Ok(Frame::Version(version)) => {
                tracing::debug!(session = %self.info, version, "INC: protocol version");
                self.remote_version = version;
                self.enqueue(Frame::Version(PROTOCOL_VERSION));
            }
            Ok(Frame::Heartbeat) => {
                tracing::trace!(session = %self.info, "INC: heartbeat");
                self.enqueue(Frame::Heartbeat);
            }
            Ok(Frame::Event(evt)) => {
                tracing::debug!(session = %self.info, event = %evt, "INC");
                self.handle_incoming_event(evt).await;
            }
            Err(error) => {
                tracing::debug!(
                    session = %self.info,
                    %error,
                    frame = %hex::encode(raw),
                    "session: invalid message received"
                );
            }
        }
    }

    async fn handle_incoming_event(&mut self, evt: NetworkEvent) {
        let NetworkEvent {
            event_type,
            connection_id,
            data,
        } = evt;
        let mut reg = self.pool.lock().await;

        match event_type {
            EventType::NewConnection => match data {
                EventData::Text(address) => {
                    reg.connect(self.id, &address, connection_id);
                }
                _ => {
                    tracing::debug!(session = %self.info, "session: connect without address");
                    reg.notify(
                        self.id,
                        NetworkEvent::empty(EventType::ConnectionFailed, connection_id),
                    );
                }
            },
            EventType::Disconnected => {
                reg.disconnect(self.id, connection_id);
            }
            EventType::ServerInitialized => match data {
                EventData::Text(address) => reg.start_server(self.id, address),
                _ => {
                    tracing::debug!(session = %self.info, "session: server start without address");
                }
            },
            EventType::ServerClosed => reg.stop_server(self.id),
            EventType::ReliableMessageReceived => {
                reg.send_data(self.id, connection_id, data, true)
            }
            EventType::UnreliableMessageReceived => {
                reg.send_data(self.id, connection_id, data, false)
            }
            EventType::ConnectionFailed | EventType::ServerInitFailed => {
                tracing::debug!(
                    session = %self.info,
                    event = %event_type,
                    "session: server-to-client event received from client"
                );
            }
            EventType::Invalid
            | EventType::FatalError
            | EventType::Warning
            | EventType::Log
            | EventType::ReservedStart
            | EventType::MetaVersion
            | EventType::MetaHeartbeat => {
                tracing::debug!(session = %self.info, event = %event_type, "session: event ignored");
            }
        }
    }

    fn enqueue(&self, frame: Frame) {
        // The receiver lives in self, so Closed only happens during teardown.
        if let Err(TrySendError::Full(_)) = self.outbound_tx.try_send(frame) {
            tracing::warn!(session = %self.info, "session: outbound queue full");
            self.stalled.notify_one();
        }
    }

    async fn write_frame(&mut self, frame: Frame) {
        if self.state != SessionState::Connected || !self.transport.is_open() {
            tracing::trace!(session = %self.info, "session: outbound frame dropped");
            return;
        }
        let bytes: Bytes = match encode_frame(&frame) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(session = %self.info, %error, "session: encode failed");
                return;
            }
        };
        match &frame {
            Frame::Event(evt) => tracing::debug!(session = %self.info, event = %evt, "OUT"),
            Frame::Version(version) => {
                tracing::debug!(session = %self.info, version, "OUT: protocol version")
            }
            Frame::Heartbeat => tracing::trace!(session = %self.info, "OUT: heartbeat"),
        }
        match tokio::time::timeout(self.write_timeout, self.transport.send(bytes)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(session = %self.info, %error, "session: send failed");
                self.cleanup("send failed").await;
            }
            Err(_) => {
                tracing::warn!(session = %self.info, "session: send timed out");
                self.cleanup("send timeout").await;
            }
        }
    }

    async fn on_keepalive_tick(&mut self) {
        if self.state != SessionState::Connected || !self.transport.is_open() {
            return;
        }
        if !self.probe_acked {
            tracing::info!(session = %self.info, "session: keepalive timeout");
            self.cleanup("keepalive timeout").await;
            return;
        }
        self.probe_acked = false;
        tracing::trace!(session = %self.info, "OUT: ping");
        match tokio::time::timeout(self.write_timeout, self.transport.send_probe()).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(session = %self.info, %error, "session: probe failed");
                self.cleanup("probe failed").await;
            }
            Err(_) => {
                tracing::warn!(session = %self.info, "session: probe timed out");
                self.cleanup("probe timeout").await;
            }
        }
    }

    /// Tear the session down: cancel keepalive, leave the pool, close every
    /// link on the remote side, release the address, close the transport.
    /// Safe to call repeatedly; only the first call does anything.
    pub async fn cleanup(&mut self, reason: &str) {
        if matches!(
            self.state,
            SessionState::Disconnecting | SessionState::Disconnected
        ) {
            return;
        }
        self.state = transition(&self.info, self.state, SessionState::Disconnecting);
        tracing::debug!(session = %self.info, reason, "session: disconnecting");

        self.keepalive = None;

        let (teardown, remaining) = {
            let mut reg = self.pool.lock().await;
            let teardown = reg.teardown(self.id);
            (teardown, reg.count())
        };
        match teardown {
            Some(t) => tracing::debug!(
                session = %self.info,
                links_closed = t.links_closed,
                released = ?t.released_address.map(|a| a.to_string_lossy()),
                "session: links torn down"
            ),
            None => tracing::warn!(session = %self.info, "session: already removed from pool"),
        }

        if tokio::time::timeout(self.write_timeout, self.transport.close())
            .await
            .is_err()
        {
            tracing::warn!(session = %self.info, "session: close timed out");
        }
        self.state = transition(&self.info, self.state, SessionState::Disconnected);
        tracing::info!(
            session = %self.info,
            path = %self.pool.path(),
            reason,
            remaining,
            "session: removed"
        );
    }

    /// Id this session uses for its link to `peer`, if any. Test and debug aid.
    pub async fn connection_id_for(&self, peer: SessionId) -> Option<ConnectionId> {
        let reg = self.pool.lock().await;
        reg.member(self.id)?
            .links()
            .iter()
            .find(|(_, link)| link.peer == peer)
            .map(|(id, _)| *id)
    }
}
