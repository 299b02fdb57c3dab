//! Peer pool -- per-app registry of sessions and server addresses.
//!
//! One pool per configured app path. A single mutex covers membership, the
//! address registry and every member's link map, so relay operations that
//! touch two sessions run as one atomic step. Sessions refer to each other by
//! [`SessionId`] and resolve through the registry, never by direct reference.

use std::collections::HashMap;
use std::sync::Arc;

use rendezvous_protocol::{ConnectionId, Frame, NetworkEvent, Utf16String};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, MutexGuard, Notify};

/// Pool-local session identifier.
pub type SessionId = u64;

/// Default limit on address length, in UTF-16 code units.
pub const DEFAULT_MAX_ADDRESS_LENGTH: usize = 256;

/// Default bound on frames queued for one session.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

/// Number of ids in the incoming range `FIRST_INCOMING..=i16::MAX`.
const INCOMING_ID_SPACE: usize = (i16::MAX - ConnectionId::FIRST_INCOMING.0) as usize + 1;

/// Per-pool settings, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub path: String,
    pub address_sharing: bool,
    pub max_address_length: usize,
    /// Frames that may wait in a session's outbound queue.
    pub outbound_capacity: usize,
}

impl PoolConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            address_sharing: false,
            max_address_length: DEFAULT_MAX_ADDRESS_LENGTH,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }

    pub fn with_address_sharing(mut self, sharing: bool) -> Self {
        self.address_sharing = sharing;
        self
    }

    pub fn with_max_address_length(mut self, len: usize) -> Self {
        self.max_address_length = len;
        self
    }

    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }
}

/// One end of a logical link, as seen from the owning member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub peer: SessionId,
    /// The id the peer uses for this same link.
    pub peer_connection_id: ConnectionId,
}

/// Registry-side state of one session.
#[derive(Debug)]
pub struct Member {
    pub(crate) info: String,
    pub(crate) outbound: mpsc::Sender<Frame>,
    /// Fired when the outbound queue overflows; the session tears itself down.
    pub(crate) stalled: Arc<Notify>,
    pub(crate) links: HashMap<ConnectionId, Link>,
    pub(crate) next_incoming_id: ConnectionId,
    pub(crate) server_address: Option<Utf16String>,
}

impl Member {
    fn new(info: String, outbound: mpsc::Sender<Frame>) -> Self {
        Self {
            info,
            outbound,
            stalled: Arc::new(Notify::new()),
            links: HashMap::new(),
            next_incoming_id: ConnectionId::FIRST_INCOMING,
            server_address: None,
        }
    }

    pub fn info(&self) -> &str {
        &self.info
    }

    pub fn links(&self) -> &HashMap<ConnectionId, Link> {
        &self.links
    }

    pub fn server_address(&self) -> Option<&Utf16String> {
        self.server_address.as_ref()
    }

    pub fn stalled(&self) -> Arc<Notify> {
        self.stalled.clone()
    }

    /// Hand out the next id for an incoming link, skipping ids in use.
    /// Wraps back to [`ConnectionId::FIRST_INCOMING`] after `i16::MAX`.
    /// `None` once every id in the incoming range is taken.
    pub(crate) fn allocate_incoming_id(&mut self) -> Option<ConnectionId> {
        for _ in 0..INCOMING_ID_SPACE {
            let id = self.next_incoming_id;
            self.next_incoming_id = match id.0.checked_add(1) {
                Some(next) => ConnectionId(next),
                None => ConnectionId::FIRST_INCOMING,
            };
            if !self.links.contains_key(&id) {
                return Some(id);
            }
        }
        None
    }
}

/// Membership and address registry of one pool. Obtained via [`PeerPool::lock`].
#[derive(Debug)]
pub struct Registry {
    config: PoolConfig,
    sessions: HashMap<SessionId, Member>,
    servers: HashMap<Utf16String, Vec<SessionId>>,
    next_session_id: SessionId,
}

impl Registry {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
            servers: HashMap::new(),
            next_session_id: 1,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn has_address_sharing(&self) -> bool {
        self.config.address_sharing
    }

    /// True if `address` fits the length limit and is free (or sharing is on).
    pub fn is_address_available(&self, address: &Utf16String) -> bool {
        address.len() <= self.config.max_address_length
            && (!self.servers.contains_key(address) || self.config.address_sharing)
    }

    /// Register `session` at `address`. No checks; callers test availability first.
    pub fn add_server(&mut self, session: SessionId, address: Utf16String) {
        self.servers.entry(address).or_default().push(session);
    }

    /// Remove `session` from `address`. The address entry is dropped once empty.
    pub fn remove_server(&mut self, session: SessionId, address: &Utf16String) {
        let Some(list) = self.servers.get_mut(address) else {
            tracing::warn!(%address, session, "pool: release of unknown address");
            return;
        };
        if let Some(index) = list.iter().position(|s| *s == session) {
            list.remove(index);
        } else {
            tracing::warn!(%address, session, "pool: session not registered at address");
        }
        if list.is_empty() {
            self.servers.remove(address);
            tracing::info!(path = %self.config.path, %address, "pool: address released");
        }
    }

    /// Sessions registered at `address`, in registration order.
    pub fn server_connections(&self, address: &Utf16String) -> &[SessionId] {
        self.servers.get(address).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Admit a new member. Returns its id.
    pub fn add_connection(
        &mut self,
        info: String,
        outbound: mpsc::Sender<Frame>,
    ) -> SessionId {
        let id = self.next_session_id;
        self.next_session_id += 1;
        self.sessions.insert(id, Member::new(info, outbound));
        id
    }

    /// Remove a member. Returns its state, or `None` if it was already gone.
    pub fn remove_connection(&mut self, session: SessionId) -> Option<Member> {
        let removed = self.sessions.remove(&session);
        if removed.is_none() {
            tracing::debug!(session, "pool: remove of unknown session");
        }
        removed
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn member(&self, session: SessionId) -> Option<&Member> {
        self.sessions.get(&session)
    }

    pub(crate) fn member_mut(&mut self, session: SessionId) -> Option<&mut Member> {
        self.sessions.get_mut(&session)
    }

    /// Number of registered addresses.
    pub fn address_count(&self) -> usize {
        self.servers.len()
    }

    /// Queue an event for a member. Dropped if the member is gone. A full
    /// queue drops the event and signals the member's session to tear down.
    pub(crate) fn notify(&self, session: SessionId, evt: NetworkEvent) {
        let Some(member) = self.sessions.get(&session) else {
            tracing::trace!(session, %evt, "pool: event for departed session dropped");
            return;
        };
        match member.outbound.try_send(Frame::Event(evt)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    session = %member.info,
                    capacity = self.config.outbound_capacity,
                    "pool: outbound queue full, dropping session"
                );
                member.stalled.notify_one();
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(session = %member.info, "pool: outbound queue closed");
            }
        }
    }
}

/// Shared handle to one app's registry.
#[derive(Clone)]
pub struct PeerPool {
    config: Arc<PoolConfig>,
    inner: Arc<Mutex<Registry>>,
}

impl PeerPool {
    pub fn new(config: PoolConfig) -> Self {
        tracing::info!(
            path = %config.path,
            address_sharing = config.address_sharing,
            max_address_length = config.max_address_length,
            "pool: created"
        );
        Self {
            inner: Arc::new(Mutex::new(Registry::new(config.clone()))),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn path(&self) -> &str {
        &self.config.path
    }

    /// Lock the registry. Every relay operation runs under this guard.
    pub async fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().await
    }

    pub async fn count(&self) -> usize {
        self.inner.lock().await.count()
    }

    pub async fn is_address_available(&self, address: &Utf16String) -> bool {
        self.inner.lock().await.is_address_available(address)
    }
}
