//! Relay operations -- connect, join, disconnect, forward, server (un)registration.
//!
//! Each operation is a method on [`Registry`] and therefore runs while the
//! pool lock is held: checks and the two-sided mutations they guard never
//! interleave with another operation. Notifications are queued on the
//! members' outbound channels, which never block.

use rendezvous_protocol::{ConnectionId, EventData, EventType, NetworkEvent, Utf16String};

use crate::peer_pool::{Link, Member, Registry, SessionId};

/// What a teardown removed, for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Teardown {
    pub links_closed: usize,
    pub released_address: Option<Utf16String>,
}

impl Registry {
    /// Register `session` as a server at `address`, releasing any previous
    /// registration first. Under address sharing the new registrant is
    /// linked with everyone already registered there.
    pub fn start_server(&mut self, session: SessionId, address: Utf16String) {
        let Some(member) = self.member(session) else {
            return;
        };
        if member.server_address.is_some() {
            self.stop_server(session);
        }

        if !self.is_address_available(&address) {
            tracing::debug!(session, %address, "relay: address unavailable");
            self.notify(
                session,
                NetworkEvent::new(
                    EventType::ServerInitFailed,
                    ConnectionId::INVALID,
                    address.into(),
                ),
            );
            return;
        }

        self.add_server(session, address.clone());
        if let Some(member) = self.member_mut(session) {
            member.server_address = Some(address.clone());
        }
        tracing::info!(
            path = %self.config().path,
            session,
            %address,
            "relay: address registered"
        );
        self.notify(
            session,
            NetworkEvent::new(
                EventType::ServerInitialized,
                ConnectionId::INVALID,
                address.clone().into(),
            ),
        );

        if self.has_address_sharing() {
            self.connect_join(session, &address);
        }
    }

    /// Release this session's registration, if any.
    pub fn stop_server(&mut self, session: SessionId) {
        let Some(address) = self
            .member_mut(session)
            .and_then(|m| m.server_address.take())
        else {
            return;
        };
        self.remove_server(session, &address);
        self.notify(
            session,
            NetworkEvent::empty(EventType::ServerClosed, ConnectionId::INVALID),
        );
    }

    /// Link `session` to the single server at `address`. The caller keeps its
    /// own `requested` id; the server gets a fresh incoming id. Returns
    /// whether a link was made; on failure the caller gets `ConnectionFailed`.
    ///
    /// Besides a missing or shared address, connecting to yourself, an
    /// invalid or already used `requested` id and a server with no free
    /// incoming id also fail.
    pub fn connect(
        &mut self,
        session: SessionId,
        address: &Utf16String,
        requested: ConnectionId,
    ) -> bool {
        let target = match self.server_connections(address) {
            [only] => Some(*only),
            _ => None,
        };

        let usable = target.filter(|t| {
            *t != session
                && requested.is_valid()
                && self.member(*t).is_some()
                && self
                    .member(session)
                    .is_some_and(|m| !m.links.contains_key(&requested))
        });

        let Some(target) = usable else {
            tracing::debug!(session, %address, %requested, "relay: connect failed");
            self.notify(
                session,
                NetworkEvent::empty(EventType::ConnectionFailed, requested),
            );
            return false;
        };

        let Some(incoming) = self
            .member_mut(target)
            .and_then(Member::allocate_incoming_id)
        else {
            tracing::warn!(session, %address, "relay: server has no free incoming id");
            self.notify(
                session,
                NetworkEvent::empty(EventType::ConnectionFailed, requested),
            );
            return false;
        };
        self.link(target, incoming, session, requested);

        self.notify(
            target,
            NetworkEvent::empty(EventType::NewConnection, incoming),
        );
        self.notify(
            session,
            NetworkEvent::empty(EventType::NewConnection, requested),
        );
        true
    }

    /// Link `session` with every other server at `address`. Both sides of each
    /// link get freshly allocated incoming ids.
    pub fn connect_join(&mut self, session: SessionId, address: &Utf16String) {
        let others: Vec<SessionId> = self
            .server_connections(address)
            .iter()
            .copied()
            .filter(|s| *s != session)
            .collect();

        for other in others {
            let other_id = self
                .member_mut(other)
                .and_then(Member::allocate_incoming_id);
            let own_id = self
                .member_mut(session)
                .and_then(Member::allocate_incoming_id);
            let (Some(other_id), Some(own_id)) = (other_id, own_id) else {
                tracing::warn!(
                    session,
                    other,
                    %address,
                    "relay: join skipped, registrant gone or out of incoming ids"
                );
                continue;
            };
            self.link(other, other_id, session, own_id);

            self.notify(other, NetworkEvent::empty(EventType::NewConnection, other_id));
            self.notify(session, NetworkEvent::empty(EventType::NewConnection, own_id));
        }
    }

    /// Drop the link `session` knows as `local`, on both sides. Both sides get
    /// `Disconnected` with their own id. Unknown ids are ignored.
    pub fn disconnect(&mut self, session: SessionId, local: ConnectionId) -> bool {
        let Some(link) = self
            .member_mut(session)
            .and_then(|m| m.links.remove(&local))
        else {
            tracing::debug!(session, %local, "relay: disconnect of unknown connection id");
            return false;
        };
        self.notify(session, NetworkEvent::empty(EventType::Disconnected, local));
        self.unlink_peer_side(link);
        true
    }

    /// Forward `payload` to whoever `session` knows as `local`. The receiver
    /// sees it under its own id for the link. Unknown ids drop the payload.
    pub fn send_data(
        &mut self,
        session: SessionId,
        local: ConnectionId,
        payload: EventData,
        reliable: bool,
    ) {
        let Some(link) = self
            .member(session)
            .and_then(|m| m.links.get(&local).copied())
        else {
            tracing::debug!(session, %local, "relay: data for unknown connection id dropped");
            return;
        };
        let event_type = if reliable {
            EventType::ReliableMessageReceived
        } else {
            EventType::UnreliableMessageReceived
        };
        self.notify(
            link.peer,
            NetworkEvent::new(event_type, link.peer_connection_id, payload),
        );
    }

    /// Remove `session` from the pool, close all its links on the remote
    /// side and release its address. Returns `None` if it was already gone,
    /// which makes repeated teardown a no-op.
    pub fn teardown(&mut self, session: SessionId) -> Option<Teardown> {
        let member = self.remove_connection(session)?;

        let mut links: Vec<(ConnectionId, Link)> =
            member.links.iter().map(|(id, link)| (*id, *link)).collect();
        links.sort_by_key(|(id, _)| *id);
        for (_, link) in &links {
            self.unlink_peer_side(*link);
        }

        if let Some(address) = &member.server_address {
            self.remove_server(session, address);
        }

        Some(Teardown {
            links_closed: links.len(),
            released_address: member.server_address,
        })
    }

    fn link(&mut self, a: SessionId, a_id: ConnectionId, b: SessionId, b_id: ConnectionId) {
        if let Some(member) = self.member_mut(a) {
            member.links.insert(
                a_id,
                Link {
                    peer: b,
                    peer_connection_id: b_id,
                },
            );
        }
        if let Some(member) = self.member_mut(b) {
            member.links.insert(
                b_id,
                Link {
                    peer: a,
                    peer_connection_id: a_id,
                },
            );
        }
    }

    fn unlink_peer_side(&mut self, link: Link) {
        let removed = self
            .member_mut(link.peer)
            .and_then(|m| m.links.remove(&link.peer_connection_id))
            .is_some();
        if removed {
            self.notify(
                link.peer,
                NetworkEvent::empty(EventType::Disconnected, link.peer_connection_id),
            );
        } else {
            tracing::warn!(
                peer = link.peer,
                connection_id = %link.peer_connection_id,
                "relay: reciprocal link already gone"
            );
        }
    }
}
