/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Live connections and the session keys they hold.

use crate::session::{SessionIds, SessionKey};
use irongate_core::error::RegistryError;
use irongate_core::types::{
    ConnectionId, ConnectionType, DisconnectReason, FixDictionary, LibraryId, SessionId, Timestamp,
};
use irongate_transport::channel::BoxedChannel;
use irongate_transport::endpoint::{FrameReader, ReceiverEndPoint, SenderEndPoint};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use tracing::debug;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Outbound TCP handshake in progress.
    Connecting,
    /// Accepted, reading the logon.
    AwaitingLogon,
    /// Logon handed to the acceptor library, no decision yet.
    Authenticating,
    /// Rejected with a message, waiting out the linger.
    Lingering,
    /// Endpoint pair in place.
    Active,
}

/// One connection owned by the framer.
#[derive(Debug)]
pub struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) connection_type: ConnectionType,
    pub(crate) library_id: LibraryId,
    pub(crate) channel: BoxedChannel,
    pub(crate) state: ConnectionState,
    pub(crate) remote_address: Option<SocketAddr>,
    pub(crate) deadline: Option<Timestamp>,
    pub(crate) session_key: Option<SessionKey>,
    pub(crate) session_id: Option<SessionId>,
    pub(crate) dictionary: FixDictionary,
    pub(crate) correlation_id: Option<u64>,
    /// Library the logon was handed to.
    pub(crate) authenticating_library: Option<LibraryId>,
    /// Pre-authentication framing state, taken by the receiver on accept.
    pub(crate) reader: Option<FrameReader>,
    pub(crate) logon: Option<Bytes>,
    pub(crate) receiver: Option<ReceiverEndPoint>,
    pub(crate) sender: Option<SenderEndPoint>,
    pub(crate) last_logon_time: Option<Timestamp>,
}

impl Connection {
    /// Connection id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Direction.
    #[must_use]
    pub const fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    /// Owning library.
    #[must_use]
    pub const fn library_id(&self) -> LibraryId {
        self.library_id
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Remote address.
    #[must_use]
    pub const fn remote_address(&self) -> Option<SocketAddr> {
        self.remote_address
    }

    /// Session key, once bound.
    #[must_use]
    pub const fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    /// Session id, once bound.
    #[must_use]
    pub const fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    /// Time the session was promoted to active.
    #[must_use]
    pub const fn last_logon_time(&self) -> Option<Timestamp> {
        self.last_logon_time
    }

    /// Whether the endpoint pair is in place and open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Active
            && self.receiver.as_ref().is_some_and(|r| !r.is_closed())
    }

    /// Whether outbound bytes are backing up.
    #[must_use]
    pub fn is_slow(&self) -> bool {
        self.sender.as_ref().is_some_and(SenderEndPoint::is_slow)
    }

    fn close(&mut self, reason: DisconnectReason) {
        if let Some(receiver) = self.receiver.as_mut() {
            receiver.close(reason);
        }
        if let Some(sender) = self.sender.as_mut() {
            sender.close();
        }
        self.channel.close();
    }
}

/// Every live connection, keyed by id, plus the session key index.
#[derive(Debug)]
pub struct ConnectionRegistry {
    next_id: u64,
    connections: BTreeMap<ConnectionId, Connection>,
    sessions: HashMap<SessionKey, ConnectionId>,
    session_ids: SessionIds,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Creates an empty registry. The first id handed out is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 1,
            connections: BTreeMap::new(),
            sessions: HashMap::new(),
            session_ids: SessionIds::new(),
        }
    }

    /// Stores a new connection under a fresh id.
    pub fn assign_id(
        &mut self,
        channel: BoxedChannel,
        library_id: LibraryId,
        connection_type: ConnectionType,
        state: ConnectionState,
    ) -> ConnectionId {
        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;
        let remote_address = channel.remote_address();
        self.connections.insert(
            id,
            Connection {
                id,
                connection_type,
                library_id,
                channel,
                state,
                remote_address,
                deadline: None,
                session_key: None,
                session_id: None,
                dictionary: FixDictionary::default(),
                correlation_id: None,
                authenticating_library: None,
                reader: None,
                logon: None,
                receiver: None,
                sender: None,
                last_logon_time: None,
            },
        );
        id
    }

    /// Binds a session key to a connection.
    ///
    /// The first bind wins: a key already held by another connection is
    /// refused.
    ///
    /// # Errors
    /// `DuplicateSession` naming the holder, or `UnknownConnection`.
    pub fn bind_session_key(
        &mut self,
        connection_id: ConnectionId,
        key: SessionKey,
    ) -> Result<SessionId, RegistryError> {
        if let Some(existing) = self.sessions.get(&key) {
            if *existing != connection_id {
                return Err(RegistryError::DuplicateSession {
                    key: key.to_string(),
                    existing: *existing,
                });
            }
        }
        let connection = self
            .connections
            .get_mut(&connection_id)
            .ok_or(RegistryError::UnknownConnection(connection_id))?;

        let session_id = self.session_ids.session_id(&key);
        connection.session_key = Some(key.clone());
        connection.session_id = Some(session_id);
        self.sessions.insert(key, connection_id);
        Ok(session_id)
    }

    /// Removes a connection, closing its endpoints and socket and releasing
    /// its session key.
    ///
    /// # Returns
    /// The removed connection, or `None` if it was already gone.
    pub fn remove(&mut self, connection_id: ConnectionId, reason: DisconnectReason) -> Option<Connection> {
        let mut connection = self.connections.remove(&connection_id)?;
        connection.close(reason);
        if let Some(key) = connection.session_key.as_ref() {
            if self.sessions.get(key) == Some(&connection_id) {
                self.sessions.remove(key);
            }
        }
        debug!(%connection_id, %reason, "connection removed");
        Some(connection)
    }

    /// Looks up a connection.
    #[must_use]
    pub fn get(&self, connection_id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&connection_id)
    }

    /// Looks up a connection for mutation.
    pub fn get_mut(&mut self, connection_id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&connection_id)
    }

    /// Connection currently holding `key`.
    #[must_use]
    pub fn session_holder(&self, key: &SessionKey) -> Option<ConnectionId> {
        self.sessions.get(key).copied()
    }

    /// Connection currently bound to `session_id`.
    #[must_use]
    pub fn find_by_session_id(&self, session_id: SessionId) -> Option<ConnectionId> {
        self.connections
            .values()
            .find(|c| c.session_id == Some(session_id))
            .map(|c| c.id)
    }

    /// Ids of connections in `state`, ascending.
    #[must_use]
    pub fn ids_in_state(&self, state: ConnectionState) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.state == state)
            .map(|c| c.id)
            .collect()
    }

    /// Every connection id, ascending.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Every connection, ascending by id.
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns true if there are no live connections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use irongate_core::types::{CompId, ENGINE_LIBRARY_ID};
    use irongate_transport::channel::ChannelSupplier;
    use irongate_transport::fake::{FakeNetwork, FakePeer};

    fn key(local: &str, remote: &str) -> SessionKey {
        SessionKey::new(CompId::new(local).unwrap(), CompId::new(remote).unwrap())
    }

    fn connect(network: &FakeNetwork) -> (BoxedChannel, FakePeer) {
        let peer = network.connect_client();
        let channel = network.supplier().poll_new_connections().unwrap().remove(0);
        (channel, peer)
    }

    #[test]
    fn test_ids_are_monotonic_and_never_reused() {
        let network = FakeNetwork::new();
        let mut registry = ConnectionRegistry::new();

        let (channel, _) = connect(&network);
        let first = registry.assign_id(channel, ENGINE_LIBRARY_ID, ConnectionType::Acceptor, ConnectionState::AwaitingLogon);
        registry.remove(first, DisconnectReason::LocalDisconnect);

        let (channel, _) = connect(&network);
        let second = registry.assign_id(channel, ENGINE_LIBRARY_ID, ConnectionType::Acceptor, ConnectionState::AwaitingLogon);

        assert_eq!(first, ConnectionId::new(1));
        assert_eq!(second, ConnectionId::new(2));
        assert!(registry.get(second).unwrap().remote_address().is_some());
    }

    #[test]
    fn test_first_bind_wins() {
        let network = FakeNetwork::new();
        let mut registry = ConnectionRegistry::new();
        let (a, _) = connect(&network);
        let (b, _) = connect(&network);
        let first = registry.assign_id(a, LibraryId::new(3), ConnectionType::Initiator, ConnectionState::Connecting);
        let second = registry.assign_id(b, LibraryId::new(3), ConnectionType::Initiator, ConnectionState::Connecting);

        let session_id = registry.bind_session_key(first, key("LEH_LZJ02", "CCG")).unwrap();
        assert_eq!(
            registry.bind_session_key(second, key("LEH_LZJ02", "CCG")),
            Err(RegistryError::DuplicateSession {
                key: "LEH_LZJ02->CCG".to_string(),
                existing: first,
            })
        );
        assert_eq!(registry.session_holder(&key("LEH_LZJ02", "CCG")), Some(first));
        assert_eq!(registry.find_by_session_id(session_id), Some(first));
        assert!(registry.get(second).unwrap().session_id().is_none());
    }

    #[test]
    fn test_remove_releases_key_and_reuses_session_id() {
        let network = FakeNetwork::new();
        let mut registry = ConnectionRegistry::new();
        let (a, peer) = connect(&network);
        let first = registry.assign_id(a, LibraryId::new(3), ConnectionType::Initiator, ConnectionState::Connecting);
        let session_id = registry.bind_session_key(first, key("A", "B")).unwrap();

        assert!(registry.remove(first, DisconnectReason::RemoteDisconnect).is_some());
        assert!(registry.remove(first, DisconnectReason::RemoteDisconnect).is_none());
        assert_eq!(peer.close_calls(), 1);
        assert!(registry.session_holder(&key("A", "B")).is_none());

        let (b, _) = connect(&network);
        let second = registry.assign_id(b, LibraryId::new(3), ConnectionType::Initiator, ConnectionState::Connecting);
        assert_eq!(registry.bind_session_key(second, key("A", "B")), Ok(session_id));
    }

    #[test]
    fn test_ids_in_state() {
        let network = FakeNetwork::new();
        let mut registry = ConnectionRegistry::new();
        let (a, _) = connect(&network);
        let (b, _) = connect(&network);
        let first = registry.assign_id(a, ENGINE_LIBRARY_ID, ConnectionType::Acceptor, ConnectionState::AwaitingLogon);
        registry.assign_id(b, LibraryId::new(3), ConnectionType::Initiator, ConnectionState::Connecting);

        assert_eq!(registry.ids_in_state(ConnectionState::AwaitingLogon), vec![first]);
        assert_eq!(registry.len(), 2);
        assert!(!registry.get(first).unwrap().is_connected());
    }
}
