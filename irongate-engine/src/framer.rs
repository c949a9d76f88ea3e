/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! The framer: the gateway's single-threaded reactor.
//!
//! Each call to [`Framer::do_work`] is one tick:
//! 1. accept new connections and start reading their logon,
//! 2. run every queued command to completion,
//! 3. advance outbound handshakes, pending logons, authentications and
//!    lingering rejects,
//! 4. read and write every active connection,
//! 5. evict libraries that stopped heartbeating,
//! 6. publish the errors raised during the tick.
//!
//! All registries are owned by the framer and only touched from the thread
//! driving it, so no locking is involved. Nothing in a tick blocks.

use crate::admin::FixAdminSession;
use crate::auth::AuthenticationProxy;
use crate::clock::{EpochClock, deadline};
use crate::config::EngineConfig;
use crate::connection::{ConnectionRegistry, ConnectionState};
use crate::library::{LibraryInfo, LibraryRegistry};
use crate::protocol::{
    AuthenticationDecision, Command, ConnectEvent, DisconnectEvent, ErrorEvent, GatewayEvent,
    InitiateConnection, LibraryEvent, LogonEvent,
};
use crate::session::SessionKey;
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use irongate_core::error::{AdminError, ConfigError, RegistryError};
use irongate_core::types::{
    ConnectionId, ConnectionType, DisconnectReason, ENGINE_LIBRARY_ID, FixDictionary,
    GatewayErrorKind, LibraryId, NO_LIBRARY_ID, SessionId, Timestamp,
};
use irongate_transport::channel::ChannelSupplier;
use irongate_transport::endpoint::{
    FrameReader, ReadOutcome, ReceiverEndPoint, SenderEndPoint, WriteOutcome,
};
use irongate_transport::header::FrameHeader;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The gateway reactor.
pub struct Framer {
    config: EngineConfig,
    clock: Arc<dyn EpochClock>,
    supplier: Box<dyn ChannelSupplier>,
    libraries: LibraryRegistry,
    connections: ConnectionRegistry,
    commands: Receiver<Command>,
    decisions: Sender<Command>,
    broadcast: Sender<GatewayEvent>,
    errors: Vec<ErrorEvent>,
    frames: Vec<Bytes>,
    closed: bool,
}

impl std::fmt::Debug for Framer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framer")
            .field("libraries", &self.libraries.len())
            .field("connections", &self.connections.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Framer {
    /// Creates a framer.
    ///
    /// # Arguments
    /// * `commands` - Inbox the framer drains every tick
    /// * `decisions` - Sender into that same inbox, handed to authentication
    ///   tokens
    /// * `broadcast` - Stream receiving every lifecycle and error event
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration does not validate.
    pub fn new(
        config: EngineConfig,
        supplier: Box<dyn ChannelSupplier>,
        clock: Arc<dyn EpochClock>,
        commands: Receiver<Command>,
        decisions: Sender<Command>,
        broadcast: Sender<GatewayEvent>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let libraries = LibraryRegistry::new(clock.now());
        Ok(Self {
            config,
            clock,
            supplier,
            libraries,
            connections: ConnectionRegistry::new(),
            commands,
            decisions,
            broadcast,
            errors: Vec::new(),
            frames: Vec::new(),
            closed: false,
        })
    }

    /// Runs one tick.
    ///
    /// # Returns
    /// A measure of the work done; zero means the tick was idle.
    pub fn do_work(&mut self) -> usize {
        if self.closed {
            return 0;
        }
        let now = self.clock.now();
        let mut work = self.poll_new_connections(now);
        work += self.drain_commands(now);
        work += self.poll_connecting(now);
        work += self.poll_awaiting_logon(now);
        work += self.poll_authenticating(now);
        work += self.poll_lingering(now);
        work += self.poll_endpoints();
        work += self.sweep_libraries(now);
        work += self.publish_errors();
        work
    }

    /// Closes every connection with `EngineClose` and releases the listener.
    /// Idempotent.
    pub fn on_close(&mut self) {
        if self.closed {
            return;
        }
        for connection_id in self.connections.ids() {
            self.close_connection(connection_id, DisconnectReason::EngineClose);
        }
        self.publish_errors();
        self.supplier.close();
        self.closed = true;
        info!("framer closed");
    }

    /// Whether [`Self::on_close`] has run.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Snapshot of every live connection, ordered by connection id.
    #[must_use]
    pub fn admin_sessions(&self) -> Vec<FixAdminSession> {
        self.connections
            .iter()
            .map(FixAdminSession::from_connection)
            .collect()
    }

    /// Snapshot of every registered library.
    #[must_use]
    pub fn library_infos(&self) -> Vec<LibraryInfo> {
        self.libraries.library_infos()
    }

    /// Number of live connections in any state.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn poll_new_connections(&mut self, now: Timestamp) -> usize {
        let channels = match self.supplier.poll_new_connections() {
            Ok(channels) => channels,
            Err(err) => {
                warn!(error = %err, "accept failed");
                return 0;
            }
        };

        let accepted = channels.len();
        for mut channel in channels {
            let address = channel.remote_address();
            if self.libraries.acceptor_library().is_none() {
                channel.close();
                self.error(
                    GatewayErrorKind::UnknownLibrary,
                    NO_LIBRARY_ID,
                    None,
                    format!(
                        "no acceptor library registered for connection from {}",
                        describe(address)
                    ),
                );
                continue;
            }

            let connection_id = self.connections.assign_id(
                channel,
                ENGINE_LIBRARY_ID,
                ConnectionType::Acceptor,
                ConnectionState::AwaitingLogon,
            );
            if let Some(connection) = self.connections.get_mut(connection_id) {
                connection.deadline = Some(deadline(now, self.config.authentication_timeout()));
                connection.reader = Some(FrameReader::new(
                    self.config.codec(),
                    self.config.receive_buffer_size(),
                ));
            }
            self.own(ENGINE_LIBRARY_ID, connection_id);
            info!(%connection_id, remote = %describe(address), "accepted connection");
        }
        accepted
    }

    fn drain_commands(&mut self, now: Timestamp) -> usize {
        let mut drained = 0;
        while drained < self.config.max_commands_per_tick() {
            let Ok(command) = self.commands.try_recv() else {
                break;
            };
            self.on_command(command, now);
            drained += 1;
        }
        drained
    }

    fn on_command(&mut self, command: Command, now: Timestamp) {
        match command {
            Command::LibraryConnect {
                library_id,
                kind,
                name,
                events,
            } => {
                self.libraries.register(library_id, kind, name, events, now);
            }
            Command::Heartbeat { library_id } => {
                self.libraries.heartbeat(library_id, now);
            }
            Command::InitiateConnection {
                library_id,
                request,
            } => self.on_initiate_connection(library_id, request, now),
            Command::Disconnect {
                library_id,
                connection_id,
                reason,
            } => self.on_disconnect(library_id, connection_id, reason),
            Command::SendMessage {
                library_id,
                connection_id,
                frame,
            } => self.on_send_message(library_id, connection_id, &frame),
            Command::AuthenticationDecision {
                connection_id,
                decision,
            } => self.on_authentication_decision(connection_id, decision, now),
            Command::AdminSnapshot { reply } => {
                if reply.send(self.admin_sessions()).is_err() {
                    debug!("admin snapshot requester went away");
                }
            }
            Command::AdminDisconnect { session_id, reply } => {
                let result = self.on_admin_disconnect(session_id);
                if reply.send(result).is_err() {
                    debug!(%session_id, "admin disconnect requester went away");
                }
            }
        }
    }

    fn on_initiate_connection(
        &mut self,
        library_id: LibraryId,
        request: InitiateConnection,
        now: Timestamp,
    ) {
        let correlation_id = Some(request.correlation_id);
        if library_id.is_engine() || !self.libraries.contains(library_id) {
            self.error(
                GatewayErrorKind::UnknownLibrary,
                library_id,
                correlation_id,
                format!("library {library_id} is not registered"),
            );
            return;
        }

        let Some(address) = request.target_address() else {
            self.error(
                GatewayErrorKind::UnableToConnect,
                library_id,
                correlation_id,
                format!("unable to resolve {}:{}", request.host, request.port),
            );
            return;
        };

        let channel = match self.supplier.open_outbound(address) {
            Ok(channel) => channel,
            Err(err) => {
                self.error(
                    GatewayErrorKind::UnableToConnect,
                    library_id,
                    correlation_id,
                    format!("unable to connect to {address}: {err}"),
                );
                return;
            }
        };

        let key = request
            .session_key()
            .compose(self.config.session_key_composition());
        let connection_id = self.connections.assign_id(
            channel,
            library_id,
            ConnectionType::Initiator,
            ConnectionState::Connecting,
        );
        if let Err(err) = self.connections.bind_session_key(connection_id, key) {
            self.connections
                .remove(connection_id, DisconnectReason::DuplicateSession);
            self.registry_error(err, library_id, correlation_id);
            return;
        }

        if let Some(connection) = self.connections.get_mut(connection_id) {
            connection.deadline = Some(deadline(now, self.config.connect_timeout()));
            connection.correlation_id = correlation_id;
            connection.dictionary = request.dictionary;
        }
        self.own(library_id, connection_id);
        info!(%connection_id, %library_id, %address, "initiating connection");
    }

    fn poll_connecting(&mut self, now: Timestamp) -> usize {
        let mut work = 0;
        for connection_id in self.connections.ids_in_state(ConnectionState::Connecting) {
            let Some(connection) = self.connections.get_mut(connection_id) else {
                continue;
            };
            let result = connection.channel.finish_connect();
            let timed_out = connection.deadline.is_some_and(|d| now >= d);
            match result {
                Ok(true) => {
                    self.on_connected(connection_id, now);
                    work += 1;
                }
                Ok(false) if timed_out => {
                    self.fail_connect(connection_id, "connect timed out");
                    work += 1;
                }
                Ok(false) => {}
                Err(err) => {
                    self.fail_connect(connection_id, &err.to_string());
                    work += 1;
                }
            }
        }
        work
    }

    fn on_connected(&mut self, connection_id: ConnectionId, now: Timestamp) {
        let reader = FrameReader::new(self.config.codec(), self.config.receive_buffer_size());
        let sender_limit = self.config.sender_max_bytes_in_buffer();
        let Some(connection) = self.connections.get_mut(connection_id) else {
            return;
        };
        connection.receiver = Some(ReceiverEndPoint::new(connection_id, reader));
        connection.sender = Some(SenderEndPoint::new(connection_id, sender_limit));
        connection.state = ConnectionState::Active;
        connection.deadline = None;
        connection.last_logon_time = Some(now);
        self.announce(connection_id);
    }

    fn fail_connect(&mut self, connection_id: ConnectionId, reason: &str) {
        let Some(connection) = self
            .connections
            .remove(connection_id, DisconnectReason::Exception)
        else {
            return;
        };
        self.libraries
            .release_connection(connection.library_id(), connection_id);
        self.error(
            GatewayErrorKind::UnableToConnect,
            connection.library_id(),
            connection.correlation_id,
            format!(
                "unable to connect to {}: {reason}",
                describe(connection.remote_address())
            ),
        );
    }

    fn poll_awaiting_logon(&mut self, now: Timestamp) -> usize {
        let mut work = 0;
        for connection_id in self.connections.ids_in_state(ConnectionState::AwaitingLogon) {
            let Some(connection) = self.connections.get_mut(connection_id) else {
                continue;
            };
            if connection.deadline.is_some_and(|d| now >= d) {
                warn!(%connection_id, "no logon received in time");
                self.close_connection(connection_id, DisconnectReason::FailedAuthentication);
                work += 1;
                continue;
            }
            let Some(reader) = connection.reader.as_mut() else {
                continue;
            };

            self.frames.clear();
            let outcome = reader.poll(connection.channel.as_mut(), &mut self.frames, 1);
            match (self.frames.pop(), outcome) {
                (Some(frame), _) => {
                    self.on_logon_frame(connection_id, frame);
                    work += 1;
                }
                (None, ReadOutcome::Closed(reason)) => {
                    self.close_connection(connection_id, reason);
                    work += 1;
                }
                (None, ReadOutcome::Read(_)) => work += 1,
                (None, ReadOutcome::Idle) => {}
            }
        }
        work
    }

    fn on_logon_frame(&mut self, connection_id: ConnectionId, frame: Bytes) {
        let header = match FrameHeader::parse(&frame) {
            Ok(header) if header.is_logon() => header,
            Ok(header) => {
                warn!(%connection_id, msg_type = %header.msg_type, "first message was not a logon");
                self.close_connection(connection_id, DisconnectReason::ProtocolViolation);
                return;
            }
            Err(err) => {
                warn!(%connection_id, error = %err, "unreadable logon header");
                self.close_connection(connection_id, DisconnectReason::ProtocolViolation);
                return;
            }
        };

        let Some(acceptor) = self.libraries.acceptor_library() else {
            self.error(
                GatewayErrorKind::UnknownLibrary,
                NO_LIBRARY_ID,
                None,
                format!("no acceptor library registered for connection {connection_id}"),
            );
            self.close_connection(connection_id, DisconnectReason::FailedAuthentication);
            return;
        };

        let key = SessionKey::from_inbound_logon(&header)
            .compose(self.config.session_key_composition());
        if let Err(err) = self.connections.bind_session_key(connection_id, key.clone()) {
            self.close_connection(connection_id, DisconnectReason::DuplicateSession);
            self.registry_error(err, acceptor, None);
            return;
        }

        let Some(connection) = self.connections.get_mut(connection_id) else {
            return;
        };
        connection.state = ConnectionState::Authenticating;
        connection.authenticating_library = Some(acceptor);
        connection.dictionary =
            FixDictionary::from_begin_string(&header.begin_string).unwrap_or_default();
        connection.logon = Some(frame.clone());

        let proxy = AuthenticationProxy::new(
            connection_id,
            connection.remote_address(),
            key,
            frame,
            self.decisions.clone(),
        );
        info!(%connection_id, library_id = %acceptor, "authenticating logon");
        if let Some(events) = self.libraries.events(acceptor) {
            if events.send(LibraryEvent::Authenticate(proxy)).is_err() {
                debug!(%connection_id, library_id = %acceptor, "acceptor library stream closed");
            }
        }
    }

    fn poll_authenticating(&mut self, now: Timestamp) -> usize {
        let expired: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|c| c.state() == ConnectionState::Authenticating)
            .filter(|c| c.deadline.is_some_and(|d| now >= d))
            .map(|c| c.id())
            .collect();
        for connection_id in &expired {
            warn!(%connection_id, "authentication decision timed out");
            self.close_connection(*connection_id, DisconnectReason::FailedAuthentication);
        }
        expired.len()
    }

    fn on_authentication_decision(
        &mut self,
        connection_id: ConnectionId,
        decision: AuthenticationDecision,
        now: Timestamp,
    ) {
        let Some(connection) = self.connections.get(connection_id) else {
            debug!(%connection_id, "decision for a connection that is gone");
            return;
        };
        if connection.state() != ConnectionState::Authenticating {
            debug!(%connection_id, state = ?connection.state(), "decision for a connection not authenticating");
            return;
        }
        let acceptor = connection.authenticating_library;

        match decision {
            AuthenticationDecision::Accept { dictionary } => {
                self.accept(connection_id, acceptor, dictionary, now);
            }
            AuthenticationDecision::Reject { message, linger } => {
                self.reject(connection_id, message, linger, now);
            }
        }
    }

    fn accept(
        &mut self,
        connection_id: ConnectionId,
        acceptor: Option<LibraryId>,
        dictionary: Option<FixDictionary>,
        now: Timestamp,
    ) {
        let Some(owner) = acceptor.filter(|id| self.libraries.contains(*id)) else {
            warn!(%connection_id, "acceptor library went away before accepting");
            self.close_connection(connection_id, DisconnectReason::FailedAuthentication);
            return;
        };
        if let Err(err) = self
            .libraries
            .transfer(connection_id, ENGINE_LIBRARY_ID, owner)
        {
            warn!(%connection_id, error = %err, "unable to hand connection to acceptor library");
            self.close_connection(connection_id, DisconnectReason::FailedAuthentication);
            return;
        }

        let codec = self.config.codec();
        let read_size = self.config.receive_buffer_size();
        let sender_limit = self.config.sender_max_bytes_in_buffer();
        let Some(connection) = self.connections.get_mut(connection_id) else {
            return;
        };
        let reader = connection
            .reader
            .take()
            .unwrap_or_else(|| FrameReader::new(codec, read_size));
        connection.receiver = Some(ReceiverEndPoint::new(connection_id, reader));
        connection.sender = Some(SenderEndPoint::new(connection_id, sender_limit));
        connection.library_id = owner;
        connection.state = ConnectionState::Active;
        connection.deadline = None;
        connection.last_logon_time = Some(now);
        if let Some(dictionary) = dictionary {
            connection.dictionary = dictionary;
        }
        let logon = connection.logon.take();
        let session_id = connection.session_id();

        self.announce(connection_id);
        if let Some(frame) = logon {
            self.deliver(owner, connection_id, session_id, frame);
        }
    }

    fn reject(
        &mut self,
        connection_id: ConnectionId,
        message: Option<Bytes>,
        linger: Duration,
        now: Timestamp,
    ) {
        let Some(message) = message else {
            info!(%connection_id, "logon rejected");
            self.close_connection(connection_id, DisconnectReason::FailedAuthentication);
            return;
        };

        let linger = linger.min(self.config.max_reject_linger());
        let limit = self.config.sender_max_bytes_in_buffer().max(message.len());
        let mut sender = SenderEndPoint::new(connection_id, limit);
        if let Err(reason) = sender.enqueue(&message) {
            self.close_connection(connection_id, reason);
            return;
        }
        let Some(connection) = self.connections.get_mut(connection_id) else {
            return;
        };
        connection.reader = None;
        connection.sender = Some(sender);
        connection.state = ConnectionState::Lingering;
        connection.deadline = Some(deadline(now, linger));
        info!(%connection_id, linger = ?linger, "logon rejected with message");
    }

    fn poll_lingering(&mut self, now: Timestamp) -> usize {
        let mut work = 0;
        for connection_id in self.connections.ids_in_state(ConnectionState::Lingering) {
            let Some(connection) = self.connections.get_mut(connection_id) else {
                continue;
            };
            let mut outcome = WriteOutcome::Idle;
            if let Some(sender) = connection.sender.as_mut() {
                outcome = sender.flush(connection.channel.as_mut());
            }
            let expired = connection.deadline.is_none_or(|d| now >= d);

            if expired || matches!(outcome, WriteOutcome::Closed(_)) {
                self.close_connection(connection_id, DisconnectReason::FailedAuthentication);
                work += 1;
            } else if matches!(outcome, WriteOutcome::Wrote(_)) {
                work += 1;
            }
        }
        work
    }

    fn poll_endpoints(&mut self) -> usize {
        let mut work = 0;
        for connection_id in self.connections.ids_in_state(ConnectionState::Active) {
            let Some(connection) = self.connections.get_mut(connection_id) else {
                continue;
            };
            let (Some(receiver), Some(sender)) =
                (connection.receiver.as_mut(), connection.sender.as_mut())
            else {
                continue;
            };

            self.frames.clear();
            let read = receiver.poll_for_data(connection.channel.as_mut(), &mut self.frames);
            let write = sender.flush(connection.channel.as_mut());
            let owner = connection.library_id();
            let session_id = connection.session_id();

            let mut frames = std::mem::take(&mut self.frames);
            work += frames.len();
            for frame in frames.drain(..) {
                self.deliver(owner, connection_id, session_id, frame);
            }
            self.frames = frames;

            if matches!(read, ReadOutcome::Read(_)) || matches!(write, WriteOutcome::Wrote(_)) {
                work += 1;
            }
            let closed = match (read, write) {
                (ReadOutcome::Closed(reason), _) | (_, WriteOutcome::Closed(reason)) => Some(reason),
                _ => None,
            };
            if let Some(reason) = closed {
                self.close_connection(connection_id, reason);
                work += 1;
            }
        }
        work
    }

    fn sweep_libraries(&mut self, now: Timestamp) -> usize {
        let expired = self
            .libraries
            .sweep_expired(now, self.config.reply_timeout());
        for library_id in &expired {
            let owned = self.libraries.owned_connections(*library_id);
            info!(%library_id, connections = owned.len(), "library timed out");
            for connection_id in owned {
                self.close_connection(connection_id, DisconnectReason::LibraryTimeout);
            }
            self.libraries.remove(*library_id);
        }
        expired.len()
    }

    fn on_disconnect(
        &mut self,
        library_id: LibraryId,
        connection_id: ConnectionId,
        reason: Option<DisconnectReason>,
    ) {
        let reason = reason.unwrap_or(DisconnectReason::LocalDisconnect);
        match self.connections.get(connection_id) {
            None => {
                debug!(%connection_id, %library_id, "disconnect for a connection that is gone");
                return;
            }
            Some(connection) if connection.library_id() != library_id => {
                debug!(
                    %connection_id,
                    %library_id,
                    owner = %connection.library_id(),
                    "disconnect requested by a library that does not own the connection"
                );
            }
            Some(_) => {}
        }
        self.close_connection(connection_id, reason);
    }

    fn on_send_message(&mut self, library_id: LibraryId, connection_id: ConnectionId, frame: &[u8]) {
        let owned_and_active = self.connections.get(connection_id).is_some_and(|c| {
            c.library_id() == library_id && c.state() == ConnectionState::Active
        });
        if !owned_and_active {
            self.error(
                GatewayErrorKind::UnknownSession,
                library_id,
                None,
                format!("connection {connection_id} is not a live session of library {library_id}"),
            );
            return;
        }

        let result = self
            .connections
            .get_mut(connection_id)
            .and_then(|c| c.sender.as_mut())
            .map_or(Ok(()), |sender| sender.enqueue(frame));
        if let Err(reason) = result {
            self.close_connection(connection_id, reason);
        }
    }

    fn on_admin_disconnect(&mut self, session_id: SessionId) -> Result<(), AdminError> {
        let connection_id = self
            .connections
            .find_by_session_id(session_id)
            .ok_or(AdminError::NotFound(session_id))?;
        info!(%session_id, %connection_id, "admin disconnect");
        self.close_connection(connection_id, DisconnectReason::LocalDisconnect);
        Ok(())
    }

    /// Tears a connection down. Returns false if it was already gone.
    ///
    /// Every connection owned by a client library gets exactly one
    /// disconnect event, including outbound ones still connecting.
    /// Handshake connections belong to the engine library and close silently.
    fn close_connection(&mut self, connection_id: ConnectionId, reason: DisconnectReason) -> bool {
        let Some(connection) = self.connections.remove(connection_id, reason) else {
            return false;
        };
        let library_id = connection.library_id();
        self.libraries.release_connection(library_id, connection_id);
        info!(%connection_id, %library_id, %reason, "connection closed");
        if !library_id.is_engine() {
            self.publish(GatewayEvent::Disconnect(DisconnectEvent {
                library_id,
                connection_id,
                reason,
            }));
        }
        true
    }

    fn announce(&self, connection_id: ConnectionId) {
        let Some(connection) = self.connections.get(connection_id) else {
            return;
        };
        let library_id = connection.library_id();
        let connect = ConnectEvent {
            connection_id,
            address: connection.remote_address(),
            library_id,
            connection_type: connection.connection_type(),
        };
        let logon = connection
            .session_id()
            .zip(connection.session_key().cloned())
            .map(|(session_id, session_key)| LogonEvent {
                library_id,
                connection_id,
                session_id,
                session_key,
                dictionary: connection.dictionary,
            });

        info!(
            %connection_id,
            %library_id,
            connection_type = %connect.connection_type,
            session_id = ?logon.as_ref().map(|l| l.session_id),
            "session active"
        );
        self.publish(GatewayEvent::Connect(connect));
        if let Some(logon) = logon {
            self.publish(GatewayEvent::Logon(logon));
        }
    }

    fn deliver(
        &self,
        library_id: LibraryId,
        connection_id: ConnectionId,
        session_id: Option<SessionId>,
        frame: Bytes,
    ) {
        if let Some(events) = self.libraries.events(library_id) {
            let event = LibraryEvent::Message {
                connection_id,
                session_id,
                frame,
            };
            if events.send(event).is_err() {
                debug!(%connection_id, %library_id, "library stream closed, dropping message");
            }
        }
    }

    fn publish(&self, event: GatewayEvent) {
        let library_id = event.library_id();
        if let Some(events) = self.libraries.events(library_id) {
            if events.send(event.clone().into()).is_err() {
                debug!(%library_id, "library stream closed");
            }
        }
        match self.broadcast.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => debug!("broadcast stream full, dropping event"),
        }
    }

    fn error(
        &mut self,
        kind: GatewayErrorKind,
        library_id: LibraryId,
        correlation_id: Option<u64>,
        message: String,
    ) {
        warn!(%kind, %library_id, correlation_id, message = %message, "gateway error");
        self.errors.push(ErrorEvent {
            kind,
            library_id,
            correlation_id,
            message,
        });
    }

    fn registry_error(&mut self, err: RegistryError, library_id: LibraryId, correlation_id: Option<u64>) {
        let kind = match err {
            RegistryError::UnknownLibrary(_) => GatewayErrorKind::UnknownLibrary,
            RegistryError::UnknownConnection(_) => GatewayErrorKind::UnknownSession,
            RegistryError::DuplicateSession { .. } => GatewayErrorKind::DuplicateSession,
        };
        self.error(kind, library_id, correlation_id, err.to_string());
    }

    fn publish_errors(&mut self) -> usize {
        let errors = std::mem::take(&mut self.errors);
        let published = errors.len();
        for error in errors {
            self.publish(GatewayEvent::Error(error));
        }
        published
    }

    fn own(&mut self, library_id: LibraryId, connection_id: ConnectionId) {
        if let Err(err) = self.libraries.add_connection(library_id, connection_id) {
            warn!(%connection_id, error = %err, "unable to record connection owner");
        }
    }
}

fn describe(address: Option<SocketAddr>) -> String {
    address.map_or_else(|| "unknown address".to_string(), |a| a.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeEpochClock;
    use crate::session::SessionKeyComposition;
    use crossbeam_channel::{bounded, unbounded};
    use irongate_core::types::{CompId, SeqNum};
    use irongate_transport::fake::{ConnectOutcome, FakeNetwork, FakePeer};
    use irongate_transport::frame::FrameBuilder;

    const LIBRARY_ID: LibraryId = LibraryId::new(3);
    const OTHER_LIBRARY_ID: LibraryId = LibraryId::new(4);
    const REPLY_TIMEOUT: Duration = Duration::from_millis(10);
    const TARGET: &str = "127.0.0.1:9999";

    struct Harness {
        framer: Framer,
        network: FakeNetwork,
        clock: FakeEpochClock,
        commands: Sender<Command>,
        broadcast: Receiver<GatewayEvent>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(EngineConfig::new().with_reply_timeout(REPLY_TIMEOUT))
        }

        fn with_config(config: EngineConfig) -> Self {
            let network = FakeNetwork::new();
            let clock = FakeEpochClock::new(1_000);
            let (commands, inbox) = unbounded();
            let (broadcast_tx, broadcast) = unbounded();
            let framer = Framer::new(
                config,
                Box::new(network.supplier()),
                Arc::new(clock.clone()),
                inbox,
                commands.clone(),
                broadcast_tx,
            )
            .unwrap();
            Self {
                framer,
                network,
                clock,
                commands,
                broadcast,
            }
        }

        fn send(&self, command: Command) {
            self.commands.send(command).unwrap();
        }

        fn tick(&mut self) -> usize {
            self.framer.do_work()
        }

        fn connect_library(&mut self, library_id: LibraryId, kind: ConnectionType) -> Receiver<LibraryEvent> {
            let (events, rx) = unbounded();
            self.send(Command::LibraryConnect {
                library_id,
                kind,
                name: format!("library {library_id}"),
                events,
            });
            self.tick();
            rx
        }

        fn heartbeat(&self, library_id: LibraryId) {
            self.send(Command::Heartbeat { library_id });
        }

        fn initiate(&mut self, library_id: LibraryId, request: InitiateConnection) {
            self.send(Command::InitiateConnection {
                library_id,
                request,
            });
            self.tick();
        }

        fn broadcast_events(&self) -> Vec<GatewayEvent> {
            self.broadcast.try_iter().collect()
        }

        /// Connects a client, sends its logon and returns the token.
        fn inbound_logon(
            &mut self,
            events: &Receiver<LibraryEvent>,
            sender: &str,
            target: &str,
        ) -> (FakePeer, AuthenticationProxy) {
            let peer = self.network.connect_client();
            peer.send(&logon(sender, target, 1));
            self.tick();
            (peer, expect_authenticate(events))
        }

        /// Runs an inbound logon through to an accepted session.
        fn accepted_session(
            &mut self,
            events: &Receiver<LibraryEvent>,
            sender: &str,
        ) -> (FakePeer, ConnectionId) {
            let (peer, mut proxy) = self.inbound_logon(events, sender, "GATEWAY");
            let connection_id = proxy.connection_id();
            proxy.accept().unwrap();
            self.tick();
            drain(events);
            (peer, connection_id)
        }
    }

    fn comp(s: &str) -> CompId {
        CompId::new(s).unwrap()
    }

    fn request(correlation_id: u64) -> InitiateConnection {
        let address: SocketAddr = TARGET.parse().unwrap();
        InitiateConnection::new(
            address.ip().to_string(),
            address.port(),
            comp("LEH_LZJ02"),
            comp("CCG"),
        )
        .with_correlation_id(correlation_id)
    }

    fn logon(sender: &str, target: &str, seq: u64) -> Bytes {
        FrameBuilder::with_header("FIX.4.4", "A", sender, target, seq)
            .uint_field(98, 0)
            .uint_field(108, 30)
            .build()
    }

    fn heartbeat_frame(sender: &str, target: &str, seq: u64) -> Bytes {
        FrameBuilder::with_header("FIX.4.4", "0", sender, target, seq).build()
    }

    fn drain(events: &Receiver<LibraryEvent>) -> Vec<LibraryEvent> {
        events.try_iter().collect()
    }

    fn expect_authenticate(events: &Receiver<LibraryEvent>) -> AuthenticationProxy {
        match events.try_recv() {
            Ok(LibraryEvent::Authenticate(proxy)) => proxy,
            other => panic!("expected an authenticate event, got {other:?}"),
        }
    }

    fn errors(events: &[GatewayEvent]) -> Vec<&ErrorEvent> {
        events
            .iter()
            .filter_map(|e| match e {
                GatewayEvent::Error(error) => Some(error),
                _ => None,
            })
            .collect()
    }

    fn disconnects(events: &[LibraryEvent]) -> Vec<&DisconnectEvent> {
        events
            .iter()
            .filter_map(|e| match e {
                LibraryEvent::Disconnect(disconnect) => Some(disconnect),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_idle_tick_does_no_work() {
        let mut h = Harness::new();
        assert_eq!(h.tick(), 0);
        assert_eq!(h.framer.library_infos().len(), 1);
    }

    #[test]
    fn test_commands_beyond_the_per_tick_limit_wait_for_the_next_tick() {
        let mut h = Harness::with_config(
            EngineConfig::new()
                .with_reply_timeout(REPLY_TIMEOUT)
                .with_max_commands_per_tick(1),
        );
        let (events, _rx) = unbounded();
        for library_id in [LIBRARY_ID, OTHER_LIBRARY_ID] {
            h.send(Command::LibraryConnect {
                library_id,
                kind: ConnectionType::Initiator,
                name: format!("library {library_id}"),
                events: events.clone(),
            });
        }

        h.tick();
        assert_eq!(h.framer.library_infos().len(), 2);
        h.tick();
        assert_eq!(h.framer.library_infos().len(), 3);
        assert_eq!(h.tick(), 0);
    }

    #[test]
    fn test_initiated_connection_publishes_connect_then_logon() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Initiator);
        h.initiate(LIBRARY_ID, request(1));

        let received = drain(&events);
        assert_eq!(received.len(), 2);
        match &received[0] {
            LibraryEvent::Connect(connect) => {
                assert_eq!(connect.connection_id, ConnectionId::new(1));
                assert_eq!(connect.library_id, LIBRARY_ID);
                assert_eq!(connect.connection_type, ConnectionType::Initiator);
                assert_eq!(connect.address, Some(TARGET.parse().unwrap()));
            }
            other => panic!("expected connect, got {other:?}"),
        }
        match &received[1] {
            LibraryEvent::Logon(logon) => {
                assert_eq!(logon.connection_id, ConnectionId::new(1));
                assert_eq!(logon.session_id, SessionId::new(1));
                assert_eq!(logon.session_key.to_string(), "LEH_LZJ02->CCG");
            }
            other => panic!("expected logon, got {other:?}"),
        }

        let broadcast = h.broadcast_events();
        assert!(matches!(broadcast[0], GatewayEvent::Connect(_)));
        assert!(matches!(broadcast[1], GatewayEvent::Logon(_)));
        assert_eq!(
            h.framer.library_infos()[1].connection_ids,
            vec![ConnectionId::new(1)]
        );
    }

    #[test]
    fn test_initiate_from_unknown_library_opens_no_socket() {
        let mut h = Harness::new();
        h.initiate(LIBRARY_ID, request(5));

        let broadcast = h.broadcast_events();
        let errors = errors(&broadcast);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, GatewayErrorKind::UnknownLibrary);
        assert_eq!(errors[0].library_id, LIBRARY_ID);
        assert_eq!(errors[0].correlation_id, Some(5));
        assert!(h.network.outbound_peers().is_empty());
        assert_eq!(h.framer.connection_count(), 0);
    }

    #[test]
    fn test_refused_connect_is_unable_to_connect() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Initiator);
        h.network
            .script_connect(TARGET.parse().unwrap(), ConnectOutcome::Refuse);
        h.initiate(LIBRARY_ID, request(2));

        let received = drain(&events);
        assert_eq!(received.len(), 1);
        assert!(matches!(
            &received[0],
            LibraryEvent::Error(ErrorEvent {
                kind: GatewayErrorKind::UnableToConnect,
                correlation_id: Some(2),
                ..
            })
        ));
        assert_eq!(errors(&h.broadcast_events()).len(), 1);
        assert_eq!(h.framer.connection_count(), 0);
        assert!(h.framer.admin_sessions().is_empty());
    }

    #[test]
    fn test_unresolved_host_is_unable_to_connect() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Initiator);
        h.initiate(
            LIBRARY_ID,
            InitiateConnection::new("gateway.invalid", 9999, comp("LEH_LZJ02"), comp("CCG"))
                .with_correlation_id(6),
        );

        let received = drain(&events);
        assert_eq!(received.len(), 1);
        match &received[0] {
            LibraryEvent::Error(error) => {
                assert_eq!(error.kind, GatewayErrorKind::UnableToConnect);
                assert_eq!(error.correlation_id, Some(6));
                assert!(error.message.contains("gateway.invalid"));
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert!(h.network.outbound_peers().is_empty());
        assert_eq!(h.framer.connection_count(), 0);
    }

    #[test]
    fn test_pinned_address_is_used_instead_of_host() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Initiator);
        h.initiate(
            LIBRARY_ID,
            InitiateConnection::new("gateway.invalid", 9999, comp("LEH_LZJ02"), comp("CCG"))
                .with_address(TARGET.parse().unwrap()),
        );

        let received = drain(&events);
        assert!(matches!(received[0], LibraryEvent::Connect(_)));
        assert_eq!(
            h.network.outbound_peers()[0].remote_address(),
            TARGET.parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_failed_handshake_leaves_no_connection() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Initiator);
        h.network
            .script_connect(TARGET.parse().unwrap(), ConnectOutcome::Hold);
        h.initiate(LIBRARY_ID, request(3));
        assert_eq!(h.framer.connection_count(), 1);
        assert!(drain(&events).is_empty());

        let peer = h.network.outbound_peers()[0].clone();
        peer.fail_connect();
        h.tick();

        let received = drain(&events);
        assert_eq!(received.len(), 1);
        assert!(matches!(
            &received[0],
            LibraryEvent::Error(ErrorEvent {
                kind: GatewayErrorKind::UnableToConnect,
                ..
            })
        ));
        assert_eq!(h.framer.connection_count(), 0);
        assert!(peer.is_closed());
        assert!(h.framer.library_infos()[1].connection_ids.is_empty());
    }

    #[test]
    fn test_connect_timeout_is_unable_to_connect() {
        let mut h = Harness::with_config(
            EngineConfig::new()
                .with_reply_timeout(REPLY_TIMEOUT)
                .with_connect_timeout(Duration::from_millis(100)),
        );
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Initiator);
        h.network
            .script_connect(TARGET.parse().unwrap(), ConnectOutcome::Hold);
        h.initiate(LIBRARY_ID, request(4));

        h.clock.advance_millis(99);
        h.heartbeat(LIBRARY_ID);
        h.tick();
        assert_eq!(h.framer.connection_count(), 1);

        h.clock.advance_millis(1);
        h.heartbeat(LIBRARY_ID);
        h.tick();
        let received = drain(&events);
        assert_eq!(received.len(), 1);
        match &received[0] {
            LibraryEvent::Error(error) => {
                assert_eq!(error.kind, GatewayErrorKind::UnableToConnect);
                assert!(error.message.contains("timed out"));
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(h.framer.connection_count(), 0);
    }

    #[test]
    fn test_duplicate_initiate_leaves_first_connection_untouched() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Initiator);
        h.initiate(LIBRARY_ID, request(1));
        drain(&events);

        h.initiate(LIBRARY_ID, request(2));
        let received = drain(&events);
        assert_eq!(received.len(), 1);
        match &received[0] {
            LibraryEvent::Error(error) => {
                assert_eq!(error.kind, GatewayErrorKind::DuplicateSession);
                assert_eq!(error.library_id, LIBRARY_ID);
                assert_eq!(error.correlation_id, Some(2));
            }
            other => panic!("expected duplicate session, got {other:?}"),
        }

        let peers = h.network.outbound_peers();
        assert_eq!(peers.len(), 2);
        assert!(!peers[0].is_closed());
        assert!(peers[1].is_closed());

        let sessions = h.framer.admin_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].connection_id, ConnectionId::new(1));
        assert!(sessions[0].is_connected);
    }

    #[test]
    fn test_sub_ids_only_count_when_configured() {
        let with_desk = |desk: &str| request(1).with_sub_ids(Some(desk.to_string()), None);

        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Initiator);
        h.initiate(LIBRARY_ID, with_desk("A"));
        h.initiate(LIBRARY_ID, with_desk("B"));
        assert_eq!(h.framer.admin_sessions().len(), 1);
        assert!(drain(&events).iter().any(|e| matches!(
            e,
            LibraryEvent::Error(ErrorEvent {
                kind: GatewayErrorKind::DuplicateSession,
                ..
            })
        )));

        let mut h = Harness::with_config(
            EngineConfig::new()
                .with_reply_timeout(REPLY_TIMEOUT)
                .with_session_key_composition(SessionKeyComposition::WithSubIds),
        );
        h.connect_library(LIBRARY_ID, ConnectionType::Initiator);
        h.initiate(LIBRARY_ID, with_desk("A"));
        h.initiate(LIBRARY_ID, with_desk("B"));
        assert_eq!(h.framer.admin_sessions().len(), 2);
    }

    #[test]
    fn test_library_timeout_closes_only_its_connections() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Initiator);
        let other_events = h.connect_library(OTHER_LIBRARY_ID, ConnectionType::Initiator);
        h.initiate(LIBRARY_ID, request(1));
        h.initiate(
            OTHER_LIBRARY_ID,
            InitiateConnection::new("127.0.0.1", 9998, comp("LEH_LZJ02"), comp("OTHER")),
        );
        drain(&events);
        drain(&other_events);
        h.broadcast_events();

        h.clock.advance(REPLY_TIMEOUT + Duration::from_millis(1));
        h.heartbeat(OTHER_LIBRARY_ID);
        h.tick();

        let received = drain(&events);
        let closed = disconnects(&received);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].connection_id, ConnectionId::new(1));
        assert_eq!(closed[0].reason, DisconnectReason::LibraryTimeout);
        assert!(drain(&other_events).is_empty());

        let broadcast = h.broadcast_events();
        assert_eq!(broadcast.len(), 1);
        assert!(h.network.outbound_peers()[0].is_closed());
        assert!(!h.network.outbound_peers()[1].is_closed());

        let libraries: Vec<LibraryId> = h
            .framer
            .library_infos()
            .iter()
            .map(|l| l.library_id)
            .collect();
        assert_eq!(libraries, vec![ENGINE_LIBRARY_ID, OTHER_LIBRARY_ID]);

        h.heartbeat(LIBRARY_ID);
        h.tick();
        assert!(!h.framer.library_infos().iter().any(|l| l.library_id == LIBRARY_ID));
        assert_eq!(h.framer.connection_count(), 1);
    }

    #[test]
    fn test_disconnect_twice_tears_down_once() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Initiator);
        h.initiate(LIBRARY_ID, request(1));
        drain(&events);

        for _ in 0..2 {
            h.send(Command::Disconnect {
                library_id: LIBRARY_ID,
                connection_id: ConnectionId::new(1),
                reason: None,
            });
        }
        h.tick();

        let received = drain(&events);
        let closed = disconnects(&received);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].reason, DisconnectReason::LocalDisconnect);
        assert_eq!(h.network.outbound_peers()[0].close_calls(), 1);
        assert_eq!(h.framer.connection_count(), 0);
    }

    #[test]
    fn test_library_timeout_closes_pending_connection() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Initiator);
        h.network
            .script_connect(TARGET.parse().unwrap(), ConnectOutcome::Hold);
        h.initiate(LIBRARY_ID, request(1));
        assert!(drain(&events).is_empty());
        assert!(h.broadcast_events().is_empty());

        h.clock.advance(REPLY_TIMEOUT + Duration::from_millis(1));
        h.tick();

        let received = drain(&events);
        assert_eq!(received.len(), 1);
        let closed = disconnects(&received);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].connection_id, ConnectionId::new(1));
        assert_eq!(closed[0].reason, DisconnectReason::LibraryTimeout);

        let broadcast = h.broadcast_events();
        assert_eq!(broadcast.len(), 1);
        assert!(matches!(broadcast[0], GatewayEvent::Disconnect(_)));
        assert!(h.network.outbound_peers()[0].is_closed());
        assert_eq!(h.framer.connection_count(), 0);
    }

    #[test]
    fn test_disconnect_of_pending_connection() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Initiator);
        h.network
            .script_connect(TARGET.parse().unwrap(), ConnectOutcome::Hold);
        h.initiate(LIBRARY_ID, request(1));

        h.send(Command::Disconnect {
            library_id: LIBRARY_ID,
            connection_id: ConnectionId::new(1),
            reason: None,
        });
        h.tick();

        let received = drain(&events);
        assert_eq!(received.len(), 1);
        let closed = disconnects(&received);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].reason, DisconnectReason::LocalDisconnect);
        assert_eq!(h.broadcast_events().len(), 1);

        let peer = h.network.outbound_peers()[0].clone();
        assert_eq!(peer.close_calls(), 1);
        peer.complete_connect();
        h.heartbeat(LIBRARY_ID);
        h.tick();
        assert!(drain(&events).is_empty());
        assert_eq!(h.framer.connection_count(), 0);
    }

    #[test]
    fn test_inbound_without_acceptor_library_is_unknown_library() {
        let mut h = Harness::new();
        h.connect_library(LIBRARY_ID, ConnectionType::Initiator);
        let peer = h.network.connect_client();
        h.tick();

        let broadcast = h.broadcast_events();
        let errors = errors(&broadcast);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, GatewayErrorKind::UnknownLibrary);
        assert_eq!(errors[0].library_id, NO_LIBRARY_ID);
        assert!(peer.is_closed());
        assert_eq!(h.framer.connection_count(), 0);
    }

    #[test]
    fn test_accepted_logon_becomes_session_of_acceptor_library() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Acceptor);
        let (peer, mut proxy) = h.inbound_logon(&events, "CLIENT", "GATEWAY");

        assert_eq!(proxy.connection_id(), ConnectionId::new(1));
        assert_eq!(proxy.remote_address(), Some(peer.remote_address()));
        assert_eq!(proxy.session_key().to_string(), "GATEWAY->CLIENT");
        assert_eq!(
            h.framer.library_infos()[0].connection_ids,
            vec![ConnectionId::new(1)]
        );

        proxy.accept().unwrap();
        h.tick();

        let received = drain(&events);
        assert_eq!(received.len(), 3);
        assert!(matches!(
            &received[0],
            LibraryEvent::Connect(ConnectEvent {
                connection_type: ConnectionType::Acceptor,
                library_id: LIBRARY_ID,
                ..
            })
        ));
        match &received[1] {
            LibraryEvent::Logon(logon) => {
                assert_eq!(logon.session_id, SessionId::new(1));
                assert_eq!(logon.dictionary, FixDictionary::Fix44);
            }
            other => panic!("expected logon, got {other:?}"),
        }
        match &received[2] {
            LibraryEvent::Message { frame, .. } => assert_eq!(frame, &logon("CLIENT", "GATEWAY", 1)),
            other => panic!("expected the logon message, got {other:?}"),
        }

        let infos = h.framer.library_infos();
        assert!(infos[0].connection_ids.is_empty());
        assert_eq!(infos[1].connection_ids, vec![ConnectionId::new(1)]);

        peer.send(&heartbeat_frame("CLIENT", "GATEWAY", 2));
        h.tick();
        let received = drain(&events);
        assert!(matches!(
            &received[0],
            LibraryEvent::Message {
                session_id: Some(_),
                ..
            }
        ));

        let reply = heartbeat_frame("GATEWAY", "CLIENT", 1);
        h.send(Command::SendMessage {
            library_id: LIBRARY_ID,
            connection_id: ConnectionId::new(1),
            frame: reply.clone(),
        });
        h.tick();
        assert_eq!(peer.written(), reply.to_vec());

        let sessions = h.framer.admin_sessions();
        assert_eq!(sessions[0].last_received_sequence_number, Some(SeqNum::new(2)));
        assert_eq!(sessions[0].last_sent_sequence_number, Some(SeqNum::new(1)));
        assert_eq!(sessions[0].connected_host.as_deref(), Some("127.0.0.1"));
        assert!(sessions[0].last_logon_time.is_some());
    }

    #[test]
    fn test_accept_with_dictionary_overrides_begin_string() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Acceptor);
        let (_peer, mut proxy) = h.inbound_logon(&events, "CLIENT", "GATEWAY");
        proxy.accept_with_dictionary(FixDictionary::Fix50Sp2).unwrap();
        h.tick();

        assert!(drain(&events).iter().any(|e| matches!(
            e,
            LibraryEvent::Logon(LogonEvent {
                dictionary: FixDictionary::Fix50Sp2,
                ..
            })
        )));
    }

    #[test]
    fn test_token_is_single_use() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Acceptor);
        let (peer, mut proxy) = h.inbound_logon(&events, "CLIENT", "GATEWAY");
        proxy.accept().unwrap();
        h.tick();
        let accepted = drain(&events).len();
        assert_eq!(accepted, 3);

        assert!(proxy.reject().is_err());
        h.tick();
        assert!(drain(&events).is_empty());
        assert!(!peer.is_closed());
    }

    #[test]
    fn test_reject_closes_with_failed_authentication() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Acceptor);
        let (peer, mut proxy) = h.inbound_logon(&events, "CLIENT", "GATEWAY");
        proxy.reject().unwrap();
        h.tick();

        assert!(peer.is_closed());
        assert!(peer.written().is_empty());
        assert!(drain(&events).is_empty());
        assert_eq!(h.framer.connection_count(), 0);
    }

    #[test]
    fn test_reject_with_message_lingers_up_to_the_maximum() {
        let mut h = Harness::with_config(
            EngineConfig::new()
                .with_reply_timeout(Duration::from_secs(60))
                .with_max_reject_linger(Duration::from_secs(5)),
        );
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Acceptor);
        let (peer, mut proxy) = h.inbound_logon(&events, "CLIENT", "GATEWAY");
        let logout = FrameBuilder::with_header("FIX.4.4", "5", "GATEWAY", "CLIENT", 1)
            .field(58, "invalid credentials")
            .build();
        proxy
            .reject_with_message(logout.clone(), Duration::from_secs(60))
            .unwrap();
        h.tick();
        assert_eq!(peer.written(), logout.to_vec());
        assert!(!peer.is_closed());

        h.clock.advance_millis(4_999);
        h.tick();
        assert!(!peer.is_closed());

        h.clock.advance_millis(1);
        h.tick();
        assert!(peer.is_closed());
        assert_eq!(h.framer.connection_count(), 0);
    }

    #[test]
    fn test_lingering_reject_survives_acceptor_timeout_silently() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Acceptor);
        let (peer, mut proxy) = h.inbound_logon(&events, "CLIENT", "GATEWAY");
        let logout = FrameBuilder::with_header("FIX.4.4", "5", "GATEWAY", "CLIENT", 1).build();
        proxy
            .reject_with_message(logout, Duration::from_secs(1))
            .unwrap();
        h.tick();
        h.broadcast_events();

        h.clock.advance(REPLY_TIMEOUT + Duration::from_millis(1));
        h.tick();
        assert!(!h.framer.library_infos().iter().any(|l| l.library_id == LIBRARY_ID));
        assert!(!peer.is_closed());
        assert_eq!(h.framer.connection_count(), 1);

        h.clock.advance_millis(1_000);
        h.tick();
        assert!(peer.is_closed());
        assert_eq!(h.framer.connection_count(), 0);
        assert!(drain(&events).is_empty());
        assert!(h.broadcast_events().is_empty());
    }

    #[test]
    fn test_disconnect_of_lingering_connection_is_silent() {
        let mut h = Harness::with_config(
            EngineConfig::new().with_reply_timeout(Duration::from_secs(60)),
        );
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Acceptor);
        let (peer, mut proxy) = h.inbound_logon(&events, "CLIENT", "GATEWAY");
        let connection_id = proxy.connection_id();
        let logout = FrameBuilder::with_header("FIX.4.4", "5", "GATEWAY", "CLIENT", 1).build();
        proxy
            .reject_with_message(logout, Duration::from_secs(1))
            .unwrap();
        h.tick();
        h.broadcast_events();

        h.send(Command::Disconnect {
            library_id: LIBRARY_ID,
            connection_id,
            reason: None,
        });
        h.tick();

        assert!(peer.is_closed());
        assert_eq!(peer.close_calls(), 1);
        assert_eq!(h.framer.connection_count(), 0);
        assert!(drain(&events).is_empty());
        assert!(h.broadcast_events().is_empty());
    }

    #[test]
    fn test_dropped_token_rejects() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Acceptor);
        let (peer, proxy) = h.inbound_logon(&events, "CLIENT", "GATEWAY");
        drop(proxy);
        h.tick();
        assert!(peer.is_closed());
    }

    #[test]
    fn test_first_message_must_be_logon() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Acceptor);
        let peer = h.network.connect_client();
        peer.send(&heartbeat_frame("CLIENT", "GATEWAY", 1));
        h.tick();

        assert!(peer.is_closed());
        assert!(drain(&events).is_empty());
        assert_eq!(h.framer.connection_count(), 0);
    }

    #[test]
    fn test_no_logon_within_authentication_timeout() {
        let mut h = Harness::with_config(
            EngineConfig::new()
                .with_reply_timeout(Duration::from_secs(60))
                .with_authentication_timeout(Duration::from_millis(500)),
        );
        h.connect_library(LIBRARY_ID, ConnectionType::Acceptor);
        let peer = h.network.connect_client();
        h.tick();
        assert_eq!(h.framer.connection_count(), 1);

        h.clock.advance_millis(500);
        h.tick();
        assert!(peer.is_closed());
        assert_eq!(h.framer.connection_count(), 0);
    }

    #[test]
    fn test_decision_for_vanished_connection_is_dropped() {
        let mut h = Harness::with_config(
            EngineConfig::new()
                .with_reply_timeout(Duration::from_secs(60))
                .with_authentication_timeout(Duration::from_millis(500)),
        );
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Acceptor);
        let (peer, mut proxy) = h.inbound_logon(&events, "CLIENT", "GATEWAY");
        h.clock.advance_millis(500);
        h.tick();
        assert!(peer.is_closed());

        proxy.accept().unwrap();
        h.tick();
        assert!(drain(&events).is_empty());
        assert_eq!(h.framer.connection_count(), 0);
    }

    #[test]
    fn test_duplicate_inbound_logon_is_refused() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Acceptor);
        let (first, _) = h.accepted_session(&events, "CLIENT");

        let second = h.network.connect_client();
        second.send(&logon("CLIENT", "GATEWAY", 1));
        h.tick();

        let received = drain(&events);
        assert_eq!(received.len(), 1);
        assert!(matches!(
            &received[0],
            LibraryEvent::Error(ErrorEvent {
                kind: GatewayErrorKind::DuplicateSession,
                library_id: LIBRARY_ID,
                ..
            })
        ));
        assert!(second.is_closed());
        assert!(!first.is_closed());
        assert_eq!(h.framer.connection_count(), 1);
    }

    #[test]
    fn test_remote_disconnect() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Acceptor);
        let (peer, connection_id) = h.accepted_session(&events, "CLIENT");

        peer.close_remote();
        h.tick();
        let received = drain(&events);
        let closed = disconnects(&received);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].connection_id, connection_id);
        assert_eq!(closed[0].reason, DisconnectReason::RemoteDisconnect);
    }

    #[test]
    fn test_garbage_after_logon_is_protocol_violation() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Acceptor);
        let (peer, _) = h.accepted_session(&events, "CLIENT");

        peer.send(b"8=FIX.4.4\x019=abc\x01");
        h.tick();
        let received = drain(&events);
        assert_eq!(
            disconnects(&received)[0].reason,
            DisconnectReason::ProtocolViolation
        );
        assert!(peer.is_closed());
    }

    #[test]
    fn test_slow_consumer_is_disconnected() {
        let mut h = Harness::with_config(
            EngineConfig::new()
                .with_reply_timeout(REPLY_TIMEOUT)
                .with_sender_max_bytes_in_buffer(96),
        );
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Acceptor);
        let (peer, connection_id) = h.accepted_session(&events, "CLIENT");
        peer.limit_writes(Some(0));

        let frame = heartbeat_frame("GATEWAY", "CLIENT", 1);
        assert!(frame.len() * 2 > 96);
        h.send(Command::SendMessage {
            library_id: LIBRARY_ID,
            connection_id,
            frame: frame.clone(),
        });
        h.tick();
        assert!(h.framer.admin_sessions()[0].is_slow);

        h.send(Command::SendMessage {
            library_id: LIBRARY_ID,
            connection_id,
            frame,
        });
        h.tick();
        let received = drain(&events);
        assert_eq!(
            disconnects(&received)[0].reason,
            DisconnectReason::SlowConsumer
        );
    }

    #[test]
    fn test_send_to_connection_not_owned_is_unknown_session() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Initiator);
        h.send(Command::SendMessage {
            library_id: LIBRARY_ID,
            connection_id: ConnectionId::new(42),
            frame: heartbeat_frame("A", "B", 1),
        });
        h.tick();
        assert!(matches!(
            &drain(&events)[0],
            LibraryEvent::Error(ErrorEvent {
                kind: GatewayErrorKind::UnknownSession,
                ..
            })
        ));
    }

    #[test]
    fn test_admin_snapshot_and_disconnect() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Initiator);
        h.initiate(LIBRARY_ID, request(1));
        h.initiate(
            LIBRARY_ID,
            InitiateConnection::new("127.0.0.1", 9998, comp("LEH_LZJ02"), comp("OTHER")),
        );
        drain(&events);

        let (reply, snapshot) = bounded(1);
        h.send(Command::AdminSnapshot { reply });
        h.tick();
        let sessions = snapshot.try_recv().unwrap();
        let ids: Vec<u64> = sessions.iter().map(|s| s.connection_id.value()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(sessions.len(), h.framer.connection_count());

        let first_session = sessions[0].session_id.unwrap();
        let (reply, result) = bounded(1);
        h.send(Command::AdminDisconnect {
            session_id: first_session,
            reply,
        });
        h.tick();
        assert_eq!(result.try_recv().unwrap(), Ok(()));
        let received = drain(&events);
        assert_eq!(
            disconnects(&received)[0].reason,
            DisconnectReason::LocalDisconnect
        );

        let (reply, result) = bounded(1);
        h.send(Command::AdminDisconnect {
            session_id: SessionId::new(99),
            reply,
        });
        h.tick();
        assert_eq!(
            result.try_recv().unwrap(),
            Err(AdminError::NotFound(SessionId::new(99)))
        );
        assert_eq!(h.framer.admin_sessions().len(), 1);
    }

    #[test]
    fn test_close_disconnects_everything_once() {
        let mut h = Harness::new();
        let events = h.connect_library(LIBRARY_ID, ConnectionType::Initiator);
        h.initiate(LIBRARY_ID, request(1));
        drain(&events);

        h.framer.on_close();
        h.framer.on_close();

        let received = drain(&events);
        let closed = disconnects(&received);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].reason, DisconnectReason::EngineClose);
        assert!(h.network.is_closed());
        assert!(h.framer.is_closed());
        assert_eq!(h.tick(), 0);
    }
}
