/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Commands into the framer and events out of it.
//!
//! Commands travel over a single multi-producer inbox consumed by the framer
//! thread. Events are published twice: to the owning library's own stream
//! as [`LibraryEvent`]s and to the broadcast stream as [`GatewayEvent`]s.
//! Framed messages and authentication tokens only go to the library.

use crate::admin::FixAdminSession;
use crate::auth::AuthenticationProxy;
use crate::session::SessionKey;
use bytes::Bytes;
use crossbeam_channel::Sender;
use irongate_core::error::AdminError;
use irongate_core::types::{
    CompId, ConnectionId, ConnectionType, DisconnectReason, FixDictionary, GatewayErrorKind,
    LibraryId, SessionId,
};
use serde::Serialize;
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Outbound connection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateConnection {
    /// Host name or IP address of the counterparty.
    pub host: String,
    /// Port of the counterparty.
    pub port: u16,
    /// Address pinned before the request reaches the framer.
    pub address: Option<SocketAddr>,
    /// Comp id the gateway speaks as.
    pub sender_comp_id: CompId,
    /// Comp id of the counterparty.
    pub target_comp_id: CompId,
    /// SenderSubID.
    pub sender_sub_id: Option<String>,
    /// TargetSubID.
    pub target_sub_id: Option<String>,
    /// SenderLocationID.
    pub sender_location_id: Option<String>,
    /// TargetLocationID.
    pub target_location_id: Option<String>,
    /// Dictionary the session speaks.
    pub dictionary: FixDictionary,
    /// Echoed back on errors caused by this request.
    pub correlation_id: u64,
}

impl InitiateConnection {
    /// Creates a request with only the mandatory fields.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        sender_comp_id: CompId,
        target_comp_id: CompId,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            address: None,
            sender_comp_id,
            target_comp_id,
            sender_sub_id: None,
            target_sub_id: None,
            sender_location_id: None,
            target_location_id: None,
            dictionary: FixDictionary::default(),
            correlation_id: 0,
        }
    }

    /// Sets SenderSubID and TargetSubID.
    #[must_use]
    pub fn with_sub_ids(mut self, sender: Option<String>, target: Option<String>) -> Self {
        self.sender_sub_id = sender;
        self.target_sub_id = target;
        self
    }

    /// Sets SenderLocationID and TargetLocationID.
    #[must_use]
    pub fn with_location_ids(mut self, sender: Option<String>, target: Option<String>) -> Self {
        self.sender_location_id = sender;
        self.target_location_id = target;
        self
    }

    /// Sets the dictionary.
    #[must_use]
    pub const fn with_dictionary(mut self, dictionary: FixDictionary) -> Self {
        self.dictionary = dictionary;
        self
    }

    /// Pins the address to connect to. `host` is then only informational.
    #[must_use]
    pub const fn with_address(mut self, address: SocketAddr) -> Self {
        self.address = Some(address);
        self
    }

    /// Address the framer connects to: the pinned address, else `host` when
    /// it is an IP literal. Never consults the resolver.
    #[must_use]
    pub fn target_address(&self) -> Option<SocketAddr> {
        self.address.or_else(|| {
            self.host
                .parse::<IpAddr>()
                .ok()
                .map(|ip| SocketAddr::new(ip, self.port))
        })
    }

    /// Resolves `host` with the system resolver and pins the first address.
    /// Blocks the calling thread.
    ///
    /// # Errors
    /// The resolver's error, or `NotFound` when the host has no addresses.
    pub fn resolve(&mut self) -> io::Result<SocketAddr> {
        if let Some(address) = self.target_address() {
            self.address = Some(address);
            return Ok(address);
        }
        let address = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host has no addresses"))?;
        self.address = Some(address);
        Ok(address)
    }

    /// Sets the correlation id.
    #[must_use]
    pub const fn with_correlation_id(mut self, correlation_id: u64) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Full session key of this request, before composition.
    #[must_use]
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(self.sender_comp_id, self.target_comp_id)
            .with_sub_ids(self.sender_sub_id.clone(), self.target_sub_id.clone())
            .with_location_ids(
                self.sender_location_id.clone(),
                self.target_location_id.clone(),
            )
    }
}

/// Resolution of an authentication token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationDecision {
    /// Promote the connection to a live session.
    Accept {
        /// Dictionary override; `None` derives it from the logon BeginString.
        dictionary: Option<FixDictionary>,
    },
    /// Close the connection.
    Reject {
        /// Message written before closing.
        message: Option<Bytes>,
        /// How long to keep the socket open after the message.
        linger: Duration,
    },
}

/// Command sent to the framer.
#[derive(Debug)]
pub enum Command {
    /// Registers a library or refreshes an existing registration.
    LibraryConnect {
        /// Library id chosen by the library.
        library_id: LibraryId,
        /// Whether the library accepts inbound sessions.
        kind: ConnectionType,
        /// Human readable name.
        name: String,
        /// Stream the library reads its events from.
        events: Sender<LibraryEvent>,
    },
    /// Library liveness signal.
    Heartbeat {
        /// Sending library.
        library_id: LibraryId,
    },
    /// Opens an outbound connection owned by the library.
    InitiateConnection {
        /// Requesting library.
        library_id: LibraryId,
        /// Connection parameters.
        request: InitiateConnection,
    },
    /// Closes a connection.
    Disconnect {
        /// Requesting library.
        library_id: LibraryId,
        /// Connection to close.
        connection_id: ConnectionId,
        /// Reason; `None` is a local disconnect.
        reason: Option<DisconnectReason>,
    },
    /// Queues an encoded frame on a connection the library owns.
    SendMessage {
        /// Sending library.
        library_id: LibraryId,
        /// Target connection.
        connection_id: ConnectionId,
        /// Encoded frame.
        frame: Bytes,
    },
    /// Decision taken on an authentication token.
    AuthenticationDecision {
        /// Connection the token belongs to.
        connection_id: ConnectionId,
        /// The decision.
        decision: AuthenticationDecision,
    },
    /// Snapshot of every live connection.
    AdminSnapshot {
        /// Where the snapshot is sent.
        reply: Sender<Vec<FixAdminSession>>,
    },
    /// Disconnects a session by session id.
    AdminDisconnect {
        /// Session to disconnect.
        session_id: SessionId,
        /// Where the result is sent.
        reply: Sender<Result<(), AdminError>>,
    },
}

/// A connection was established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectEvent {
    /// New connection.
    pub connection_id: ConnectionId,
    /// Remote address.
    pub address: Option<SocketAddr>,
    /// Owning library.
    pub library_id: LibraryId,
    /// Direction.
    pub connection_type: ConnectionType,
}

/// A session was bound to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogonEvent {
    /// Owning library.
    pub library_id: LibraryId,
    /// Connection carrying the session.
    pub connection_id: ConnectionId,
    /// Stable id of the session.
    pub session_id: SessionId,
    /// Key the session was bound under.
    pub session_key: SessionKey,
    /// Dictionary the session speaks.
    pub dictionary: FixDictionary,
}

/// A connection was closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisconnectEvent {
    /// Library that owned the connection.
    pub library_id: LibraryId,
    /// Closed connection.
    pub connection_id: ConnectionId,
    /// Why it was closed.
    pub reason: DisconnectReason,
}

/// A request or an inbound connection failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEvent {
    /// Kind of failure.
    pub kind: GatewayErrorKind,
    /// Originating library, `-1` when none could be identified.
    pub library_id: LibraryId,
    /// Correlation id of the failed request, if any.
    pub correlation_id: Option<u64>,
    /// Description.
    pub message: String,
}

/// Event on the broadcast stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum GatewayEvent {
    /// See [`ConnectEvent`].
    Connect(ConnectEvent),
    /// See [`LogonEvent`].
    Logon(LogonEvent),
    /// See [`DisconnectEvent`].
    Disconnect(DisconnectEvent),
    /// See [`ErrorEvent`].
    Error(ErrorEvent),
}

impl GatewayEvent {
    /// Library the event is addressed to.
    #[must_use]
    pub const fn library_id(&self) -> LibraryId {
        match self {
            Self::Connect(e) => e.library_id,
            Self::Logon(e) => e.library_id,
            Self::Disconnect(e) => e.library_id,
            Self::Error(e) => e.library_id,
        }
    }
}

/// Event on a library's own stream.
#[derive(Debug)]
pub enum LibraryEvent {
    /// See [`ConnectEvent`].
    Connect(ConnectEvent),
    /// See [`LogonEvent`].
    Logon(LogonEvent),
    /// See [`DisconnectEvent`].
    Disconnect(DisconnectEvent),
    /// See [`ErrorEvent`].
    Error(ErrorEvent),
    /// A framed inbound message.
    Message {
        /// Connection the frame arrived on.
        connection_id: ConnectionId,
        /// Session bound to the connection.
        session_id: Option<SessionId>,
        /// The complete frame.
        frame: Bytes,
    },
    /// An inbound logon waiting for a decision.
    Authenticate(AuthenticationProxy),
}

impl From<GatewayEvent> for LibraryEvent {
    fn from(event: GatewayEvent) -> Self {
        match event {
            GatewayEvent::Connect(e) => Self::Connect(e),
            GatewayEvent::Logon(e) => Self::Logon(e),
            GatewayEvent::Disconnect(e) => Self::Disconnect(e),
            GatewayEvent::Error(e) => Self::Error(e),
        }
    }
}
