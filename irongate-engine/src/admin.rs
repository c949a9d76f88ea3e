/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Administrative view of the gateway.
//!
//! [`FixAdmin`] is a client handle: it sends queries into the framer inbox
//! and waits for the reply. Snapshots are copies, never live views.

use crate::connection::Connection;
use crate::protocol::Command;
use crate::session::SessionKey;
use crossbeam_channel::{Sender, bounded};
use irongate_core::error::AdminError;
use irongate_core::types::{ConnectionId, ConnectionType, LibraryId, SeqNum, SessionId, Timestamp};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// One row of the admin snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixAdminSession {
    /// Connection id.
    pub connection_id: ConnectionId,
    /// Owning library.
    pub library_id: LibraryId,
    /// Direction.
    pub connection_type: ConnectionType,
    /// Remote host.
    pub connected_host: Option<String>,
    /// Remote port.
    pub connected_port: Option<u16>,
    /// Session id, once a key is bound.
    pub session_id: Option<SessionId>,
    /// Session key, once bound.
    pub session_key: Option<SessionKey>,
    /// When the session became active.
    pub last_logon_time: Option<Timestamp>,
    /// Last MsgSeqNum written.
    pub last_sent_sequence_number: Option<SeqNum>,
    /// Last MsgSeqNum read.
    pub last_received_sequence_number: Option<SeqNum>,
    /// Whether the endpoint pair is open.
    pub is_connected: bool,
    /// Whether outbound bytes are backing up.
    pub is_slow: bool,
}

impl FixAdminSession {
    pub(crate) fn from_connection(connection: &Connection) -> Self {
        let address = connection.remote_address();
        Self {
            connection_id: connection.id(),
            library_id: connection.library_id(),
            connection_type: connection.connection_type(),
            connected_host: address.map(|a| a.ip().to_string()),
            connected_port: address.map(|a| a.port()),
            session_id: connection.session_id(),
            session_key: connection.session_key().cloned(),
            last_logon_time: connection.last_logon_time(),
            last_sent_sequence_number: connection.sender.as_ref().and_then(|s| s.last_sent()),
            last_received_sequence_number: connection
                .receiver
                .as_ref()
                .and_then(|r| r.last_received()),
            is_connected: connection.is_connected(),
            is_slow: connection.is_slow(),
        }
    }
}

/// Client for admin queries.
///
/// Independent of the engine's lifetime: once the engine is gone, calls fail
/// with `EngineClosed`; once the client is closed, calls fail with `Closed`.
#[derive(Debug)]
pub struct FixAdmin {
    commands: Sender<Command>,
    reply_timeout: Duration,
    closed: AtomicBool,
}

impl FixAdmin {
    pub(crate) fn new(commands: Sender<Command>, reply_timeout: Duration) -> Self {
        Self {
            commands,
            reply_timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Snapshot of every live connection, ordered by connection id.
    ///
    /// # Errors
    /// `Closed`, `EngineClosed` or `Timeout`.
    pub fn all_fix_sessions(&self) -> Result<Vec<FixAdminSession>, AdminError> {
        let (reply, response) = bounded(1);
        self.request(Command::AdminSnapshot { reply })?;
        self.await_reply(&response)
    }

    /// Disconnects the session with the given id.
    ///
    /// # Errors
    /// `NotFound` if no live connection carries the session id, plus the
    /// errors of [`Self::all_fix_sessions`].
    pub fn disconnect_session(&self, session_id: SessionId) -> Result<(), AdminError> {
        let (reply, response) = bounded(1);
        self.request(Command::AdminDisconnect { session_id, reply })?;
        self.await_reply(&response)?
    }

    fn request(&self, command: Command) -> Result<(), AdminError> {
        if self.is_closed() {
            return Err(AdminError::Closed);
        }
        self.commands
            .send(command)
            .map_err(|_| AdminError::EngineClosed)
    }

    fn await_reply<T>(&self, response: &crossbeam_channel::Receiver<T>) -> Result<T, AdminError> {
        response
            .recv_timeout(self.reply_timeout)
            .map_err(|err| match err {
                crossbeam_channel::RecvTimeoutError::Timeout => AdminError::Timeout {
                    timeout_ms: u64::try_from(self.reply_timeout.as_millis()).unwrap_or(u64::MAX),
                },
                crossbeam_channel::RecvTimeoutError::Disconnected => AdminError::EngineClosed,
            })
    }

    /// Closes the client. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether the client has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
