/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Single-use authentication decision for an inbound logon.
//!
//! The framer hands an [`AuthenticationProxy`] to the acceptor library inside
//! an `Authenticate` event. The library resolves it exactly once; the
//! resolution travels back to the framer as a command on the inbox. A proxy
//! dropped without a decision rejects the logon.

use crate::protocol::{AuthenticationDecision, Command};
use crate::session::SessionKey;
use bytes::Bytes;
use crossbeam_channel::Sender;
use irongate_core::error::AuthenticationError;
use irongate_core::types::{ConnectionId, FixDictionary};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Accepted,
    Rejected,
}

impl Resolution {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

/// Token for accepting or rejecting one inbound logon.
#[derive(Debug)]
pub struct AuthenticationProxy {
    connection_id: ConnectionId,
    remote_address: Option<SocketAddr>,
    session_key: SessionKey,
    logon: Bytes,
    decisions: Sender<Command>,
    resolution: Option<Resolution>,
}

impl AuthenticationProxy {
    pub(crate) fn new(
        connection_id: ConnectionId,
        remote_address: Option<SocketAddr>,
        session_key: SessionKey,
        logon: Bytes,
        decisions: Sender<Command>,
    ) -> Self {
        Self {
            connection_id,
            remote_address,
            session_key,
            logon,
            decisions,
            resolution: None,
        }
    }

    /// Accepts the logon with the dictionary named by its BeginString.
    ///
    /// # Errors
    /// `InvalidState` if already resolved, `EngineClosed` if the engine is
    /// gone.
    pub fn accept(&mut self) -> Result<(), AuthenticationError> {
        self.resolve(
            Resolution::Accepted,
            AuthenticationDecision::Accept { dictionary: None },
        )
    }

    /// Accepts the logon and binds the session to `dictionary`.
    ///
    /// # Errors
    /// `InvalidState` if already resolved, `EngineClosed` if the engine is
    /// gone.
    pub fn accept_with_dictionary(
        &mut self,
        dictionary: FixDictionary,
    ) -> Result<(), AuthenticationError> {
        self.resolve(
            Resolution::Accepted,
            AuthenticationDecision::Accept {
                dictionary: Some(dictionary),
            },
        )
    }

    /// Rejects the logon and closes the connection straight away.
    ///
    /// # Errors
    /// `InvalidState` if already resolved, `EngineClosed` if the engine is
    /// gone.
    pub fn reject(&mut self) -> Result<(), AuthenticationError> {
        self.resolve(
            Resolution::Rejected,
            AuthenticationDecision::Reject {
                message: None,
                linger: Duration::ZERO,
            },
        )
    }

    /// Rejects the logon, writes `message` and keeps the socket open for
    /// `linger` before closing it. The engine caps `linger` at its
    /// configured maximum.
    ///
    /// # Errors
    /// `InvalidState` if already resolved, `EngineClosed` if the engine is
    /// gone.
    pub fn reject_with_message(
        &mut self,
        message: Bytes,
        linger: Duration,
    ) -> Result<(), AuthenticationError> {
        self.resolve(
            Resolution::Rejected,
            AuthenticationDecision::Reject {
                message: Some(message),
                linger,
            },
        )
    }

    fn resolve(
        &mut self,
        resolution: Resolution,
        decision: AuthenticationDecision,
    ) -> Result<(), AuthenticationError> {
        if let Some(previous) = self.resolution {
            return Err(AuthenticationError::InvalidState {
                connection_id: self.connection_id,
                resolution: previous.as_str(),
            });
        }
        self.resolution = Some(resolution);
        self.decisions
            .send(Command::AuthenticationDecision {
                connection_id: self.connection_id,
                decision,
            })
            .map_err(|_| AuthenticationError::EngineClosed(self.connection_id))
    }

    /// Connection the logon arrived on.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Remote address of the connection.
    #[must_use]
    pub const fn remote_address(&self) -> Option<SocketAddr> {
        self.remote_address
    }

    /// Session key derived from the logon.
    #[must_use]
    pub const fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    /// The logon frame, for credential checks.
    #[must_use]
    pub const fn logon(&self) -> &Bytes {
        &self.logon
    }

    /// Whether a decision has been taken.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}

impl Drop for AuthenticationProxy {
    fn drop(&mut self) {
        if self.resolution.is_none() {
            debug!(connection_id = %self.connection_id, "authentication dropped unresolved");
            let _ = self.reject();
        }
    }
}
