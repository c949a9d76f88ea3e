/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Error types for the IronGate gateway engine.
//!
//! Errors are split by who sees them: configuration errors are fatal at
//! startup, registry errors stay inside the reactor and turn into events,
//! authentication and admin errors fail at the call site.

use crate::types::{ConnectionId, LibraryId, SessionId};
use thiserror::Error;

/// Result type alias using [`GatewayError`] as the error type.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Top-level error type for all IronGate operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Invalid or unusable engine configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connection or library bookkeeping failure.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Misuse of an authentication decision token.
    #[error("authentication error: {0}")]
    Authentication(#[from] AuthenticationError),

    /// Admin query failure.
    #[error("admin error: {0}")]
    Admin(#[from] AdminError),

    /// I/O error from underlying transport.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine has shut down and no longer accepts commands.
    #[error("engine closed")]
    EngineClosed,
}

/// Configuration errors. Fatal at startup, never raised by a running reactor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The listening socket could not be bound.
    #[error("unable to bind {address}: {reason}")]
    Bind {
        /// Address that was requested.
        address: String,
        /// Underlying cause.
        reason: String,
    },

    /// A configuration value is out of range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,
        /// Description of the problem.
        reason: String,
    },
}

/// Errors raised by the library and connection registries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The library id has never registered or has been removed.
    #[error("unknown library {0}")]
    UnknownLibrary(LibraryId),

    /// No live connection carries this id.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// The session key is already held by another pending or connected
    /// connection.
    #[error("duplicate session {key}: already held by connection {existing}")]
    DuplicateSession {
        /// Rendered session key.
        key: String,
        /// Connection that holds the key.
        existing: ConnectionId,
    },
}

/// Errors raised by an authentication decision token.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// The token has already been accepted or rejected.
    #[error("authentication for connection {connection_id} already resolved ({resolution})")]
    InvalidState {
        /// Connection the token belongs to.
        connection_id: ConnectionId,
        /// How the token was resolved the first time.
        resolution: &'static str,
    },

    /// The engine has shut down and cannot receive the decision.
    #[error("engine closed before the decision for connection {0} was delivered")]
    EngineClosed(ConnectionId),
}

/// Errors raised by the admin client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdminError {
    /// No connected session carries this id.
    #[error("unknown session id {0}")]
    NotFound(SessionId),

    /// The admin client has been closed.
    #[error("admin client is closed")]
    Closed,

    /// The engine did not answer within the reply timeout.
    #[error("no reply from engine within {timeout_ms} ms")]
    Timeout {
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The engine has shut down.
    #[error("engine closed")]
    EngineClosed,
}
