/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Core identifiers and enumerations shared by the gateway layers.
//!
//! - [`ConnectionId`], [`LibraryId`], [`SessionId`]: stable numeric identities
//! - [`CompId`]: component identifier (SenderCompID, TargetCompID)
//! - [`SeqNum`]: FIX message sequence number
//! - [`Timestamp`]: wall clock milliseconds with FIX formatting
//! - [`ConnectionType`], [`DisconnectReason`], [`GatewayErrorKind`]: closed sets
//!   that travel on the event streams

use arrayvec::ArrayString;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length for CompID strings in bytes.
pub const COMP_ID_MAX_LEN: usize = 32;

/// Identifier of the engine's own built-in library.
///
/// Connections that have been accepted but not yet handed to an application
/// library are owned by this library. It never times out.
pub const ENGINE_LIBRARY_ID: LibraryId = LibraryId(0);

/// Library id reported on errors that cannot be attributed to any library.
pub const NO_LIBRARY_ID: LibraryId = LibraryId(-1);

/// Identity of a single TCP connection, unique for the process lifetime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a connection id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a registered library.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
#[serde(transparent)]
pub struct LibraryId(i32);

impl LibraryId {
    /// Creates a library id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> i32 {
        self.0
    }

    /// Returns true for the engine's built-in library.
    #[inline]
    #[must_use]
    pub const fn is_engine(self) -> bool {
        self.0 == ENGINE_LIBRARY_ID.0
    }
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a logical FIX session.
///
/// Allocated the first time a session key is seen and reused when the same
/// counterparty reconnects.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Creates a session id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// FIX message sequence number (tag 34).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
#[serde(transparent)]
pub struct SeqNum(u64);

impl SeqNum {
    /// Creates a new sequence number.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw sequence number value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for SeqNum {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wall clock time in milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp from milliseconds since Unix epoch.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns milliseconds since Unix epoch.
    #[inline]
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Converts to a chrono `DateTime<Utc>`.
    #[must_use]
    pub fn to_datetime(self) -> DateTime<Utc> {
        let millis = i64::try_from(self.0).unwrap_or(i64::MAX);
        DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }

    /// Formats as a FIX UTCTimestamp with millisecond precision
    /// (`YYYYMMDD-HH:MM:SS.sss`).
    #[must_use]
    pub fn format_millis(self) -> ArrayString<21> {
        let mut buf = ArrayString::new();
        let formatted = self.to_datetime().format("%Y%m%d-%H:%M:%S%.3f").to_string();
        // The formatted timestamp is always exactly 21 bytes.
        let _ = buf.try_push_str(&formatted);
        buf
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_millis())
    }
}

/// Component identifier (SenderCompID, TargetCompID).
///
/// Stored inline, up to [`COMP_ID_MAX_LEN`] bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompId(ArrayString<COMP_ID_MAX_LEN>);

impl CompId {
    /// Creates a new CompId from a string slice.
    ///
    /// # Returns
    /// `Some(CompId)` if the string is non-empty and fits within the maximum
    /// length, `None` otherwise.
    #[must_use]
    pub fn new(s: &str) -> Option<Self> {
        if s.is_empty() {
            return None;
        }
        ArrayString::from(s).ok().map(Self)
    }

    /// Returns the CompId as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl AsRef<str> for CompId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for CompId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompId {
    type Err = InvalidCompId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or(InvalidCompId)
    }
}

/// Returned when a CompId is empty or longer than [`COMP_ID_MAX_LEN`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("comp id must be 1..={COMP_ID_MAX_LEN} bytes")]
pub struct InvalidCompId;

/// Which side opened the TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionType {
    /// The remote end connected to our listening socket.
    Acceptor,
    /// We connected out to the remote end.
    Initiator,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acceptor => f.write_str("ACCEPTOR"),
            Self::Initiator => f.write_str("INITIATOR"),
        }
    }
}

/// Why a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisconnectReason {
    /// Disconnect requested locally without a more specific reason.
    LocalDisconnect,
    /// The owning library asked for the disconnect.
    LibraryDisconnect,
    /// The owning library stopped heartbeating.
    LibraryTimeout,
    /// The remote end closed the stream.
    RemoteDisconnect,
    /// The remote end sent bytes that could not be framed.
    ProtocolViolation,
    /// The logon was rejected by the acceptor library.
    FailedAuthentication,
    /// Another connection already holds the same session key.
    DuplicateSession,
    /// The outbound buffer grew past the configured limit.
    SlowConsumer,
    /// An I/O error occurred on the socket.
    Exception,
    /// The engine is shutting down.
    EngineClose,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LocalDisconnect => "LOCAL_DISCONNECT",
            Self::LibraryDisconnect => "LIBRARY_DISCONNECT",
            Self::LibraryTimeout => "LIBRARY_TIMEOUT",
            Self::RemoteDisconnect => "REMOTE_DISCONNECT",
            Self::ProtocolViolation => "PROTOCOL_VIOLATION",
            Self::FailedAuthentication => "FAILED_AUTHENTICATION",
            Self::DuplicateSession => "DUPLICATE_SESSION",
            Self::SlowConsumer => "SLOW_CONSUMER",
            Self::Exception => "EXCEPTION",
            Self::EngineClose => "ENGINE_CLOSE",
        };
        f.write_str(name)
    }
}

/// Error kinds published on the event streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayErrorKind {
    /// The library id is not registered, or no acceptor library exists.
    UnknownLibrary,
    /// An outbound TCP connection could not be established.
    UnableToConnect,
    /// A session with the same key is already pending or connected.
    DuplicateSession,
    /// The connection does not exist or is not owned by the caller.
    UnknownSession,
}

impl fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UnknownLibrary => "UNKNOWN_LIBRARY",
            Self::UnableToConnect => "UNABLE_TO_CONNECT",
            Self::DuplicateSession => "DUPLICATE_SESSION",
            Self::UnknownSession => "UNKNOWN_SESSION",
        };
        f.write_str(name)
    }
}

/// FIX dictionary selected when accepting a logon.
///
/// The gateway does not interpret message content; the dictionary is passed
/// through to the owning library so it can decode with the right version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FixDictionary {
    /// FIX 4.0
    Fix40,
    /// FIX 4.1
    Fix41,
    /// FIX 4.2
    Fix42,
    /// FIX 4.3
    Fix43,
    /// FIX 4.4
    #[default]
    Fix44,
    /// FIX 5.0 SP2 over FIXT 1.1
    Fix50Sp2,
}

impl FixDictionary {
    /// Returns the BeginString value for this dictionary.
    #[must_use]
    pub const fn begin_string(&self) -> &'static str {
        match self {
            Self::Fix40 => "FIX.4.0",
            Self::Fix41 => "FIX.4.1",
            Self::Fix42 => "FIX.4.2",
            Self::Fix43 => "FIX.4.3",
            Self::Fix44 => "FIX.4.4",
            Self::Fix50Sp2 => "FIXT.1.1",
        }
    }

    /// Picks the dictionary matching a BeginString, if any.
    #[must_use]
    pub fn from_begin_string(begin_string: &str) -> Option<Self> {
        match begin_string {
            "FIX.4.0" => Some(Self::Fix40),
            "FIX.4.1" => Some(Self::Fix41),
            "FIX.4.2" => Some(Self::Fix42),
            "FIX.4.3" => Some(Self::Fix43),
            "FIX.4.4" => Some(Self::Fix44),
            "FIXT.1.1" => Some(Self::Fix50Sp2),
            _ => None,
        }
    }
}
