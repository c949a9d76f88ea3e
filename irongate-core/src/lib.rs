/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! # IronGate Core
//!
//! Core identifiers and error definitions for the IronGate FIX gateway.
//!
//! This crate provides the building blocks shared by every layer:
//! - **Error types**: Unified error handling with `thiserror`
//! - **Identifiers**: `ConnectionId`, `LibraryId`, `SessionId`, `CompId`
//! - **Closed sets**: `ConnectionType`, `DisconnectReason`, `GatewayErrorKind`

pub mod error;
pub mod types;

pub use error::{AdminError, AuthenticationError, ConfigError, GatewayError, RegistryError, Result};
pub use types::{
    COMP_ID_MAX_LEN, CompId, ConnectionId, ConnectionType, DisconnectReason, ENGINE_LIBRARY_ID,
    FixDictionary, GatewayErrorKind, InvalidCompId, LibraryId, NO_LIBRARY_ID, SeqNum, SessionId,
    Timestamp,
};
