/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! # IronGate Engine
//!
//! The gateway process of the IronGate FIX gateway.
//!
//! This crate provides:
//! - **Framer**: Single-threaded reactor owning every socket and registry
//! - **Libraries**: Registration, heartbeat liveness and connection ownership
//! - **Authentication**: Single-use accept/reject tokens for inbound logons
//! - **Admin**: Snapshot and disconnect queries over live sessions
//! - **Engine handle**: Launches the framer thread and hands out clients

pub mod admin;
pub mod auth;
pub mod clock;
pub mod config;
pub mod connection;
pub mod engine;
pub mod framer;
pub mod library;
pub mod protocol;
pub mod session;

pub use admin::{FixAdmin, FixAdminSession};
pub use auth::AuthenticationProxy;
pub use clock::{EpochClock, FakeEpochClock, SystemEpochClock};
pub use config::EngineConfig;
pub use connection::{ConnectionRegistry, ConnectionState};
pub use engine::{FixEngine, FixLibrary};
pub use framer::Framer;
pub use library::{ENGINE_LIBRARY_NAME, LibraryInfo, LibraryRegistry};
pub use protocol::{
    AuthenticationDecision, Command, ConnectEvent, DisconnectEvent, ErrorEvent, GatewayEvent,
    InitiateConnection, LibraryEvent, LogonEvent,
};
pub use session::{SessionIds, SessionKey, SessionKeyComposition};
