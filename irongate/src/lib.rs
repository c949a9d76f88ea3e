/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! # IronGate
//!
//! A FIX gateway engine for Rust.
//!
//! IronGate owns the TCP connections of many FIX sessions inside one gateway
//! process, while the sessions themselves belong to client libraries that
//! register with it. The gateway frames inbound bytes, routes each session to
//! its library, asks an acceptor library to authenticate inbound logons and
//! tears everything down cleanly when a library stops heartbeating.
//!
//! ## Features
//!
//! - **Single-threaded reactor**: One framer thread owns every socket and
//!   registry, no locks on the hot path
//! - **Non-blocking I/O**: Built on `mio`, nothing in a tick waits
//! - **Library liveness**: Heartbeat-driven eviction with one disconnect per
//!   owned connection
//! - **Pluggable authentication**: Single-use accept/reject tokens
//! - **Admin API**: Snapshots of every live session and targeted disconnects
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use irongate::prelude::*;
//!
//! let engine = FixEngine::launch(
//!     EngineConfig::new().with_bind_address("0.0.0.0:9880".parse()?),
//! )?;
//! let library = engine.connect_library(LibraryId::new(1), ConnectionType::Acceptor, "desk")?;
//!
//! while let Some(event) = library.next_event(Duration::from_secs(1)) {
//!     if let LibraryEvent::Authenticate(mut proxy) = event {
//!         proxy.accept()?;
//!     }
//!     library.heartbeat()?;
//! }
//! ```
//!
//! ## Crate Organization
//!
//! - [`core`]: Identifiers, closed enums and error definitions
//! - [`transport`]: Channels, framing codec and endpoints
//! - [`engine`]: Framer, registries, authentication and admin

pub mod core {
    //! Identifiers, closed enums and error definitions.
    pub use irongate_core::*;
}

pub mod transport {
    //! Channels, framing codec and endpoints.
    pub use irongate_transport::*;
}

pub mod engine {
    //! Framer, registries, authentication and admin.
    pub use irongate_engine::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    // Core types
    pub use irongate_core::{
        AdminError, AuthenticationError, CompId, ConfigError, ConnectionId, ConnectionType,
        DisconnectReason, FixDictionary, GatewayError, GatewayErrorKind, LibraryId, Result,
        SeqNum, SessionId, Timestamp,
    };

    // Transport
    pub use irongate_transport::{CodecError, FixCodec, FrameBuilder, FrameHeader};

    // Engine
    pub use irongate_engine::{
        AuthenticationProxy, EngineConfig, FixAdmin, FixAdminSession, FixEngine, FixLibrary,
        GatewayEvent, InitiateConnection, LibraryEvent, SessionKey, SessionKeyComposition,
    };

    pub use std::time::Duration;
}
