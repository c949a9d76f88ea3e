//! Gateway Initiator Example
//!
//! Runs an outbound-only gateway and uses an initiator library to open a
//! session to the `gateway_server` example:
//! - the library asks the gateway to connect and waits for Connect/Logon,
//! - it sends the FIX Logon over the new connection and waits for the reply,
//! - it prints the admin snapshot, logs out and closes the engine.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use irongate_core::types::{CompId, ConnectionId, ConnectionType, LibraryId};
use irongate_engine::{EngineConfig, FixEngine, FixLibrary, InitiateConnection, LibraryEvent};
use irongate_transport::header::FrameHeader;
use tracing::info;

mod common;
use common::{ExampleConfig, init_logging, logon, logout};

const LIBRARY_ID: LibraryId = LibraryId::new(2);
const WAIT: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    init_logging();
    let cfg = ExampleConfig::client();
    let target: SocketAddr = cfg
        .addr()
        .parse()
        .with_context(|| format!("invalid gateway address {}", cfg.addr()))?;

    let mut engine = FixEngine::launch(EngineConfig::new())?;
    let library = engine.connect_library(LIBRARY_ID, ConnectionType::Initiator, "demo initiator")?;

    let request = InitiateConnection::new(
        target.ip().to_string(),
        target.port(),
        CompId::new(&cfg.sender_comp_id).context("sender CompID too long")?,
        CompId::new(&cfg.target_comp_id).context("target CompID too long")?,
    )
    .with_correlation_id(1);
    library.initiate(request)?;

    let connection_id = await_logon(&library)?;
    library.send(
        connection_id,
        logon(&cfg.sender_comp_id, &cfg.target_comp_id, 1, cfg.heartbeat_interval),
    )?;
    let reply = await_message(&library)?;
    info!(msg_type = %reply.msg_type, from = %reply.sender_comp_id, "gateway answered");

    for session in engine.admin().all_fix_sessions()? {
        info!(
            connection_id = %session.connection_id,
            key = ?session.session_key.map(|k| k.to_string()),
            last_sent = ?session.last_sent_sequence_number,
            last_received = ?session.last_received_sequence_number,
            "admin session"
        );
    }

    library.send(
        connection_id,
        logout(&cfg.sender_comp_id, &cfg.target_comp_id, 2, None),
    )?;
    let reply = await_message(&library)?;
    info!(msg_type = %reply.msg_type, "logout acknowledged");

    library.disconnect(connection_id, None)?;
    engine.close();
    Ok(())
}

fn await_logon(library: &FixLibrary) -> anyhow::Result<ConnectionId> {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        library.heartbeat()?;
        match library.next_event(Duration::from_millis(200)) {
            Some(LibraryEvent::Connect(connect)) => {
                info!(connection_id = %connect.connection_id, address = ?connect.address, "connected");
            }
            Some(LibraryEvent::Logon(logon)) => {
                info!(session_id = %logon.session_id, key = %logon.session_key, "session active");
                return Ok(logon.connection_id);
            }
            Some(LibraryEvent::Error(error)) => bail!("{}: {}", error.kind, error.message),
            Some(other) => info!(?other, "library event"),
            None => {}
        }
    }
    bail!("gateway did not connect within {WAIT:?}")
}

fn await_message(library: &FixLibrary) -> anyhow::Result<FrameHeader> {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        library.heartbeat()?;
        match library.next_event(Duration::from_millis(200)) {
            Some(LibraryEvent::Message { frame, .. }) => return Ok(FrameHeader::parse(&frame)?),
            Some(LibraryEvent::Disconnect(disconnect)) => {
                bail!("connection closed: {}", disconnect.reason)
            }
            Some(other) => info!(?other, "library event"),
            None => {}
        }
    }
    bail!("no message within {WAIT:?}")
}
