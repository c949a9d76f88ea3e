//! Gateway Server Example
//!
//! Runs the gateway on `GATEWAY_HOST:GATEWAY_PORT` with a single acceptor
//! library that:
//! - accepts logons from the CompIDs listed in `GATEWAY_ALLOWED` (default
//!   `CLIENT`) and rejects every other logon with a Logout,
//! - answers Logon with Logon and TestRequest with Heartbeat,
//! - logs an admin snapshot every ten seconds.
//!
//! Pair it with the `gateway_client` example.

use std::collections::{HashMap, HashSet};
use std::env;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::Context;
use bytes::Bytes;
use irongate_core::types::{ConnectionId, ConnectionType, LibraryId};
use irongate_engine::{
    AuthenticationProxy, EngineConfig, FixAdmin, FixEngine, GatewayEvent, LibraryEvent,
};
use irongate_transport::header::{FrameHeader, find_field};
use tracing::{info, warn};

mod common;
use common::{ExampleConfig, init_logging, logon, logout, session_message};

const LIBRARY_ID: LibraryId = LibraryId::new(1);
const HEARTBEAT_EVERY: Duration = Duration::from_secs(1);
const SNAPSHOT_EVERY: Duration = Duration::from_secs(10);
const REJECT_LINGER: Duration = Duration::from_millis(500);

fn main() -> anyhow::Result<()> {
    init_logging();
    let cfg = ExampleConfig::gateway();
    let allowed: HashSet<String> = env::var("GATEWAY_ALLOWED")
        .unwrap_or_else(|_| cfg.target_comp_id.clone())
        .split(',')
        .map(str::to_string)
        .collect();

    let address: SocketAddr = cfg
        .addr()
        .parse()
        .with_context(|| format!("invalid gateway address {}", cfg.addr()))?;
    let engine = FixEngine::launch(EngineConfig::new().with_bind_address(address))
        .context("unable to launch gateway")?;
    info!(address = ?engine.local_address(), allowed = ?allowed, "gateway listening");

    let library = engine.connect_library(LIBRARY_ID, ConnectionType::Acceptor, "demo acceptor")?;
    let admin = engine.admin();
    let mut outbound_seq = HashMap::<ConnectionId, u64>::new();
    let mut last_snapshot = Instant::now();

    loop {
        library.heartbeat()?;

        while let Ok(event) = engine.events().try_recv() {
            if let GatewayEvent::Error(error) = event {
                warn!(kind = %error.kind, library_id = %error.library_id, "{}", error.message);
            }
        }

        if let Some(event) = library.next_event(HEARTBEAT_EVERY) {
            match event {
                LibraryEvent::Authenticate(proxy) => authenticate(proxy, &allowed, &cfg)?,
                LibraryEvent::Logon(logon) => {
                    info!(session_id = %logon.session_id, key = %logon.session_key, "session logged on");
                    outbound_seq.insert(logon.connection_id, 1);
                }
                LibraryEvent::Message {
                    connection_id,
                    frame,
                    ..
                } => {
                    let seq = outbound_seq.entry(connection_id).or_insert(1);
                    if let Some(reply) = respond(&frame, &cfg, *seq) {
                        library.send(connection_id, reply)?;
                        *seq += 1;
                    }
                }
                LibraryEvent::Disconnect(disconnect) => {
                    info!(connection_id = %disconnect.connection_id, reason = %disconnect.reason, "session closed");
                    outbound_seq.remove(&disconnect.connection_id);
                }
                other => info!(?other, "library event"),
            }
        }

        if last_snapshot.elapsed() >= SNAPSHOT_EVERY {
            last_snapshot = Instant::now();
            log_snapshot(&admin);
        }
    }
}

fn authenticate(
    mut proxy: AuthenticationProxy,
    allowed: &HashSet<String>,
    cfg: &ExampleConfig,
) -> anyhow::Result<()> {
    let counterparty = proxy.session_key().remote_comp_id.to_string();
    if allowed.contains(&counterparty) {
        info!(%counterparty, "accepting logon");
        proxy.accept()?;
    } else {
        warn!(%counterparty, "rejecting logon");
        let message = logout(&cfg.sender_comp_id, &counterparty, 1, Some("unknown counterparty"));
        proxy.reject_with_message(message, REJECT_LINGER)?;
    }
    Ok(())
}

fn respond(frame: &[u8], cfg: &ExampleConfig, seq: u64) -> Option<Bytes> {
    let header = FrameHeader::parse(frame).ok()?;
    let target = header.sender_comp_id.as_str();
    match header.msg_type.as_str() {
        "A" => Some(logon(&cfg.sender_comp_id, target, seq, cfg.heartbeat_interval)),
        "1" => {
            let test_req_id = find_field(frame, 112).unwrap_or_default();
            Some(
                session_message("0", &cfg.sender_comp_id, target, seq)
                    .field(112, &String::from_utf8_lossy(test_req_id))
                    .build(),
            )
        }
        "5" => Some(logout(&cfg.sender_comp_id, target, seq, None)),
        _ => None,
    }
}

fn log_snapshot(admin: &FixAdmin) {
    match admin.all_fix_sessions() {
        Ok(sessions) => {
            info!(sessions = sessions.len(), "admin snapshot");
            for session in sessions {
                info!(
                    connection_id = %session.connection_id,
                    session_id = ?session.session_id,
                    host = ?session.connected_host,
                    last_received = ?session.last_received_sequence_number,
                    last_sent = ?session.last_sent_sequence_number,
                    slow = session.is_slow,
                    "session"
                );
            }
        }
        Err(err) => warn!(error = %err, "admin snapshot failed"),
    }
}
