/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Engine and library handles.
//!
//! [`FixEngine::launch`] binds the listener and starts the framer on its own
//! thread. Everything else talks to that thread through the command inbox:
//! [`FixLibrary`] for session owners, [`FixAdmin`](crate::admin::FixAdmin)
//! for operators.

use crate::admin::FixAdmin;
use crate::clock::{EpochClock, SystemEpochClock};
use crate::config::EngineConfig;
use crate::framer::Framer;
use crate::protocol::{Command, GatewayEvent, InitiateConnection, LibraryEvent};
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use irongate_core::error::{ConfigError, GatewayError, Result};
use irongate_core::types::{ConnectionId, ConnectionType, DisconnectReason, LibraryId};
use irongate_transport::channel::{ChannelSupplier, MioChannelSupplier};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Capacity of the engine-wide event stream. Events beyond it are dropped.
pub const EVENT_STREAM_CAPACITY: usize = 4096;

const FRAMER_THREAD_NAME: &str = "irongate-framer";

/// A running gateway engine.
///
/// Dropping the engine closes it.
#[derive(Debug)]
pub struct FixEngine {
    commands: Sender<Command>,
    events: Receiver<GatewayEvent>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    local_address: Option<SocketAddr>,
    reply_timeout: Duration,
}

impl FixEngine {
    /// Binds the configured address and starts the framer thread.
    ///
    /// # Errors
    /// `Config` if the configuration is invalid or the address cannot be
    /// bound, `Io` if the thread cannot be spawned.
    pub fn launch(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let supplier = MioChannelSupplier::bind(config.bind_address())?;
        let local_address = supplier.local_address();
        Self::start(
            config,
            Box::new(supplier),
            Arc::new(SystemEpochClock),
            local_address,
        )
    }

    /// Starts the framer thread over a caller-provided network and clock.
    ///
    /// # Errors
    /// Same as [`Self::launch`], minus binding.
    pub fn launch_with(
        config: EngineConfig,
        supplier: Box<dyn ChannelSupplier>,
        clock: Arc<dyn EpochClock>,
    ) -> Result<Self> {
        Self::start(config, supplier, clock, None)
    }

    fn start(
        config: EngineConfig,
        supplier: Box<dyn ChannelSupplier>,
        clock: Arc<dyn EpochClock>,
        local_address: Option<SocketAddr>,
    ) -> Result<Self> {
        let (commands, inbox) = unbounded();
        let (broadcast, events) = bounded(EVENT_STREAM_CAPACITY);
        let idle_sleep = config.idle_sleep();
        let reply_timeout = config.reply_timeout();
        let mut framer = Framer::new(config, supplier, clock, inbox, commands.clone(), broadcast)?;

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name(FRAMER_THREAD_NAME.to_string())
            .spawn(move || {
                info!(address = ?local_address, "framer started");
                while flag.load(Ordering::Acquire) {
                    if framer.do_work() == 0 {
                        thread::sleep(idle_sleep);
                    }
                }
                framer.on_close();
            })?;

        Ok(Self {
            commands,
            events,
            running,
            thread: Some(thread),
            local_address,
            reply_timeout,
        })
    }

    /// Address the listener is bound to, if any.
    #[must_use]
    pub const fn local_address(&self) -> Option<SocketAddr> {
        self.local_address
    }

    /// Registers a library and returns its handle.
    ///
    /// Registering an id that is already known refreshes it and replaces its
    /// event stream.
    ///
    /// # Errors
    /// `Config` for the reserved ids, `EngineClosed` if the engine has shut
    /// down.
    pub fn connect_library(
        &self,
        library_id: LibraryId,
        kind: ConnectionType,
        name: impl Into<String>,
    ) -> Result<FixLibrary> {
        if library_id.value() <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "library_id",
                reason: format!("{library_id} is reserved"),
            }
            .into());
        }
        let (events_tx, events) = unbounded();
        send(
            &self.commands,
            Command::LibraryConnect {
                library_id,
                kind,
                name: name.into(),
                events: events_tx,
            },
        )?;
        Ok(FixLibrary {
            library_id,
            commands: self.commands.clone(),
            events,
        })
    }

    /// Returns a new admin client.
    #[must_use]
    pub fn admin(&self) -> FixAdmin {
        FixAdmin::new(self.commands.clone(), self.reply_timeout)
    }

    /// Stream of every lifecycle and error event, whichever library it
    /// concerns.
    #[must_use]
    pub const fn events(&self) -> &Receiver<GatewayEvent> {
        &self.events
    }

    /// Whether the framer thread is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops the framer, closing every connection with `EngineClose`, and
    /// waits for its thread. Idempotent.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("framer thread panicked");
            }
            info!("engine closed");
        }
    }
}

impl Drop for FixEngine {
    fn drop(&mut self) {
        self.close();
    }
}

/// Handle of one registered library.
#[derive(Debug)]
pub struct FixLibrary {
    library_id: LibraryId,
    commands: Sender<Command>,
    events: Receiver<LibraryEvent>,
}

impl FixLibrary {
    /// Id this library registered under.
    #[must_use]
    pub const fn library_id(&self) -> LibraryId {
        self.library_id
    }

    /// Keeps the library alive. Must be called more often than the engine's
    /// reply timeout.
    ///
    /// # Errors
    /// `EngineClosed` if the engine has shut down.
    pub fn heartbeat(&self) -> Result<()> {
        send(
            &self.commands,
            Command::Heartbeat {
                library_id: self.library_id,
            },
        )
    }

    /// Asks the engine to open an outbound session. The outcome arrives as
    /// `Connect` and `Logon` events, or an `Error` carrying the request's
    /// correlation id.
    ///
    /// Host names are resolved here, on the caller's thread. A name that
    /// does not resolve is reported by the engine as `UnableToConnect`.
    ///
    /// # Errors
    /// `EngineClosed` if the engine has shut down.
    pub fn initiate(&self, mut request: InitiateConnection) -> Result<()> {
        if let Err(err) = request.resolve() {
            debug!(host = %request.host, port = request.port, error = %err, "unable to resolve host");
        }
        send(
            &self.commands,
            Command::InitiateConnection {
                library_id: self.library_id,
                request,
            },
        )
    }

    /// Closes a connection. `None` means `LocalDisconnect`.
    ///
    /// # Errors
    /// `EngineClosed` if the engine has shut down.
    pub fn disconnect(
        &self,
        connection_id: ConnectionId,
        reason: Option<DisconnectReason>,
    ) -> Result<()> {
        send(
            &self.commands,
            Command::Disconnect {
                library_id: self.library_id,
                connection_id,
                reason,
            },
        )
    }

    /// Queues a complete frame for a connection this library owns.
    ///
    /// # Errors
    /// `EngineClosed` if the engine has shut down.
    pub fn send(&self, connection_id: ConnectionId, frame: Bytes) -> Result<()> {
        send(
            &self.commands,
            Command::SendMessage {
                library_id: self.library_id,
                connection_id,
                frame,
            },
        )
    }

    /// This library's event stream.
    #[must_use]
    pub const fn events(&self) -> &Receiver<LibraryEvent> {
        &self.events
    }

    /// Waits up to `timeout` for the next event.
    #[must_use]
    pub fn next_event(&self, timeout: Duration) -> Option<LibraryEvent> {
        self.events.recv_timeout(timeout).ok()
    }
}

fn send(commands: &Sender<Command>, command: Command) -> Result<()> {
    commands.send(command).map_err(|_| GatewayError::EngineClosed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeEpochClock;
    use irongate_core::error::AdminError;
    use irongate_core::types::CompId;
    use irongate_transport::fake::FakeNetwork;

    const WAIT: Duration = Duration::from_secs(5);

    fn engine(network: &FakeNetwork) -> FixEngine {
        FixEngine::launch_with(
            EngineConfig::new().with_reply_timeout(Duration::from_secs(1)),
            Box::new(network.supplier()),
            Arc::new(FakeEpochClock::new(1_000)),
        )
        .unwrap()
    }

    fn request() -> InitiateConnection {
        InitiateConnection::new(
            "127.0.0.1",
            9999,
            CompId::new("LEH_LZJ02").unwrap(),
            CompId::new("CCG").unwrap(),
        )
    }

    #[test]
    fn test_initiate_through_library_handle() {
        let network = FakeNetwork::new();
        let engine = engine(&network);
        let library = engine
            .connect_library(LibraryId::new(3), ConnectionType::Initiator, "initiator")
            .unwrap();
        library.initiate(request()).unwrap();

        assert!(matches!(
            library.next_event(WAIT),
            Some(LibraryEvent::Connect(_))
        ));
        assert!(matches!(library.next_event(WAIT), Some(LibraryEvent::Logon(_))));
        assert!(matches!(
            engine.events().recv_timeout(WAIT),
            Ok(GatewayEvent::Connect(_))
        ));

        let sessions = engine.admin().all_fix_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].library_id, LibraryId::new(3));
    }

    #[test]
    fn test_reserved_library_ids_are_refused() {
        let network = FakeNetwork::new();
        let engine = engine(&network);
        assert!(matches!(
            engine.connect_library(LibraryId::new(0), ConnectionType::Acceptor, "engine"),
            Err(GatewayError::Config(_))
        ));
        assert!(matches!(
            engine.connect_library(LibraryId::new(-1), ConnectionType::Acceptor, "none"),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn test_close_is_idempotent_and_fails_clients() {
        let network = FakeNetwork::new();
        let mut engine = engine(&network);
        let library = engine
            .connect_library(LibraryId::new(3), ConnectionType::Initiator, "initiator")
            .unwrap();
        library.initiate(request()).unwrap();
        assert!(library.next_event(WAIT).is_some());
        let admin = engine.admin();

        engine.close();
        engine.close();
        assert!(!engine.is_running());
        assert!(network.is_closed());
        assert!(network.outbound_peers()[0].is_closed());

        assert!(matches!(library.heartbeat(), Err(GatewayError::EngineClosed)));
        assert_eq!(admin.all_fix_sessions(), Err(AdminError::EngineClosed));
        assert!(matches!(
            engine.connect_library(LibraryId::new(4), ConnectionType::Initiator, "late"),
            Err(GatewayError::EngineClosed)
        ));
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let network = FakeNetwork::new();
        let result = FixEngine::launch_with(
            EngineConfig::new().with_reply_timeout(Duration::ZERO),
            Box::new(network.supplier()),
            Arc::new(FakeEpochClock::new(0)),
        );
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }
}
