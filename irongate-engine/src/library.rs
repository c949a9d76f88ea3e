/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Registered libraries, their liveness and the connections they own.

use crate::protocol::LibraryEvent;
use crossbeam_channel::Sender;
use irongate_core::error::RegistryError;
use irongate_core::types::{ConnectionId, ConnectionType, ENGINE_LIBRARY_ID, LibraryId, Timestamp};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{info, warn};

/// Name of the engine's built-in library.
pub const ENGINE_LIBRARY_NAME: &str = "Gateway Library";

/// Snapshot of one library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryInfo {
    /// Library id.
    pub library_id: LibraryId,
    /// Whether it accepts inbound sessions.
    pub kind: ConnectionType,
    /// Human readable name.
    pub name: String,
    /// Time of the last heartbeat.
    pub last_heartbeat: Timestamp,
    /// Connections it owns, ascending.
    pub connection_ids: Vec<ConnectionId>,
}

#[derive(Debug)]
struct Library {
    id: LibraryId,
    kind: ConnectionType,
    name: String,
    last_heartbeat: Timestamp,
    connections: BTreeSet<ConnectionId>,
    events: Option<Sender<LibraryEvent>>,
}

/// Every registered library, in registration order.
///
/// The engine library is always present and never expires.
#[derive(Debug)]
pub struct LibraryRegistry {
    libraries: Vec<Library>,
}

impl LibraryRegistry {
    /// Creates a registry holding only the engine library.
    #[must_use]
    pub fn new(now: Timestamp) -> Self {
        Self {
            libraries: vec![Library {
                id: ENGINE_LIBRARY_ID,
                kind: ConnectionType::Initiator,
                name: ENGINE_LIBRARY_NAME.to_string(),
                last_heartbeat: now,
                connections: BTreeSet::new(),
                events: None,
            }],
        }
    }

    fn get(&self, library_id: LibraryId) -> Option<&Library> {
        self.libraries.iter().find(|l| l.id == library_id)
    }

    fn get_mut(&mut self, library_id: LibraryId) -> Option<&mut Library> {
        self.libraries.iter_mut().find(|l| l.id == library_id)
    }

    /// Registers a library, or refreshes an existing one.
    ///
    /// # Returns
    /// `true` for a new registration. The engine library id cannot be
    /// registered and yields `false`.
    pub fn register(
        &mut self,
        library_id: LibraryId,
        kind: ConnectionType,
        name: String,
        events: Sender<LibraryEvent>,
        now: Timestamp,
    ) -> bool {
        if library_id.is_engine() {
            warn!(%library_id, "refusing to register the engine library id");
            return false;
        }
        if let Some(library) = self.get_mut(library_id) {
            library.kind = kind;
            library.name = name;
            library.events = Some(events);
            library.last_heartbeat = now;
            info!(%library_id, "library reconnected");
            return false;
        }
        info!(%library_id, %kind, name = %name, "library registered");
        self.libraries.push(Library {
            id: library_id,
            kind,
            name,
            last_heartbeat: now,
            connections: BTreeSet::new(),
            events: Some(events),
        });
        true
    }

    /// Records a heartbeat.
    ///
    /// # Returns
    /// `false` if the library is unknown.
    pub fn heartbeat(&mut self, library_id: LibraryId, now: Timestamp) -> bool {
        match self.get_mut(library_id) {
            Some(library) => {
                library.last_heartbeat = now;
                true
            }
            None => {
                warn!(%library_id, "heartbeat from unknown library");
                false
            }
        }
    }

    /// Libraries whose last heartbeat is older than `timeout`.
    #[must_use]
    pub fn sweep_expired(&self, now: Timestamp, timeout: Duration) -> Vec<LibraryId> {
        let timeout = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.libraries
            .iter()
            .filter(|l| !l.id.is_engine())
            .filter(|l| now.as_millis().saturating_sub(l.last_heartbeat.as_millis()) > timeout)
            .map(|l| l.id)
            .collect()
    }

    /// Connections owned by the library, ascending. Empty if unknown.
    #[must_use]
    pub fn owned_connections(&self, library_id: LibraryId) -> Vec<ConnectionId> {
        self.get(library_id)
            .map(|l| l.connections.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Records that the library owns a connection.
    ///
    /// # Errors
    /// `UnknownLibrary` if the library is not registered.
    pub fn add_connection(
        &mut self,
        library_id: LibraryId,
        connection_id: ConnectionId,
    ) -> Result<(), RegistryError> {
        let library = self
            .get_mut(library_id)
            .ok_or(RegistryError::UnknownLibrary(library_id))?;
        library.connections.insert(connection_id);
        Ok(())
    }

    /// Forgets that the library owns a connection.
    pub fn release_connection(&mut self, library_id: LibraryId, connection_id: ConnectionId) -> bool {
        self.get_mut(library_id)
            .is_some_and(|l| l.connections.remove(&connection_id))
    }

    /// Moves a connection from one library to another.
    ///
    /// # Errors
    /// `UnknownLibrary` if either library is unknown, `UnknownConnection` if
    /// `from` does not own the connection. Nothing changes on error.
    pub fn transfer(
        &mut self,
        connection_id: ConnectionId,
        from: LibraryId,
        to: LibraryId,
    ) -> Result<(), RegistryError> {
        if self.get(to).is_none() {
            return Err(RegistryError::UnknownLibrary(to));
        }
        let source = self
            .get_mut(from)
            .ok_or(RegistryError::UnknownLibrary(from))?;
        if !source.connections.remove(&connection_id) {
            return Err(RegistryError::UnknownConnection(connection_id));
        }
        self.add_connection(to, connection_id)
    }

    /// First registered library that accepts inbound sessions.
    #[must_use]
    pub fn acceptor_library(&self) -> Option<LibraryId> {
        self.libraries
            .iter()
            .find(|l| !l.id.is_engine() && l.kind == ConnectionType::Acceptor)
            .map(|l| l.id)
    }

    /// Removes a library, returning the connections it still owned.
    ///
    /// The engine library is never removed.
    pub fn remove(&mut self, library_id: LibraryId) -> Option<Vec<ConnectionId>> {
        if library_id.is_engine() {
            return None;
        }
        let index = self.libraries.iter().position(|l| l.id == library_id)?;
        let library = self.libraries.remove(index);
        Some(library.connections.into_iter().collect())
    }

    /// Whether the library is registered.
    #[must_use]
    pub fn contains(&self, library_id: LibraryId) -> bool {
        self.get(library_id).is_some()
    }

    /// Event stream of the library, if it has one.
    #[must_use]
    pub fn events(&self, library_id: LibraryId) -> Option<&Sender<LibraryEvent>> {
        self.get(library_id).and_then(|l| l.events.as_ref())
    }

    /// Snapshot of every library, in registration order.
    #[must_use]
    pub fn library_infos(&self) -> Vec<LibraryInfo> {
        self.libraries
            .iter()
            .map(|l| LibraryInfo {
                library_id: l.id,
                kind: l.kind,
                name: l.name.clone(),
                last_heartbeat: l.last_heartbeat,
                connection_ids: l.connections.iter().copied().collect(),
            })
            .collect()
    }

    /// Number of registered libraries, including the engine library.
    #[must_use]
    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    /// Always false: the engine library is always present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }
}
