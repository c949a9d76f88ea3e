/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Session identity.
//!
//! A [`SessionKey`] is always written from the gateway's side: `local` is the
//! comp id the gateway speaks as, `remote` is the counterparty. For inbound
//! logons that means the TargetCompID of the logon is the local comp id.

use irongate_core::types::{CompId, SessionId};
use irongate_transport::header::FrameHeader;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Which header fields take part in duplicate session detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionKeyComposition {
    /// SenderCompID and TargetCompID only.
    #[default]
    CompIdsOnly,
    /// Comp ids plus SenderSubID and TargetSubID.
    WithSubIds,
    /// Comp ids plus SenderLocationID and TargetLocationID.
    WithLocationIds,
    /// Comp ids, sub ids and location ids.
    Full,
}

impl SessionKeyComposition {
    const fn includes_sub_ids(self) -> bool {
        matches!(self, Self::WithSubIds | Self::Full)
    }

    const fn includes_location_ids(self) -> bool {
        matches!(self, Self::WithLocationIds | Self::Full)
    }
}

/// Identity of a logical counterparty relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    /// Comp id the gateway speaks as.
    pub local_comp_id: CompId,
    /// Comp id of the counterparty.
    pub remote_comp_id: CompId,
    /// Local sub id.
    pub local_sub_id: Option<String>,
    /// Remote sub id.
    pub remote_sub_id: Option<String>,
    /// Local location id.
    pub local_location_id: Option<String>,
    /// Remote location id.
    pub remote_location_id: Option<String>,
}

impl SessionKey {
    /// Creates a key from the two comp ids.
    #[must_use]
    pub const fn new(local_comp_id: CompId, remote_comp_id: CompId) -> Self {
        Self {
            local_comp_id,
            remote_comp_id,
            local_sub_id: None,
            remote_sub_id: None,
            local_location_id: None,
            remote_location_id: None,
        }
    }

    /// Sets the sub ids.
    #[must_use]
    pub fn with_sub_ids(mut self, local: Option<String>, remote: Option<String>) -> Self {
        self.local_sub_id = local;
        self.remote_sub_id = remote;
        self
    }

    /// Sets the location ids.
    #[must_use]
    pub fn with_location_ids(mut self, local: Option<String>, remote: Option<String>) -> Self {
        self.local_location_id = local;
        self.remote_location_id = remote;
        self
    }

    /// Derives the key of an inbound logon.
    #[must_use]
    pub fn from_inbound_logon(header: &FrameHeader) -> Self {
        Self::new(header.target_comp_id, header.sender_comp_id)
            .with_sub_ids(header.target_sub_id.clone(), header.sender_sub_id.clone())
            .with_location_ids(
                header.target_location_id.clone(),
                header.sender_location_id.clone(),
            )
    }

    /// Drops the fields that do not take part in `composition`.
    #[must_use]
    pub fn compose(mut self, composition: SessionKeyComposition) -> Self {
        if !composition.includes_sub_ids() {
            self.local_sub_id = None;
            self.remote_sub_id = None;
        }
        if !composition.includes_location_ids() {
            self.local_location_id = None;
            self.remote_location_id = None;
        }
        self
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn side(
            f: &mut fmt::Formatter<'_>,
            comp_id: &CompId,
            sub_id: Option<&String>,
            location_id: Option<&String>,
        ) -> fmt::Result {
            write!(f, "{comp_id}")?;
            if let Some(sub_id) = sub_id {
                write!(f, "/{sub_id}")?;
            }
            if let Some(location_id) = location_id {
                write!(f, "@{location_id}")?;
            }
            Ok(())
        }

        side(
            f,
            &self.local_comp_id,
            self.local_sub_id.as_ref(),
            self.local_location_id.as_ref(),
        )?;
        f.write_str("->")?;
        side(
            f,
            &self.remote_comp_id,
            self.remote_sub_id.as_ref(),
            self.remote_location_id.as_ref(),
        )
    }
}

/// Allocates session ids, one per distinct key, reused on reconnect.
#[derive(Debug)]
pub struct SessionIds {
    by_key: HashMap<SessionKey, SessionId>,
    next: u64,
}

impl Default for SessionIds {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionIds {
    /// Creates an empty allocator. The first id handed out is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_key: HashMap::new(),
            next: 1,
        }
    }

    /// Returns the id for `key`, allocating one on first use.
    pub fn session_id(&mut self, key: &SessionKey) -> SessionId {
        if let Some(id) = self.by_key.get(key) {
            return *id;
        }
        let id = SessionId::new(self.next);
        self.next += 1;
        self.by_key.insert(key.clone(), id);
        id
    }

    /// Number of distinct keys seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Returns true if no key has been seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
