/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Engine configuration.
//!
//! This module provides a builder API for configuring the gateway engine.

use crate::session::SessionKeyComposition;
use irongate_core::error::ConfigError;
use irongate_transport::codec::{DEFAULT_MAX_MESSAGE_SIZE, FixCodec};
use irongate_transport::endpoint::DEFAULT_RECEIVE_BUFFER_SIZE;
use std::net::SocketAddr;
use std::time::Duration;

/// Default time a library may go without heartbeating before it is evicted.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default upper bound on the linger of a rejected logon.
pub const DEFAULT_MAX_REJECT_LINGER: Duration = Duration::from_secs(5);

/// Configuration for a gateway engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Address to accept connections on; `None` disables inbound connections.
    bind_address: Option<SocketAddr>,
    /// Library liveness timeout.
    reply_timeout: Duration,
    /// Outbound TCP handshake timeout.
    connect_timeout: Duration,
    /// Time allowed between accept and the acceptor library's decision.
    authentication_timeout: Duration,
    /// Upper bound on reject linger.
    max_reject_linger: Duration,
    /// Bytes read per socket per tick.
    receive_buffer_size: usize,
    /// Largest inbound frame accepted.
    max_message_size: usize,
    /// Whether inbound CheckSum (10) is verified.
    validate_checksum: bool,
    /// Outbound bytes queued per connection before it is a slow consumer.
    sender_max_bytes_in_buffer: usize,
    /// Commands the framer runs per tick before moving on to I/O.
    max_commands_per_tick: usize,
    /// Sleep between ticks that did no work.
    idle_sleep: Duration,
    /// Which header fields identify a session.
    session_key_composition: SessionKeyComposition,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    /// Creates a configuration with default settings and no bind address.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bind_address: None,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            connect_timeout: Duration::from_secs(30),
            authentication_timeout: Duration::from_secs(5),
            max_reject_linger: DEFAULT_MAX_REJECT_LINGER,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            validate_checksum: true,
            sender_max_bytes_in_buffer: 4 * 1024 * 1024,
            max_commands_per_tick: 1024,
            idle_sleep: Duration::from_millis(1),
            session_key_composition: SessionKeyComposition::CompIdsOnly,
        }
    }

    /// Sets the address to accept connections on.
    #[must_use]
    pub const fn with_bind_address(mut self, address: SocketAddr) -> Self {
        self.bind_address = Some(address);
        self
    }

    /// Sets the library liveness timeout.
    #[must_use]
    pub const fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Sets the outbound connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the time allowed for the logon and the authentication decision.
    #[must_use]
    pub const fn with_authentication_timeout(mut self, timeout: Duration) -> Self {
        self.authentication_timeout = timeout;
        self
    }

    /// Sets the upper bound on reject linger.
    #[must_use]
    pub const fn with_max_reject_linger(mut self, linger: Duration) -> Self {
        self.max_reject_linger = linger;
        self
    }

    /// Sets the number of bytes read per socket per tick.
    #[must_use]
    pub const fn with_receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = size;
        self
    }

    /// Sets the largest inbound frame accepted.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Enables or disables inbound checksum verification.
    #[must_use]
    pub const fn with_checksum_validation(mut self, validate: bool) -> Self {
        self.validate_checksum = validate;
        self
    }

    /// Sets the slow consumer threshold.
    #[must_use]
    pub const fn with_sender_max_bytes_in_buffer(mut self, bytes: usize) -> Self {
        self.sender_max_bytes_in_buffer = bytes;
        self
    }

    /// Sets how many queued commands one tick runs at most.
    #[must_use]
    pub const fn with_max_commands_per_tick(mut self, commands: usize) -> Self {
        self.max_commands_per_tick = commands;
        self
    }

    /// Sets the sleep between idle ticks.
    #[must_use]
    pub const fn with_idle_sleep(mut self, sleep: Duration) -> Self {
        self.idle_sleep = sleep;
        self
    }

    /// Sets which header fields identify a session.
    #[must_use]
    pub const fn with_session_key_composition(mut self, composition: SessionKeyComposition) -> Self {
        self.session_key_composition = composition;
        self
    }

    /// Returns the bind address.
    #[must_use]
    pub const fn bind_address(&self) -> Option<SocketAddr> {
        self.bind_address
    }

    /// Returns the library liveness timeout.
    #[must_use]
    pub const fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    /// Returns the outbound connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the authentication timeout.
    #[must_use]
    pub const fn authentication_timeout(&self) -> Duration {
        self.authentication_timeout
    }

    /// Returns the upper bound on reject linger.
    #[must_use]
    pub const fn max_reject_linger(&self) -> Duration {
        self.max_reject_linger
    }

    /// Returns the number of bytes read per socket per tick.
    #[must_use]
    pub const fn receive_buffer_size(&self) -> usize {
        self.receive_buffer_size
    }

    /// Returns the slow consumer threshold.
    #[must_use]
    pub const fn sender_max_bytes_in_buffer(&self) -> usize {
        self.sender_max_bytes_in_buffer
    }

    /// Returns how many queued commands one tick runs at most.
    #[must_use]
    pub const fn max_commands_per_tick(&self) -> usize {
        self.max_commands_per_tick
    }

    /// Returns the sleep between idle ticks.
    #[must_use]
    pub const fn idle_sleep(&self) -> Duration {
        self.idle_sleep
    }

    /// Returns the session key composition.
    #[must_use]
    pub const fn session_key_composition(&self) -> SessionKeyComposition {
        self.session_key_composition
    }

    /// Builds the inbound frame codec.
    #[must_use]
    pub fn codec(&self) -> FixCodec {
        FixCodec::new()
            .with_max_message_size(self.max_message_size)
            .with_checksum_validation(self.validate_checksum)
    }

    /// Checks the configuration for values the engine cannot run with.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| ConfigError::InvalidValue {
            field,
            reason: reason.to_string(),
        };

        if self.reply_timeout.is_zero() {
            return Err(invalid("reply_timeout", "must be greater than zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(invalid("connect_timeout", "must be greater than zero"));
        }
        if self.authentication_timeout.is_zero() {
            return Err(invalid("authentication_timeout", "must be greater than zero"));
        }
        if self.receive_buffer_size == 0 {
            return Err(invalid("receive_buffer_size", "must be greater than zero"));
        }
        if self.max_message_size < 32 {
            return Err(invalid("max_message_size", "must be at least 32 bytes"));
        }
        if self.sender_max_bytes_in_buffer == 0 {
            return Err(invalid("sender_max_bytes_in_buffer", "must be greater than zero"));
        }
        if self.max_commands_per_tick == 0 {
            return Err(invalid("max_commands_per_tick", "must be greater than zero"));
        }
        Ok(())
    }
}
