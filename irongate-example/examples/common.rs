//! Common utilities shared across examples.

#![allow(dead_code)]

use bytes::Bytes;
use irongate_transport::frame::FrameBuilder;
use std::env;

/// Default gateway port.
pub const DEFAULT_PORT: u16 = 9880;

/// Default gateway host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// BeginString used by the demos.
pub const FIX_VERSION: &str = "FIX.4.4";

/// Example configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ExampleConfig {
    /// Gateway hostname.
    pub host: String,
    /// Gateway port.
    pub port: u16,
    /// Our CompID.
    pub sender_comp_id: String,
    /// Counterparty CompID.
    pub target_comp_id: String,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval: u64,
}

impl ExampleConfig {
    /// Configuration for a counterparty connecting to the gateway.
    #[must_use]
    pub fn client() -> Self {
        Self::from_env("CLIENT", "GATEWAY")
    }

    /// Configuration for the gateway itself.
    #[must_use]
    pub fn gateway() -> Self {
        Self::from_env("GATEWAY", "CLIENT")
    }

    fn from_env(sender: &str, target: &str) -> Self {
        Self {
            host: env::var("GATEWAY_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            port: env::var("GATEWAY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            sender_comp_id: env::var("FIX_SENDER").unwrap_or_else(|_| sender.to_string()),
            target_comp_id: env::var("FIX_TARGET").unwrap_or_else(|_| target.to_string()),
            heartbeat_interval: 30,
        }
    }

    /// Returns the socket address string.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Initializes logging for examples.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init();
}

/// Current time as a FIX UTCTimestamp.
#[must_use]
pub fn sending_time() -> String {
    chrono::Utc::now().format("%Y%m%d-%H:%M:%S%.3f").to_string()
}

/// Session-level message with SendingTime set.
#[must_use]
pub fn session_message(msg_type: &str, sender: &str, target: &str, seq: u64) -> FrameBuilder {
    FrameBuilder::with_header(FIX_VERSION, msg_type, sender, target, seq).field(52, &sending_time())
}

/// Logon with no encryption and the given heartbeat interval.
#[must_use]
pub fn logon(sender: &str, target: &str, seq: u64, heartbeat_interval: u64) -> Bytes {
    session_message("A", sender, target, seq)
        .uint_field(98, 0)
        .uint_field(108, heartbeat_interval)
        .build()
}

/// Logout with an optional reason.
#[must_use]
pub fn logout(sender: &str, target: &str, seq: u64, text: Option<&str>) -> Bytes {
    let builder = session_message("5", sender, target, seq);
    match text {
        Some(text) => builder.field(58, text).build(),
        None => builder.build(),
    }
}
