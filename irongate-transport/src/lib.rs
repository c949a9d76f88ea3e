/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! # IronGate Transport
//!
//! Byte-level plumbing for the IronGate gateway.
//!
//! This crate provides:
//! - **Channels**: the non-blocking socket capability, backed by `mio` in
//!   production and by an in-memory network in tests
//! - **Codec**: FIX message framing by BodyLength and CheckSum
//! - **Endpoints**: the receiving and sending halves of a live connection

pub mod channel;
pub mod codec;
pub mod endpoint;
pub mod fake;
pub mod frame;
pub mod header;

pub use channel::{BoxedChannel, ChannelSupplier, MioChannel, MioChannelSupplier, TcpChannel};
pub use codec::{CodecError, FixCodec};
pub use endpoint::{FrameReader, ReadOutcome, ReceiverEndPoint, SenderEndPoint, WriteOutcome};
pub use fake::{ConnectOutcome, FakeChannelSupplier, FakeNetwork, FakePeer};
pub use frame::FrameBuilder;
pub use header::FrameHeader;
