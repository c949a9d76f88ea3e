/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Receiver and sender halves of a live connection.
//!
//! Endpoints never own the socket: the framer passes the connection's
//! channel in on every call. They hold only the framing and write state, so
//! closing an endpoint is bookkeeping and the framer tears the socket down
//! once both halves report closed.

use crate::channel::TcpChannel;
use crate::codec::FixCodec;
use crate::header::msg_seq_num;
use bytes::{Buf, Bytes, BytesMut};
use irongate_core::types::{ConnectionId, DisconnectReason, SeqNum};
use std::io;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

/// Default number of bytes read from a socket per poll.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 16 * 1024;

/// Result of polling a receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Nothing was read.
    Idle,
    /// This many bytes were read.
    Read(usize),
    /// The connection must be closed.
    Closed(DisconnectReason),
}

/// Result of flushing a sending side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Nothing was written.
    Idle,
    /// This many bytes were written.
    Wrote(usize),
    /// The connection must be closed.
    Closed(DisconnectReason),
}

/// Reads bytes from a channel and splits them into frames.
///
/// Bytes after the last complete frame are kept for the next poll.
#[derive(Debug)]
pub struct FrameReader {
    codec: FixCodec,
    buffer: BytesMut,
    scratch: Box<[u8]>,
    last_received: Option<SeqNum>,
}

impl FrameReader {
    /// Creates a reader that reads up to `read_size` bytes per poll.
    #[must_use]
    pub fn new(codec: FixCodec, read_size: usize) -> Self {
        Self {
            codec,
            buffer: BytesMut::with_capacity(read_size),
            scratch: vec![0u8; read_size.max(1)].into_boxed_slice(),
            last_received: None,
        }
    }

    /// Performs one read and appends up to `limit` complete frames to
    /// `frames`.
    pub fn poll(
        &mut self,
        channel: &mut dyn TcpChannel,
        frames: &mut Vec<Bytes>,
        limit: usize,
    ) -> ReadOutcome {
        let outcome = match channel.read(&mut self.scratch) {
            Ok(0) => ReadOutcome::Closed(DisconnectReason::RemoteDisconnect),
            Ok(n) => {
                self.buffer.extend_from_slice(&self.scratch[..n]);
                ReadOutcome::Read(n)
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::Interrupted =>
            {
                ReadOutcome::Idle
            }
            Err(err) => {
                debug!(error = %err, "read failed");
                ReadOutcome::Closed(DisconnectReason::Exception)
            }
        };

        match self.decode(frames, limit) {
            Ok(()) => outcome,
            Err(reason) => ReadOutcome::Closed(reason),
        }
    }

    fn decode(&mut self, frames: &mut Vec<Bytes>, limit: usize) -> Result<(), DisconnectReason> {
        let mut decoded = 0;
        while decoded < limit {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(frame)) => {
                    if let Some(seq) = msg_seq_num(&frame) {
                        self.last_received = Some(seq);
                    }
                    frames.push(frame);
                    decoded += 1;
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "unable to frame inbound bytes");
                    return Err(DisconnectReason::ProtocolViolation);
                }
            }
        }
        Ok(())
    }

    /// Bytes buffered but not yet framed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Last MsgSeqNum seen on a framed message.
    #[must_use]
    pub const fn last_received(&self) -> Option<SeqNum> {
        self.last_received
    }
}

/// Receiving half of a live connection.
#[derive(Debug)]
pub struct ReceiverEndPoint {
    connection_id: ConnectionId,
    reader: FrameReader,
    disconnect_reason: Option<DisconnectReason>,
}

impl ReceiverEndPoint {
    /// Wraps a reader that may already hold buffered bytes from the logon
    /// stage.
    #[must_use]
    pub fn new(connection_id: ConnectionId, reader: FrameReader) -> Self {
        Self {
            connection_id,
            reader,
            disconnect_reason: None,
        }
    }

    /// Reads and frames whatever the socket has. Closed receivers do nothing.
    pub fn poll_for_data(
        &mut self,
        channel: &mut dyn TcpChannel,
        frames: &mut Vec<Bytes>,
    ) -> ReadOutcome {
        if self.disconnect_reason.is_some() {
            return ReadOutcome::Idle;
        }
        self.reader.poll(channel, frames, usize::MAX)
    }

    /// Marks the receiver closed. Returns false if it was already closed.
    pub fn close(&mut self, reason: DisconnectReason) -> bool {
        if self.disconnect_reason.is_some() {
            return false;
        }
        debug!(connection_id = %self.connection_id, %reason, "receiver closed");
        self.disconnect_reason = Some(reason);
        true
    }

    /// Whether the receiver has been closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.disconnect_reason.is_some()
    }

    /// Reason given when the receiver was closed.
    #[must_use]
    pub const fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.disconnect_reason
    }

    /// Last MsgSeqNum received.
    #[must_use]
    pub const fn last_received(&self) -> Option<SeqNum> {
        self.reader.last_received()
    }

    /// Connection this endpoint belongs to.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }
}

/// Sending half of a live connection.
#[derive(Debug)]
pub struct SenderEndPoint {
    connection_id: ConnectionId,
    pending: BytesMut,
    max_bytes_in_buffer: usize,
    slow: bool,
    closed: bool,
    last_sent: Option<SeqNum>,
}

impl SenderEndPoint {
    /// Creates a sender that disconnects the peer once more than
    /// `max_bytes_in_buffer` bytes are waiting.
    #[must_use]
    pub fn new(connection_id: ConnectionId, max_bytes_in_buffer: usize) -> Self {
        Self {
            connection_id,
            pending: BytesMut::new(),
            max_bytes_in_buffer,
            slow: false,
            closed: false,
            last_sent: None,
        }
    }

    /// Queues a frame for writing.
    ///
    /// Frames offered after close are dropped.
    ///
    /// # Errors
    /// `DisconnectReason::SlowConsumer` if the queue would exceed its limit.
    pub fn enqueue(&mut self, frame: &[u8]) -> Result<(), DisconnectReason> {
        if self.closed {
            debug!(connection_id = %self.connection_id, "dropping frame for closed sender");
            return Ok(());
        }
        if self.pending.len() + frame.len() > self.max_bytes_in_buffer {
            warn!(
                connection_id = %self.connection_id,
                pending = self.pending.len(),
                limit = self.max_bytes_in_buffer,
                "outbound buffer limit exceeded"
            );
            return Err(DisconnectReason::SlowConsumer);
        }
        if let Some(seq) = msg_seq_num(frame) {
            self.last_sent = Some(seq);
        }
        self.pending.extend_from_slice(frame);
        Ok(())
    }

    /// Writes queued bytes until the socket pushes back.
    pub fn flush(&mut self, channel: &mut dyn TcpChannel) -> WriteOutcome {
        if self.closed || self.pending.is_empty() {
            return WriteOutcome::Idle;
        }

        let mut written = 0;
        while !self.pending.is_empty() {
            match channel.write(&self.pending) {
                Ok(0) => break,
                Ok(n) => {
                    self.pending.advance(n);
                    written += n;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(connection_id = %self.connection_id, error = %err, "write failed");
                    return WriteOutcome::Closed(DisconnectReason::Exception);
                }
            }
        }

        let slow = !self.pending.is_empty();
        if slow != self.slow {
            debug!(connection_id = %self.connection_id, slow, "sender backpressure changed");
            self.slow = slow;
        }

        if written == 0 {
            WriteOutcome::Idle
        } else {
            WriteOutcome::Wrote(written)
        }
    }

    /// Marks the sender closed. Returns false if it was already closed.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        debug!(connection_id = %self.connection_id, "sender closed");
        self.closed = true;
        true
    }

    /// Whether bytes are waiting to be written.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Whether the last flush left bytes behind.
    #[must_use]
    pub const fn is_slow(&self) -> bool {
        self.slow
    }

    /// Whether the sender has been closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Last MsgSeqNum queued for sending.
    #[must_use]
    pub const fn last_sent(&self) -> Option<SeqNum> {
        self.last_sent
    }
}
