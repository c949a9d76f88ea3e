/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Socket capability consumed by the framer.
//!
//! [`ChannelSupplier`] hands out newly accepted connections and opens outbound
//! ones; [`TcpChannel`] is a single non-blocking connection. Every call
//! returns immediately: `WouldBlock` means "nothing to do right now".
//!
//! [`MioChannelSupplier`] is the production implementation. Tests use the
//! in-memory implementation in [`crate::fake`].

use irongate_core::error::ConfigError;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;
use tracing::{debug, warn};

/// A single non-blocking TCP connection.
pub trait TcpChannel: Send + fmt::Debug {
    /// Reads available bytes. `Ok(0)` means end of stream.
    ///
    /// # Errors
    /// `WouldBlock` when no bytes are available, other errors are fatal for
    /// the connection.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes as many bytes as the socket accepts.
    ///
    /// # Errors
    /// `WouldBlock` when the socket buffer is full.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Checks on an outbound connection in progress.
    ///
    /// # Returns
    /// `Ok(true)` once connected, `Ok(false)` while the handshake is still in
    /// progress.
    ///
    /// # Errors
    /// The connect failure, if the handshake failed.
    fn finish_connect(&mut self) -> io::Result<bool>;

    /// Address of the remote end, once known.
    fn remote_address(&self) -> Option<SocketAddr>;

    /// Closes the connection. Idempotent.
    fn close(&mut self);
}

/// Boxed channel handed between the supplier, the registries and endpoints.
pub type BoxedChannel = Box<dyn TcpChannel>;

/// Source of new connections.
pub trait ChannelSupplier: Send {
    /// Drains connections accepted since the last call. Never blocks.
    ///
    /// Returns an empty vector when no bind address is configured.
    ///
    /// # Errors
    /// Accept failures; the listener stays usable.
    fn poll_new_connections(&mut self) -> io::Result<Vec<BoxedChannel>>;

    /// Starts a non-blocking outbound connection.
    ///
    /// The returned channel may still be connecting, see
    /// [`TcpChannel::finish_connect`].
    ///
    /// # Errors
    /// Immediate connect failures.
    fn open_outbound(&mut self, address: SocketAddr) -> io::Result<BoxedChannel>;

    /// Releases the listening socket. Idempotent.
    fn close(&mut self);
}

const LISTENER: Token = Token(0);

/// Non-blocking listener built on `mio`.
#[derive(Debug)]
pub struct MioChannelSupplier {
    listener: Option<TcpListener>,
    poll: Option<Poll>,
    events: Events,
    /// Set when a previous drain stopped before `WouldBlock`, so the next call
    /// accepts without waiting for a fresh readiness event.
    drain_pending: bool,
}

impl MioChannelSupplier {
    /// Binds the listener, or creates an outbound-only supplier when
    /// `bind_address` is `None`.
    ///
    /// # Errors
    /// Returns `ConfigError::Bind` if the address cannot be bound.
    pub fn bind(bind_address: Option<SocketAddr>) -> Result<Self, ConfigError> {
        let Some(address) = bind_address else {
            return Ok(Self {
                listener: None,
                poll: None,
                events: Events::with_capacity(0),
                drain_pending: false,
            });
        };

        let bind_error = |err: io::Error| ConfigError::Bind {
            address: address.to_string(),
            reason: err.to_string(),
        };

        let mut listener = TcpListener::bind(address).map_err(bind_error)?;
        let poll = Poll::new().map_err(bind_error)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(bind_error)?;

        debug!(%address, "listening");
        Ok(Self {
            listener: Some(listener),
            poll: Some(poll),
            events: Events::with_capacity(16),
            drain_pending: false,
        })
    }

    /// Returns the bound address, if listening.
    #[must_use]
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }
}

impl ChannelSupplier for MioChannelSupplier {
    fn poll_new_connections(&mut self) -> io::Result<Vec<BoxedChannel>> {
        let (Some(listener), Some(poll)) = (self.listener.as_ref(), self.poll.as_mut()) else {
            return Ok(Vec::new());
        };

        poll.poll(&mut self.events, Some(Duration::ZERO))?;
        if self.events.is_empty() && !self.drain_pending {
            return Ok(Vec::new());
        }

        let mut accepted: Vec<BoxedChannel> = Vec::new();
        self.drain_pending = false;
        loop {
            match listener.accept() {
                Ok((stream, address)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(%address, error = %err, "unable to set TCP_NODELAY");
                    }
                    accepted.push(Box::new(MioChannel::accepted(stream, address)));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    self.drain_pending = true;
                    if accepted.is_empty() {
                        return Err(err);
                    }
                    break;
                }
            }
        }
        Ok(accepted)
    }

    fn open_outbound(&mut self, address: SocketAddr) -> io::Result<BoxedChannel> {
        let stream = TcpStream::connect(address)?;
        Ok(Box::new(MioChannel::connecting(stream, address)))
    }

    fn close(&mut self) {
        if let (Some(mut listener), Some(poll)) = (self.listener.take(), self.poll.take()) {
            if let Err(err) = poll.registry().deregister(&mut listener) {
                debug!(error = %err, "deregister listener failed");
            }
        }
    }
}

/// Non-blocking connection built on `mio`.
#[derive(Debug)]
pub struct MioChannel {
    stream: TcpStream,
    remote: SocketAddr,
    connected: bool,
    closed: bool,
}

impl MioChannel {
    fn accepted(stream: TcpStream, remote: SocketAddr) -> Self {
        Self {
            stream,
            remote,
            connected: true,
            closed: false,
        }
    }

    fn connecting(stream: TcpStream, remote: SocketAddr) -> Self {
        Self {
            stream,
            remote,
            connected: false,
            closed: false,
        }
    }
}

impl TcpChannel for MioChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn finish_connect(&mut self) -> io::Result<bool> {
        if self.connected {
            return Ok(true);
        }
        if let Some(err) = self.stream.take_error()? {
            return Err(err);
        }
        match self.stream.peer_addr() {
            Ok(_) => {
                self.connected = true;
                if let Err(err) = self.stream.set_nodelay(true) {
                    debug!(remote = %self.remote, error = %err, "unable to set TCP_NODELAY");
                }
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        Some(self.remote)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            debug!(remote = %self.remote, error = %err, "shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbound_supplier_polls_nothing() {
        let mut supplier = MioChannelSupplier::bind(None).unwrap();
        assert!(supplier.local_address().is_none());
        assert!(supplier.poll_new_connections().unwrap().is_empty());
        supplier.close();
        supplier.close();
    }

    #[test]
    fn test_bind_conflict_is_config_error() {
        let first = MioChannelSupplier::bind(Some("127.0.0.1:0".parse().unwrap())).unwrap();
        let taken = first.local_address().unwrap();

        let err = MioChannelSupplier::bind(Some(taken)).unwrap_err();
        assert!(matches!(err, ConfigError::Bind { .. }));
    }

    #[test]
    fn test_accepts_loopback_connection() {
        let mut supplier = MioChannelSupplier::bind(Some("127.0.0.1:0".parse().unwrap())).unwrap();
        let address = supplier.local_address().unwrap();
        let _client = std::net::TcpStream::connect(address).unwrap();

        let mut accepted = Vec::new();
        for _ in 0..200 {
            accepted.extend(supplier.poll_new_connections().unwrap());
            if !accepted.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(accepted.len(), 1);
        assert!(accepted[0].remote_address().is_some());
    }
}
