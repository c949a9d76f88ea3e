/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! In-memory implementation of the socket capability.
//!
//! A [`FakeNetwork`] is shared between a test and the framer: the framer
//! owns the [`FakeChannelSupplier`], the test scripts inbound connections and
//! outbound connect outcomes and inspects each connection through its
//! [`FakePeer`].

use crate::channel::{BoxedChannel, ChannelSupplier, TcpChannel};
use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

/// Scripted outcome of an outbound connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// `open_outbound` fails immediately with `ConnectionRefused`.
    Refuse,
    /// The handshake stays in progress until [`FakePeer::complete_connect`] or
    /// [`FakePeer::fail_connect`] is called.
    Hold,
    /// The handshake completes on the first `finish_connect`.
    Connect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectState {
    Pending,
    Connected,
    Failed,
}

#[derive(Debug)]
struct PeerState {
    remote: SocketAddr,
    connect: ConnectState,
    /// Bytes the remote end sent, waiting to be read by the gateway.
    inbound: BytesMut,
    /// Bytes the gateway wrote.
    written: Vec<u8>,
    /// Bytes accepted per write call; `None` means unlimited.
    write_budget: Option<usize>,
    remote_closed: bool,
    read_error: Option<io::ErrorKind>,
    close_calls: usize,
}

/// Test-side handle onto one fake connection.
#[derive(Debug, Clone)]
pub struct FakePeer {
    state: Arc<Mutex<PeerState>>,
}

impl FakePeer {
    fn new(remote: SocketAddr, connect: ConnectState) -> Self {
        Self {
            state: Arc::new(Mutex::new(PeerState {
                remote,
                connect,
                inbound: BytesMut::new(),
                written: Vec::new(),
                write_budget: None,
                remote_closed: false,
                read_error: None,
                close_calls: 0,
            })),
        }
    }

    /// Queues bytes for the gateway to read.
    pub fn send(&self, bytes: &[u8]) {
        self.state.lock().inbound.extend_from_slice(bytes);
    }

    /// Closes the remote end: reads return end of stream once drained.
    pub fn close_remote(&self) {
        self.state.lock().remote_closed = true;
    }

    /// Makes the next read fail with the given error kind.
    pub fn fail_reads(&self, kind: io::ErrorKind) {
        self.state.lock().read_error = Some(kind);
    }

    /// Limits how many bytes each write accepts; `Some(0)` blocks writes.
    pub fn limit_writes(&self, budget: Option<usize>) {
        self.state.lock().write_budget = budget;
    }

    /// Completes a held outbound connect.
    pub fn complete_connect(&self) {
        self.state.lock().connect = ConnectState::Connected;
    }

    /// Fails a held outbound connect.
    pub fn fail_connect(&self) {
        self.state.lock().connect = ConnectState::Failed;
    }

    /// Bytes written by the gateway so far.
    #[must_use]
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Whether the gateway has closed this connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().close_calls > 0
    }

    /// How many times the gateway called `close`.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    /// Remote address of the connection.
    #[must_use]
    pub fn remote_address(&self) -> SocketAddr {
        self.state.lock().remote
    }
}

/// Gateway-side half of a fake connection.
#[derive(Debug)]
pub struct FakeChannel {
    peer: FakePeer,
}

impl TcpChannel for FakeChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.peer.state.lock();
        if let Some(kind) = state.read_error.take() {
            return Err(kind.into());
        }
        if state.inbound.is_empty() {
            return if state.remote_closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let len = buf.len().min(state.inbound.len());
        buf[..len].copy_from_slice(&state.inbound[..len]);
        state.inbound.advance(len);
        Ok(len)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.peer.state.lock();
        if state.remote_closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let len = state.write_budget.map_or(buf.len(), |budget| budget.min(buf.len()));
        if len == 0 && !buf.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        state.written.extend_from_slice(&buf[..len]);
        Ok(len)
    }

    fn finish_connect(&mut self) -> io::Result<bool> {
        match self.peer.state.lock().connect {
            ConnectState::Connected => Ok(true),
            ConnectState::Pending => Ok(false),
            ConnectState::Failed => Err(io::ErrorKind::ConnectionRefused.into()),
        }
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        Some(self.peer.remote_address())
    }

    fn close(&mut self) {
        self.peer.state.lock().close_calls += 1;
    }
}

#[derive(Debug, Default)]
struct NetworkState {
    bound: bool,
    closed: bool,
    pending_accepts: VecDeque<FakePeer>,
    outcomes: HashMap<SocketAddr, ConnectOutcome>,
    outbound: Vec<FakePeer>,
    next_port: u16,
}

/// Shared script and observation point for fake connections.
#[derive(Debug, Clone)]
pub struct FakeNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl FakeNetwork {
    /// Creates a network whose supplier accepts inbound connections.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState {
                bound: true,
                next_port: 50_000,
                ..NetworkState::default()
            })),
        }
    }

    /// Creates a network without a bind address: polling yields nothing.
    #[must_use]
    pub fn unbound() -> Self {
        let network = Self::new();
        network.state.lock().bound = false;
        network
    }

    /// Returns a supplier backed by this network.
    #[must_use]
    pub fn supplier(&self) -> FakeChannelSupplier {
        FakeChannelSupplier {
            network: self.clone(),
        }
    }

    /// Simulates a client connecting to the gateway's listener.
    pub fn connect_client(&self) -> FakePeer {
        let mut state = self.state.lock();
        let port = state.next_port;
        state.next_port = state.next_port.wrapping_add(1);
        let peer = FakePeer::new(SocketAddr::from(([127, 0, 0, 1], port)), ConnectState::Connected);
        state.pending_accepts.push_back(peer.clone());
        peer
    }

    /// Scripts the outcome of the next connects to `address`.
    ///
    /// Addresses without a script connect immediately.
    pub fn script_connect(&self, address: SocketAddr, outcome: ConnectOutcome) {
        self.state.lock().outcomes.insert(address, outcome);
    }

    /// Peers of every outbound connection opened so far, in order.
    #[must_use]
    pub fn outbound_peers(&self) -> Vec<FakePeer> {
        self.state.lock().outbound.clone()
    }

    /// Whether the supplier has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Default for FakeNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Supplier half of a [`FakeNetwork`].
#[derive(Debug)]
pub struct FakeChannelSupplier {
    network: FakeNetwork,
}

impl ChannelSupplier for FakeChannelSupplier {
    fn poll_new_connections(&mut self) -> io::Result<Vec<BoxedChannel>> {
        let mut state = self.network.state.lock();
        if !state.bound || state.closed {
            return Ok(Vec::new());
        }
        Ok(state
            .pending_accepts
            .drain(..)
            .map(|peer| Box::new(FakeChannel { peer }) as BoxedChannel)
            .collect())
    }

    fn open_outbound(&mut self, address: SocketAddr) -> io::Result<BoxedChannel> {
        let mut state = self.network.state.lock();
        let connect = match state.outcomes.get(&address).copied() {
            Some(ConnectOutcome::Refuse) => return Err(io::ErrorKind::ConnectionRefused.into()),
            Some(ConnectOutcome::Hold) => ConnectState::Pending,
            Some(ConnectOutcome::Connect) | None => ConnectState::Connected,
        };
        let peer = FakePeer::new(address, connect);
        state.outbound.push(peer.clone());
        Ok(Box::new(FakeChannel { peer }))
    }

    fn close(&mut self) {
        self.network.state.lock().closed = true;
    }
}
