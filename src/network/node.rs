//! Per-node connection record.
//!
//! The record is split by ownership. [`NodeRecord`] is shared with producer
//! threads and keeps its queue behind a mutex that can only be reached through
//! a [`NodeGuard`]. [`NodeSocket`] belongs to the event loop thread alone.

use crate::network::errors::ConnectionError;
use crate::ops::{Operation, OperationState};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 8192;
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// One cluster node: identity plus its lock-protected operation queue.
#[derive(Debug)]
pub struct NodeRecord {
    which: usize,
    address: SocketAddr,
    queue: Mutex<NodeQueue>,
}

#[derive(Debug)]
struct NodeQueue {
    ops: VecDeque<Box<dyn Operation>>,
    capacity: usize,
    // The head is out of `ops` while the event loop performs I/O on it.
    checked_out: bool,
    reconnect_attempt: u32,
    write_requested: bool,
}

impl NodeRecord {
    pub fn new(which: usize, address: SocketAddr, capacity: usize) -> Self {
        Self {
            which,
            address,
            queue: Mutex::new(NodeQueue {
                ops: VecDeque::new(),
                capacity,
                checked_out: false,
                reconnect_attempt: 0,
                write_requested: false,
            }),
        }
    }

    pub fn which(&self) -> usize {
        self.which
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn lock(&self) -> NodeGuard<'_> {
        NodeGuard {
            which: self.which,
            address: self.address,
            queue: self.queue.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

/// Proof that the node lock is held; every queue mutation goes through here.
pub struct NodeGuard<'a> {
    which: usize,
    address: SocketAddr,
    queue: MutexGuard<'a, NodeQueue>,
}

impl NodeGuard<'_> {
    pub fn which(&self) -> usize {
        self.which
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Operations queued, counting a checked-out head.
    pub fn len(&self) -> usize {
        self.queue.ops.len() + usize::from(self.queue.checked_out)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity
    }

    /// Append an operation, refusing it when the queue is at capacity.
    pub fn push(&mut self, op: Box<dyn Operation>) -> Result<(), ConnectionError> {
        if self.len() >= self.queue.capacity {
            return Err(ConnectionError::QueueFull {
                which: self.which,
                capacity: self.queue.capacity,
            });
        }
        self.queue.ops.push_back(op);
        self.queue.write_requested = true;
        Ok(())
    }

    /// Drop cancelled operations at the head and report whether work remains.
    ///
    /// Only heads that have not sent a byte are dropped. Once a request is on
    /// the wire its response must still be consumed to keep the stream in step.
    pub fn has_pending_operations(&mut self) -> bool {
        if self.queue.checked_out {
            return true;
        }
        while let Some(op) = self.queue.ops.front() {
            if !op.is_cancelled() || !is_unsent(op.as_ref()) {
                return true;
            }
            info!(node = self.which, operation = ?op, "Removing cancelled operation");
            self.queue.ops.pop_front();
        }
        false
    }

    /// State of the head operation after draining cancelled ones.
    pub fn current_state(&mut self) -> Option<OperationState> {
        if !self.has_pending_operations() {
            return None;
        }
        self.queue.ops.front().map(|op| op.state())
    }

    /// Take the head operation out so I/O can happen without the lock held.
    ///
    /// It must come back through [`restore_current`](Self::restore_current) or
    /// be retired with [`finish_current`](Self::finish_current).
    pub fn checkout_current(&mut self) -> Option<Box<dyn Operation>> {
        if self.queue.checked_out || !self.has_pending_operations() {
            return None;
        }
        let op = self.queue.ops.pop_front()?;
        self.queue.checked_out = true;
        Some(op)
    }

    pub fn restore_current(&mut self, op: Box<dyn Operation>) {
        self.queue.ops.push_front(op);
        self.queue.checked_out = false;
    }

    pub fn finish_current(&mut self) {
        self.queue.checked_out = false;
    }

    /// Consume a producer's request for write interest.
    ///
    /// Only a head that still has bytes to send may switch the socket to write
    /// interest; a head in the middle of reading keeps its read interest.
    pub fn take_write_request(&mut self) -> bool {
        if !std::mem::take(&mut self.queue.write_requested) {
            return false;
        }
        self.current_state() == Some(OperationState::Writing)
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.queue.reconnect_attempt
    }

    pub fn mark_connected(&mut self) {
        self.queue.reconnect_attempt = 0;
    }

    /// Count one more failed connection and return the new attempt number.
    pub fn mark_failed(&mut self) -> u32 {
        self.queue.reconnect_attempt = self.queue.reconnect_attempt.saturating_add(1);
        self.queue.reconnect_attempt
    }

    /// Prepare the head operation for a fresh connection.
    ///
    /// A head still writing is rewound so the peer receives the whole request
    /// again. A head that was already reading cannot be replayed safely; it is
    /// removed and returned so the caller can report an unknown outcome once
    /// the lock is released.
    pub fn setup_resend(&mut self) -> Option<Box<dyn Operation>> {
        if !self.has_pending_operations() {
            return None;
        }
        let head = self.queue.ops.front_mut()?;
        match head.state() {
            OperationState::Writing => {
                warn!(node = self.which, operation = ?head, "Resetting write state of operation");
                head.buffer().reset();
                None
            }
            OperationState::Reading | OperationState::Complete => {
                warn!(node = self.which, operation = ?head, "Discarding partially completed operation");
                self.queue.ops.pop_front()
            }
        }
    }

    /// Remove every queued operation.
    pub fn drain(&mut self) -> Vec<Box<dyn Operation>> {
        self.queue.checked_out = false;
        self.queue.write_requested = false;
        self.queue.ops.drain(..).collect()
    }
}

fn is_unsent(op: &dyn Operation) -> bool {
    op.state() == OperationState::Writing && op.core().buffer().position() == 0
}

/// Socket side of a node, touched only by the event loop thread.
#[derive(Debug)]
pub struct NodeSocket {
    stream: Option<TcpStream>,
    token: Option<Token>,
    interest: Option<Interest>,
    connecting: bool,
    read_buf: Box<[u8]>,
}

impl NodeSocket {
    pub fn new(read_buffer_size: usize) -> Self {
        Self {
            stream: None,
            token: None,
            interest: None,
            connecting: false,
            read_buf: vec![0u8; read_buffer_size.max(1)].into_boxed_slice(),
        }
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting
    }

    pub fn is_established(&self) -> bool {
        self.stream.is_some() && !self.connecting
    }

    pub fn token(&self) -> Option<Token> {
        self.token
    }

    pub fn interest(&self) -> Option<Interest> {
        self.interest
    }

    pub fn stream(&self) -> Option<&TcpStream> {
        self.stream.as_ref()
    }

    pub fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        self.stream.as_mut()
    }

    /// Register a freshly opened stream that is still completing its handshake.
    pub fn install(
        &mut self,
        registry: &Registry,
        mut stream: TcpStream,
        token: Token,
    ) -> io::Result<()> {
        registry.register(&mut stream, token, Interest::WRITABLE)?;
        self.stream = Some(stream);
        self.token = Some(token);
        self.interest = Some(Interest::WRITABLE);
        self.connecting = true;
        Ok(())
    }

    pub fn mark_established(&mut self) {
        self.connecting = false;
    }

    /// Re-arm the registration with `interest`.
    ///
    /// Re-registering also re-reports readiness that is already present, which
    /// the edge-triggered poller would otherwise not announce again.
    pub fn set_interest(&mut self, registry: &Registry, interest: Interest) -> io::Result<()> {
        if let (Some(stream), Some(token)) = (self.stream.as_mut(), self.token) {
            registry.reregister(stream, token, interest)?;
            self.interest = Some(interest);
        }
        Ok(())
    }

    /// Deregister and close the stream, returning the token it used.
    pub fn close(&mut self, registry: &Registry) -> Option<Token> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = registry.deregister(&mut stream) {
                tracing::debug!(error = %e, "Failed to deregister socket");
            }
        }
        self.interest = None;
        self.connecting = false;
        self.token.take()
    }

    /// Read into the node's fixed buffer, reusing it between reads.
    pub fn fill(&mut self) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(stream) => stream.read(&mut self.read_buf),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    pub fn filled(&self, n: usize) -> &[u8] {
        &self.read_buf[..n.min(self.read_buf.len())]
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buf.len()
    }
}
