//! Event loop multiplexing every node connection on one thread.
//!
//! [`ConnectionManager`] owns the poller, the node sockets and the reconnect
//! schedule and must be driven from a single thread by calling
//! [`run_iteration`](ConnectionManager::run_iteration) repeatedly. Producers
//! on other threads enqueue work through a cloned [`ConnectionHandle`].

use crate::config::ConnectionConfig;
use crate::network::errors::{ConnectionError, Disconnect};
use crate::network::node::{NodeRecord, NodeSocket};
use crate::network::reconnect::{Backoff, PendingReconnect, ReconnectSchedule};
use crate::ops::{Operation, OperationError, OperationState};
use mio::event::Event;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

const WAKE_TOKEN: Token = Token(usize::MAX);
const EVENTS_CAPACITY: usize = 256;

/// Empty wakeups tolerated past the re-scan threshold before the loop gives up.
pub const EMPTY_WAKEUP_MARGIN: u32 = 10;

/// What a socket reported, either from the poller or synthesized by a re-scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Readiness {
    readable: bool,
    writable: bool,
    closed: bool,
}

impl Readiness {
    fn from_event(event: &Event) -> Self {
        Self {
            readable: event.is_readable() || event.is_read_closed() || event.is_error(),
            writable: event.is_writable(),
            closed: event.is_read_closed() || event.is_write_closed() || event.is_error(),
        }
    }

    fn for_state(state: OperationState) -> Self {
        match state {
            OperationState::Reading => Self {
                readable: true,
                ..Self::default()
            },
            _ => Self {
                writable: true,
                ..Self::default()
            },
        }
    }
}

/// Producer-side handle for enqueueing operations from any thread.
#[derive(Clone)]
pub struct ConnectionHandle {
    nodes: Arc<[NodeRecord]>,
    waker: Arc<Waker>,
    closed: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// Add an operation to the given node's queue and wake the event loop.
    ///
    /// The operation is initialized before it is queued. Fails without
    /// touching the queue when the index is out of range, the queue is full,
    /// or the manager has been shut down.
    pub fn enqueue(&self, which: usize, mut op: Box<dyn Operation>) -> Result<(), ConnectionError> {
        if self.is_shut_down() {
            return Err(ConnectionError::Shutdown);
        }
        let node = self.node(which)?;
        op.initialize();
        debug!(node = which, operation = ?op, "Adding operation");
        {
            let mut queue = node.lock();
            // Shutdown sets the flag before draining under this lock.
            if self.is_shut_down() {
                return Err(ConnectionError::Shutdown);
            }
            queue.push(op)?;
        }
        self.wake();
        Ok(())
    }

    /// Shorten the event loop's current wait.
    pub fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake event loop");
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn address_of(&self, which: usize) -> Result<SocketAddr, ConnectionError> {
        self.node(which).map(NodeRecord::address)
    }

    pub fn queue_len(&self, which: usize) -> Result<usize, ConnectionError> {
        Ok(self.node(which)?.lock().len())
    }

    pub fn reconnect_attempts(&self, which: usize) -> Result<u32, ConnectionError> {
        Ok(self.node(which)?.lock().reconnect_attempt())
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_shut_down(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn node(&self, which: usize) -> Result<&NodeRecord, ConnectionError> {
        self.nodes.get(which).ok_or(ConnectionError::InvalidNode {
            which,
            count: self.nodes.len(),
        })
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addresses: Vec<SocketAddr> = self.nodes.iter().map(NodeRecord::address).collect();
        f.debug_struct("ConnectionHandle")
            .field("nodes", &addresses)
            .field("closed", &self.is_shut_down())
            .finish()
    }
}

/// Connection to a cluster of cache nodes.
pub struct ConnectionManager {
    poll: Poll,
    events: Events,
    handle: ConnectionHandle,
    sockets: Vec<NodeSocket>,
    registrations: HashMap<Token, usize>,
    next_token: usize,
    reconnects: ReconnectSchedule,
    backoff: Backoff,
    max_poll_wait: Option<Duration>,
    excessive_empty_wakeups: u32,
    empty_wakeups: u32,
}

impl ConnectionManager {
    /// Create one record per address and start a non-blocking connect to each.
    ///
    /// Only failure to set up the poller is an error; unreachable nodes are
    /// handed to the reconnect schedule.
    #[instrument(skip(config))]
    pub fn new(addresses: &[SocketAddr], config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        let poll = Poll::new().map_err(ConnectionError::Multiplexer)?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN).map_err(ConnectionError::Multiplexer)?;

        let capacity = config.queue_capacity.max(1);
        let nodes: Arc<[NodeRecord]> = addresses
            .iter()
            .enumerate()
            .map(|(which, &address)| NodeRecord::new(which, address, capacity))
            .collect();
        let sockets = addresses
            .iter()
            .map(|_| NodeSocket::new(config.read_buffer_size))
            .collect();

        let mut manager = Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            handle: ConnectionHandle {
                nodes,
                waker: Arc::new(waker),
                closed: Arc::new(AtomicBool::new(false)),
            },
            sockets,
            registrations: HashMap::new(),
            next_token: 0,
            reconnects: ReconnectSchedule::new(),
            backoff: config.backoff(),
            max_poll_wait: config.max_poll_wait(),
            excessive_empty_wakeups: config.excessive_empty_wakeups,
            empty_wakeups: 0,
        };

        for which in 0..manager.sockets.len() {
            manager.open_connection(which);
        }
        info!(nodes = addresses.len(), "Connection manager started");
        Ok(manager)
    }

    pub fn with_defaults(addresses: &[SocketAddr]) -> Result<Self, ConnectionError> {
        Self::new(addresses, &ConnectionConfig::default())
    }

    /// A cloneable handle for producer threads.
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    pub fn enqueue(&self, which: usize, op: Box<dyn Operation>) -> Result<(), ConnectionError> {
        self.handle.enqueue(which, op)
    }

    pub fn node_count(&self) -> usize {
        self.handle.node_count()
    }

    pub fn address_of(&self, which: usize) -> Result<SocketAddr, ConnectionError> {
        self.handle.address_of(which)
    }

    pub fn queue_len(&self, which: usize) -> Result<usize, ConnectionError> {
        self.handle.queue_len(which)
    }

    pub fn reconnect_attempts(&self, which: usize) -> Result<u32, ConnectionError> {
        self.handle.reconnect_attempts(which)
    }

    /// When the node is next due to reconnect, if it is waiting for one.
    pub fn pending_reconnect(&self, which: usize) -> Option<PendingReconnect> {
        self.reconnects.pending(which)
    }

    /// Whether the node has a socket that finished its handshake.
    pub fn is_connected(&self, which: usize) -> bool {
        self.sockets
            .get(which)
            .is_some_and(NodeSocket::is_established)
    }

    pub fn empty_wakeups(&self) -> u32 {
        self.empty_wakeups
    }

    /// Perform one pass: wait for readiness, dispatch it, run due reconnects.
    #[instrument(level = "trace", skip(self))]
    pub fn run_iteration(&mut self) -> Result<(), ConnectionError> {
        self.apply_write_requests();

        let budget = self.poll_budget(Instant::now());
        trace!(?budget, "Polling");
        let started = Instant::now();
        let mut interrupted = false;
        if let Err(e) = self.poll.poll(&mut self.events, budget) {
            if e.kind() != ErrorKind::Interrupted {
                return Err(ConnectionError::Io(e));
            }
            interrupted = true;
        }

        let mut woken = false;
        let mut ready = Vec::new();
        for event in self.events.iter() {
            let token = event.token();
            if token == WAKE_TOKEN {
                woken = true;
                continue;
            }
            match self.registrations.get(&token) {
                Some(&which) => ready.push((which, token, Readiness::from_event(event))),
                None => trace!(?token, "Ignoring event for a stale registration"),
            }
        }

        if ready.is_empty() {
            let timed_out = budget.is_some_and(|budget| started.elapsed() >= budget);
            if !woken && !interrupted && !timed_out {
                self.note_empty_wakeup()?;
            }
        } else {
            debug!(ready = ready.len(), "Sockets ready");
            self.empty_wakeups = 0;
            for (which, token, readiness) in ready {
                // The socket may have been replaced earlier in this pass.
                if self.sockets[which].token() != Some(token) {
                    continue;
                }
                self.handle_io(which, readiness);
            }
        }

        if woken {
            self.apply_write_requests();
        }
        if !self.reconnects.is_empty() {
            self.attempt_reconnects();
        }
        Ok(())
    }

    /// Close every socket and the poller; queued operations are dropped.
    #[instrument(skip(self))]
    pub fn shutdown(mut self) {
        self.handle.mark_shut_down();
        for which in 0..self.sockets.len() {
            if let Some(token) = self.sockets[which].close(self.poll.registry()) {
                self.registrations.remove(&token);
                debug!(node = which, "Shut down socket");
            }
            let dropped = self.handle.nodes[which].lock().drain();
            if !dropped.is_empty() {
                warn!(node = which, dropped = dropped.len(), "Dropping queued operations");
            }
        }
        self.reconnects.clear();
        debug!("Shut down poller");
    }

    fn poll_budget(&self, now: Instant) -> Option<Duration> {
        match (self.reconnects.poll_budget(now), self.max_poll_wait) {
            (Some(reconnect), Some(ceiling)) => Some(reconnect.min(ceiling)),
            (reconnect, ceiling) => reconnect.or(ceiling),
        }
    }

    fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token = (self.next_token + 1) % WAKE_TOKEN.0;
        token
    }

    /// Start a non-blocking connect and register it for connect readiness.
    fn open_connection(&mut self, which: usize) {
        let address = self.handle.nodes[which].address();
        let stream = match TcpStream::connect(address) {
            Ok(stream) => stream,
            Err(e) => {
                self.queue_reconnect(which, Disconnect::ConnectFailed(e));
                return;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(node = which, error = %e, "Failed to set TCP_NODELAY");
        }

        let token = self.allocate_token();
        match self.sockets[which].install(self.poll.registry(), stream, token) {
            Ok(()) => {
                self.registrations.insert(token, which);
                debug!(node = which, %address, "Added to connect queue");
            }
            Err(e) => self.queue_reconnect(which, Disconnect::Io(e)),
        }
    }

    /// Switch nodes that received new work to write interest.
    fn apply_write_requests(&mut self) {
        for which in 0..self.sockets.len() {
            if !self.sockets[which].is_established() {
                continue;
            }
            if !self.handle.nodes[which].lock().take_write_request() {
                continue;
            }
            if let Err(e) = self.sockets[which].set_interest(self.poll.registry(), Interest::WRITABLE) {
                self.queue_reconnect(which, Disconnect::Io(e));
            }
        }
    }

    fn handle_io(&mut self, which: usize, readiness: Readiness) {
        trace!(node = which, ?readiness, "Handling readiness");
        if !self.sockets[which].has_stream() {
            return;
        }
        let result = if self.sockets[which].is_connecting() {
            self.finish_connect(which, readiness)
        } else {
            self.service_node(which, readiness)
        };
        if let Err(reason) = result {
            if let Disconnect::Invariant(what) = &reason {
                error!(node = which, invariant = what, "Aborting connection handling");
            }
            self.queue_reconnect(which, reason);
        }
    }

    fn finish_connect(&mut self, which: usize, readiness: Readiness) -> Result<(), Disconnect> {
        let socket = &mut self.sockets[which];
        let Some(stream) = socket.stream() else {
            return Ok(());
        };
        if let Some(e) = stream.take_error()? {
            return Err(Disconnect::ConnectFailed(e));
        }
        match stream.peer_addr() {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotConnected => {
                if readiness.closed {
                    return Err(Disconnect::ConnectFailed(e));
                }
                trace!(node = which, "Connection still in progress");
                return Ok(());
            }
            Err(e) => return Err(Disconnect::ConnectFailed(e)),
        }

        socket.mark_established();
        let node = &self.handle.nodes[which];
        let interest = {
            let mut node = node.lock();
            node.mark_connected();
            if node.has_pending_operations() {
                Interest::WRITABLE
            } else {
                Interest::READABLE
            }
        };
        info!(node = which, address = %node.address(), "Connection established");
        socket.set_interest(self.poll.registry(), interest)?;
        Ok(())
    }

    /// Service the head operation, or the idle socket when there is none.
    fn service_node(&mut self, which: usize, readiness: Readiness) -> Result<(), Disconnect> {
        let current = self.handle.nodes[which].lock().checkout_current();
        let Some(mut op) = current else {
            return self.handle_idle(which, readiness);
        };
        trace!(node = which, operation = ?op, "Current operation");

        let io = handle_operation(&mut self.sockets[which], &mut *op, readiness);

        let state = op.state();
        let interest = {
            let mut node = self.handle.nodes[which].lock();
            if state == OperationState::Complete {
                node.finish_current();
                if node.has_pending_operations() {
                    Interest::WRITABLE
                } else {
                    Interest::READABLE
                }
            } else {
                node.restore_current(op);
                if state == OperationState::Reading {
                    Interest::READABLE
                } else {
                    Interest::WRITABLE
                }
            }
        };
        io?;
        self.sockets[which].set_interest(self.poll.registry(), interest)?;
        Ok(())
    }

    /// A readable socket with nothing queued can only mean the peer went away.
    fn handle_idle(&mut self, which: usize, readiness: Readiness) -> Result<(), Disconnect> {
        if readiness.readable {
            expect_end_of_stream(&mut self.sockets[which])?;
            trace!(node = which, "Spurious readable event on idle socket");
        } else {
            debug!(node = which, "Socket ready with no pending operations");
        }
        self.sockets[which].set_interest(self.poll.registry(), Interest::READABLE)?;
        Ok(())
    }

    /// Tear the socket down, schedule the next attempt and fix up the head.
    fn queue_reconnect(&mut self, which: usize, reason: Disconnect) {
        if self.reconnects.contains(which) {
            debug!(node = which, %reason, "Reconnect already scheduled");
            return;
        }
        if let Some(token) = self.sockets[which].close(self.poll.registry()) {
            self.registrations.remove(&token);
        }

        let address = self.handle.nodes[which].address();
        let (attempt, discarded) = {
            let mut node = self.handle.nodes[which].lock();
            let attempt = node.mark_failed();
            (attempt, node.setup_resend())
        };
        let delay = self.backoff.delay_for(attempt);
        self.reconnects.schedule(which, Instant::now(), delay);
        warn!(
            node = which,
            %address,
            attempt,
            delay_ms = delay.as_millis() as u64,
            %reason,
            "Closing, and reopening connection"
        );

        if let Some(mut op) = discarded {
            op.fail(OperationError::OutcomeUnknown { address });
        }
    }

    fn attempt_reconnects(&mut self) {
        for which in self.reconnects.pop_due(Instant::now()) {
            info!(node = which, address = %self.handle.nodes[which].address(), "Reconnecting");
            self.open_connection(which);
        }
    }

    fn note_empty_wakeup(&mut self) -> Result<(), ConnectionError> {
        self.empty_wakeups += 1;
        debug!(empty_wakeups = self.empty_wakeups, "No sockets ready");
        if self.empty_wakeups <= self.excessive_empty_wakeups {
            return Ok(());
        }

        warn!(
            empty_wakeups = self.empty_wakeups,
            threshold = self.excessive_empty_wakeups,
            "Excessive empty wakeups, re-scanning every socket"
        );
        self.rescan();

        if self.empty_wakeups > self.excessive_empty_wakeups.saturating_add(EMPTY_WAKEUP_MARGIN) {
            error!(empty_wakeups = self.empty_wakeups, "Event loop is spinning without progress");
            return Err(ConnectionError::ExcessiveEmptyWakeups {
                count: self.empty_wakeups,
            });
        }
        Ok(())
    }

    /// Check every registered socket directly instead of trusting the poller.
    ///
    /// Sockets with queued work are serviced in the head operation's
    /// direction. Sockets that show no readiness and have nothing to do are
    /// forced to reconnect.
    fn rescan(&mut self) {
        for which in 0..self.sockets.len() {
            if !self.sockets[which].has_stream() {
                continue;
            }

            if self.sockets[which].is_connecting() {
                match self.finish_connect(which, Readiness::default()) {
                    Err(reason) => self.queue_reconnect(which, reason),
                    Ok(()) if self.sockets[which].is_connecting() => {
                        self.queue_reconnect(which, Disconnect::Forced)
                    }
                    Ok(()) => {}
                }
                continue;
            }

            let state = self.handle.nodes[which].lock().current_state();
            match state {
                Some(state) => {
                    info!(node = which, ?state, "Servicing socket with pending work");
                    self.handle_io(which, Readiness::for_state(state));
                }
                None => {
                    let reason = probe_idle(&self.sockets[which]);
                    self.queue_reconnect(which, reason);
                }
            }
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("handle", &self.handle)
            .field("pending_reconnects", &self.reconnects.len())
            .field("empty_wakeups", &self.empty_wakeups)
            .finish()
    }
}

fn handle_operation(
    socket: &mut NodeSocket,
    op: &mut dyn Operation,
    readiness: Readiness,
) -> Result<(), Disconnect> {
    match op.state() {
        OperationState::Reading => {
            if readiness.writable {
                return Err(Disconnect::Invariant("socket came up writable while reading"));
            }
            if !readiness.readable {
                return Err(Disconnect::Invariant("socket came up not readable while reading"));
            }
            read_response(socket, op)
        }
        OperationState::Writing => {
            if readiness.readable {
                expect_end_of_stream(socket)?;
            }
            if readiness.writable {
                write_request(socket, op)
            } else if readiness.readable {
                Ok(())
            } else {
                Err(Disconnect::Invariant("socket came up neither readable nor writable"))
            }
        }
        OperationState::Complete => Err(Disconnect::Invariant("current operation is already complete")),
    }
}

fn write_request(socket: &mut NodeSocket, op: &mut dyn Operation) -> Result<(), Disconnect> {
    let Some(stream) = socket.stream_mut() else {
        return Err(Disconnect::Invariant("writing without a socket"));
    };
    while !op.buffer().is_drained() {
        match stream.write(op.buffer().remaining()) {
            Ok(0) => return Err(Disconnect::Io(io::Error::from(ErrorKind::WriteZero))),
            Ok(n) => {
                op.buffer().advance(n);
                trace!(bytes = n, "Wrote request bytes");
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Disconnect::Io(e)),
        }
    }
    op.write_complete()?;
    Ok(())
}

fn read_response(socket: &mut NodeSocket, op: &mut dyn Operation) -> Result<(), Disconnect> {
    loop {
        let n = match socket.fill() {
            Ok(0) => return Err(Disconnect::PeerClosed),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Disconnect::Io(e)),
        };
        trace!(bytes = n, "Read response bytes");
        let consumed = op.read_from(socket.filled(n))?;
        if op.state() == OperationState::Complete {
            if consumed < n {
                return Err(Disconnect::UnexpectedData {
                    bytes: n - consumed,
                });
            }
            return Ok(());
        }
        if consumed < n {
            return Err(Disconnect::Invariant("operation left response bytes unconsumed"));
        }
    }
}

/// Read one byte where only end-of-stream is acceptable.
fn expect_end_of_stream(socket: &mut NodeSocket) -> Result<(), Disconnect> {
    let Some(stream) = socket.stream_mut() else {
        return Ok(());
    };
    let mut byte = [0u8; 1];
    match stream.read(&mut byte) {
        Ok(0) => Err(Disconnect::PeerClosed),
        Ok(n) => Err(Disconnect::UnexpectedData { bytes: n }),
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(()),
        Err(e) => Err(Disconnect::Io(e)),
    }
}

fn probe_idle(socket: &NodeSocket) -> Disconnect {
    let Some(stream) = socket.stream() else {
        return Disconnect::Forced;
    };
    let mut byte = [0u8; 1];
    match stream.peek(&mut byte) {
        Ok(0) => Disconnect::PeerClosed,
        Ok(n) => Disconnect::UnexpectedData { bytes: n },
        Err(e) if e.kind() == ErrorKind::WouldBlock => Disconnect::Forced,
        Err(e) => Disconnect::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::OperationCore;
    use std::net::TcpListener;
    use std::sync::Mutex;
    use std::thread;

    /// Sends a fixed payload and then waits for a response that never comes.
    #[derive(Debug)]
    struct FixedPayload {
        core: OperationCore,
        payload: Vec<u8>,
    }

    impl Operation for FixedPayload {
        fn core(&self) -> &OperationCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut OperationCore {
            &mut self.core
        }

        fn initialize(&mut self) {
            self.core.set_buffer(self.payload.clone());
        }

        fn read_from(&mut self, data: &[u8]) -> Result<usize, OperationError> {
            Ok(data.len())
        }

        fn fail(&mut self, _error: OperationError) {}
    }

    /// Accepts connections and records what arrives on each of them.
    fn recording_server() -> (SocketAddr, Arc<Mutex<Vec<Vec<u8>>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { return };
                let index = {
                    let mut received = sink.lock().unwrap();
                    received.push(Vec::new());
                    received.len() - 1
                };
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    let mut buf = [0u8; 512];
                    while let Ok(n) = stream.read(&mut buf) {
                        if n == 0 {
                            break;
                        }
                        sink.lock().unwrap()[index].extend_from_slice(&buf[..n]);
                    }
                });
            }
        });
        (address, received)
    }

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            max_poll_wait_ms: 20,
            reconnect_base_delay_ms: 20,
            ..ConnectionConfig::default()
        }
    }

    fn run_until(manager: &mut ConnectionManager, mut done: impl FnMut(&ConnectionManager) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(manager) {
            assert!(Instant::now() < deadline, "condition not reached in time");
            manager.run_iteration().unwrap();
        }
    }

    #[test]
    fn test_mid_write_drop_resends_whole_buffer() {
        let (address, received) = recording_server();
        let mut manager = ConnectionManager::new(&[address], &test_config()).unwrap();
        run_until(&mut manager, |m| m.is_connected(0));

        let payload: Vec<u8> = (0..100u8).collect();
        manager
            .enqueue(
                0,
                Box::new(FixedPayload {
                    core: OperationCore::new(),
                    payload: payload.clone(),
                }),
            )
            .unwrap();

        // Pretend 40 bytes went out before the connection dropped.
        {
            let mut node = manager.handle.nodes[0].lock();
            let mut op = node.checkout_current().unwrap();
            op.buffer().advance(40);
            node.restore_current(op);
        }
        manager.queue_reconnect(0, Disconnect::PeerClosed);
        assert_eq!(manager.reconnect_attempts(0).unwrap(), 1);

        run_until(&mut manager, |_| {
            let received = received.lock().unwrap();
            received.len() >= 2 && received[1].len() >= payload.len()
        });

        let received = received.lock().unwrap();
        assert!(received[0].is_empty(), "nothing was written on the first socket");
        assert_eq!(received[1], payload, "the resend starts again at byte 0");
        assert_eq!(manager.reconnect_attempts(0).unwrap(), 0);
    }

    #[test]
    fn test_excessive_empty_wakeups_force_reconnect() {
        let (address, _received) = recording_server();
        let mut manager = ConnectionManager::new(&[address], &test_config()).unwrap();
        run_until(&mut manager, |m| m.is_connected(0));

        manager.empty_wakeups = manager.excessive_empty_wakeups;
        manager.note_empty_wakeup().unwrap();
        assert_eq!(manager.reconnect_attempts(0).unwrap(), 1);
        assert!(manager.pending_reconnect(0).is_some());
        assert!(!manager.is_connected(0));

        manager.empty_wakeups = manager.excessive_empty_wakeups + EMPTY_WAKEUP_MARGIN;
        let err = manager.note_empty_wakeup().unwrap_err();
        assert!(matches!(err, ConnectionError::ExcessiveEmptyWakeups { count } if count == 111));
    }

    #[test]
    fn test_stale_token_is_ignored() {
        let (address, _received) = recording_server();
        let mut manager = ConnectionManager::new(&[address], &test_config()).unwrap();
        let first = manager.sockets[0].token();
        manager.queue_reconnect(0, Disconnect::Forced);
        assert!(!manager.registrations.contains_key(&first.unwrap()));
        run_until(&mut manager, |m| m.is_connected(0));
        assert_ne!(manager.sockets[0].token(), first, "each reconnect registers a fresh token");
    }
}
