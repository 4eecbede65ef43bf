use crate::ops::OperationError;
use crate::topology::TopologyError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the connection manager and its producer handle.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to set up the I/O multiplexer: {0}")]
    Multiplexer(#[source] std::io::Error),

    #[error("Node index {which} is out of range ({count} nodes)")]
    InvalidNode { which: usize, count: usize },

    #[error("Operation queue for node {which} is full ({capacity} operations)")]
    QueueFull { which: usize, capacity: usize },

    #[error("Connection manager has been shut down")]
    Shutdown,

    #[error("Event loop woke {count} times in a row without any socket becoming ready")]
    ExcessiveEmptyWakeups { count: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the async [`Client`](crate::network::Client).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("Operation on node {which} timed out after {timeout:?}")]
    Timeout { which: usize, timeout: Duration },

    #[error("Operation on node {which} was dropped before it completed")]
    Cancelled { which: usize },
}

/// Why a node's socket is being torn down and reconnected.
#[derive(Debug, Error)]
pub(crate) enum Disconnect {
    #[error("connect failed: {0}")]
    ConnectFailed(std::io::Error),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("received {bytes} unsolicited bytes")]
    UnexpectedData { bytes: usize },

    #[error("protocol error: {0}")]
    Protocol(#[from] OperationError),

    #[error("invariant violated: {0}")]
    Invariant(&'static str),

    #[error("no readiness after excessive empty wakeups")]
    Forced,
}
