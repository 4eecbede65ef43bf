pub mod client;
pub mod connection;
pub mod errors;
pub mod node;
pub mod reconnect;

pub use client::Client;
pub use connection::{ConnectionHandle, ConnectionManager};
pub use errors::{ClientError, ConnectionError};
pub use node::{NodeGuard, NodeRecord, NodeSocket};
pub use reconnect::{Backoff, PendingReconnect, ReconnectSchedule};
