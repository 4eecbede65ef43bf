//! Port helpers for tests
//!
//! Ports come from the OS rather than a counter so parallel test binaries
//! never collide.

use std::net::{SocketAddr, TcpListener};

/// An address on 127.0.0.1 with nothing listening on it.
///
/// The port is reserved by binding and released immediately, so a connect
/// to it is refused.
pub fn unreachable_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to reserve a port");
    listener.local_addr().expect("Listener has no address")
}

/// Several distinct unreachable addresses.
pub fn unreachable_addresses(count: usize) -> Vec<SocketAddr> {
    let listeners: Vec<TcpListener> = (0..count)
        .map(|_| TcpListener::bind("127.0.0.1:0").expect("Failed to reserve a port"))
        .collect();
    listeners
        .iter()
        .map(|listener| listener.local_addr().expect("Listener has no address"))
        .collect()
}
