//! Common test utilities and helper modules
//!
//! Shared by the integration test files: a threaded fake cache server,
//! test operations, port helpers and a loop-driving helper.

#![allow(dead_code)]

pub mod fake_server;
pub mod port_utils;
pub mod test_ops;

use memconn::{ConnectionConfig, ConnectionManager};
use std::time::{Duration, Instant};

/// Configuration with short waits so tests iterate quickly.
pub fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        max_poll_wait_ms: 20,
        operation_timeout_ms: 2000,
        ..ConnectionConfig::default()
    }
}

/// Drive the event loop until `done` holds, failing the test after `limit`.
pub fn run_until(
    manager: &mut ConnectionManager,
    limit: Duration,
    mut done: impl FnMut(&ConnectionManager) -> bool,
) {
    let deadline = Instant::now() + limit;
    while !done(manager) {
        assert!(
            Instant::now() < deadline,
            "Condition not reached within {:?}",
            limit
        );
        manager.run_iteration().expect("event loop iteration failed");
    }
}

/// Drive the event loop for a fixed amount of time.
pub fn run_for(manager: &mut ConnectionManager, duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        manager.run_iteration().expect("event loop iteration failed");
    }
}
