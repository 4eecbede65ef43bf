use crate::network::ConnectionHandle;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_BUCKET: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("Unknown bucket: {0}")]
    UnknownBucket(String),

    #[error("Configuration provider has been shut down")]
    Shutdown,
}

/// Something that wants to hear about a bucket's new server list.
pub trait Reconfigurable: Send + Sync {
    fn reconfigure(&self, bucket: &str, servers: &[SocketAddr]);
}

/// Source of bucket configurations.
pub trait ConfigurationProvider: Send + Sync {
    /// Current servers for `bucket`.
    fn server_list(&self, bucket: &str) -> Result<Vec<SocketAddr>, TopologyError>;

    /// Register `subscriber` for updates to `bucket`.
    fn subscribe(
        &self,
        bucket: &str,
        subscriber: Arc<dyn Reconfigurable>,
    ) -> Result<(), TopologyError>;

    fn unsubscribe(&self, bucket: &str, subscriber: &Arc<dyn Reconfigurable>);

    /// Drop every subscriber and refuse further requests.
    fn shutdown(&self);
}

#[derive(Default)]
struct ProviderState {
    buckets: HashMap<String, Vec<SocketAddr>>,
    subscribers: HashMap<String, Vec<Arc<dyn Reconfigurable>>>,
    shut_down: bool,
}

/// In-memory provider whose buckets change only through [`update`](Self::update).
#[derive(Default)]
pub struct StaticConfigurationProvider {
    state: Mutex<ProviderState>,
}

impl StaticConfigurationProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider serving `servers` as the default bucket.
    pub fn with_servers(servers: Vec<SocketAddr>) -> Self {
        let provider = Self::new();
        provider.lock().buckets.insert(DEFAULT_BUCKET.to_string(), servers);
        provider
    }

    /// Replace a bucket's servers and notify its subscribers.
    pub fn update(&self, bucket: &str, servers: Vec<SocketAddr>) -> Result<(), TopologyError> {
        let subscribers = {
            let mut state = self.lock();
            if state.shut_down {
                return Err(TopologyError::Shutdown);
            }
            state.buckets.insert(bucket.to_string(), servers.clone());
            state.subscribers.get(bucket).cloned().unwrap_or_default()
        };

        info!(bucket, servers = servers.len(), subscribers = subscribers.len(), "Bucket updated");
        for subscriber in subscribers {
            subscriber.reconfigure(bucket, &servers);
        }
        Ok(())
    }

    pub fn subscriber_count(&self, bucket: &str) -> usize {
        self.lock().subscribers.get(bucket).map_or(0, Vec::len)
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConfigurationProvider for StaticConfigurationProvider {
    fn server_list(&self, bucket: &str) -> Result<Vec<SocketAddr>, TopologyError> {
        let state = self.lock();
        if state.shut_down {
            return Err(TopologyError::Shutdown);
        }
        state
            .buckets
            .get(bucket)
            .cloned()
            .ok_or_else(|| TopologyError::UnknownBucket(bucket.to_string()))
    }

    fn subscribe(
        &self,
        bucket: &str,
        subscriber: Arc<dyn Reconfigurable>,
    ) -> Result<(), TopologyError> {
        let mut state = self.lock();
        if state.shut_down {
            return Err(TopologyError::Shutdown);
        }
        if !state.buckets.contains_key(bucket) {
            return Err(TopologyError::UnknownBucket(bucket.to_string()));
        }
        state
            .subscribers
            .entry(bucket.to_string())
            .or_default()
            .push(subscriber);
        debug!(bucket, "Subscribed to bucket");
        Ok(())
    }

    fn unsubscribe(&self, bucket: &str, subscriber: &Arc<dyn Reconfigurable>) {
        if let Some(subscribers) = self.lock().subscribers.get_mut(bucket) {
            subscribers.retain(|existing| !Arc::ptr_eq(existing, subscriber));
        }
    }

    fn shutdown(&self) {
        let mut state = self.lock();
        state.shut_down = true;
        state.subscribers.clear();
        info!("Configuration provider shut down");
    }
}

impl std::fmt::Debug for StaticConfigurationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("StaticConfigurationProvider")
            .field("buckets", &state.buckets)
            .field("shut_down", &state.shut_down)
            .finish()
    }
}

// A running manager keeps its node set; a change is only reported.
impl Reconfigurable for ConnectionHandle {
    fn reconfigure(&self, bucket: &str, servers: &[SocketAddr]) {
        let current: Vec<SocketAddr> = (0..self.node_count())
            .filter_map(|which| self.address_of(which).ok())
            .collect();
        if current == servers {
            debug!(bucket, "Server list unchanged");
        } else {
            warn!(
                bucket,
                current = ?current,
                proposed = ?servers,
                "Server list changed; restart the client to apply it"
            );
        }
    }
}
