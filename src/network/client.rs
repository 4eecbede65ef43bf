use crate::config::ConnectionConfig;
use crate::network::{ClientError, ConnectionError, ConnectionHandle, ConnectionManager};
use crate::ops::{CancelHandle, Operation, OperationError, VersionOperation};
use crate::topology::ConfigurationProvider;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

const DRIVER_THREAD_NAME: &str = "memconn-io";

type Reply<T> = oneshot::Receiver<Result<T, OperationError>>;

/// Async client that drives a [`ConnectionManager`] on its own thread.
///
/// Operations are handed to the event loop through a [`ConnectionHandle`] and
/// their callbacks complete a oneshot channel the caller awaits.
pub struct Client {
    handle: ConnectionHandle,
    running: Arc<AtomicBool>,
    driver: Option<JoinHandle<Result<(), ConnectionError>>>,
    operation_timeout: Duration,
}

impl Client {
    /// Connect to `addresses` and start the I/O thread.
    #[instrument(skip(config))]
    pub fn start(
        addresses: &[SocketAddr],
        config: &ConnectionConfig,
    ) -> Result<Self, ConnectionError> {
        let mut manager = ConnectionManager::new(addresses, config)?;
        let handle = manager.handle();
        let running = Arc::new(AtomicBool::new(true));
        let keep_running = Arc::clone(&running);

        let driver = thread::Builder::new()
            .name(DRIVER_THREAD_NAME.to_string())
            .spawn(move || {
                let mut outcome = Ok(());
                while keep_running.load(Ordering::Acquire) {
                    if let Err(e) = manager.run_iteration() {
                        error!(error = %e, "Event loop stopped");
                        outcome = Err(e);
                        break;
                    }
                }
                manager.shutdown();
                outcome
            })?;

        info!(nodes = addresses.len(), "Client started");
        Ok(Self {
            handle,
            running,
            driver: Some(driver),
            operation_timeout: config.operation_timeout(),
        })
    }

    /// Start a client for the servers listed in `config`.
    pub fn from_config(config: &ConnectionConfig) -> anyhow::Result<Self> {
        let addresses = config.resolve_servers()?;
        Ok(Self::start(&addresses, config)?)
    }

    /// Start a client for the servers a provider currently lists for `bucket`.
    ///
    /// Later changes to the bucket are not applied to the running client.
    pub fn from_provider(
        provider: &dyn ConfigurationProvider,
        bucket: &str,
        config: &ConnectionConfig,
    ) -> Result<Self, ClientError> {
        let addresses = provider.server_list(bucket)?;
        debug!(bucket, servers = addresses.len(), "Resolved servers from provider");
        Ok(Self::start(&addresses, config)?)
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn node_count(&self) -> usize {
        self.handle.node_count()
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// Ask one node for its version string.
    pub async fn version(&self, which: usize) -> Result<String, ClientError> {
        let (reply, cancel) = self.submit_version(which)?;
        self.await_reply(which, reply, cancel, self.deadline()).await
    }

    /// Ask every node for its version; results are in node order.
    ///
    /// All requests share one deadline, so the call takes at most one
    /// operation timeout however many nodes stay silent.
    pub async fn versions(&self) -> Vec<Result<String, ClientError>> {
        let submitted: Vec<_> = (0..self.node_count())
            .map(|which| self.submit_version(which))
            .collect();
        let deadline = self.deadline();

        let mut results = Vec::with_capacity(submitted.len());
        for (which, submission) in submitted.into_iter().enumerate() {
            let result = match submission {
                Ok((reply, cancel)) => self.await_reply(which, reply, cancel, deadline).await,
                Err(e) => Err(e),
            };
            results.push(result);
        }
        results
    }

    /// Stop the I/O thread and report how it ended.
    pub fn shutdown(mut self) -> Result<(), ConnectionError> {
        self.stop()
    }

    fn submit_version(
        &self,
        which: usize,
    ) -> Result<(Reply<String>, CancelHandle), ClientError> {
        let (tx, rx) = oneshot::channel();
        let op = VersionOperation::new(move |result| {
            // The caller may have stopped waiting.
            let _ = tx.send(result);
        });
        let cancel = op.cancel_handle();
        self.handle.enqueue(which, Box::new(op))?;
        Ok((rx, cancel))
    }

    async fn await_reply<T>(
        &self,
        which: usize,
        reply: Reply<T>,
        cancel: CancelHandle,
        deadline: Instant,
    ) -> Result<T, ClientError> {
        match tokio::time::timeout_at(deadline, reply).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(_)) => Err(ClientError::Cancelled { which }),
            Err(_) => {
                cancel.cancel();
                self.handle.wake();
                warn!(node = which, timeout = ?self.operation_timeout, "Operation timed out");
                Err(ClientError::Timeout {
                    which,
                    timeout: self.operation_timeout,
                })
            }
        }
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.operation_timeout
    }

    fn stop(&mut self) -> Result<(), ConnectionError> {
        let Some(driver) = self.driver.take() else {
            return Ok(());
        };
        self.running.store(false, Ordering::Release);
        self.handle.wake();
        match driver.join() {
            Ok(outcome) => {
                info!("Client stopped");
                outcome
            }
            Err(_) => {
                error!("Event loop thread panicked");
                Err(ConnectionError::Shutdown)
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            debug!(error = %e, "Event loop ended with an error");
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("handle", &self.handle)
            .field("operation_timeout", &self.operation_timeout)
            .field("running", &self.driver.is_some())
            .finish()
    }
}
