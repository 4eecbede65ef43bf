//! Protocol operations and the state machine the connection manager drives.
//!
//! Every request moves strictly forward through `Writing -> Reading -> Complete`.
//! The connection manager writes the bytes exposed by [`Operation::buffer`],
//! calls [`Operation::write_complete`] once they are all sent, and then feeds
//! response bytes to [`Operation::read_from`] until the operation reports
//! `Complete`.

pub mod buffer;
pub mod error;
pub mod version;

pub use buffer::{LineReader, WriteBuffer, MAX_LINE_LENGTH};
pub use error::OperationError;
pub use version::VersionOperation;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result callback handed to an operation; `FnOnce` keeps delivery to at most once.
pub type OperationCallback<T> = Box<dyn FnOnce(Result<T, OperationError>) + Send>;

/// Lifecycle of a single request/response exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationState {
    #[default]
    Writing,
    Reading,
    Complete,
}

/// Shared flag used to cancel an operation from any thread.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// State, outbound buffer and cancel flag common to all operations.
#[derive(Debug, Default)]
pub struct OperationCore {
    state: OperationState,
    buffer: WriteBuffer,
    cancel: CancelHandle,
}

impl OperationCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    /// Move to `next`, refusing anything that is not strictly forward.
    pub fn transition(&mut self, next: OperationState) -> Result<(), OperationError> {
        let current = self.state();
        if next <= current {
            return Err(OperationError::InvalidTransition {
                from: current,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Install the request bytes and (re)start in `Writing`.
    pub fn set_buffer(&mut self, data: impl Into<Vec<u8>>) {
        self.buffer = WriteBuffer::new(data);
        self.state = OperationState::Writing;
    }

    pub fn buffer(&self) -> &WriteBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut WriteBuffer {
        &mut self.buffer
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Contract every protocol request implements.
///
/// Implementations embed an [`OperationCore`] and only need to provide
/// `initialize`, `read_from` and `fail`; the remaining methods have defaults
/// built on the core.
pub trait Operation: Send + fmt::Debug {
    fn core(&self) -> &OperationCore;

    fn core_mut(&mut self) -> &mut OperationCore;

    /// Prepare the outbound buffer. Called once, at enqueue time.
    fn initialize(&mut self);

    /// Consume freshly read response bytes and return how many were used.
    ///
    /// The operation completes itself (and invokes its callback) once it has
    /// seen a full response.
    fn read_from(&mut self, data: &[u8]) -> Result<usize, OperationError>;

    /// Deliver a failure to the callback without further network activity.
    fn fail(&mut self, error: OperationError);

    fn state(&self) -> OperationState {
        self.core().state()
    }

    /// Remaining unsent request bytes
    fn buffer(&mut self) -> &mut WriteBuffer {
        self.core_mut().buffer_mut()
    }

    /// The outbound buffer has been fully written.
    fn write_complete(&mut self) -> Result<(), OperationError> {
        self.core_mut().transition(OperationState::Reading)
    }

    fn is_cancelled(&self) -> bool {
        self.core().is_cancelled()
    }

    fn cancel_handle(&self) -> CancelHandle {
        self.core().cancel_handle()
    }
}
