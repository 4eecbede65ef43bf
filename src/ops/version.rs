use crate::ops::{
    LineReader, Operation, OperationCallback, OperationCore, OperationError, OperationState,
};
use std::fmt;
use tracing::debug;

const REQUEST: &[u8] = b"version\r\n";
const RESPONSE_PREFIX: &str = "VERSION ";

/// Asks a server for its version string.
pub struct VersionOperation {
    core: OperationCore,
    lines: LineReader,
    callback: Option<OperationCallback<String>>,
}

impl VersionOperation {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Result<String, OperationError>) + Send + 'static,
    {
        Self {
            core: OperationCore::new(),
            lines: LineReader::default(),
            callback: Some(Box::new(callback)),
        }
    }

    fn handle_line(&mut self, line: &str) -> Result<(), OperationError> {
        let result = match line.strip_prefix(RESPONSE_PREFIX) {
            Some(version) => Ok(version.to_string()),
            None => Err(OperationError::UnexpectedResponse {
                expected: "VERSION <version>",
                line: line.to_string(),
            }),
        };
        self.deliver(result);
        self.core.transition(OperationState::Complete)
    }

    fn deliver(&mut self, result: Result<String, OperationError>) {
        let Some(callback) = self.callback.take() else {
            return;
        };
        if self.core.is_cancelled() {
            debug!("Dropping result of cancelled version operation");
            return;
        }
        callback(result);
    }
}

impl Operation for VersionOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn initialize(&mut self) {
        self.core.set_buffer(REQUEST);
    }

    fn read_from(&mut self, data: &[u8]) -> Result<usize, OperationError> {
        let mut consumed = 0;
        while consumed < data.len() && self.core.state() == OperationState::Reading {
            let (used, line) = self.lines.feed(&data[consumed..])?;
            consumed += used;
            if let Some(line) = line {
                self.handle_line(&line)?;
            }
        }
        Ok(consumed)
    }

    fn fail(&mut self, error: OperationError) {
        self.deliver(Err(error));
    }
}

impl fmt::Debug for VersionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionOperation")
            .field("state", &self.core.state())
            .field("written", &self.core.buffer().position())
            .field("cancelled", &self.core.is_cancelled())
            .finish()
    }
}
