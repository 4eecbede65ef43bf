//! Operations used only by tests

use memconn::ops::{LineReader, Operation, OperationCore, OperationError, OperationState};
use std::sync::{Arc, Mutex};

pub type Outcomes = Arc<Mutex<Vec<(String, Result<String, OperationError>)>>>;

/// Sends `<label>\r\n` and completes with the first line that comes back.
#[derive(Debug)]
pub struct EchoLineOperation {
    core: OperationCore,
    label: String,
    lines: LineReader,
    outcomes: Outcomes,
    delivered: bool,
}

impl EchoLineOperation {
    pub fn new(label: impl Into<String>, outcomes: &Outcomes) -> Self {
        Self {
            core: OperationCore::new(),
            label: label.into(),
            lines: LineReader::default(),
            outcomes: Arc::clone(outcomes),
            delivered: false,
        }
    }

    fn deliver(&mut self, result: Result<String, OperationError>) {
        if std::mem::replace(&mut self.delivered, true) || self.core.is_cancelled() {
            return;
        }
        self.outcomes
            .lock()
            .unwrap()
            .push((self.label.clone(), result));
    }
}

impl Operation for EchoLineOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn initialize(&mut self) {
        self.core.set_buffer(format!("{}\r\n", self.label));
    }

    fn read_from(&mut self, data: &[u8]) -> Result<usize, OperationError> {
        let mut consumed = 0;
        while consumed < data.len() && self.core.state() == OperationState::Reading {
            let (used, line) = self.lines.feed(&data[consumed..])?;
            consumed += used;
            if let Some(line) = line {
                self.deliver(Ok(line));
                self.core.transition(OperationState::Complete)?;
            }
        }
        Ok(consumed)
    }

    fn fail(&mut self, error: OperationError) {
        self.deliver(Err(error));
    }
}

pub fn new_outcomes() -> Outcomes {
    Arc::new(Mutex::new(Vec::new()))
}
