use crate::ops::error::{OperationError, Result};

/// Longest response line accepted before the stream is considered corrupt.
pub const MAX_LINE_LENGTH: usize = 8192;

/// Outbound request bytes together with how much of them has been sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBuffer {
    data: Vec<u8>,
    position: usize,
}

impl WriteBuffer {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            position: 0,
        }
    }

    /// Bytes not yet accepted by the socket
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.position..]
    }

    /// Mark `n` more bytes as written
    pub fn advance(&mut self, n: usize) {
        self.position = (self.position + n).min(self.data.len());
    }

    /// Rewind to offset 0 so the whole request is sent again
    pub fn reset(&mut self) {
        self.position = 0;
    }

    pub fn is_drained(&self) -> bool {
        self.position == self.data.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Splits a byte stream into `\r\n` terminated text lines.
///
/// Reads may stop anywhere inside a line; the partial line is kept until the
/// terminator arrives.
#[derive(Debug, Clone)]
pub struct LineReader {
    pending: Vec<u8>,
    limit: usize,
}

impl Default for LineReader {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_LENGTH)
    }
}

impl LineReader {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            limit,
        }
    }

    /// Feed bytes and return how many were consumed plus the completed line, if any.
    ///
    /// At most one line is returned per call; bytes after its terminator are left
    /// unconsumed for the caller.
    pub fn feed(&mut self, data: &[u8]) -> Result<(usize, Option<String>)> {
        match data.iter().position(|&b| b == b'\n') {
            Some(end) => {
                self.pending.extend_from_slice(&data[..end]);
                if self.pending.last() == Some(&b'\r') {
                    self.pending.pop();
                }
                if self.pending.len() > self.limit {
                    self.pending.clear();
                    return Err(OperationError::LineTooLong { limit: self.limit });
                }
                let raw = std::mem::take(&mut self.pending);
                let line = String::from_utf8(raw).map_err(|e| OperationError::InvalidResponse {
                    reason: format!("response line is not UTF-8: {}", e),
                })?;
                Ok((end + 1, Some(line)))
            }
            None => {
                if self.pending.len() + data.len() > self.limit {
                    return Err(OperationError::LineTooLong { limit: self.limit });
                }
                self.pending.extend_from_slice(data);
                Ok((data.len(), None))
            }
        }
    }

    pub fn has_partial_line(&self) -> bool {
        !self.pending.is_empty()
    }
}
