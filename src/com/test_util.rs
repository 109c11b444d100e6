use super::DataConnection;
use crate::TerminalResult;

/// Test double that records everything "sent" to the remote end.
#[derive(Default)]
pub struct CaptureSink {
    pub chunks: Vec<Vec<u8>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured output flattened into one stream.
    pub fn bytes(&self) -> Vec<u8> {
        self.chunks.concat()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn contains(&self, pattern: &[u8]) -> bool {
        let bytes = self.bytes();
        bytes.windows(pattern.len()).any(|w| w == pattern)
    }
}

impl DataConnection for CaptureSink {
    fn send(&mut self, data: Vec<u8>) -> TerminalResult<()> {
        self.chunks.push(data);
        Ok(())
    }
}
