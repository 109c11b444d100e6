use std::error::Error;

/// Conditions that are fatal to the running transfer. CRC mismatches and
/// malformed frames are not listed: the framer reports those as failed
/// parses and the scan simply moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransmissionError {
    BufferOverflow(usize),
    PathTraversal(String),
    TooManyRetries,
    Timeout(&'static str),
    Cancelled,
}

impl std::fmt::Display for TransmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransmissionError::BufferOverflow(size) => {
                write!(f, "buffer overflow ({size} bytes of unparseable data)")
            }
            TransmissionError::PathTraversal(name) => {
                write!(f, "path traversal blocked: {name}")
            }
            TransmissionError::TooManyRetries => write!(f, "too many retries"),
            TransmissionError::Timeout(what) => write!(f, "timeout: {what}"),
            TransmissionError::Cancelled => write!(f, "cancelled by server"),
        }
    }
}

impl Error for TransmissionError {}
