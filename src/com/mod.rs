use std::path::PathBuf;

use crate::TerminalResult;

pub mod telnet;
pub use telnet::*;

#[cfg(test)]
pub mod test_util;

/// Byte sink towards the remote end. The live implementation enqueues onto
/// the connection's outbound channel; tests capture the bytes instead.
pub trait DataConnection {
    fn send(&mut self, data: Vec<u8>) -> TerminalResult<()>;
}

/// Lifecycle and transfer notifications emitted on the connection's event
/// channel, in the order the triggering bytes were processed.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected(String),
    Disconnected(String),
    Error(String),
    ZmodemStarted { file_name: String, size: u64 },
    ZmodemProgress { bytes: u64, total: u64, rate_kbs: f64 },
    ZmodemFinished { path: PathBuf, success: bool },
    ZmodemError(String),
}
