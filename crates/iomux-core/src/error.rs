//! Error types for IO-MUX.

use std::fmt;

/// Result type for IO-MUX operations.
pub type Result<T> = std::result::Result<T, IoMuxError>;

/// Errors surfaced by the IO-MUX codec, buffer pool, and reactor endpoints.
#[derive(Debug)]
pub enum IoMuxError {
    /// `acquire()` found both free lists empty. Not fatal — callers treat
    /// this as backpressure and rerun on the next reactor pass.
    PoolExhausted,
    /// A frame violated the wire protocol (oversized length, unknown type).
    ProtocolViolation(String),
    /// Peer closed its end (EPIPE on write, EOF on read). Not fatal.
    PeerGone,
    /// Raw OS error (errno).
    Os(i32),
    /// Spawning a required OS thread failed.
    ThreadSpawn(std::io::Error),
}

impl fmt::Display for IoMuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PoolExhausted => write!(f, "buffer pool exhausted"),
            Self::ProtocolViolation(detail) => write!(f, "protocol violation: {}", detail),
            Self::PeerGone => write!(f, "peer gone"),
            Self::Os(errno) => write!(f, "OS error: errno {}", errno),
            Self::ThreadSpawn(e) => write!(f, "thread spawn failed: {}", e),
        }
    }
}

impl std::error::Error for IoMuxError {}

impl IoMuxError {
    /// True for errors that leave the endpoint usable on the next pass
    /// (transient I/O or backpressure) rather than tearing it down.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::PoolExhausted)
    }
}
