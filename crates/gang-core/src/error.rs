//! Error types for GANG.

use std::fmt;

pub type Result<T> = std::result::Result<T, GangError>;

/// Errors surfaced by the resource model, partition row engine, and
/// scheduler coordinator.
#[derive(Debug)]
pub enum GangError {
    /// A partition name referenced by `job_start`/`reconfig` has no entry.
    UnknownPartition(String),
    /// A job id referenced by `job_fini` is not tracked.
    UnknownJob(u32),
    /// A bitmap's word count didn't match `resmap_size` at `reconfig` —
    /// indicates loss of an invariant the coordinator relies on (§7).
    BitmapSizeMismatch { expected: usize, found: usize },
    /// Spawning the timeslicer thread failed.
    ThreadSpawn(std::io::Error),
    /// An internal invariant was violated (shadow pointing to a freed job,
    /// negative ref count, etc). Fatal per §7 — callers should abort.
    InvariantViolation(&'static str),
}

impl fmt::Display for GangError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPartition(name) => write!(f, "unknown partition: {}", name),
            Self::UnknownJob(id) => write!(f, "unknown job: {}", id),
            Self::BitmapSizeMismatch { expected, found } => write!(
                f,
                "bitmap size mismatch: expected {} words, found {}",
                expected, found
            ),
            Self::ThreadSpawn(e) => write!(f, "thread spawn failed: {}", e),
            Self::InvariantViolation(what) => write!(f, "invariant violation: {}", what),
        }
    }
}

impl std::error::Error for GangError {}

impl GangError {
    /// True for errors that should be logged and the job skipped, rather
    /// than aborting the process (§7 propagation policy).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnknownPartition(_) | Self::UnknownJob(_))
    }
}
