//! External collaborator seams (§1 non-goals: placement, the
//! authoritative job list, and the suspend primitive itself all live
//! outside this crate). Modeled as traits so `job_scan`/`reconfig` can be
//! driven by a test double, in the style of `ksvc_core::notifier::Notifier`
//! — a single-purpose contract documented in prose above the trait.

use gang_core::Bitmap;

/// The externally-observed lifecycle state of a job, as reported by the
/// authoritative job list (e.g. a workload manager's job table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalJobState {
    Running,
    Suspended,
    Completing,
    Completed,
}

impl ExternalJobState {
    /// Still occupying resources and worth tracking (§4.9 `job_scan`).
    pub fn is_live(self) -> bool {
        matches!(self, Self::Running | Self::Suspended)
    }
}

/// One row of the authoritative job list, as GANG needs to see it.
#[derive(Debug, Clone)]
pub struct ExternalJob {
    pub job_id: u32,
    pub partition_name: String,
    pub node_bitmap: Bitmap,
    pub state: ExternalJobState,
}

/// One row of the authoritative partition list.
#[derive(Debug, Clone)]
pub struct PartitionSpec {
    pub name: String,
    pub priority: i32,
}

/// Read access to the authoritative job list plus the suspend/resume
/// primitive (`job_suspend` in spec terms). `job_suspend` is called while
/// `data_lock` is held (§5) — implementations must not acquire any other
/// GANG lock from inside it (single-level locking).
///
/// `Send + Sync` because `GangScheduler` hands an `Arc<dyn JobSource>` to
/// the background timeslicer thread (§5).
pub trait JobSource: Send + Sync {
    fn list_jobs(&self) -> Vec<ExternalJob>;
    /// Node/socket/core topology lookups used by `job_to_resmap`/`alloc_cpus`.
    fn topology(&self) -> &dyn gang_core::CoreTopology;
    /// Issue `SIGSTOP`-equivalent (`suspend = true`) or `SIGCONT`-equivalent
    /// (`suspend = false`) to the job. Must not block on any GANG lock.
    fn job_suspend(&self, job_id: u32, suspend: bool);
}

/// Read access to the authoritative partition list.
pub trait PartitionSource {
    fn list_partitions(&self) -> Vec<PartitionSpec>;
}
