//! Per-job scheduling state (C8). Small `#[repr(u8)]` state enums plus a
//! plain struct, in the style of the teacher's compact state types.

use crate::bitmap::Bitmap;

/// Membership in a partition's active row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RowState {
    /// Never admitted, or most recently shadow-preempted / rotated out.
    NoActive = 0,
    /// Admitted by `build_active_row`'s fit scan but not yet in the
    /// timeslicer's rotation tail — newly admitted this pass.
    Filler = 1,
    /// Currently in the active row and receiving its timeslice.
    Active = 2,
}

/// Signal state, orthogonal to `RowState` but synchronized with it: a
/// job's `sig_state` must equal `Suspend` iff its `row_state` is
/// `NoActive` at quiescence (GANG.signal-membership, §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SigState {
    Resume = 0,
    Suspend = 1,
}

/// One job tracked by a partition.
#[derive(Debug, Clone)]
pub struct GsJob {
    pub job_id: u32,
    /// This job's resmap, already projected via `job_to_resmap`.
    pub resmap: Bitmap,
    /// Per-set-bit CPU/core demand (`CPU`/`CORE` granularity only).
    pub alloc_cpus: Vec<u32>,
    pub row_state: RowState,
    pub sig_state: SigState,
    /// Partitions (by index, resolved against the owning `Coordinator`)
    /// whose active row currently casts a shadow of this job elsewhere —
    /// tracked from the *casting* side in `GsPart::shadows`; this field
    /// is not needed on the job itself and is intentionally absent,
    /// matching the spec's ownership split (shadows belong to the
    /// partition they shadow into, not to the job).
    _no_shadow_backref: (),
}

impl GsJob {
    pub fn new(job_id: u32, resmap: Bitmap, alloc_cpus: Vec<u32>) -> Self {
        Self {
            job_id,
            resmap,
            alloc_cpus,
            row_state: RowState::NoActive,
            sig_state: SigState::Suspend,
            _no_shadow_backref: (),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.row_state, RowState::Active)
    }

    /// Transition to `NoActive` + `Suspend`. A job whose `sig_state`
    /// already equals `Suspend` must not be re-signalled (§4.8) — callers
    /// check `needs_suspend_signal` before invoking the actual suspend
    /// primitive.
    pub fn needs_suspend_signal(&self) -> bool {
        self.sig_state == SigState::Resume
    }

    pub fn mark_suspended(&mut self) {
        self.row_state = RowState::NoActive;
        self.sig_state = SigState::Suspend;
    }

    pub fn needs_resume_signal(&self) -> bool {
        self.sig_state == SigState::Suspend
    }

    pub fn mark_resumed(&mut self, row_state: RowState) {
        debug_assert!(matches!(row_state, RowState::Active | RowState::Filler));
        self.row_state = row_state;
        self.sig_state = SigState::Resume;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_suspended_and_inactive() {
        let job = GsJob::new(1, Bitmap::new(4), vec![]);
        assert_eq!(job.row_state, RowState::NoActive);
        assert_eq!(job.sig_state, SigState::Suspend);
        assert!(!job.needs_suspend_signal());
        assert!(job.needs_resume_signal());
    }

    #[test]
    fn resume_then_suspend_round_trip() {
        let mut job = GsJob::new(1, Bitmap::new(4), vec![]);
        job.mark_resumed(RowState::Active);
        assert!(job.is_active());
        assert!(!job.needs_resume_signal());
        assert!(job.needs_suspend_signal());

        job.mark_suspended();
        assert!(!job.is_active());
        assert!(!job.needs_suspend_signal());
        assert!(job.needs_resume_signal());
    }
}
