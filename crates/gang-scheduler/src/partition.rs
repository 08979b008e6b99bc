//! Partition row engine (C8): the fit predicate, active-row admission,
//! and the two row-rebuild strategies (`build_active_row` for a cold
//! start, `update_active_row` for a preemption-aware rebuild).
//!
//! Shadow entries are `(partition_index, job_id)` pairs resolved against
//! the owning [`crate::coordinator::Coordinator`]'s partition vector —
//! never a raw pointer that could outlive the vector it indexes into.

use gang_core::{Bitmap, Granularity, GsJob, PhysResCnt, RowState};

/// One partition: its ordered job list, the jobs shadowed in from
/// higher-priority partitions, and the current active-row bitmap/CPU
/// accounting.
#[derive(Debug, Clone)]
pub struct GsPart {
    pub name: String,
    pub priority: i32,
    pub jobs: Vec<GsJob>,
    /// `(partition_index, job_id)` of every higher-priority job currently
    /// shadowed into this partition's active row.
    pub shadows: Vec<(usize, u32)>,
    pub active_resmap: Option<Bitmap>,
    /// Indexed by bit position (not rank), sized `resmap_size`.
    pub active_cpus: Vec<u32>,
    pub jobs_active: usize,
    pub resmap_size: usize,
}

impl GsPart {
    pub fn new(name: String, priority: i32, resmap_size: usize) -> Self {
        Self {
            name,
            priority,
            jobs: Vec::new(),
            shadows: Vec::new(),
            active_resmap: None,
            active_cpus: Vec::new(),
            jobs_active: 0,
            resmap_size,
        }
    }

    pub fn job_index(&self, job_id: u32) -> Option<usize> {
        self.jobs.iter().position(|j| j.job_id == job_id)
    }
}

/// `job_fits_in_active_row` (§4.8).
pub fn job_fits_in_active_row(
    job: &GsJob,
    part: &GsPart,
    gr_type: Granularity,
    phys_res_cnt: &PhysResCnt,
) -> bool {
    let Some(active_resmap) = part.active_resmap.as_ref() else {
        return true;
    };
    if part.jobs_active == 0 {
        return true;
    }

    let conflict = job.resmap.and(active_resmap);
    if conflict.popcount() == 0 {
        return true;
    }

    if matches!(gr_type, Granularity::Node | Granularity::Socket) {
        return false;
    }

    for i in conflict.iter_set() {
        let rank = job.resmap.rank_of(i);
        let demand = job.alloc_cpus.get(rank).copied().unwrap_or(0);
        let have = part.active_cpus.get(i).copied().unwrap_or(0);
        if have + demand > phys_res_cnt.at(i) {
            return false;
        }
    }
    true
}

/// `add_job_to_active` (§4.8). Mutates only `part`'s active-row fields —
/// never `part.jobs` — so it is safe to call while a caller holds a
/// separate mutable borrow of a job drawn from a vector taken out of
/// `part.jobs` via [`std::mem::take`].
pub fn add_job_to_active(
    part: &mut GsPart,
    job: &GsJob,
    gr_type: Granularity,
    phys_res_cnt: &PhysResCnt,
) {
    let tracks_cpu = gr_type.tracks_cpu_counts();

    if part.active_resmap.is_none() || part.jobs_active == 0 {
        part.active_resmap = Some(job.resmap.clone());
        part.active_cpus = vec![0u32; part.resmap_size];
        if tracks_cpu {
            scatter_alloc_cpus(&mut part.active_cpus, job, phys_res_cnt, false);
        }
    } else {
        part.active_resmap.as_mut().unwrap().or_assign(&job.resmap);
        if tracks_cpu {
            scatter_alloc_cpus(&mut part.active_cpus, job, phys_res_cnt, true);
        }
    }
    part.jobs_active += 1;
}

fn scatter_alloc_cpus(active_cpus: &mut [u32], job: &GsJob, phys_res_cnt: &PhysResCnt, accumulate: bool) {
    for i in job.resmap.iter_set() {
        let rank = job.resmap.rank_of(i);
        let demand = job.alloc_cpus.get(rank).copied().unwrap_or(0);
        let cap = phys_res_cnt.at(i);
        let base = if accumulate { active_cpus[i] } else { 0 };
        active_cpus[i] = (base + demand).min(cap);
    }
}

/// `build_active_row` (§4.8): a cold rebuild. `shadow_jobs` are resolved
/// clones of the jobs referenced by `part.shadows`, added unconditionally
/// before the fit scan runs over `part.jobs` in stored order.
pub fn build_active_row(
    part: &mut GsPart,
    shadow_jobs: &[GsJob],
    gr_type: Granularity,
    phys_res_cnt: &PhysResCnt,
) {
    part.active_resmap = None;
    part.active_cpus = vec![0u32; part.resmap_size];
    part.jobs_active = 0;

    for shadow_job in shadow_jobs {
        add_job_to_active(part, shadow_job, gr_type, phys_res_cnt);
    }

    let mut jobs = std::mem::take(&mut part.jobs);
    for job in jobs.iter_mut() {
        if job_fits_in_active_row(job, part, gr_type, phys_res_cnt) {
            add_job_to_active(part, job, gr_type, phys_res_cnt);
            job.mark_resumed(RowState::Active);
        }
    }
    part.jobs = jobs;
}

/// Outcome of a call to [`update_active_row`]: which jobs need a signal
/// sent by the caller (who owns the `JobSource`/shadow-clearing access
/// this crate does not).
#[derive(Debug, Default)]
pub struct RowUpdateEffects {
    /// Jobs newly suspended this pass — caller must `job_suspend(id, true)`
    /// and clear any shadows this job had cast.
    pub suspended: Vec<u32>,
    /// Jobs newly resumed this pass (third pass only) — caller must
    /// `job_suspend(id, false)` and may cast new shadows for them.
    pub resumed: Vec<u32>,
}

/// `update_active_row` (§4.8): rebuild honoring existing row state.
/// Pass 1/2 re-admit existing `ACTIVE`/`FILLER` jobs that still fit,
/// shadow-preempting (suspending) those that don't. If `add_new`, a third
/// pass admits previously `NO_ACTIVE` jobs that now fit.
pub fn update_active_row(
    part: &mut GsPart,
    shadow_jobs: &[GsJob],
    add_new: bool,
    gr_type: Granularity,
    phys_res_cnt: &PhysResCnt,
) -> RowUpdateEffects {
    part.active_resmap = None;
    part.active_cpus = vec![0u32; part.resmap_size];
    part.jobs_active = 0;

    for shadow_job in shadow_jobs {
        add_job_to_active(part, shadow_job, gr_type, phys_res_cnt);
    }

    let mut effects = RowUpdateEffects::default();
    let mut jobs = std::mem::take(&mut part.jobs);

    for pass_state in [RowState::Active, RowState::Filler] {
        for job in jobs.iter_mut() {
            if job.row_state != pass_state {
                continue;
            }
            if job_fits_in_active_row(job, part, gr_type, phys_res_cnt) {
                add_job_to_active(part, job, gr_type, phys_res_cnt);
                // stays admitted; row_state unchanged, sig_state already Resume.
            } else {
                job.mark_suspended();
                effects.suspended.push(job.job_id);
            }
        }
    }

    if add_new {
        for job in jobs.iter_mut() {
            if job.row_state != RowState::NoActive {
                continue;
            }
            if job_fits_in_active_row(job, part, gr_type, phys_res_cnt) {
                add_job_to_active(part, job, gr_type, phys_res_cnt);
                job.mark_resumed(RowState::Filler);
                effects.resumed.push(job.job_id);
            }
        }
    }

    part.jobs = jobs;
    effects
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: u32, bits: &[usize], alloc: Vec<u32>, nbits: usize) -> GsJob {
        let mut bm = Bitmap::new(nbits);
        for &b in bits {
            bm.set(b);
        }
        GsJob::new(id, bm, alloc)
    }

    #[test]
    fn empty_row_always_fits() {
        let part = GsPart::new("p".into(), 0, 4);
        let j = job(1, &[0], vec![], 4);
        let prc = PhysResCnt::from_groups(vec![(4, 4)]);
        assert!(job_fits_in_active_row(&j, &part, Granularity::Node, &prc));
    }

    #[test]
    fn node_granularity_conflict_never_fits() {
        let mut part = GsPart::new("p".into(), 0, 4);
        let prc = PhysResCnt::from_groups(vec![(4, 4)]);
        let first = job(1, &[0], vec![], 4);
        add_job_to_active(&mut part, &first, Granularity::Node, &prc);

        let second = job(2, &[0], vec![], 4);
        assert!(!job_fits_in_active_row(
            &second,
            &part,
            Granularity::Node,
            &prc
        ));
    }

    #[test]
    fn cpu_granularity_conflict_fits_under_capacity() {
        let mut part = GsPart::new("p".into(), 0, 4);
        let prc = PhysResCnt::from_groups(vec![(8, 4)]);
        let first = job(1, &[0], vec![2], 4);
        add_job_to_active(&mut part, &first, Granularity::Cpu, &prc);

        let second = job(2, &[0], vec![4], 4);
        assert!(job_fits_in_active_row(
            &second,
            &part,
            Granularity::Cpu,
            &prc
        ));

        let third = job(3, &[0], vec![3], 4);
        assert!(!job_fits_in_active_row(
            &third,
            &part,
            Granularity::Cpu,
            &prc
        ));
    }

    #[test]
    fn build_active_row_admits_non_conflicting_jobs_in_order() {
        let mut part = GsPart::new("p".into(), 0, 4);
        part.jobs.push(job(1, &[0], vec![], 4));
        part.jobs.push(job(2, &[1], vec![], 4));
        part.jobs.push(job(3, &[0], vec![], 4)); // conflicts with job 1

        let prc = PhysResCnt::from_groups(vec![(1, 4)]);
        build_active_row(&mut part, &[], Granularity::Node, &prc);

        assert!(part.jobs[0].is_active());
        assert!(part.jobs[1].is_active());
        assert!(!part.jobs[2].is_active());
        assert_eq!(part.jobs_active, 2);
    }

    #[test]
    fn update_active_row_suspends_jobs_that_no_longer_fit() {
        let mut part = GsPart::new("p".into(), 0, 4);
        let prc = PhysResCnt::from_groups(vec![(1, 4)]);

        part.jobs.push(job(1, &[0], vec![], 4));
        build_active_row(&mut part, &[], Granularity::Node, &prc);
        assert!(part.jobs[0].is_active());

        // A new higher-priority shadow now occupies the same node.
        let shadow = job(99, &[0], vec![], 4);
        let effects = update_active_row(&mut part, &[shadow], false, Granularity::Node, &prc);

        assert_eq!(effects.suspended, vec![1]);
        assert!(!part.jobs[0].is_active());
    }
}
