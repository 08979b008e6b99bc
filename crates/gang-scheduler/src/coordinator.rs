//! Scheduler coordinator (C9): owns every partition, drives shadow
//! casting, and exposes the public entry points (`job_start`, `job_fini`,
//! `job_scan`, `reconfig`) that acquire `data_lock` around their work.
//!
//! The teacher's `gvthread_runtime::scheduler` models this as a single
//! process-wide `static mut Option<Scheduler>`. That is not idiomatic
//! Rust and is itself one of this spec's re-architecture targets: here
//! the binary owns one [`GangScheduler`] value instead, and "one
//! per-process instance" falls out of the binary only ever constructing
//! one.

use std::sync::{Arc, Mutex};

use gang_core::{job_to_resmap, Bitmap, Granularity, GsJob, PhysResCnt};

use crate::config::GangConfig;
use crate::jobsource::{ExternalJobState, JobSource, PartitionSource};
use crate::partition::{build_active_row, update_active_row, GsPart};
use crate::timeslicer::Timeslicer;

/// All of GANG's mutable state, guarded by `GangScheduler`'s single
/// mutex (`data_lock` in spec terms).
pub struct Coordinator {
    partitions: Vec<GsPart>,
    /// Indices into `partitions`, sorted by descending priority. Rebuilt
    /// whenever the partition count changes (§4.9); otherwise the
    /// timeslicer bubble-sorts it in place each pass since priorities may
    /// mutate.
    parts_sorted: Vec<usize>,
    gr_type: Granularity,
    resmap_size: usize,
    phys_res_cnt: PhysResCnt,
}

impl Coordinator {
    fn rebuild_parts_sorted(&mut self) {
        self.parts_sorted = (0..self.partitions.len()).collect();
        self.sort_parts_sorted();
    }

    /// Bubble sort by descending priority — partitions are few and this
    /// runs every timeslicer pass, so simplicity over asymptotic elegance
    /// matches how few-element hot-path sorts read elsewhere in the
    /// corpus.
    fn sort_parts_sorted(&mut self) {
        let parts = &self.partitions;
        let n = self.parts_sorted.len();
        for i in 0..n {
            for j in 0..n.saturating_sub(i + 1) {
                let (a, b) = (self.parts_sorted[j], self.parts_sorted[j + 1]);
                if parts[a].priority < parts[b].priority {
                    self.parts_sorted.swap(j, j + 1);
                }
            }
        }
    }

    fn find_partition_by_name(&self, name: &str) -> Option<usize> {
        self.partitions.iter().position(|p| p.name == name)
    }

    /// Clone the jobs referenced by `part_idx`'s shadow list, resolving
    /// each `(partition_index, job_id)` pair against `self.partitions`.
    fn resolve_shadow_jobs(&self, part_idx: usize) -> Vec<GsJob> {
        self.partitions[part_idx]
            .shadows
            .iter()
            .filter_map(|&(owner_idx, job_id)| {
                self.partitions
                    .get(owner_idx)
                    .and_then(|p| p.jobs.iter().find(|j| j.job_id == job_id))
                    .cloned()
            })
            .collect()
    }

    /// After `job_id` (owned by `owner_idx`) is admitted, cast it as a
    /// shadow into every partition of strictly lower priority. Dedups.
    fn cast_shadow(&mut self, owner_idx: usize, job_id: u32) {
        let owner_priority = self.partitions[owner_idx].priority;
        for (idx, part) in self.partitions.iter_mut().enumerate() {
            if idx == owner_idx || part.priority >= owner_priority {
                continue;
            }
            let entry = (owner_idx, job_id);
            if !part.shadows.contains(&entry) {
                part.shadows.push(entry);
            }
        }
    }

    /// Remove any shadow entry pointing at `(owner_idx, job_id)` from
    /// every partition — called on job removal or suspension.
    fn clear_shadow(&mut self, owner_idx: usize, job_id: u32) {
        for part in &mut self.partitions {
            part.shadows.retain(|&(o, j)| !(o == owner_idx && j == job_id));
        }
    }

    fn update_all_active_rows(&mut self, job_source: &dyn JobSource) {
        for idx in 0..self.partitions.len() {
            let shadow_jobs = self.resolve_shadow_jobs(idx);
            let effects = update_active_row(
                &mut self.partitions[idx],
                &shadow_jobs,
                true,
                self.gr_type,
                &self.phys_res_cnt,
            );
            for job_id in effects.suspended {
                job_source.job_suspend(job_id, true);
                self.clear_shadow(idx, job_id);
            }
            for job_id in effects.resumed {
                job_source.job_suspend(job_id, false);
                self.cast_shadow(idx, job_id);
            }
        }
    }

    fn project_job(&self, topo: &dyn gang_core::CoreTopology, job_id: u32, node_bitmap: &Bitmap) -> GsJob {
        let resmap = job_to_resmap(self.gr_type, node_bitmap, job_id, topo, self.resmap_size);
        let alloc_cpus = gang_core::alloc_cpus(self.gr_type, node_bitmap, job_id, topo);
        GsJob::new(job_id, resmap, alloc_cpus)
    }

    /// `job_start` (§4.9).
    pub fn job_start(
        &mut self,
        partition_name: &str,
        job_id: u32,
        node_bitmap: &Bitmap,
        job_source: &dyn JobSource,
    ) -> gang_core::Result<()> {
        let Some(part_idx) = self.find_partition_by_name(partition_name) else {
            return Err(gang_core::GangError::UnknownPartition(
                partition_name.to_string(),
            ));
        };
        let job = self.project_job(job_source.topology(), job_id, node_bitmap);
        let shadow_jobs = self.resolve_shadow_jobs(part_idx);

        let admitted = {
            let part = &mut self.partitions[part_idx];
            part.jobs.push(job);
            build_active_row(part, &shadow_jobs, self.gr_type, &self.phys_res_cnt);
            part.jobs
                .iter()
                .find(|j| j.job_id == job_id)
                .map(|j| j.is_active())
                .unwrap_or(false)
        };

        if admitted {
            job_source.job_suspend(job_id, false);
            self.cast_shadow(part_idx, job_id);
            self.update_all_active_rows(job_source);
        }
        Ok(())
    }

    /// `job_fini` (§4.9).
    pub fn job_fini(&mut self, job_id: u32, job_source: &dyn JobSource) -> gang_core::Result<()> {
        let part_idx = self
            .partitions
            .iter()
            .position(|p| p.job_index(job_id).is_some())
            .ok_or(gang_core::GangError::UnknownJob(job_id))?;

        self.partitions[part_idx]
            .jobs
            .retain(|j| j.job_id != job_id);
        self.clear_shadow(part_idx, job_id);
        self.update_all_active_rows(job_source);
        Ok(())
    }

    /// `job_scan` (§4.9): reconcile against the authoritative job list.
    pub fn job_scan(&mut self, job_source: &dyn JobSource) {
        let external = job_source.list_jobs();
        let tracked: Vec<(usize, u32)> = self
            .partitions
            .iter()
            .enumerate()
            .flat_map(|(idx, p)| p.jobs.iter().map(move |j| (idx, j.job_id)))
            .collect();

        for ext in &external {
            let already_tracked = tracked.iter().any(|&(_, id)| id == ext.job_id);
            if !already_tracked && ext.state.is_live() {
                // `job_start` itself issues the resume signal, and only if
                // the job is actually admitted into the active row — firing
                // it here first would resume the job externally before its
                // fit is even known (GANG.signal-membership, §8).
                let _ = self.job_start(
                    &ext.partition_name,
                    ext.job_id,
                    &ext.node_bitmap,
                    job_source,
                );
            }
        }

        let still_live: std::collections::HashSet<u32> = external
            .iter()
            .filter(|e| e.state.is_live())
            .map(|e| e.job_id)
            .collect();
        for &(_, job_id) in &tracked {
            if !still_live.contains(&job_id) {
                let _ = self.job_fini(job_id, job_source);
            }
        }

        self.update_all_active_rows(job_source);
    }

    /// `reconfig` (§4.9). Rebuilds the partition list from
    /// `partition_source`, transferring surviving jobs across by name.
    pub fn reconfig(
        &mut self,
        partition_source: &dyn PartitionSource,
        job_source: &dyn JobSource,
    ) {
        let specs = partition_source.list_partitions();
        let old_partitions = std::mem::take(&mut self.partitions);

        self.partitions = specs
            .iter()
            .map(|s| GsPart::new(s.name.clone(), s.priority, self.resmap_size))
            .collect();

        let live_job_ids: std::collections::HashSet<u32> = job_source
            .list_jobs()
            .into_iter()
            .filter(|j| j.state.is_live())
            .map(|j| j.job_id)
            .collect();

        for old_part in old_partitions {
            let Some(new_idx) = self.partitions.iter().position(|p| p.name == old_part.name)
            else {
                // Partition removed: GANG no longer manages these jobs, so
                // any of them still suspended must actually be resumed.
                // Jobs already running need no signal.
                for job in &old_part.jobs {
                    if job.needs_resume_signal() {
                        job_source.job_suspend(job.job_id, false);
                    }
                }
                continue;
            };
            for mut job in old_part.jobs {
                if !live_job_ids.contains(&job.job_id) {
                    continue;
                }
                // The job is being dropped to `NoActive`/`Suspend` pending
                // `job_scan`'s rebuild below — anything actually running
                // must be suspended first so bookkeeping never lags reality.
                if job.needs_suspend_signal() {
                    job_source.job_suspend(job.job_id, true);
                }
                job.mark_suspended();
                self.partitions[new_idx].jobs.push(job);
            }
        }

        self.rebuild_parts_sorted();
        self.job_scan(job_source);
    }

    pub fn partitions(&self) -> &[GsPart] {
        &self.partitions
    }

    pub(crate) fn partitions_mut(&mut self) -> &mut [GsPart] {
        &mut self.partitions
    }

    pub(crate) fn clear_shadow_pub(&mut self, owner_idx: usize, job_id: u32) {
        self.clear_shadow(owner_idx, job_id);
    }

    pub(crate) fn cast_shadow_pub(&mut self, owner_idx: usize, job_id: u32) {
        self.cast_shadow(owner_idx, job_id);
    }

    pub fn parts_sorted(&self) -> &[usize] {
        &self.parts_sorted
    }

    pub(crate) fn gr_type(&self) -> Granularity {
        self.gr_type
    }

    pub(crate) fn phys_res_cnt(&self) -> &PhysResCnt {
        &self.phys_res_cnt
    }

    pub(crate) fn sort_for_timeslicer(&mut self) {
        self.sort_parts_sorted();
    }
}

/// Public facade: owns the mutex-guarded [`Coordinator`] plus the
/// timeslicer thread, and the `thread_lock` that serializes
/// spawn/terminate against each other (§5).
pub struct GangScheduler {
    data: Arc<Mutex<Coordinator>>,
    thread_lock: Mutex<Option<Timeslicer>>,
    job_source: Arc<dyn JobSource>,
}

impl GangScheduler {
    /// `init()` (§4.9): derive granularity/resmap size, load physical
    /// capacity, build empty partitions, adopt existing jobs via
    /// `job_scan`, then spawn the timeslicer.
    pub fn init(
        config: GangConfig,
        resmap_size: usize,
        phys_res_cnt: PhysResCnt,
        partition_source: &dyn PartitionSource,
        job_source: Arc<dyn JobSource>,
    ) -> gang_core::Result<Self> {
        let specs = partition_source.list_partitions();
        let partitions = specs
            .iter()
            .map(|s| GsPart::new(s.name.clone(), s.priority, resmap_size))
            .collect();

        let mut coordinator = Coordinator {
            partitions,
            parts_sorted: Vec::new(),
            gr_type: config.gr_type,
            resmap_size,
            phys_res_cnt,
        };
        coordinator.rebuild_parts_sorted();
        coordinator.job_scan(job_source.as_ref());

        let data = Arc::new(Mutex::new(coordinator));
        let timeslicer = Timeslicer::spawn(Arc::clone(&data), Arc::clone(&job_source), config)
            .map_err(gang_core::GangError::ThreadSpawn)?;

        Ok(Self {
            data,
            thread_lock: Mutex::new(Some(timeslicer)),
            job_source,
        })
    }

    pub fn job_start(&self, partition_name: &str, job_id: u32, node_bitmap: &Bitmap) -> gang_core::Result<()> {
        let mut data = self.data.lock().expect("data_lock poisoned");
        data.job_start(partition_name, job_id, node_bitmap, self.job_source.as_ref())
    }

    pub fn job_fini(&self, job_id: u32) -> gang_core::Result<()> {
        let mut data = self.data.lock().expect("data_lock poisoned");
        data.job_fini(job_id, self.job_source.as_ref())
    }

    pub fn job_scan(&self) {
        let mut data = self.data.lock().expect("data_lock poisoned");
        data.job_scan(self.job_source.as_ref());
    }

    pub fn reconfig(&self, partition_source: &dyn PartitionSource) {
        let mut data = self.data.lock().expect("data_lock poisoned");
        data.reconfig(partition_source, self.job_source.as_ref());
    }

    /// `fini()`: signal timeslicer shutdown, join with a bounded cancel
    /// retry, drop all partitions.
    pub fn fini(&self) {
        if let Some(timeslicer) = self.thread_lock.lock().expect("thread_lock poisoned").take() {
            timeslicer.shutdown_and_join();
        }
        self.data.lock().expect("data_lock poisoned").partitions.clear();
    }

    #[cfg(test)]
    pub(crate) fn data_for_test(&self) -> Arc<Mutex<Coordinator>> {
        Arc::clone(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobsource::{ExternalJob, ExternalJobState, PartitionSpec};
    use gang_core::CoreTopology;

    struct FakeTopo;
    impl CoreTopology for FakeTopo {
        fn sockets_on_node(&self, _node_idx: usize) -> usize {
            1
        }
        fn job_cores(&self, _job_id: u32, _node_idx: usize, _socket_idx: usize) -> u32 {
            1
        }
    }

    struct FakeJobSource {
        topo: FakeTopo,
        suspended: Mutex<Vec<(u32, bool)>>,
        jobs: Vec<ExternalJob>,
    }
    impl JobSource for FakeJobSource {
        fn list_jobs(&self) -> Vec<ExternalJob> {
            self.jobs.clone()
        }
        fn topology(&self) -> &dyn CoreTopology {
            &self.topo
        }
        fn job_suspend(&self, job_id: u32, suspend: bool) {
            self.suspended.lock().unwrap().push((job_id, suspend));
        }
    }

    struct FakePartitionSource(Vec<PartitionSpec>);
    impl PartitionSource for FakePartitionSource {
        fn list_partitions(&self) -> Vec<PartitionSpec> {
            self.0.clone()
        }
    }

    fn test_coordinator() -> Coordinator {
        let mut c = Coordinator {
            partitions: vec![
                GsPart::new("high".into(), 10, 4),
                GsPart::new("low".into(), 1, 4),
            ],
            parts_sorted: Vec::new(),
            gr_type: Granularity::Node,
            resmap_size: 4,
            phys_res_cnt: PhysResCnt::from_groups(vec![(1, 4)]),
        };
        c.rebuild_parts_sorted();
        c
    }

    #[test]
    fn job_start_admits_and_casts_shadow_to_lower_priority() {
        let mut coord = test_coordinator();
        let job_source = FakeJobSource {
            topo: FakeTopo,
            suspended: Mutex::new(Vec::new()),
            jobs: Vec::new(),
        };
        let mut bm = Bitmap::new(4);
        bm.set(0);
        coord.job_start("high", 1, &bm, &job_source).unwrap();

        assert!(coord.partitions[0].jobs[0].is_active());
        assert_eq!(coord.partitions[1].shadows, vec![(0, 1)]);
    }

    #[test]
    fn job_fini_clears_shadow_and_reactivates_lower_partition() {
        let mut coord = test_coordinator();
        let job_source = FakeJobSource {
            topo: FakeTopo,
            suspended: Mutex::new(Vec::new()),
            jobs: Vec::new(),
        };
        let mut bm = Bitmap::new(4);
        bm.set(0);
        coord.job_start("high", 1, &bm, &job_source).unwrap();
        coord.job_start("low", 2, &bm, &job_source).unwrap();
        assert!(!coord.partitions[1].jobs[0].is_active());

        coord.job_fini(1, &job_source).unwrap();
        assert!(coord.partitions[1].shadows.is_empty());
        assert!(coord.partitions[1].jobs[0].is_active());
    }

    #[test]
    fn parts_sorted_orders_by_descending_priority() {
        let coord = test_coordinator();
        let names: Vec<&str> = coord
            .parts_sorted()
            .iter()
            .map(|&i| coord.partitions[i].name.as_str())
            .collect();
        assert_eq!(names, vec!["high", "low"]);
    }

    #[test]
    fn unknown_partition_is_an_error() {
        let mut coord = test_coordinator();
        let job_source = FakeJobSource {
            topo: FakeTopo,
            suspended: Mutex::new(Vec::new()),
            jobs: Vec::new(),
        };
        let bm = Bitmap::new(4);
        let err = coord.job_start("ghost", 1, &bm, &job_source).unwrap_err();
        assert!(matches!(err, gang_core::GangError::UnknownPartition(_)));
    }

    /// GANG.signal-membership (§8): a job `job_scan` discovers but that
    /// doesn't fit must never be resumed, and must stay suspended/inactive
    /// in GANG's own bookkeeping.
    #[test]
    fn job_scan_does_not_resume_a_job_that_does_not_fit() {
        let mut coord = test_coordinator();
        let mut bm = Bitmap::new(4);
        bm.set(0);

        let owner = FakeJobSource {
            topo: FakeTopo,
            suspended: Mutex::new(Vec::new()),
            jobs: Vec::new(),
        };
        coord.job_start("high", 1, &bm, &owner).unwrap();
        assert!(coord.partitions[0].jobs[0].is_active());

        // job 2 is untracked, external, and contends for the same Node bit
        // job 1 already occupies — it cannot fit.
        let scanning_source = FakeJobSource {
            topo: FakeTopo,
            suspended: Mutex::new(Vec::new()),
            jobs: vec![ExternalJob {
                job_id: 2,
                partition_name: "high".into(),
                node_bitmap: bm.clone(),
                state: ExternalJobState::Running,
            }],
        };
        coord.job_scan(&scanning_source);

        let job2 = coord.partitions[0]
            .jobs
            .iter()
            .find(|j| j.job_id == 2)
            .expect("job_scan should still track the non-fitting job");
        assert!(!job2.is_active());
        assert!(job2.needs_resume_signal());
        assert!(
            !scanning_source
                .suspended
                .lock()
                .unwrap()
                .iter()
                .any(|&(id, suspend)| id == 2 && !suspend),
            "a non-admitted job must never be externally resumed"
        );
    }

    /// `reconfig` transfers a surviving partition's jobs across the
    /// rebuild and resets them to `Suspend`/`NoActive` bookkeeping — a job
    /// that was actually `Active` must be really suspended first, not just
    /// have its bookkeeping flipped while it keeps running externally.
    #[test]
    fn reconfig_suspends_running_job_before_resetting_its_bookkeeping() {
        let mut coord = test_coordinator();
        let mut bm = Bitmap::new(4);
        bm.set(0);
        let job_source = FakeJobSource {
            topo: FakeTopo,
            suspended: Mutex::new(Vec::new()),
            jobs: vec![ExternalJob {
                job_id: 1,
                partition_name: "high".into(),
                node_bitmap: bm.clone(),
                state: ExternalJobState::Running,
            }],
        };
        coord.job_start("high", 1, &bm, &job_source).unwrap();
        assert!(coord.partitions[0].jobs[0].is_active());
        job_source.suspended.lock().unwrap().clear();

        // "high" survives the rebuild (same name, new priority) — job 1
        // transfers across and must be actually suspended before its
        // row/sig state resets.
        let partition_source = FakePartitionSource(vec![
            PartitionSpec {
                name: "high".into(),
                priority: 10,
            },
            PartitionSpec {
                name: "low".into(),
                priority: 1,
            },
        ]);
        coord.reconfig(&partition_source, &job_source);

        assert!(
            job_source
                .suspended
                .lock()
                .unwrap()
                .iter()
                .any(|&(id, suspend)| id == 1 && suspend),
            "job 1 was active across the rebuild and must be suspended, not silently reset"
        );
    }

    /// `reconfig` dropping a partition entirely must actually resume any
    /// job that was suspended under GANG's management — GANG no longer
    /// arbitrates it, so it can't stay stopped by GANG's own signal.
    #[test]
    fn reconfig_resumes_suspended_job_when_its_partition_is_dropped() {
        let mut coord = test_coordinator();
        let mut bm = Bitmap::new(4);
        bm.set(0);
        let job_source = FakeJobSource {
            topo: FakeTopo,
            suspended: Mutex::new(Vec::new()),
            jobs: Vec::new(),
        };
        // job 2 contends with job 1 for the same bit and loses, so it
        // starts life in "high" genuinely suspended (sig_state Suspend).
        coord.job_start("high", 1, &bm, &job_source).unwrap();
        coord.job_start("high", 2, &bm, &job_source).unwrap();
        assert!(!coord.partitions[0].jobs[1].is_active());
        job_source.suspended.lock().unwrap().clear();

        let partition_source = FakePartitionSource(vec![PartitionSpec {
            name: "low".into(),
            priority: 1,
        }]);
        coord.reconfig(&partition_source, &job_source);

        assert!(
            job_source
                .suspended
                .lock()
                .unwrap()
                .iter()
                .any(|&(id, suspend)| id == 2 && !suspend),
            "job 2 was suspended by GANG and must be resumed once its partition is dropped"
        );
    }
}
