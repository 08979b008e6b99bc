//! Resource model (C7): granularity selection, the physical-capacity
//! run-length encoding, and the node-bitmap → resmap/alloc_cpus
//! expansion.

use crate::bitmap::Bitmap;

/// Selects the unit GANG schedules against, per the cluster's
/// `select_type_param` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// Memory-only scheduling: one bit per node, no CPU accounting.
    Node,
    /// One bit per node, plus a per-node CPU count vector.
    Cpu,
    /// One bit per socket (summed across nodes), no CPU accounting.
    Socket,
    /// One bit per socket, plus a per-socket core count vector.
    Core,
}

impl Granularity {
    /// Whether this granularity tracks a CPU/core count vector alongside
    /// the bitmap (used by the fit predicate in §4.8 step 3/4).
    pub fn tracks_cpu_counts(self) -> bool {
        matches!(self, Self::Cpu | Self::Core)
    }
}

/// Run-length-encoded physical capacity per bit-domain slot: `values[k]`
/// holds for `reps[k]` consecutive slots. Lookup is O(groups), which is
/// fine because `groups ≪ nodes` in practice (§4.7).
#[derive(Debug, Clone)]
pub struct PhysResCnt {
    values: Vec<u32>,
    reps: Vec<u32>,
    total_slots: usize,
}

impl PhysResCnt {
    /// Build directly from parallel `(value, reps)` pairs.
    pub fn from_groups(groups: Vec<(u32, u32)>) -> Self {
        let total_slots = groups.iter().map(|(_, r)| *r as usize).sum();
        let (values, reps) = groups.into_iter().unzip();
        Self {
            values,
            reps,
            total_slots,
        }
    }

    /// Build by run-length-encoding a flat per-slot capacity vector —
    /// the convenience path used when capacities are read live rather
    /// than pre-grouped (the `fast_schedule`-off case of §6).
    pub fn from_flat(counts: &[u32]) -> Self {
        let mut values = Vec::new();
        let mut reps = Vec::new();
        for &c in counts {
            if values.last() == Some(&c) {
                *reps.last_mut().unwrap() += 1;
            } else {
                values.push(c);
                reps.push(1);
            }
        }
        Self {
            values,
            reps,
            total_slots: counts.len(),
        }
    }

    pub fn total_slots(&self) -> usize {
        self.total_slots
    }

    /// Capacity of slot `i`. O(groups).
    pub fn at(&self, i: usize) -> u32 {
        let mut remaining = i;
        for (value, reps) in self.values.iter().zip(&self.reps) {
            let reps = *reps as usize;
            if remaining < reps {
                return *value;
            }
            remaining -= reps;
        }
        panic!("slot index {} out of range (total_slots={})", i, self.total_slots);
    }
}

/// Per-node socket/core topology consulted when expanding a node-level
/// bitmap down to sockets (`SOCKET`/`CORE` granularity). Supplied by the
/// external job-accounting system (§1 non-goals: GANG doesn't discover
/// topology itself).
pub trait CoreTopology {
    /// Number of sockets on `node_idx`.
    fn sockets_on_node(&self, node_idx: usize) -> usize;
    /// Cores allocated to `job_id` on `(node_idx, socket_idx)`.
    fn job_cores(&self, job_id: u32, node_idx: usize, socket_idx: usize) -> u32;
}

/// `job_to_resmap`: project a job's node-level bitmap down onto the
/// scheduling granularity's bit domain.
///
/// `NODE`/`CPU` copy the node bitmap as-is; `SOCKET`/`CORE` expand
/// node-by-node, setting a socket bit wherever the job holds at least
/// one allocated core.
pub fn job_to_resmap(
    gr_type: Granularity,
    node_bitmap: &Bitmap,
    job_id: u32,
    topo: &dyn CoreTopology,
    resmap_size: usize,
) -> Bitmap {
    match gr_type {
        Granularity::Node | Granularity::Cpu => node_bitmap.clone(),
        Granularity::Socket | Granularity::Core => {
            let mut out = Bitmap::new(resmap_size);
            for node_idx in node_bitmap.iter_set().collect::<Vec<_>>() {
                let mut base = 0usize;
                for n in 0..node_idx {
                    base += topo.sockets_on_node(n);
                }
                for s in 0..topo.sockets_on_node(node_idx) {
                    if topo.job_cores(job_id, node_idx, s) > 0 {
                        out.set(base + s);
                    }
                }
            }
            out
        }
    }
}

/// `alloc_cpus`: for `CPU`/`CORE` granularity, the per-set-bit core/CPU
/// demand, in the same expansion order as the bits in the job's resmap
/// (so index `k` corresponds to the `k`-th set bit, i.e. `rank_of`).
pub fn alloc_cpus(
    gr_type: Granularity,
    node_bitmap: &Bitmap,
    job_id: u32,
    topo: &dyn CoreTopology,
) -> Vec<u32> {
    if !gr_type.tracks_cpu_counts() {
        return Vec::new();
    }
    match gr_type {
        Granularity::Cpu => node_bitmap
            .iter_set()
            .map(|node_idx| {
                (0..topo.sockets_on_node(node_idx))
                    .map(|s| topo.job_cores(job_id, node_idx, s))
                    .sum()
            })
            .collect(),
        Granularity::Core => {
            let mut out = Vec::new();
            for node_idx in node_bitmap.iter_set() {
                for s in 0..topo.sockets_on_node(node_idx) {
                    let cores = topo.job_cores(job_id, node_idx, s);
                    if cores > 0 {
                        out.push(cores);
                    }
                }
            }
            out
        }
        _ => unreachable!("tracks_cpu_counts guards this arm"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeTopo {
        sockets_per_node: Vec<usize>,
        cores: std::collections::HashMap<(u32, usize, usize), u32>,
    }

    impl CoreTopology for FakeTopo {
        fn sockets_on_node(&self, node_idx: usize) -> usize {
            self.sockets_per_node[node_idx]
        }
        fn job_cores(&self, job_id: u32, node_idx: usize, socket_idx: usize) -> u32 {
            *self
                .cores
                .get(&(job_id, node_idx, socket_idx))
                .unwrap_or(&0)
        }
    }

    #[test]
    fn phys_res_cnt_run_length_lookup() {
        let prc = PhysResCnt::from_groups(vec![(4, 3), (8, 2)]);
        assert_eq!(prc.total_slots(), 5);
        assert_eq!(prc.at(0), 4);
        assert_eq!(prc.at(2), 4);
        assert_eq!(prc.at(3), 8);
        assert_eq!(prc.at(4), 8);
    }

    #[test]
    fn phys_res_cnt_from_flat_groups_runs() {
        let prc = PhysResCnt::from_flat(&[4, 4, 4, 8, 8]);
        assert_eq!(prc.at(1), 4);
        assert_eq!(prc.at(4), 8);
    }

    #[test]
    fn job_to_resmap_node_granularity_copies_bitmap() {
        let mut nb = Bitmap::new(4);
        nb.set(1);
        let topo = FakeTopo {
            sockets_per_node: vec![1; 4],
            cores: Default::default(),
        };
        let rm = job_to_resmap(Granularity::Node, &nb, 1, &topo, 4);
        assert_eq!(rm, nb);
    }

    #[test]
    fn job_to_resmap_socket_granularity_expands_per_node() {
        let mut nb = Bitmap::new(2);
        nb.set(0);
        nb.set(1);
        let mut cores = std::collections::HashMap::new();
        cores.insert((7u32, 0usize, 1usize), 2u32); // node0/socket1
        cores.insert((7u32, 1usize, 0usize), 4u32); // node1/socket0
        let topo = FakeTopo {
            sockets_per_node: vec![2, 2],
            cores,
        };
        let rm = job_to_resmap(Granularity::Socket, &nb, 7, &topo, 4);
        assert!(!rm.is_set(0)); // node0/socket0: no cores
        assert!(rm.is_set(1)); // node0/socket1
        assert!(rm.is_set(2)); // node1/socket0
        assert!(!rm.is_set(3));
    }

    #[test]
    fn alloc_cpus_core_granularity_matches_set_bit_order() {
        let mut nb = Bitmap::new(2);
        nb.set(0);
        nb.set(1);
        let mut cores = std::collections::HashMap::new();
        cores.insert((3u32, 0usize, 0usize), 2u32);
        cores.insert((3u32, 1usize, 0usize), 6u32);
        let topo = FakeTopo {
            sockets_per_node: vec![1, 1],
            cores,
        };
        let demand = alloc_cpus(Granularity::Core, &nb, 3, &topo);
        assert_eq!(demand, vec![2, 6]);
    }
}
