//! GANG gang/preemptive cluster scheduler daemon.
//!
//! Wires a file-backed [`PartitionSource`] and an in-memory
//! [`JobSource`] to [`GangScheduler`] for demonstration and integration
//! testing — the authoritative job/partition lists and the `SIGSTOP`
//! primitive are external collaborators the real deployment supplies
//! (§1 non-goals).
//!
//! # Usage
//!
//! `gangd --partitions <file>`
//!
//! The partitions file is a tiny whitespace-delimited fixture, one
//! partition per line: `<name> <priority>`.
//!
//! # Environment variables
//!
//! - `GANG_LOG_LEVEL=debug`
//! - `GANG_TIMESLICE_SECS=<n>`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use gang_core::CoreTopology;
use gang_scheduler::{ExternalJob, GangConfig, GangScheduler, JobSource, PartitionSource, PartitionSpec};

struct FlatTopology;
impl CoreTopology for FlatTopology {
    fn sockets_on_node(&self, _node_idx: usize) -> usize {
        1
    }
    fn job_cores(&self, _job_id: u32, _node_idx: usize, _socket_idx: usize) -> u32 {
        1
    }
}

/// In-memory job list a companion test/demo module can mutate to
/// simulate `job_start`/`job_fini`/`job_scan` traffic.
struct InMemoryJobSource {
    jobs: Mutex<Vec<ExternalJob>>,
    topo: FlatTopology,
}

impl JobSource for InMemoryJobSource {
    fn list_jobs(&self) -> Vec<ExternalJob> {
        self.jobs.lock().expect("job list poisoned").clone()
    }

    fn topology(&self) -> &dyn CoreTopology {
        &self.topo
    }

    fn job_suspend(&self, job_id: u32, suspend: bool) {
        let action = if suspend { "SUSPEND" } else { "RESUME" };
        gang_core::log_info!("job_suspend({}, {})", job_id, action);
    }
}

struct FilePartitionSource {
    specs: Vec<PartitionSpec>,
}

impl FilePartitionSource {
    fn load(path: &str) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let specs = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let name = parts.next()?.to_string();
                let priority: i32 = parts.next()?.parse().ok()?;
                Some(PartitionSpec { name, priority })
            })
            .collect();
        Ok(Self { specs })
    }
}

impl PartitionSource for FilePartitionSource {
    fn list_partitions(&self) -> Vec<PartitionSpec> {
        self.specs.clone()
    }
}

fn env_get<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Release);
}

fn main() {
    gang_core::log::init();

    let mut args = std::env::args().skip(1);
    let mut partitions_file = None;
    while let Some(arg) = args.next() {
        if arg == "--partitions" {
            partitions_file = args.next();
        }
    }
    let Some(partitions_file) = partitions_file else {
        eprintln!("usage: gangd --partitions <file>");
        std::process::exit(2);
    };

    let partition_source = FilePartitionSource::load(&partitions_file)
        .unwrap_or_else(|e| panic!("failed to read partitions file {}: {}", partitions_file, e));

    let job_source = std::sync::Arc::new(InMemoryJobSource {
        jobs: Mutex::new(Vec::new()),
        topo: FlatTopology,
    });

    let config =
        GangConfig::new().timeslice(std::time::Duration::from_secs(env_get("GANG_TIMESLICE_SECS", 30)));

    let resmap_size = partition_source.specs.len().max(1) * 8;
    let phys_res_cnt = gang_core::PhysResCnt::from_groups(vec![(1, resmap_size as u32)]);

    let scheduler = GangScheduler::init(config, resmap_size, phys_res_cnt, &partition_source, job_source)
        .expect("GANG init failed");

    unsafe {
        libc::signal(libc::SIGINT, on_sigint as usize);
    }

    gang_core::log_info!("gangd running with {} partitions", partition_source.specs.len());
    while !SHUTDOWN.load(Ordering::Acquire) {
        std::thread::sleep(std::time::Duration::from_secs(1));
        scheduler.job_scan();
    }

    gang_core::log_info!("gangd shutting down");
    scheduler.fini();
}
