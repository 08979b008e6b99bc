//! Partition row engine, priority-preemptive scheduler coordinator, and
//! timeslicer for GANG, built on the resource model and job state in
//! [`gang_core`].

pub mod config;
pub mod coordinator;
pub mod jobsource;
pub mod partition;
pub mod timeslicer;

pub use config::GangConfig;
pub use coordinator::GangScheduler;
pub use jobsource::{ExternalJob, ExternalJobState, JobSource, PartitionSource, PartitionSpec};
pub use partition::{
    add_job_to_active, build_active_row, job_fits_in_active_row, update_active_row, GsPart,
    RowUpdateEffects,
};
