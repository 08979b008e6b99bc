//! Resource model, per-job state, and ambient error/logging types for the
//! GANG gang/preemptive scheduler. See [`gang_scheduler`] for the
//! partition row engine and scheduler coordinator built on top of these.
//!
//! [`gang_scheduler`]: https://docs.rs/gang-scheduler

pub mod bitmap;
pub mod error;
pub mod job;
pub mod log;
pub mod resource;

pub use bitmap::Bitmap;
pub use error::{GangError, Result};
pub use job::{GsJob, RowState, SigState};
pub use resource::{alloc_cpus, job_to_resmap, CoreTopology, Granularity, PhysResCnt};
