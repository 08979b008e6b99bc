//! GANG scheduler configuration — builder-style, field-for-field in the
//! shape of the teacher's `SchedulerConfig`.

use std::time::Duration;

use gang_core::Granularity;

#[derive(Debug, Clone)]
pub struct GangConfig {
    /// Resource granularity selected from `select_type_param` (§6).
    pub gr_type: Granularity,
    /// `sched_time_slice`: how long a partition's active row runs before
    /// the timeslicer rotates it.
    pub timeslice: Duration,
    /// `fast_schedule`: use advertised (`config_ptr`) capacity rather
    /// than live per-node counts. Affects how `PhysResCnt` is built, not
    /// anything in this crate directly — carried through for the daemon
    /// to act on.
    pub fast_schedule: bool,
    /// Bound on how long `fini()` waits for the timeslicer to notice its
    /// shutdown flag before falling back to a hard join timeout (§5).
    pub shutdown_grace: Duration,
}

impl Default for GangConfig {
    fn default() -> Self {
        Self {
            gr_type: Granularity::Cpu,
            timeslice: Duration::from_secs(30),
            fast_schedule: true,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl GangConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gr_type(mut self, gr_type: Granularity) -> Self {
        self.gr_type = gr_type;
        self
    }

    pub fn timeslice(mut self, d: Duration) -> Self {
        self.timeslice = d;
        self
    }

    pub fn fast_schedule(mut self, enabled: bool) -> Self {
        self.fast_schedule = enabled;
        self
    }

    pub fn shutdown_grace(mut self, d: Duration) -> Self {
        self.shutdown_grace = d;
        self
    }

    /// Favors responsiveness to preemption over scheduler overhead.
    pub fn low_latency() -> Self {
        Self::default().timeslice(Duration::from_secs(5))
    }

    /// Favors fewer rotations over responsiveness — appropriate for
    /// long-running, few-job partitions.
    pub fn low_overhead() -> Self {
        Self::default().timeslice(Duration::from_secs(120))
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.timeslice.is_zero() {
            return Err("timeslice must be nonzero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_validates() {
        assert!(GangConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_timeslice_rejected() {
        let cfg = GangConfig::new().timeslice(Duration::ZERO);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn presets_differ_from_default() {
        assert!(GangConfig::low_latency().timeslice < GangConfig::default().timeslice);
        assert!(GangConfig::low_overhead().timeslice > GangConfig::default().timeslice);
    }
}
