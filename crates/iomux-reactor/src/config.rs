//! IO-MUX reactor/coordinator configuration.

use iomux_core::MAX_PAYLOAD;

/// Builder-style configuration for a [`crate::coordinator::Coordinator`].
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Number of buffers in the incoming (client stdin) free list.
    pub n_in: usize,
    /// Number of buffers in the outgoing (task stdout/stderr) free list.
    pub n_out: usize,
    /// Maximum number of recent output frames retained for late-attaching
    /// clients.
    pub stdio_max_msg_cache: usize,
    /// Line-mode framing: bound a task output frame at the first newline
    /// within `MAX_PAYLOAD` bytes rather than always draining the max.
    pub buffered_stdio: bool,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            n_in: 64,
            n_out: 64,
            stdio_max_msg_cache: 64,
            buffered_stdio: true,
        }
    }
}

impl ReactorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_in(mut self, n: usize) -> Self {
        self.n_in = n;
        self
    }

    pub fn n_out(mut self, n: usize) -> Self {
        self.n_out = n;
        self
    }

    pub fn stdio_max_msg_cache(mut self, n: usize) -> Self {
        self.stdio_max_msg_cache = n;
        self
    }

    pub fn buffered_stdio(mut self, enabled: bool) -> Self {
        self.buffered_stdio = enabled;
        self
    }

    /// Size pools from a concrete job shape: `ntasks` stdin writers plus
    /// two readers each (stdout+stderr), and a client cap.
    pub fn for_job(ntasks: usize, max_clients: usize) -> Self {
        Self::default()
            .n_in(max_clients.max(1) * 4)
            .n_out((ntasks.max(1) * 2) * 4)
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.n_in == 0 {
            return Err("n_in must be at least 1");
        }
        if self.n_out == 0 {
            return Err("n_out must be at least 1");
        }
        if self.stdio_max_msg_cache == 0 {
            return Err("stdio_max_msg_cache must be at least 1");
        }
        if MAX_PAYLOAD == 0 {
            return Err("MAX_PAYLOAD must be nonzero");
        }
        Ok(())
    }
}
