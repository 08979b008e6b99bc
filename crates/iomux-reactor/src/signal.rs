//! Signal hygiene for the reactor thread (§5): SIGHUP and SIGPIPE must
//! never tear down the process out from under an in-flight write to a
//! hung-up client — we detect that via `EPIPE` ourselves and treat it as
//! [`iomux_core::IoMuxError::PeerGone`].

use nix::sys::signal::{SigSet, Signal};

/// Block `SIGHUP` and `SIGPIPE` on the calling thread. Call once from the
/// reactor thread before entering its poll loop.
pub fn block_hup_and_pipe() -> nix::Result<()> {
    let mut set = SigSet::empty();
    set.add(Signal::SIGHUP);
    set.add(Signal::SIGPIPE);
    set.thread_block()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_hup_and_pipe_does_not_error() {
        // Safe to call repeatedly/from a test thread; blocking is additive.
        block_hup_and_pipe().expect("sigprocmask should succeed");
    }
}
