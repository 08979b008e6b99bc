//! Level-triggered event reactor (C1).
//!
//! A thin wrapper around `nix::poll::poll`: callers hand in the fds they
//! currently care about and the interest (readable/writable) for each,
//! the reactor waits, and returns which of those fds are ready. The
//! reactor itself holds no registrant state — that lives in
//! [`crate::coordinator::Coordinator`], which rebuilds the poll-target
//! list from its own task/client endpoints every pass. This mirrors how
//! the teacher's `ksvc-gvthread::reactor` keeps the dispatch loop generic
//! over whatever work items it is handed each iteration.

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::os::fd::{AsFd, BorrowedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

/// What a registrant currently wants to be notified about.
#[derive(Debug, Clone, Copy, Default)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub fn none() -> Self {
        Self::default()
    }

    fn to_poll_flags(self) -> PollFlags {
        let mut flags = PollFlags::empty();
        if self.readable {
            flags |= PollFlags::POLLIN;
        }
        if self.writable {
            flags |= PollFlags::POLLOUT;
        }
        flags
    }
}

/// Which direction(s) came back ready for a given fd.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ready {
    pub readable: bool,
    pub writable: bool,
    /// The kernel reported `POLLHUP`/`POLLERR` — treat as readable/writable
    /// so the handler observes the EOF/EPIPE on its next syscall rather
    /// than being starved of a wakeup.
    pub hup_or_err: bool,
}

/// Self-pipe-equivalent cross-thread wakeup, backed by a non-blocking
/// `eventfd`. Grounded on `ksvc_module::eventfd_notifier::EventFdNotifier`:
/// writes never block, `EAGAIN` on an already-pending wakeup is fine, and
/// the fd is closed on drop since the reactor owns it.
pub struct Wakeup {
    fd: RawFd,
}

impl Wakeup {
    pub fn new() -> std::io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Wrap an already-open eventfd (e.g. a `dup(2)` of another
    /// `Wakeup`'s fd handed to a second thread that only ever calls
    /// `signal()`). The caller is responsible for the fd actually being
    /// an eventfd opened in non-blocking mode.
    pub unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Self { fd }
    }

    /// Safe to call from any thread.
    pub fn signal(&self) {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let errno = unsafe { *libc::__errno_location() };
            debug_assert!(
                errno == libc::EAGAIN,
                "unexpected eventfd write error: {errno}"
            );
        }
    }

    /// Drain the counter after a wakeup-triggered pass so the next
    /// `poll()` doesn't return immediately again.
    pub fn drain(&self) {
        let mut val: u64 = 0;
        unsafe {
            libc::read(
                self.fd,
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }
}

impl Drop for Wakeup {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
        }
    }
}

/// One poll target handed to [`Reactor::wait`].
pub struct PollTarget {
    pub fd: RawFd,
    pub interest: Interest,
}

/// The reactor: owns the wakeup eventfd and the shutdown flag, and knows
/// how to turn a registration-ordered list of `(fd, interest)` pairs into
/// a list of ready fds. Dispatch order matches registration order because
/// `wait` preserves the input order of `targets` in its output.
pub struct Reactor {
    wakeup: Wakeup,
    shutdown: AtomicBool,
}

impl Reactor {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            wakeup: Wakeup::new()?,
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn wakeup(&self) -> &Wakeup {
        &self.wakeup
    }

    /// Force the next (or in-progress) `wait()` to return immediately.
    /// Safe to call from any thread (§5).
    pub fn signal_wakeup(&self) {
        self.wakeup.signal();
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.signal_wakeup();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Block until at least one target (or the wakeup fd) is ready.
    /// Returns `Ready` entries parallel to `targets`, in the same order.
    pub fn wait(&self, targets: &[PollTarget]) -> std::io::Result<Vec<Ready>> {
        // Safety: these fds outlive the poll() call; we never close them
        // through this borrow.
        let wakeup_fd = unsafe { BorrowedFd::borrow_raw(self.wakeup.fd()) };
        let mut pollfds: Vec<PollFd> = Vec::with_capacity(targets.len() + 1);
        pollfds.push(PollFd::new(wakeup_fd, PollFlags::POLLIN));
        for t in targets {
            let fd = unsafe { BorrowedFd::borrow_raw(t.fd) };
            pollfds.push(PollFd::new(fd, t.interest.to_poll_flags()));
        }

        loop {
            match poll(&mut pollfds, PollTimeout::NONE) {
                Ok(_) => break,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(std::io::Error::from(e)),
            }
        }

        if let Some(revents) = pollfds[0].revents() {
            if revents.contains(PollFlags::POLLIN) {
                self.wakeup.drain();
            }
        }

        let mut out = Vec::with_capacity(targets.len());
        for pfd in &pollfds[1..] {
            let revents = pfd.revents().unwrap_or(PollFlags::empty());
            out.push(Ready {
                readable: revents.contains(PollFlags::POLLIN),
                writable: revents.contains(PollFlags::POLLOUT),
                hup_or_err: revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR),
            });
        }
        Ok(out)
    }
}

#[allow(unused)]
fn _assert_target_trait_object_safe(_: &dyn AsFd) {}
