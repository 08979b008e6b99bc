//! IO-MUX per-node stdio multiplexer daemon.
//!
//! # Environment variables
//!
//! - `IOMUX_LISTEN=<port>` — TCP port clients attach to (default: 9420)
//! - `IOMUX_N_IN=<n>` — incoming (client stdin) buffer pool size
//! - `IOMUX_N_OUT=<n>` — outgoing (task stdout/stderr) buffer pool size
//! - `IOMUX_STDIO_MAX_MSG_CACHE=<n>` — replay cache cap in frames
//! - `IOMUX_BUFFERED_STDIO=1` — enable line-mode framing
//! - `IOMUX_LOG_LEVEL=debug` — set log level

use crossbeam_queue::ArrayQueue;
use iomux_core::log_info;
use iomux_reactor::{Coordinator, ReactorConfig};
use std::net::TcpListener;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

fn env_get<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => v == "1" || v.eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}

/// Accept loop: runs on its own thread (the only cross-thread boundary
/// besides `signal_wakeup()`, per §5) and hands fresh connection fds to
/// the reactor thread over a bounded queue, in the style of
/// `ksvc_module::fixed_pool`'s `ArrayQueue`-based work handoff.
fn spawn_acceptor(
    listener: TcpListener,
    queue: Arc<ArrayQueue<RawFd>>,
    wakeup: iomux_reactor::reactor::Wakeup,
) {
    std::thread::Builder::new()
        .name("iomux-acceptor".into())
        .spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let fd = stream.as_raw_fd();
                std::mem::forget(stream); // ownership transfers to the coordinator
                unsafe {
                    libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK);
                }
                if queue.push(fd).is_err() {
                    unsafe { libc::close(fd) }; // backpressure: queue full, drop the connection
                    continue;
                }
                wakeup.signal();
            }
        })
        .expect("failed to spawn acceptor thread");
}

fn main() -> std::io::Result<()> {
    iomux_core::log::init();

    // This is the reactor thread (§5) — block SIGHUP/SIGPIPE before any fd
    // work so a hung-up client is only ever observed via EPIPE, never a
    // stray signal tearing down the process.
    iomux_reactor::signal::block_hup_and_pipe()
        .expect("failed to block SIGHUP/SIGPIPE on the reactor thread");

    let port: u16 = env_get("IOMUX_LISTEN", 9420);
    let cfg = ReactorConfig::new()
        .n_in(env_get("IOMUX_N_IN", 64))
        .n_out(env_get("IOMUX_N_OUT", 64))
        .stdio_max_msg_cache(env_get("IOMUX_STDIO_MAX_MSG_CACHE", 64))
        .buffered_stdio(env_get_bool("IOMUX_BUFFERED_STDIO", true));
    cfg.validate().expect("invalid ReactorConfig");

    let mut coordinator = Coordinator::new(cfg)?;

    let listener = TcpListener::bind(("0.0.0.0", port))?;
    log_info!("listening on 0.0.0.0:{}", port);

    let pending: Arc<ArrayQueue<RawFd>> = Arc::new(ArrayQueue::new(256));
    // SAFETY: the acceptor thread only ever calls `signal()`, the one
    // operation `Wakeup` documents as safe from any thread.
    let wakeup_clone = unsafe { clone_wakeup(coordinator.reactor().wakeup()) };
    spawn_acceptor(listener, Arc::clone(&pending), wakeup_clone);

    loop {
        while let Some(fd) = pending.pop() {
            let id = coordinator.attach_client(fd);
            log_info!("client {} attached (fd {})", id, fd);
        }
        coordinator.run_once().unwrap_or_else(|e| {
            iomux_core::log_error!("reactor pass failed: {}", e);
        });
        if coordinator.reactor().is_shutdown() {
            break;
        }
    }
    Ok(())
}

/// `Wakeup` owns its eventfd and closes it on drop; the daemon needs the
/// acceptor thread to hold a *view* onto the same fd without taking
/// ownership, so this duplicates the fd with `dup(2)` rather than
/// aliasing the original `Wakeup` value across threads.
unsafe fn clone_wakeup(wakeup: &iomux_reactor::reactor::Wakeup) -> iomux_reactor::reactor::Wakeup {
    let dup_fd = libc::dup(wakeup.fd());
    iomux_reactor::reactor::Wakeup::from_raw_fd(dup_fd)
}
