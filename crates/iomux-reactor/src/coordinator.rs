//! The IO-MUX coordinator (C6): owns the buffer pool, every task and
//! client endpoint, the replay cache for late attachers, and drives the
//! reactor's poll loop. This is the single-threaded heart of the daemon
//! (§5) — no endpoint is ever touched from a second thread.

use crate::client::{Client, InboundFrame};
use crate::config::ReactorConfig;
use crate::reactor::{Interest, PollTarget, Reactor};
use crate::task_io::{TaskReader, TaskWriter};
use iomux_core::{BufferPool, IoMuxError, MsgType, PooledBuf, Result};
use std::collections::VecDeque;
use std::os::fd::RawFd;

/// Identifies a registered task's pair of stdout/stderr readers plus its
/// stdin writer by index into the coordinator's vectors.
type TaskSlot = usize;

struct Task {
    writer: TaskWriter,
    readers: [TaskReader; 2], // [stdout, stderr]
    done: bool,
}

pub struct Coordinator {
    cfg: ReactorConfig,
    pool: BufferPool,
    reactor: Reactor,
    tasks: Vec<Task>,
    clients: Vec<Client>,
    replay_cache: VecDeque<PooledBuf>,
    next_client_id: u64,
    /// Client stdin frames that couldn't be enqueued for lack of an
    /// incoming buffer — retried in order at the start of every pass
    /// rather than dropped (spec.md:71 backpressure contract).
    pending_client_input: VecDeque<InboundFrame>,
    /// Last `outgoing_release_gen` observed, to detect the "on outgoing
    /// release" moment (§4.6) without re-driving every reader every pass.
    last_outgoing_gen: u64,
}

impl Coordinator {
    pub fn new(cfg: ReactorConfig) -> std::io::Result<Self> {
        let pool = BufferPool::new(cfg.n_in, cfg.n_out);
        let reactor = Reactor::new()?;
        let last_outgoing_gen = pool.outgoing_release_gen();
        Ok(Self {
            cfg,
            pool,
            reactor,
            tasks: Vec::new(),
            clients: Vec::new(),
            replay_cache: VecDeque::new(),
            next_client_id: 1,
            pending_client_input: VecDeque::new(),
            last_outgoing_gen,
        })
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    /// Register a new task's three pipe ends. `stdout_fd`/`stderr_fd` are
    /// read ends already set non-blocking by the caller; `stdin_fd` is
    /// the write end.
    pub fn add_task(
        &mut self,
        gtaskid: u16,
        ltaskid: u16,
        stdin_fd: RawFd,
        stdout_fd: RawFd,
        stderr_fd: RawFd,
    ) -> TaskSlot {
        let writer = TaskWriter::new(stdin_fd, gtaskid, ltaskid);
        let readers = [
            TaskReader::new(
                stdout_fd,
                gtaskid,
                ltaskid,
                MsgType::Stdout,
                self.cfg.buffered_stdio,
            ),
            TaskReader::new(
                stderr_fd,
                gtaskid,
                ltaskid,
                MsgType::Stderr,
                self.cfg.buffered_stdio,
            ),
        ];
        self.tasks.push(Task {
            writer,
            readers,
            done: false,
        });
        self.tasks.len() - 1
    }

    /// Attach a new client fd, seeding its outbound queue from the replay
    /// cache so it doesn't miss output that arrived before it connected
    /// (§4.6).
    pub fn attach_client(&mut self, fd: RawFd) -> u64 {
        let id = self.next_client_id;
        self.next_client_id += 1;
        let mut client = Client::new(fd, id);
        for cached in &self.replay_cache {
            client.push_outbound(cached.clone());
        }
        self.clients.push(client);
        id
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Queue a frame to every attached client and retain it in the bounded
    /// replay cache.
    fn route_task_output(&mut self, buf: PooledBuf) {
        for client in &mut self.clients {
            client.push_outbound(buf.clone());
        }
        self.replay_cache.push_back(buf);
        while self.replay_cache.len() > self.cfg.stdio_max_msg_cache {
            self.replay_cache.pop_front();
        }
    }

    /// Route one decoded client frame: `Stdin` targets exactly the named
    /// task, `AllStdin` fans to every live task (§4.5). EOF payloads close
    /// the corresponding writer's stdin once drained.
    ///
    /// Returns `Ok(Some(frame))` when the incoming pool can't cover every
    /// buffer this frame needs — the frame is handed back untouched (no
    /// partial fan-out) for the caller to retry on a later pass, matching
    /// the backpressure contract rather than erroring or dropping it.
    fn try_route_client_input(&mut self, frame: InboundFrame) -> Result<Option<InboundFrame>> {
        let needed = match frame.msg_type {
            MsgType::Stdin => 1,
            MsgType::AllStdin => self.tasks.len(),
            other => {
                return Err(IoMuxError::ProtocolViolation(format!(
                    "client sent non-input message type {:?}",
                    other
                )));
            }
        };
        if !frame.payload.is_empty() && self.pool.free_incoming_count() < needed {
            return Ok(Some(frame));
        }
        match frame.msg_type {
            MsgType::Stdin => {
                if let Some(task) = self
                    .tasks
                    .iter_mut()
                    .find(|t| t.writer.gtaskid() == frame.gtaskid)
                {
                    enqueue_to_writer(&self.pool, &mut task.writer, &frame.payload);
                }
            }
            MsgType::AllStdin => {
                for task in &mut self.tasks {
                    enqueue_to_writer(&self.pool, &mut task.writer, &frame.payload);
                }
            }
            _ => unreachable!("non-input types rejected above"),
        }
        Ok(None)
    }

    /// Run one pass: build the poll target list from every live endpoint,
    /// wait for readiness, dispatch, and reap anything that finished.
    pub fn run_once(&mut self) -> Result<()> {
        let targets = self.build_targets();
        let ready = self
            .reactor
            .wait(&targets)
            .map_err(|e| IoMuxError::Os(e.raw_os_error().unwrap_or(0)))?;

        self.dispatch(&targets, &ready)?;
        self.reap_finished();
        Ok(())
    }

    fn build_targets(&self) -> Vec<PollTarget> {
        let mut targets = Vec::new();
        for task in &self.tasks {
            targets.push(PollTarget {
                fd: task.writer.fd(),
                interest: Interest {
                    readable: false,
                    writable: task.writer.writable(),
                },
            });
            for reader in &task.readers {
                targets.push(PollTarget {
                    fd: reader.fd(),
                    interest: Interest {
                        readable: reader.readable(),
                        writable: false,
                    },
                });
            }
        }
        for client in &self.clients {
            targets.push(PollTarget {
                fd: client.fd(),
                interest: Interest {
                    readable: !client.is_closed(),
                    writable: client.has_outbound(),
                },
            });
        }
        targets
    }

    fn dispatch(
        &mut self,
        targets: &[PollTarget],
        ready: &[crate::reactor::Ready],
    ) -> Result<()> {
        let mut idx = 0;
        let mut pending_frames: Vec<PooledBuf> = Vec::new();
        let mut pending_input: Vec<InboundFrame> = Vec::new();

        for task in &mut self.tasks {
            let r = &ready[idx];
            idx += 1;
            if (targets[idx - 1].interest.writable || r.hup_or_err) && !task.writer.is_closed() {
                let _ = task.writer.on_writable();
            }
            for reader in &mut task.readers {
                let r = &ready[idx];
                idx += 1;
                if r.readable || r.hup_or_err {
                    // Transient (pool exhaustion) errors are per-endpoint
                    // backpressure, not a reason to abort the rest of this
                    // pass for every other task/client.
                    if let Err(e) = reader.on_readable(&self.pool) {
                        if !e.is_transient() {
                            return Err(e);
                        }
                    }
                    pending_frames.extend(reader.take_ready_frames());
                }
            }
        }

        for client in &mut self.clients {
            let r = &ready[idx];
            idx += 1;
            if r.writable {
                if let Err(e) = client.on_writable() {
                    if !e.is_transient() {
                        return Err(e);
                    }
                }
            }
            if r.readable || r.hup_or_err {
                match client.on_readable() {
                    Ok(frames) => pending_input.extend(frames),
                    Err(e) if e.is_transient() => {}
                    Err(e) => return Err(e),
                }
            }
        }

        for buf in pending_frames {
            self.route_task_output(buf);
        }

        // Retry frames left over from a previous pass's backpressure ahead
        // of this pass's new ones, preserving per-client ordering.
        self.pending_client_input.extend(pending_input);
        let to_try: Vec<InboundFrame> = self.pending_client_input.drain(..).collect();
        for frame in to_try {
            if let Some(frame) = self.try_route_client_input(frame)? {
                self.pending_client_input.push_back(frame);
            }
        }

        let gen = self.pool.outgoing_release_gen();
        if gen != self.last_outgoing_gen {
            self.last_outgoing_gen = gen;
            self.invite_more_packing();
        }

        Ok(())
    }

    /// SPEC_FULL.md §4.6 "on outgoing release": once an outgoing buffer
    /// returns to the free list, walk every reader once so one that
    /// deferred framing under exhaustion doesn't wait for its own next
    /// readability event to resume packing.
    fn invite_more_packing(&mut self) {
        let mut pending_frames = Vec::new();
        for task in &mut self.tasks {
            for reader in &mut task.readers {
                reader.invite_more_packing(&self.pool);
                pending_frames.extend(reader.take_ready_frames());
            }
        }
        for buf in pending_frames {
            self.route_task_output(buf);
        }
    }

    /// Drop clients that hung up and tasks whose writer and both readers
    /// have gone terminal.
    fn reap_finished(&mut self) {
        self.clients.retain(|c| !c.is_closed());
        for task in &mut self.tasks {
            task.done =
                task.writer.is_closed() && task.readers.iter().all(|r| r.is_eof());
        }
        self.tasks.retain(|t| !t.done);
    }

    pub fn shutdown(&mut self) {
        self.reactor.request_shutdown();
        self.clients.clear();
        self.tasks.clear();
    }
}

/// Callers check `pool.free_incoming_count()` against how many buffers
/// this frame needs before calling this, so `acquire_incoming` succeeding
/// here is guaranteed (single-threaded — nothing else can have taken the
/// buffer between the check and this call).
fn enqueue_to_writer(pool: &BufferPool, writer: &mut TaskWriter, payload: &[u8]) {
    if payload.is_empty() {
        writer.enqueue_eof();
        return;
    }
    let Some(buf) = pool.acquire_incoming() else {
        return;
    };
    buf.fill(payload);
    writer.enqueue(buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_client_seeds_from_replay_cache() {
        let mut coord = Coordinator::new(ReactorConfig::default()).unwrap();
        let buf = coord.pool().acquire_outgoing().unwrap();
        buf.fill(b"cached");
        coord.route_task_output(buf);

        let id = coord.attach_client(-1);
        assert_eq!(coord.client_count(), 1);
        let client = coord.clients.iter().find(|c| c.id() == id).unwrap();
        assert!(client.has_outbound());
    }

    #[test]
    fn replay_cache_is_bounded() {
        let mut cfg = ReactorConfig::default();
        cfg.stdio_max_msg_cache = 2;
        let mut coord = Coordinator::new(cfg).unwrap();
        for i in 0..5u8 {
            let buf = coord.pool().acquire_outgoing().unwrap();
            buf.fill(&[i]);
            coord.route_task_output(buf);
        }
        assert_eq!(coord.replay_cache.len(), 2);
    }
}
