//! Per-task stdio endpoints (C4): the stdin writer, and the stdout/stderr
//! readers with line-mode framing.
//!
//! A task's stdin is a pipe this process writes into; its stdout/stderr
//! are pipes this process reads from. Both directions go through the
//! shared [`iomux_core::BufferPool`] so a slow consumer applies
//! backpressure instead of unbounded growth.

use iomux_core::{BufferPool, FrameHeader, MsgType, PooledBuf, Result};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::os::fd::RawFd;

/// Outbound queue plus the raw fd for a task's stdin pipe. Bytes queued
/// via `enqueue` are drained into the pipe as it reports writable.
pub struct TaskWriter {
    fd: RawFd,
    gtaskid: u16,
    ltaskid: u16,
    queue: VecDeque<PooledBuf>,
    cursor: usize,
    eof_pending: bool,
    closed: bool,
}

impl TaskWriter {
    pub fn new(fd: RawFd, gtaskid: u16, ltaskid: u16) -> Self {
        Self {
            fd,
            gtaskid,
            ltaskid,
            queue: VecDeque::new(),
            cursor: 0,
            eof_pending: false,
            closed: false,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn gtaskid(&self) -> u16 {
        self.gtaskid
    }

    pub fn ltaskid(&self) -> u16 {
        self.ltaskid
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Queue raw payload bytes (already stripped of any wire framing) for
    /// delivery to this task's stdin.
    pub fn enqueue(&mut self, buf: PooledBuf) {
        if !self.closed {
            self.queue.push_back(buf);
        }
    }

    /// A zero-length STDIN/ALLSTDIN frame closes the task's stdin once
    /// the queue drains (§4.1, §8 EOF propagation).
    pub fn enqueue_eof(&mut self) {
        self.eof_pending = true;
    }

    pub fn writable(&self) -> bool {
        !self.closed && (!self.queue.is_empty() || self.eof_pending)
    }

    /// Drain as much of the front buffer as the pipe accepts. Returns
    /// `Ok(true)` if the writer closed its fd this call (EOF reached and
    /// queue empty, or the peer hung up).
    pub fn on_writable(&mut self) -> Result<bool> {
        while let Some(buf) = self.queue.front() {
            let wrote = buf.with_bytes(|bytes| {
                let remaining = &bytes[self.cursor..];
                write_nonblocking(self.fd, remaining)
            })?;
            match wrote {
                Some(n) if self.cursor + n >= buf.len() => {
                    self.cursor = 0;
                    self.queue.pop_front();
                }
                Some(n) => {
                    self.cursor += n;
                    return Ok(false);
                }
                None => return Ok(false), // would block
            }
        }

        if self.eof_pending && self.queue.is_empty() {
            self.close();
            return Ok(true);
        }
        Ok(false)
    }

    fn close(&mut self) {
        if !self.closed {
            unsafe { libc::close(self.fd) };
            self.closed = true;
        }
    }
}

impl Drop for TaskWriter {
    fn drop(&mut self) {
        self.close();
    }
}

fn write_nonblocking(fd: RawFd, bytes: &[u8]) -> Result<Option<usize>> {
    if bytes.is_empty() {
        return Ok(Some(0));
    }
    let ret = unsafe { libc::write(fd, bytes.as_ptr() as *const libc::c_void, bytes.len()) };
    if ret >= 0 {
        return Ok(Some(ret as usize));
    }
    let errno = std::io::Error::last_os_error();
    match errno.raw_os_error() {
        Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK) => Ok(None),
        Some(libc::EPIPE) => Err(iomux_core::IoMuxError::PeerGone),
        _ => Err(iomux_core::IoMuxError::Os(errno.raw_os_error().unwrap_or(0))),
    }
}

/// Small growable byte ring used to accumulate a task's stdout/stderr
/// between framing boundaries. Unlike `PooledBuf` (fixed-capacity, wire
/// sized) this just tracks "bytes read but not yet framed".
#[derive(Default)]
struct CircularBuf {
    data: VecDeque<u8>,
}

impl CircularBuf {
    fn push(&mut self, bytes: &[u8]) {
        self.data.extend(bytes.iter().copied());
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    /// How many leading bytes the framing policy would take right now,
    /// without removing them — callers check a pool buffer is available
    /// *before* committing to [`take_len`], so backpressure never drops
    /// bytes that have already left the accumulator.
    fn peek_len(&self, line_mode: bool, max: usize) -> Option<usize> {
        if self.data.is_empty() {
            return None;
        }
        let newline_at = if line_mode {
            self.data.iter().position(|&b| b == b'\n')
        } else {
            None
        };
        match newline_at {
            Some(idx) => Some((idx + 1).min(max)),
            None if self.data.len() >= max => Some(max),
            None => None,
        }
    }

    fn take_len(&mut self, n: usize) -> Vec<u8> {
        self.data.drain(..n).collect()
    }

    /// In line-mode, find the first newline and split there; otherwise
    /// take up to `max` bytes. Returns `None` if nothing meets the
    /// framing policy yet.
    fn take_frame(&mut self, line_mode: bool, max: usize) -> Option<Vec<u8>> {
        let len = self.peek_len(line_mode, max)?;
        Some(self.take_len(len))
    }

    /// Force out whatever remains, regardless of framing policy (used on
    /// EOF so a trailing partial line is not lost).
    fn take_remainder(&mut self) -> Option<Vec<u8>> {
        if self.data.is_empty() {
            None
        } else {
            Some(self.data.drain(..).collect())
        }
    }
}

/// Reads one task's stdout or stderr pipe, frames the bytes per
/// [`crate::config::ReactorConfig::buffered_stdio`], and hands completed
/// frames to the coordinator via [`TaskReader::take_ready_frames`].
pub struct TaskReader {
    fd: RawFd,
    gtaskid: u16,
    ltaskid: u16,
    msg_type: MsgType,
    line_mode: bool,
    accum: CircularBuf,
    ready: VecDeque<PooledBuf>,
    eof: bool,
}

impl TaskReader {
    pub fn new(fd: RawFd, gtaskid: u16, ltaskid: u16, msg_type: MsgType, line_mode: bool) -> Self {
        assert!(matches!(msg_type, MsgType::Stdout | MsgType::Stderr));
        Self {
            fd,
            gtaskid,
            ltaskid,
            msg_type,
            line_mode,
            accum: CircularBuf::default(),
            ready: VecDeque::new(),
            eof: false,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn gtaskid(&self) -> u16 {
        self.gtaskid
    }

    pub fn msg_type(&self) -> MsgType {
        self.msg_type
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn readable(&self) -> bool {
        !self.eof
    }

    /// Read available bytes off the pipe, run the framing policy, and
    /// stage any complete frames (encoded with their wire header) onto
    /// `pool` buffers for the coordinator to route.
    pub fn on_readable(&mut self, pool: &BufferPool) -> Result<()> {
        let mut scratch = [0u8; iomux_core::MAX_PAYLOAD];
        loop {
            let n = unsafe {
                libc::read(
                    self.fd,
                    scratch.as_mut_ptr() as *mut libc::c_void,
                    scratch.len(),
                )
            };
            if n > 0 {
                self.accum.push(&scratch[..n as usize]);
                self.drain_frames(pool);
                if (n as usize) < scratch.len() {
                    break;
                }
                continue;
            }
            if n == 0 {
                // Don't commit to EOF until the trailing remainder and the
                // EOF marker itself are both framed — if the pool is out of
                // buffers, leave the fd open and undrained so the next
                // `on_readable` (still level-triggered readable on EOF)
                // retries this same flush (backpressure, spec.md:71).
                if !self.flush_eof(pool) {
                    break;
                }
                self.eof = true;
                unsafe { libc::close(self.fd) };
                break;
            }
            let errno = std::io::Error::last_os_error();
            match errno.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK) => break,
                Some(code) => return Err(iomux_core::IoMuxError::Os(code)),
                None => break,
            }
        }
        Ok(())
    }

    /// Frame as many complete chunks as the framing policy and pool
    /// capacity allow. Bytes for which no pool buffer is available stay in
    /// `accum` untouched and are retried on the next call.
    fn drain_frames(&mut self, pool: &BufferPool) {
        loop {
            let Some(len) = self.accum.peek_len(self.line_mode, iomux_core::MAX_PAYLOAD) else {
                break;
            };
            let Some(buf) = pool.acquire_outgoing() else {
                break;
            };
            let chunk = self.accum.take_len(len);
            self.fill_frame(buf, &chunk, false);
        }
    }

    /// Attempt to frame the trailing remainder (if any) and the EOF
    /// marker. Returns `false` if pool exhaustion left something unframed.
    fn flush_eof(&mut self, pool: &BufferPool) -> bool {
        if self.accum.len() > 0 {
            let Some(buf) = pool.acquire_outgoing() else {
                return false;
            };
            let rest = self.accum.take_remainder().expect("checked non-empty above");
            self.fill_frame(buf, &rest, false);
        }
        let Some(buf) = pool.acquire_outgoing() else {
            return false;
        };
        self.fill_frame(buf, &[], true);
        true
    }

    fn fill_frame(&mut self, buf: PooledBuf, payload: &[u8], eof: bool) {
        let header = if eof {
            FrameHeader::eof(self.msg_type, self.gtaskid, self.ltaskid)
        } else {
            FrameHeader {
                msg_type: self.msg_type,
                gtaskid: self.gtaskid,
                ltaskid: self.ltaskid,
                length: payload.len() as u32,
            }
        };
        let mut wire = Vec::with_capacity(iomux_core::HEADER_SIZE + payload.len());
        wire.extend_from_slice(&header.encode());
        wire.extend_from_slice(payload);
        buf.fill(&wire);
        self.ready.push_back(buf);
    }

    /// Drain any frames staged by `on_readable` for the coordinator to
    /// route to attached clients.
    pub fn take_ready_frames(&mut self) -> Vec<PooledBuf> {
        self.ready.drain(..).collect()
    }

    /// Re-attempt framing without a fresh read — the coordinator calls this
    /// on every reader once an outgoing buffer is released (§4.6 "on
    /// outgoing release"), so a reader that deferred packing due to pool
    /// exhaustion doesn't wait for its own next readability event.
    pub fn invite_more_packing(&mut self, pool: &BufferPool) {
        self.drain_frames(pool);
    }
}

impl Drop for TaskReader {
    fn drop(&mut self) {
        if !self.eof {
            unsafe { libc::close(self.fd) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circular_buf_line_mode_splits_on_newline() {
        let mut cb = CircularBuf::default();
        cb.push(b"hello\nworld");
        let frame = cb.take_frame(true, 1024).unwrap();
        assert_eq!(frame, b"hello\n");
        assert!(cb.take_frame(true, 1024).is_none());
        assert_eq!(cb.take_remainder().unwrap(), b"world");
    }

    #[test]
    fn circular_buf_non_line_mode_takes_max() {
        let mut cb = CircularBuf::default();
        cb.push(b"abcdef");
        let frame = cb.take_frame(false, 4).unwrap();
        assert_eq!(frame, b"abcd");
        assert!(cb.take_frame(false, 4).is_none());
    }

    #[test]
    fn writer_queues_and_reports_writable() {
        let pool = BufferPool::new(1, 1);
        let buf = pool.acquire_incoming().unwrap();
        buf.fill(b"payload");
        let mut w = TaskWriter::new(-1, 0, 0, );
        assert!(!w.writable());
        w.enqueue(buf);
        assert!(w.writable());
    }
}
