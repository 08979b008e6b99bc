//! Attached-client endpoint (C5): one TCP/unix-socket peer that receives
//! fanned-out task stdout/stderr and may submit stdin back to one task
//! (`Stdin`) or all tasks (`AllStdin`).

use iomux_core::{FrameHeader, IoMuxError, MsgType, PooledBuf, Result};
use std::collections::VecDeque;
use std::os::fd::RawFd;

/// A frame the client submitted, decoded and ready for the coordinator to
/// route to the named task's [`crate::task_io::TaskWriter`].
pub struct InboundFrame {
    pub msg_type: MsgType,
    pub gtaskid: u16,
    pub payload: Vec<u8>,
}

enum ReadState {
    Header { have: [u8; iomux_core::HEADER_SIZE], filled: usize },
    Payload { header: FrameHeader, have: Vec<u8> },
}

impl Default for ReadState {
    fn default() -> Self {
        ReadState::Header {
            have: [0u8; iomux_core::HEADER_SIZE],
            filled: 0,
        }
    }
}

/// One attached client connection.
pub struct Client {
    fd: RawFd,
    id: u64,
    out_queue: VecDeque<PooledBuf>,
    out_cursor: usize,
    read_state: ReadState,
    closed: bool,
}

impl Client {
    pub fn new(fd: RawFd, id: u64) -> Self {
        Self {
            fd,
            id,
            out_queue: VecDeque::new(),
            out_cursor: 0,
            read_state: ReadState::default(),
            closed: false,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Queue a frame for delivery — used both for live fan-out and to
    /// seed a newly attached client from the replay cache (§4.6).
    pub fn push_outbound(&mut self, buf: PooledBuf) {
        if !self.closed {
            self.out_queue.push_back(buf);
        }
    }

    pub fn has_outbound(&self) -> bool {
        !self.out_queue.is_empty()
    }

    /// Drain queued frames onto the socket. Returns `Ok(true)` if the
    /// peer hung up (`EPIPE`) and the client should be torn down.
    pub fn on_writable(&mut self) -> Result<bool> {
        while let Some(buf) = self.out_queue.front() {
            let sent = buf.with_bytes(|bytes| {
                let remaining = &bytes[self.out_cursor..];
                write_nonblocking(self.fd, remaining)
            });
            match sent {
                Ok(Some(n)) if self.out_cursor + n >= buf.len() => {
                    self.out_cursor = 0;
                    self.out_queue.pop_front();
                }
                Ok(Some(n)) => {
                    self.out_cursor += n;
                    return Ok(false);
                }
                Ok(None) => return Ok(false),
                Err(IoMuxError::PeerGone) => {
                    self.mark_closed();
                    return Ok(true);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    /// Read available bytes and decode as many complete frames as are
    /// present. ALLSTDIN frames are returned with `gtaskid` ignored by
    /// the caller (coordinator fans them to every task); STDIN frames
    /// target exactly one task.
    pub fn on_readable(&mut self) -> Result<Vec<InboundFrame>> {
        let mut out = Vec::new();
        let mut scratch = [0u8; 4096];
        loop {
            let n = unsafe {
                libc::read(
                    self.fd,
                    scratch.as_mut_ptr() as *mut libc::c_void,
                    scratch.len(),
                )
            };
            if n > 0 {
                self.feed(&scratch[..n as usize], &mut out)?;
                if (n as usize) < scratch.len() {
                    break;
                }
                continue;
            }
            if n == 0 {
                self.mark_closed();
                break;
            }
            let errno = std::io::Error::last_os_error();
            match errno.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK) => break,
                Some(libc::ECONNRESET) => {
                    self.mark_closed();
                    break;
                }
                Some(code) => return Err(IoMuxError::Os(code)),
                None => break,
            }
        }
        Ok(out)
    }

    fn feed(&mut self, mut bytes: &[u8], out: &mut Vec<InboundFrame>) -> Result<()> {
        while !bytes.is_empty() {
            match &mut self.read_state {
                ReadState::Header { have, filled } => {
                    let need = iomux_core::HEADER_SIZE - *filled;
                    let take = need.min(bytes.len());
                    have[*filled..*filled + take].copy_from_slice(&bytes[..take]);
                    *filled += take;
                    bytes = &bytes[take..];
                    if *filled == iomux_core::HEADER_SIZE {
                        let header = FrameHeader::decode(have)?;
                        self.read_state = if header.is_eof() {
                            out.push(InboundFrame {
                                msg_type: header.msg_type,
                                gtaskid: header.gtaskid,
                                payload: Vec::new(),
                            });
                            ReadState::default()
                        } else {
                            ReadState::Payload {
                                header,
                                have: Vec::with_capacity(header.length as usize),
                            }
                        };
                    }
                }
                ReadState::Payload { header, have } => {
                    let need = header.length as usize - have.len();
                    let take = need.min(bytes.len());
                    have.extend_from_slice(&bytes[..take]);
                    bytes = &bytes[take..];
                    if have.len() == header.length as usize {
                        out.push(InboundFrame {
                            msg_type: header.msg_type,
                            gtaskid: header.gtaskid,
                            payload: std::mem::take(have),
                        });
                        self.read_state = ReadState::default();
                    }
                }
            }
        }
        Ok(())
    }

    fn mark_closed(&mut self) {
        if !self.closed {
            unsafe { libc::close(self.fd) };
            self.closed = true;
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.mark_closed();
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
        Some(libc::EPIPE) => Err(IoMuxError::PeerGone),
        _ => Err(IoMuxError::Os(errno.raw_os_error().unwrap_or(0))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_decodes_header_only_eof_frame() {
        let mut client = Client::new(-1, 1);
        let header = FrameHeader::eof(MsgType::Stdin, 3, 0);
        let mut out = Vec::new();
        client.feed(&header.encode(), &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].gtaskid, 3);
        assert!(out[0].payload.is_empty());
    }

    #[test]
    fn feed_handles_split_across_calls() {
        let mut client = Client::new(-1, 1);
        let header = FrameHeader {
            msg_type: MsgType::AllStdin,
            gtaskid: 0,
            ltaskid: 0,
            length: 5,
        };
        let mut wire = header.encode().to_vec();
        wire.extend_from_slice(b"hello");

        let mut out = Vec::new();
        client.feed(&wire[..7], &mut out).unwrap();
        assert!(out.is_empty());
        client.feed(&wire[7..], &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload, b"hello");
    }
}
