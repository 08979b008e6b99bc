//! Framed wire codec for IO-MUX.
//!
//! Every on-wire message is `HEADER || payload`. The header is bit-exact
//! and big-endian; it is never `#[repr(C)]`-transmuted onto a byte slice
//! since its layout must not depend on host struct padding.

use crate::error::{IoMuxError, Result};

/// Fixed wire size of [`FrameHeader`]: 2 (type) + 2 (gtaskid) + 2 (ltaskid) + 4 (length).
pub const HEADER_SIZE: usize = 10;

/// Per-frame payload limit, fixed at compile time.
pub const MAX_PAYLOAD: usize = 64 * 1024;

/// Wire message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MsgType {
    Stdin = 1,
    Stdout = 2,
    Stderr = 3,
    AllStdin = 4,
}

impl MsgType {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for MsgType {
    type Error = IoMuxError;

    fn try_from(v: u16) -> Result<Self> {
        match v {
            1 => Ok(Self::Stdin),
            2 => Ok(Self::Stdout),
            3 => Ok(Self::Stderr),
            4 => Ok(Self::AllStdin),
            other => Err(IoMuxError::ProtocolViolation(format!(
                "unknown message type {}",
                other
            ))),
        }
    }
}

/// Parsed frame header. `length == 0` is the EOF marker for the stated
/// direction/task — it carries no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_type: MsgType,
    pub gtaskid: u16,
    pub ltaskid: u16,
    pub length: u32,
}

impl FrameHeader {
    pub fn eof(msg_type: MsgType, gtaskid: u16, ltaskid: u16) -> Self {
        Self {
            msg_type,
            gtaskid,
            ltaskid,
            length: 0,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.length == 0
    }

    /// Encode into exactly [`HEADER_SIZE`] bytes, big-endian.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.msg_type.as_u16().to_be_bytes());
        buf[2..4].copy_from_slice(&self.gtaskid.to_be_bytes());
        buf[4..6].copy_from_slice(&self.ltaskid.to_be_bytes());
        buf[6..10].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Decode from exactly [`HEADER_SIZE`] bytes. Fails (protocol
    /// violation, fatal for the endpoint) on an unknown type or a length
    /// exceeding [`MAX_PAYLOAD`].
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        let msg_type_raw = u16::from_be_bytes([buf[0], buf[1]]);
        let gtaskid = u16::from_be_bytes([buf[2], buf[3]]);
        let ltaskid = u16::from_be_bytes([buf[4], buf[5]]);
        let length = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]);

        let msg_type = MsgType::try_from(msg_type_raw)?;

        if length as usize > MAX_PAYLOAD {
            return Err(IoMuxError::ProtocolViolation(format!(
                "length {} exceeds MAX_PAYLOAD {}",
                length, MAX_PAYLOAD
            )));
        }

        Ok(Self {
            msg_type,
            gtaskid,
            ltaskid,
            length,
        })
    }
}

/// The init message sent once, server-to-client, on a fresh connection.
pub const CRED_SIGLEN: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct InitMsg {
    pub cred_sig: [u8; CRED_SIGLEN],
    pub nodeid: u32,
    pub n_stdout: u32,
    pub n_stderr: u32,
}

impl InitMsg {
    pub const WIRE_SIZE: usize = CRED_SIGLEN + 4 + 4 + 4;

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..CRED_SIGLEN].copy_from_slice(&self.cred_sig);
        buf[CRED_SIGLEN..CRED_SIGLEN + 4].copy_from_slice(&self.nodeid.to_be_bytes());
        buf[CRED_SIGLEN + 4..CRED_SIGLEN + 8].copy_from_slice(&self.n_stdout.to_be_bytes());
        buf[CRED_SIGLEN + 8..CRED_SIGLEN + 12].copy_from_slice(&self.n_stderr.to_be_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let h = FrameHeader {
            msg_type: MsgType::Stdout,
            gtaskid: 7,
            ltaskid: 1,
            length: 4096,
        };
        let wire = h.encode();
        let decoded = FrameHeader::decode(&wire).unwrap();
        assert_eq!(h, decoded);
    }

    #[test]
    fn header_is_big_endian() {
        let h = FrameHeader {
            msg_type: MsgType::Stdin,
            gtaskid: 0x0102,
            ltaskid: 0,
            length: 0,
        };
        let wire = h.encode();
        assert_eq!(&wire[2..4], &[0x01, 0x02]);
    }

    #[test]
    fn zero_length_is_eof() {
        let h = FrameHeader::eof(MsgType::Stdout, 3, 0);
        assert!(h.is_eof());
    }

    #[test]
    fn unknown_type_is_protocol_violation() {
        let mut wire = [0u8; HEADER_SIZE];
        wire[1] = 99; // type = 99
        let err = FrameHeader::decode(&wire).unwrap_err();
        assert!(matches!(err, IoMuxError::ProtocolViolation(_)));
    }

    #[test]
    fn oversized_length_is_protocol_violation() {
        let mut wire = [0u8; HEADER_SIZE];
        wire[0..2].copy_from_slice(&MsgType::Stdin.as_u16().to_be_bytes());
        wire[6..10].copy_from_slice(&((MAX_PAYLOAD as u32) + 1).to_be_bytes());
        let err = FrameHeader::decode(&wire).unwrap_err();
        assert!(matches!(err, IoMuxError::ProtocolViolation(_)));
    }

    #[test]
    fn max_length_is_accepted() {
        let mut wire = [0u8; HEADER_SIZE];
        wire[0..2].copy_from_slice(&MsgType::Stdin.as_u16().to_be_bytes());
        wire[6..10].copy_from_slice(&(MAX_PAYLOAD as u32).to_be_bytes());
        assert!(FrameHeader::decode(&wire).is_ok());
    }
}
