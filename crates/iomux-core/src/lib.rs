//! Core, platform-agnostic types for the IO-MUX per-node stdio multiplexer:
//! the wire codec (C2), the fixed-capacity buffer pool (C3), and the
//! ambient error/logging types shared with [`iomux_reactor`].
//!
//! [`iomux_reactor`]: https://docs.rs/iomux-reactor

pub mod codec;
pub mod error;
pub mod log;
pub mod pool;

pub use codec::{FrameHeader, InitMsg, MsgType, CRED_SIGLEN, HEADER_SIZE, MAX_PAYLOAD};
pub use error::{IoMuxError, Result};
pub use pool::{BufferPool, Origin, PooledBuf, BUF_CAPACITY};
