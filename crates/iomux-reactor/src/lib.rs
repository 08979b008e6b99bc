//! Level-triggered event reactor and the IO-MUX coordinator: the
//! per-node daemon side of the stdio multiplexer built on [`iomux_core`].

pub mod client;
pub mod config;
pub mod coordinator;
pub mod reactor;
pub mod signal;
pub mod task_io;

pub use client::{Client, InboundFrame};
pub use config::ReactorConfig;
pub use coordinator::Coordinator;
pub use reactor::{Interest, Reactor, Ready, Wakeup};
pub use task_io::{TaskReader, TaskWriter};
