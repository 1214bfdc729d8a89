//! Process module - engine process supervision and the port handshake.
//!
//! - [`EngineProcess`] spawns the engine and forwards its output to the logger
//! - [`PortAnnouncer`] watches stdout for the listening banner

mod handshake;
mod supervisor;

pub use handshake::{parse_listening_port, wait_for_port, PortAnnouncer, PortStatus, LISTENING_BANNER};
pub use supervisor::EngineProcess;
