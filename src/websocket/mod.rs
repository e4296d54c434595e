//! Websocket protocol engine
//!
//! The building blocks, bottom up: a frame codec (crate internal), the
//! [`client`](client/index.html) and [`server`](server/index.html)
//! handshakes, and the [`WebSocket`](struct.WebSocket.html) connection
//! whose halves implement the message read and write engines. Reads and
//! writes may be in flight concurrently (one of each); everything must
//! be driven from the connection's own executor.

pub mod client;
pub mod server;
mod config;
mod connection;
mod deflate;
mod error;
mod extension;
mod frame;
mod keys;
mod utf8;

pub use self::config::{Config, DeflateConfig, Kind};
pub use self::connection::{CloseReason, FrameInfo, Receiver, Sender};
pub use self::connection::{SendFrame, SendMessage, WebSocket};
pub use self::error::Error;
pub use self::extension::DeflateParams;
pub use self::frame::Opcode;
pub use self::keys::{Accept, Key};

/// Which side of the connection an engine plays
///
/// Clients mask every outgoing frame and expect unmasked input; servers
/// do the opposite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// Whether this side masks the frames it sends
    pub fn masks_output(&self) -> bool {
        matches!(*self, Role::Client)
    }
}
