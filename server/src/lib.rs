//! # Tether Server
//! The authoritative node: approves handshakes, assigns peer identifiers,
//! owns the NetworkId space, and replicates objects out to clients.

mod error;
mod events;
mod pending_peer;
mod server;
mod server_config;

pub use error::TetherServerError;
pub use events::{Events, ServerEvent, ServerModule};
pub use pending_peer::{PendingPeer, PendingState};
pub use server::{RpcRecipients, Server};
pub use server_config::ServerConfig;
