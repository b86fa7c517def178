//! # Tether Client
//! The connecting node: performs the handshake, adopts its assigned peer
//! identifier, and mirrors the server's replicated objects locally.

mod client;
mod client_config;
mod error;
mod events;

pub use client::{Client, ClientState};
pub use client_config::ClientConfig;
pub use error::TetherClientError;
pub use events::{ClientEvent, ClientEvents};
