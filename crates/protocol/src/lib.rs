//! Agora Protocol
//!
//! Shared types for the realtime presence and notification socket.
//! These types are serialized as JSON over WebSocket.

pub mod client;
pub mod server;
pub mod types;

pub use client::ClientMessage;
pub use server::ServerMessage;
pub use types::*;
