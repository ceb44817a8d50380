//! Agora realtime server
//!
//! Tracks which users hold a live WebSocket, keeps at most one per user,
//! broadcasts presence, and routes notifications and group chat to whoever is
//! online.

pub mod app;
pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod notify;
pub mod presence;
pub mod registry;
pub mod state;
pub mod store;
pub mod websocket;
