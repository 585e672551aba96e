#![forbid(unsafe_code)]

// meetrelay library - meeting room coordinator and WebSocket signaling relay

pub mod auth;
pub mod config;
pub mod metrics;
pub mod room;
pub mod signaling;
pub mod turn;
