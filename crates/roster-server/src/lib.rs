//! Roster server library.
//!
//! The binary in `main.rs` is a thin wrapper; everything it wires together
//! lives here so integration tests can drive a real server over real
//! sockets.

pub mod cli;
pub mod config;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
