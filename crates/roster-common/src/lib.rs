//! Shared protocol layer for the roster presence-and-relay server.
//!
//! This crate holds everything both the server and protocol-level tests
//! need to agree on: the error type, the wire-protocol constants, the
//! command/response model, the hybrid text/binary framing, and TLS
//! configuration loading.

pub mod error;
pub mod protocol;
pub mod tls;

pub use error::{Result, RosterError};
