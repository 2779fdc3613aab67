//! Wire protocol for the roster server
//!
//! ## Protocol Design
//!
//! 1. **Text commands**: one LF-terminated line per request, verb first
//! 2. **Text responses**: `OK`/`ERROR` marker, echoed verb, arguments
//! 3. **Embedded binary**: the relay command carries a length-prefixed
//!    payload on the same stream, immediately after its command line
//!
//! ## Relay Frame Format
//!
//! ```text
//! +----------------------+----------------+--------------------+
//! | "FROM " sender LF    | Length (4B LE) | Body (Length - 4)  |
//! +----------------------+----------------+--------------------+
//! ```
//!
//! The length is a signed little-endian 32-bit value and counts itself;
//! the smallest legal frame is a bare prefix of value 4 with no body.

pub mod command;
pub mod framing;

pub use command::{Request, Response};

use std::time::Duration;

/// Maximum length of one text command line, LF included.
/// Longer lines are consumed and dropped without a reply.
pub const MAX_LINE_BYTES: usize = 256;

/// Size of the relay length prefix. The prefix value counts itself.
pub const LENGTH_PREFIX_BYTES: u32 = 4;

/// Read-inactivity bound; clients keep idle sessions alive with `PING`.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Deadline for any single write to a session's socket.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for streaming one relay body into the target's socket.
pub const RELAY_COPY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default plain-TCP port.
pub const DEFAULT_PLAIN_PORT: u16 = 9000;

/// Default TLS port.
pub const DEFAULT_TLS_PORT: u16 = 9001;
