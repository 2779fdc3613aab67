//! Hybrid text/binary framing.
//!
//! One text command line at a time from a buffered reader, with a hard
//! per-line length cap; relay payloads follow their command line on the
//! same reader as a 4-byte little-endian signed length and exactly
//! `length - 4` opaque body bytes. The framer returns raw tokens and never
//! interprets commands.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::error::{Result, RosterError};
use crate::protocol::{LENGTH_PREFIX_BYTES, MAX_LINE_BYTES};

/// Outcome of reading one text line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A complete line within the cap, trimmed of surrounding whitespace.
    Command(String),
    /// A line past the cap, consumed through its LF and dropped.
    Oversized,
}

/// Read one LF-terminated line, enforcing the line cap.
///
/// Oversized lines are still consumed to completion so the stream stays in
/// sync, then reported as [`Line::Oversized`] for the caller to drop. EOF,
/// with or without a partial line pending, is an error: the protocol has no
/// meaningful half-line state.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    let mut line: Vec<u8> = Vec::new();
    let mut oversized = false;
    loop {
        let (newline_at, chunk_len) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                ));
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    if !oversized {
                        if line.len() + pos + 1 > MAX_LINE_BYTES {
                            oversized = true;
                            line.clear();
                        } else {
                            line.extend_from_slice(&available[..pos]);
                        }
                    }
                    (Some(pos), 0)
                }
                None => {
                    if !oversized {
                        // No LF yet: once the accumulated bytes leave no room
                        // for one, the line cannot come in under the cap.
                        if line.len() + available.len() >= MAX_LINE_BYTES {
                            oversized = true;
                            line.clear();
                        } else {
                            line.extend_from_slice(available);
                        }
                    }
                    (None, available.len())
                }
            }
        };
        match newline_at {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(if oversized {
                    Line::Oversized
                } else {
                    Line::Command(String::from_utf8_lossy(&line).trim().to_string())
                });
            }
            None => reader.consume(chunk_len),
        }
    }
}

/// Read the 4-byte little-endian relay length prefix.
///
/// The value is signed and counts itself, so anything below 4 (negative
/// values included) is rejected before a single payload byte is touched.
pub async fn read_length_prefix<R>(reader: &mut R) -> Result<u32>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; 4];
    reader.read_exact(&mut raw).await?;
    let length = i32::from_le_bytes(raw);
    if length < LENGTH_PREFIX_BYTES as i32 {
        return Err(RosterError::InvalidLength(length));
    }
    Ok(length as u32)
}

/// Encode a relay length prefix.
pub fn encode_length_prefix(length: u32) -> [u8; 4] {
    (length as i32).to_le_bytes()
}

/// Drop whatever the reader has buffered but not yet consumed.
///
/// Relay error paths call this to resynchronize: any payload bytes the
/// client already sent alongside a failed `TO` would otherwise be parsed
/// as command lines.
pub fn reset<R>(reader: &mut BufReader<R>)
where
    R: AsyncRead + Unpin,
{
    let buffered = reader.buffer().len();
    if buffered > 0 {
        reader.consume(buffered);
    }
}
