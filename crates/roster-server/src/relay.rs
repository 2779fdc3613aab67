//! Relay delivery.
//!
//! Forwards one length-prefixed blob from the sender's read stream into a
//! target connection's socket: a `FROM <sender>` line, the original 4-byte
//! little-endian length, then the body streamed through a fixed-size copy
//! buffer. Memory stays O(buffer) no matter how large the frame is.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::time;
use tracing::debug;

use roster_common::error::{Result, RosterError};
use roster_common::protocol::command::{self, Response};
use roster_common::protocol::framing;
use roster_common::protocol::{LENGTH_PREFIX_BYTES, RELAY_COPY_TIMEOUT, WRITE_TIMEOUT};

use crate::registry::{ConnectionRecord, Registry};

/// Forward one relay frame from `reader` to the connection named `target`.
///
/// Always returns the response line for the sender. Failure paths drop any
/// bytes the sender's reader had buffered so its next line parses cleanly,
/// and evict the target when its socket was at fault; the sender's own
/// session survives every outcome here.
pub async fn relay<R>(
    reader: &mut BufReader<R>,
    sender_id: &str,
    target: &str,
    registry: &Registry,
    idle_timeout: Duration,
) -> Response
where
    R: AsyncRead + Unpin,
{
    if target.is_empty() {
        framing::reset(reader);
        return Response::error(command::TO).with_arg("empty TO");
    }

    let record = match registry.lookup(target) {
        Some(record) if record.is_fresh(idle_timeout) => record,
        Some(_) => {
            registry.remove(target);
            framing::reset(reader);
            return Response::error(command::TO)
                .with_arg(target)
                .with_arg("not connected");
        }
        None => {
            framing::reset(reader);
            return Response::error(command::TO)
                .with_arg(target)
                .with_arg("not connected");
        }
    };

    let length = match framing::read_length_prefix(reader).await {
        Ok(length) => length,
        Err(e) => {
            debug!("relay to {}: bad length prefix: {}", target, e);
            framing::reset(reader);
            return Response::error(command::TO).with_arg(e.to_string());
        }
    };

    match deliver(reader, sender_id, length, &record).await {
        Ok(()) => {
            debug!(
                "relayed {} bytes from {} to {}",
                length - LENGTH_PREFIX_BYTES,
                sender_id,
                target
            );
            Response::ok(command::TO).with_arg(target)
        }
        Err(e) => {
            debug!("relay to {} failed: {}", target, e);
            registry.remove(target);
            framing::reset(reader);
            Response::error(command::TO).with_arg(e.to_string())
        }
    }
}

/// Write one frame into the target's socket.
///
/// The target's writer stays locked for the whole frame, so its bytes are
/// never interleaved with another sender's frame or a response line. The
/// header writes run under the per-write deadline, the body copy under the
/// relay deadline.
async fn deliver<R>(
    reader: &mut BufReader<R>,
    sender_id: &str,
    length: u32,
    record: &ConnectionRecord,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let body_len = u64::from(length - LENGTH_PREFIX_BYTES);
    let mut writer = record.handle.lock().await;

    let header = format!("{} {}\n", command::FROM, sender_id);
    time::timeout(WRITE_TIMEOUT, writer.write_all(header.as_bytes()))
        .await
        .map_err(|_| RosterError::WriteTimeout)??;
    time::timeout(
        WRITE_TIMEOUT,
        writer.write_all(&framing::encode_length_prefix(length)),
    )
    .await
    .map_err(|_| RosterError::WriteTimeout)??;

    time::timeout(RELAY_COPY_TIMEOUT, async {
        let mut body = (&mut *reader).take(body_len);
        let copied = tokio::io::copy(&mut body, &mut *writer).await?;
        writer.flush().await?;
        if copied < body_len {
            return Err(RosterError::ShortPayload {
                expected: body_len,
                copied,
            });
        }
        Ok(())
    })
    .await
    .map_err(|_| RosterError::WriteTimeout)??;

    Ok(())
}
