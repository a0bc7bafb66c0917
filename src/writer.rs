//! Frame writing with partial-write retry.
//!
//! Every outbound frame on both sides goes through [`write_frame`]: the frame
//! is encoded once by the caller, then written in a loop that resumes after
//! partial writes. A write that accepts zero bytes is treated as a dead
//! connection rather than retried.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{ChatwireError, Result};

/// Write a complete encoded frame.
///
/// Retries on partial writes and `Interrupted`. Returns an error if the
/// writer accepts zero bytes or fails.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut sent = 0;

    while sent < frame.len() {
        match writer.write(&frame[sent..]).await {
            Ok(0) => {
                return Err(ChatwireError::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "write returned 0, connection may be closed",
                )));
            }
            Ok(n) => sent += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ChatwireError::Io(e)),
        }
    }

    writer.flush().await?;
    Ok(())
}
