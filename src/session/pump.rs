//! One direction of a proxied session.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::net::connection::SessionId;
use crate::observability::metrics;

use super::inspect::Inspector;
use super::{Direction, SessionError};

/// Copy `reader` into `writer` chunk by chunk, showing each chunk to
/// `inspector` before it is written.
///
/// Bytes are forwarded in the order and grouping they were read. On end of
/// stream the writer is shut down so the peer sees the half-close. A framing
/// error is returned only after the offending chunk has been forwarded.
///
/// Returns the number of bytes forwarded.
pub async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    mut inspector: Box<dyn Inspector>,
    direction: Direction,
    session: SessionId,
    read_buffer_bytes: usize,
) -> Result<u64, SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; read_buffer_bytes.max(1)];
    let mut forwarded = 0u64;

    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|source| SessionError::Read { direction, source })?;

        if n == 0 {
            tracing::debug!(session = %session, direction = %direction, forwarded, "End of stream");
            let _ = writer.shutdown().await;
            return Ok(forwarded);
        }

        let chunk = &buf[..n];
        let inspected = inspector.inspect(chunk);

        writer
            .write_all(chunk)
            .await
            .map_err(|source| SessionError::Write { direction, source })?;
        metrics::record_forwarded(direction.as_str(), n);
        forwarded += n as u64;

        if let Err(source) = inspected {
            metrics::record_framing_error(direction.as_str());
            return Err(SessionError::Framing { direction, source });
        }
    }
}
