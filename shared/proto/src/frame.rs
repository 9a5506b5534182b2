//! Length-prefixed framing for the control channel.
//!
//! A frame is `u32_be length` followed by `length` payload bytes. The length
//! prefix is the only synchronization point: any framing violation is
//! unrecoverable and the caller is expected to close the connection.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::{WireError, WireResult};

/// Hard cap on a control-channel payload.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Read a single frame payload.
///
/// The length prefix is awaited without a deadline (an idle connection is the
/// liveness monitor's problem); once a length is declared, the body must
/// arrive within `body_deadline` or the frame counts as dead.
pub async fn read_frame<R: AsyncRead + Unpin>(
    recv: &mut R,
    max_size: usize,
    body_deadline: Option<Duration>,
) -> WireResult<Vec<u8>> {
    let mut prefix = [0u8; 4];
    recv.read_exact(&mut prefix).await?;
    let len = u32::from_be_bytes(prefix) as usize;

    if len == 0 {
        return Err(WireError::EmptyFrame);
    }
    if len > max_size {
        return Err(WireError::Oversize(len, max_size));
    }

    let mut buf = vec![0u8; len];
    match body_deadline {
        Some(d) => match timeout(d, recv.read_exact(&mut buf)).await {
            Ok(r) => {
                r?;
            }
            Err(_) => return Err(WireError::ReadTimeout),
        },
        None => {
            recv.read_exact(&mut buf).await?;
        }
    }
    Ok(buf)
}

/// Write a single frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(send: &mut W, payload: &[u8]) -> WireResult<()> {
    if payload.is_empty() {
        return Err(WireError::EmptyFrame);
    }
    if payload.len() > MAX_FRAME_BYTES {
        return Err(WireError::Oversize(payload.len(), MAX_FRAME_BYTES));
    }

    send.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    send.write_all(payload).await?;
    send.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        write_frame(&mut a, b"hello world").await.unwrap();
        let got = read_frame(&mut b, MAX_FRAME_BYTES, None).await.unwrap();
        assert_eq!(got, b"hello world");
    }

    #[tokio::test]
    async fn oversize_length_rejected() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let len = (MAX_FRAME_BYTES as u32 + 1).to_be_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut a, &len).await.unwrap();
        let err = read_frame(&mut b, MAX_FRAME_BYTES, None).await.unwrap_err();
        assert!(matches!(err, WireError::Oversize(..)));
    }

    #[tokio::test]
    async fn zero_length_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut a, &0u32.to_be_bytes())
            .await
            .unwrap();
        let err = read_frame(&mut b, MAX_FRAME_BYTES, None).await.unwrap_err();
        assert!(matches!(err, WireError::EmptyFrame));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_body_times_out() {
        let (mut a, mut b) = tokio::io::duplex(64);
        // Declare 8 bytes, deliver only 3.
        tokio::io::AsyncWriteExt::write_all(&mut a, &8u32.to_be_bytes())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut a, b"abc").await.unwrap();

        let err = read_frame(&mut b, MAX_FRAME_BYTES, Some(Duration::from_secs(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::ReadTimeout));
    }
}
