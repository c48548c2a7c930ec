//! Postgres v3 frontend/backend wire codec (spec §4.1).
//!
//! Frames and parses the envelope format used by every non-startup message:
//! `tag(1) || length(4, big-endian, includes itself) || payload(length-4)`.
//! The startup message is the one exception — it has no tag.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::DbError;

/// A single framed message read off the wire. `payload.len() == declared
/// length - 4` always holds (spec §3 `WireMessage` invariant).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
  pub tag: u8,
  pub payload: Bytes,
}

const HEADER_LEN: usize = 5; // 1 tag byte + 4 length bytes

/// Reads framed messages off an `AsyncRead`, accumulating bytes across
/// however many underlying reads it takes to fill a header or a full
/// payload. A message that straddles two TCP reads still parses correctly:
/// bytes beyond the current message are kept in `buf` for the next call.
pub struct FrameReader<R> {
  inner: R,
  buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
  pub fn new(inner: R) -> Self {
    Self {
      inner,
      buf: BytesMut::with_capacity(8 * 1024),
    }
  }

  /// Reads exactly one complete `WireMessage`, blocking on more socket reads
  /// until the full header and payload have been accumulated.
  pub async fn read_message(&mut self) -> Result<WireMessage, DbError> {
    self.fill_at_least(HEADER_LEN).await?;

    let tag = self.buf[0];
    let declared_len = u32::from_be_bytes(self.buf[1..5].try_into().unwrap()) as usize;
    if declared_len < 4 {
      return Err(DbError::Framing(format!(
        "declared length {declared_len} is smaller than the length field itself"
      )));
    }
    let payload_len = declared_len - 4;

    self.fill_at_least(HEADER_LEN + payload_len).await?;

    self.buf.advance(HEADER_LEN);
    let payload = self.buf.split_to(payload_len).freeze();

    Ok(WireMessage { tag, payload })
  }

  /// Keeps reading from the socket until `buf` holds at least `n` bytes.
  async fn fill_at_least(&mut self, n: usize) -> Result<(), DbError> {
    while self.buf.len() < n {
      let read = self.inner.read_buf(&mut self.buf).await?;
      if read == 0 {
        return Err(DbError::Framing("connection closed mid-message".to_string()));
      }
    }
    Ok(())
  }
}

/// Writes the client startup message: no tag, protocol version 3.0, then
/// null-terminated key/value pairs, terminated by an extra zero byte.
pub async fn write_startup<W: AsyncWrite + Unpin>(w: &mut W, user: &str, database: &str) -> Result<(), DbError> {
  let mut body = Vec::new();
  body.extend_from_slice(&3i16.to_be_bytes());
  body.extend_from_slice(&0i16.to_be_bytes());
  for (key, value) in [("user", user), ("database", database)] {
    body.extend_from_slice(key.as_bytes());
    body.push(0);
    body.extend_from_slice(value.as_bytes());
    body.push(0);
  }
  body.push(0);

  let len = (body.len() + 4) as u32;
  w.write_all(&len.to_be_bytes()).await?;
  w.write_all(&body).await?;
  w.flush().await?;
  Ok(())
}

/// Writes a tagged client message: `tag || len(body+5) || body || 0x00`.
/// The `+5` covers the 4-byte length field and the trailing null terminator
/// (spec §4.1 writer contract).
pub async fn write_tagged<W: AsyncWrite + Unpin>(w: &mut W, tag: u8, body: &[u8]) -> Result<(), DbError> {
  let len = (body.len() + 5) as u32;
  w.write_u8(tag).await?;
  w.write_all(&len.to_be_bytes()).await?;
  w.write_all(body).await?;
  w.write_u8(0).await?;
  w.flush().await?;
  Ok(())
}

/// Writes a `p` (password) message carrying an already-computed MD5 digest.
pub async fn write_password<W: AsyncWrite + Unpin>(w: &mut W, md5_digest: &str) -> Result<(), DbError> {
  write_tagged(w, b'p', md5_digest.as_bytes()).await
}

/// Writes a simple `Q` (query) message.
pub async fn write_query<W: AsyncWrite + Unpin>(w: &mut W, sql: &str) -> Result<(), DbError> {
  write_tagged(w, b'Q', sql.as_bytes()).await
}
