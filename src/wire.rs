//! Big-endian wire framing primitives shared by every RFB message.
//!
//! These are thin `AsyncRead`/`AsyncWrite` helpers: typed integer read/write,
//! exact-length reads, padding skips, and the length-prefixed string used by
//! `ClientCutText` and the `ServerInit` desktop name. Every function returns a
//! [`VncError::Transport`] on a short read or write rather than silently
//! truncating — composite decoders built on top of these never partially
//! deserialise a message.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::Result;

/// Reads a single big-endian `u8`.
pub async fn read_u8<R: AsyncReadExt + Unpin>(r: &mut R) -> Result<u8> {
    Ok(r.read_u8().await?)
}

/// Reads a single big-endian `u16`.
pub async fn read_u16<R: AsyncReadExt + Unpin>(r: &mut R) -> Result<u16> {
    Ok(r.read_u16().await?)
}

/// Reads a single big-endian `u32`.
pub async fn read_u32<R: AsyncReadExt + Unpin>(r: &mut R) -> Result<u32> {
    Ok(r.read_u32().await?)
}

/// Reads a single big-endian signed 32-bit integer (used for encoding IDs,
/// which may be negative pseudo-encodings).
pub async fn read_s32<R: AsyncReadExt + Unpin>(r: &mut R) -> Result<i32> {
    Ok(r.read_i32().await?)
}

/// Writes a single big-endian `u8`.
pub async fn write_u8<W: AsyncWriteExt + Unpin>(w: &mut W, v: u8) -> Result<()> {
    w.write_u8(v).await?;
    Ok(())
}

/// Writes a single big-endian `u16`.
pub async fn write_u16<W: AsyncWriteExt + Unpin>(w: &mut W, v: u16) -> Result<()> {
    w.write_u16(v).await?;
    Ok(())
}

/// Writes a single big-endian `u32`.
pub async fn write_u32<W: AsyncWriteExt + Unpin>(w: &mut W, v: u32) -> Result<()> {
    w.write_u32(v).await?;
    Ok(())
}

/// Writes a single big-endian signed 32-bit integer.
pub async fn write_s32<W: AsyncWriteExt + Unpin>(w: &mut W, v: i32) -> Result<()> {
    w.write_i32(v).await?;
    Ok(())
}

/// Reads exactly `len` bytes, never returning a short buffer.
pub async fn read_exact_vec<R: AsyncReadExt + Unpin>(r: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Reads and discards `len` bytes (RFB padding). The value of padding bytes
/// is never validated, only their presence on the wire.
pub async fn skip<R: AsyncReadExt + Unpin>(r: &mut R, len: usize) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(())
}

/// Writes `len` zero padding bytes.
pub async fn write_padding<W: AsyncWriteExt + Unpin>(w: &mut W, len: usize) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    let buf = vec![0u8; len];
    w.write_all(&buf).await?;
    Ok(())
}

/// Writes a `U32` length prefix followed by the raw bytes. Used for
/// `ServerCutText`/`ClientCutText` payloads and handshake reason strings,
/// which RFC 6143 specifies as Latin-1 (ISO-8859-1) rather than UTF-8; the
/// caller is responsible for producing bytes in the correct charset.
pub async fn write_length_prefixed<W: AsyncWriteExt + Unpin>(w: &mut W, bytes: &[u8]) -> Result<()> {
    write_u32(w, bytes.len() as u32).await?;
    w.write_all(bytes).await?;
    Ok(())
}

/// Reads a `U32` length prefix followed by that many raw bytes.
///
/// `max_len` bounds the accepted payload so a hostile or corrupt peer cannot
/// force an unbounded allocation from a single length field.
pub async fn read_length_prefixed<R: AsyncReadExt + Unpin>(
    r: &mut R,
    max_len: usize,
) -> Result<Vec<u8>> {
    let len = read_u32(r).await? as usize;
    if len > max_len {
        return Err(crate::error::VncError::protocol(format!(
            "length-prefixed field of {len} bytes exceeds maximum of {max_len}"
        )));
    }
    read_exact_vec(r, len).await
}

/// Writes a length-prefixed UTF-8 string (`U32` length + bytes).
pub async fn write_string<W: AsyncWriteExt + Unpin>(w: &mut W, s: &str) -> Result<()> {
    write_length_prefixed(w, s.as_bytes()).await
}

/// Reads a length-prefixed UTF-8 string (`U32` length + bytes). Non-UTF-8
/// bytes are replaced per [`String::from_utf8_lossy`] rather than failing the
/// session, since the RFB wire format does not actually constrain the
/// charset of every field that uses this framing.
pub async fn read_string<R: AsyncReadExt + Unpin>(r: &mut R, max_len: usize) -> Result<String> {
    let bytes = read_length_prefixed(r, max_len).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trips_fixed_width_integers() {
        let mut buf = Vec::new();
        write_u8(&mut buf, 0xAB).await.unwrap();
        write_u16(&mut buf, 0x1234).await.unwrap();
        write_u32(&mut buf, 0xDEAD_BEEF).await.unwrap();
        write_s32(&mut buf, -239).await.unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_u8(&mut cursor).await.unwrap(), 0xAB);
        assert_eq!(read_u16(&mut cursor).await.unwrap(), 0x1234);
        assert_eq!(read_u32(&mut cursor).await.unwrap(), 0xDEAD_BEEF);
        assert_eq!(read_s32(&mut cursor).await.unwrap(), -239);
    }

    #[tokio::test]
    async fn skip_discards_padding_without_validating_value() {
        let mut cursor = Cursor::new(vec![0xFF, 0xFF, 0xFF, 0x01]);
        skip(&mut cursor, 3).await.unwrap();
        assert_eq!(read_u8(&mut cursor).await.unwrap(), 0x01);
    }

    #[tokio::test]
    async fn length_prefixed_round_trip() {
        let mut buf = Vec::new();
        write_string(&mut buf, "RFB Server").await.unwrap();
        let mut cursor = Cursor::new(buf);
        let s = read_string(&mut cursor, 1024).await.unwrap();
        assert_eq!(s, "RFB Server");
    }

    #[tokio::test]
    async fn length_prefixed_rejects_oversized_payload() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 100).await.unwrap();
        buf.extend(std::iter::repeat(b'a').take(10));
        let mut cursor = Cursor::new(buf);
        let err = read_length_prefixed(&mut cursor, 32).await.unwrap_err();
        assert!(matches!(err, crate::error::VncError::Protocol(_)));
    }

    #[tokio::test]
    async fn exact_read_errors_on_short_buffer() {
        let mut cursor = Cursor::new(vec![0x01, 0x02]);
        let err = read_exact_vec(&mut cursor, 4).await.unwrap_err();
        assert!(matches!(err, crate::error::VncError::Transport(_)));
    }
}
