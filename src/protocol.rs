// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! RFB wire message definitions: protocol constants, [`PixelFormat`], and the
//! client-to-server / server-to-client message types, each with an explicit
//! encode or decode pair built on the [`crate::wire`] primitives.
//!
//! Layouts follow RFC 6143 as restricted to the messages actually dispatched
//! by [`crate::session`].

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Result, VncError};
use crate::wire;

/// Maximum accepted `ClientCutText` payload, guarding against a hostile
/// length field forcing an unbounded allocation.
pub const MAX_CUT_TEXT_LEN: usize = 10 * 1024 * 1024;

/// Maximum accepted handshake reason-string length.
pub const MAX_REASON_LEN: usize = 4096;

/// Maximum accepted desktop name length in `ServerInit`.
pub const MAX_NAME_LEN: usize = 4096;

// --- Client-to-server message type tags -----------------------------------

/// `SetPixelFormat` message type tag.
pub const CLIENT_MSG_SET_PIXEL_FORMAT: u8 = 0;
/// `SetEncodings` message type tag.
pub const CLIENT_MSG_SET_ENCODINGS: u8 = 2;
/// `FramebufferUpdateRequest` message type tag.
pub const CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;
/// `KeyEvent` message type tag.
pub const CLIENT_MSG_KEY_EVENT: u8 = 4;
/// `PointerEvent` message type tag.
pub const CLIENT_MSG_POINTER_EVENT: u8 = 5;
/// `ClientCutText` message type tag.
pub const CLIENT_MSG_CLIENT_CUT_TEXT: u8 = 6;

// --- Server-to-client message type tags -----------------------------------

/// `FramebufferUpdate` message type tag.
pub const SERVER_MSG_FRAMEBUFFER_UPDATE: u8 = 0;
/// `SetColorMapEntries` message type tag.
pub const SERVER_MSG_SET_COLOUR_MAP_ENTRIES: u8 = 1;
/// `Bell` message type tag.
pub const SERVER_MSG_BELL: u8 = 2;
/// `ServerCutText` message type tag.
pub const SERVER_MSG_SERVER_CUT_TEXT: u8 = 3;

// --- Encoding identifiers (identification only; no compression is
// implemented by this core) -------------------------------------------------

/// Encoding: Raw pixel data.
pub const ENCODING_RAW: i32 = 0;
/// Encoding: Copy Rectangle.
pub const ENCODING_COPYRECT: i32 = 1;
/// Encoding: Rise-and-Run-length Encoding.
pub const ENCODING_RRE: i32 = 2;
/// Encoding: Hextile.
pub const ENCODING_HEXTILE: i32 = 5;
/// Encoding: Tile Run-Length Encoding.
pub const ENCODING_TRLE: i32 = 15;
/// Encoding: Zlib-compressed TRLE.
pub const ENCODING_ZRLE: i32 = 16;
/// Pseudo-encoding: Rich Cursor.
pub const ENCODING_CURSOR: i32 = -239;
/// Pseudo-encoding: Desktop Size.
pub const ENCODING_DESKTOP_SIZE: i32 = -223;

// --- Security types ----------------------------------------------------------

/// Security type: Invalid/Unknown. Never a valid negotiated result and MUST
/// NOT appear in `offered_security_types`.
pub const SECURITY_TYPE_INVALID: u8 = 0;
/// Security type: None (no authentication).
pub const SECURITY_TYPE_NONE: u8 = 1;
/// Security type: VNC Authentication (DES challenge/response).
pub const SECURITY_TYPE_VNC_AUTH: u8 = 2;

// --- Security results ---------------------------------------------------------

/// Security result: authentication succeeded.
pub const SECURITY_RESULT_OK: u32 = 0;
/// Security result: authentication failed.
pub const SECURITY_RESULT_FAILED: u32 = 1;

/// The RFB protocol-version line format: `"RFB xxx.yyy\n"`, always exactly
/// 12 bytes, with `xxx`/`yyy` being zero-padded 3-digit ASCII decimals.
pub fn format_version(major: u8, minor: u8) -> String {
    format!("RFB {major:03}.{minor:03}\n")
}

/// Parses a 12-byte version line into `(major, minor)`. Returns a
/// [`VncError::Protocol`] if the bytes don't match the literal
/// `"RFB xxx.yyy\n"` format; the caller decides how to react to an
/// out-of-range major/minor (the session state machine coerces unsupported
/// versions down to 3.3).
pub fn parse_version(buf: &[u8; 12]) -> Result<(u32, u32)> {
    // Validate and parse directly on the bytes rather than converting to
    // `&str` first: a byte-index slice on a `str` panics if it lands inside
    // a multibyte UTF-8 sequence, and a 12-byte buffer that's otherwise
    // garbage can still be valid UTF-8 (e.g. a 3-byte char straddling the
    // field boundaries). Malformed input must return a protocol error, not
    // panic.
    if &buf[0..4] != b"RFB " || buf[7] != b'.' || buf[11] != b'\n' {
        return Err(VncError::protocol(format!("malformed version line: {buf:?}")));
    }
    let major = parse_ascii_digits(&buf[4..7])
        .ok_or_else(|| VncError::protocol("non-numeric major version"))?;
    let minor = parse_ascii_digits(&buf[8..11])
        .ok_or_else(|| VncError::protocol("non-numeric minor version"))?;
    Ok((major, minor))
}

/// Parses a fixed-width ASCII decimal field, returning `None` if any byte
/// isn't an ASCII digit.
fn parse_ascii_digits(digits: &[u8]) -> Option<u32> {
    let mut value: u32 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value * 10 + u32::from(b - b'0');
    }
    Some(value)
}

/// The pixel layout of framebuffer data: depth, endianness, and RGB
/// masks/shifts. 16 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    /// Bits per pixel: one of 8, 16, or 32.
    pub bits_per_pixel: u8,
    /// Colour depth in bits, `<= bits_per_pixel`.
    pub depth: u8,
    /// Non-zero if multi-byte pixel values are big-endian on the wire.
    pub big_endian_flag: u8,
    /// Non-zero for true-colour; zero selects the colour-map path (out of
    /// scope for this core beyond recording the flag).
    pub true_colour_flag: u8,
    /// Maximum red channel value (e.g. 255 for 8 bits of red).
    pub red_max: u16,
    /// Maximum green channel value.
    pub green_max: u16,
    /// Maximum blue channel value.
    pub blue_max: u16,
    /// Bit shift to the red channel's low bit.
    pub red_shift: u8,
    /// Bit shift to the green channel's low bit.
    pub green_shift: u8,
    /// Bit shift to the blue channel's low bit.
    pub blue_shift: u8,
}

impl PixelFormat {
    /// A common 32-bit true-colour format: 24-bit depth, little-endian,
    /// 8 bits per channel with red in the low byte.
    #[must_use]
    pub const fn rgba32() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian_flag: 0,
            true_colour_flag: 1,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 0,
            green_shift: 8,
            blue_shift: 16,
        }
    }

    /// Checks the invariant that `bits_per_pixel` is one of 8/16/32 and
    /// `depth <= bits_per_pixel`.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self.bits_per_pixel, 8 | 16 | 32) && self.depth <= self.bits_per_pixel
    }

    /// Serialises the 16-byte `PixelFormat` wire layout.
    pub async fn write_to<W: AsyncWriteExt + Unpin>(&self, w: &mut W) -> Result<()> {
        wire::write_u8(w, self.bits_per_pixel).await?;
        wire::write_u8(w, self.depth).await?;
        wire::write_u8(w, self.big_endian_flag).await?;
        wire::write_u8(w, self.true_colour_flag).await?;
        wire::write_u16(w, self.red_max).await?;
        wire::write_u16(w, self.green_max).await?;
        wire::write_u16(w, self.blue_max).await?;
        wire::write_u8(w, self.red_shift).await?;
        wire::write_u8(w, self.green_shift).await?;
        wire::write_u8(w, self.blue_shift).await?;
        wire::write_padding(w, 3).await?;
        Ok(())
    }

    /// Deserialises the 16-byte `PixelFormat` wire layout. Padding bytes are
    /// read and discarded without validation.
    pub async fn read_from<R: AsyncReadExt + Unpin>(r: &mut R) -> Result<Self> {
        let pf = Self {
            bits_per_pixel: wire::read_u8(r).await?,
            depth: wire::read_u8(r).await?,
            big_endian_flag: wire::read_u8(r).await?,
            true_colour_flag: wire::read_u8(r).await?,
            red_max: wire::read_u16(r).await?,
            green_max: wire::read_u16(r).await?,
            blue_max: wire::read_u16(r).await?,
            red_shift: wire::read_u8(r).await?,
            green_shift: wire::read_u8(r).await?,
            blue_shift: wire::read_u8(r).await?,
        };
        wire::skip(r, 3).await?;
        Ok(pf)
    }
}

/// `ServerInit`: sent once, immediately after the security handshake
/// completes, giving the client the framebuffer dimensions, default pixel
/// format, and desktop name.
#[derive(Debug, Clone)]
pub struct ServerInit {
    /// Framebuffer width in pixels.
    pub width: u16,
    /// Framebuffer height in pixels.
    pub height: u16,
    /// The server's default pixel format.
    pub pixel_format: PixelFormat,
    /// Human-readable desktop name.
    pub name: String,
}

impl ServerInit {
    /// Serialises width, height, pixel format, and length-prefixed name.
    pub async fn write_to<W: AsyncWriteExt + Unpin>(&self, w: &mut W) -> Result<()> {
        wire::write_u16(w, self.width).await?;
        wire::write_u16(w, self.height).await?;
        self.pixel_format.write_to(w).await?;
        wire::write_string(w, &self.name).await?;
        Ok(())
    }
}

/// A single rectangle header as sent in a `FramebufferUpdate`:
/// `(x, y, width, height, encoding)` followed by encoding-specific data.
#[derive(Debug, Clone)]
pub struct Rectangle {
    /// X coordinate of the rectangle's top-left corner.
    pub x: u16,
    /// Y coordinate of the rectangle's top-left corner.
    pub y: u16,
    /// Rectangle width in pixels.
    pub width: u16,
    /// Rectangle height in pixels.
    pub height: u16,
    /// Encoding identifier for the data that follows this header.
    pub encoding: i32,
    /// Encoding-specific payload. The core does not interpret this beyond
    /// writing it verbatim; identifying compression schemes other than Raw
    /// is out of scope.
    pub data: Vec<u8>,
}

impl Rectangle {
    async fn write_to<W: AsyncWriteExt + Unpin>(&self, w: &mut W) -> Result<()> {
        wire::write_u16(w, self.x).await?;
        wire::write_u16(w, self.y).await?;
        wire::write_u16(w, self.width).await?;
        wire::write_u16(w, self.height).await?;
        wire::write_s32(w, self.encoding).await?;
        w.write_all(&self.data).await?;
        Ok(())
    }
}

/// `FramebufferUpdate` (server-to-client): one or more rectangles of pixel
/// data, produced by the surrounding `FramebufferSource`.
#[derive(Debug, Clone)]
pub struct FramebufferUpdate {
    /// The rectangles carried by this update, in send order.
    pub rectangles: Vec<Rectangle>,
}

impl FramebufferUpdate {
    /// Serialises the message type tag, padding, rectangle count, and every
    /// rectangle in order.
    pub async fn write_to<W: AsyncWriteExt + Unpin>(&self, w: &mut W) -> Result<()> {
        wire::write_u8(w, SERVER_MSG_FRAMEBUFFER_UPDATE).await?;
        wire::write_padding(w, 1).await?;
        wire::write_u16(w, self.rectangles.len() as u16).await?;
        for rect in &self.rectangles {
            rect.write_to(w).await?;
        }
        Ok(())
    }
}

/// `SetColorMapEntries` (server-to-client), sent when the session's pixel
/// format is non-true-colour.
#[derive(Debug, Clone)]
pub struct SetColorMapEntries {
    /// Index of the first colour being set.
    pub first_colour: u16,
    /// `(red, green, blue)` triples, one per colour.
    pub colours: Vec<(u16, u16, u16)>,
}

impl SetColorMapEntries {
    /// Serialises the message.
    pub async fn write_to<W: AsyncWriteExt + Unpin>(&self, w: &mut W) -> Result<()> {
        wire::write_u8(w, SERVER_MSG_SET_COLOUR_MAP_ENTRIES).await?;
        wire::write_padding(w, 1).await?;
        wire::write_u16(w, self.first_colour).await?;
        wire::write_u16(w, self.colours.len() as u16).await?;
        for (r_, g_, b_) in &self.colours {
            wire::write_u16(w, *r_).await?;
            wire::write_u16(w, *g_).await?;
            wire::write_u16(w, *b_).await?;
        }
        Ok(())
    }
}

/// `Bell` (server-to-client): a single type-tag byte, no body.
pub async fn write_bell<W: AsyncWriteExt + Unpin>(w: &mut W) -> Result<()> {
    wire::write_u8(w, SERVER_MSG_BELL).await?;
    Ok(())
}

/// `ServerCutText` (server-to-client): length-prefixed clipboard text.
pub async fn write_server_cut_text<W: AsyncWriteExt + Unpin>(w: &mut W, text: &str) -> Result<()> {
    wire::write_u8(w, SERVER_MSG_SERVER_CUT_TEXT).await?;
    wire::write_padding(w, 3).await?;
    wire::write_string(w, text).await?;
    Ok(())
}

/// Every client-to-server message the session state machine dispatches in
/// the Normal phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Client requests a new pixel format for future `FramebufferUpdate`s.
    SetPixelFormat(PixelFormat),
    /// Client advertises its ordered list of acceptable encodings.
    SetEncodings(Vec<i32>),
    /// Client requests an update for a rectangular region, optionally
    /// incremental (changes only).
    FramebufferUpdateRequest {
        /// If true, only changed pixels since the last update are wanted.
        incremental: bool,
        /// X coordinate of the requested region.
        x: u16,
        /// Y coordinate of the requested region.
        y: u16,
        /// Width of the requested region.
        width: u16,
        /// Height of the requested region.
        height: u16,
    },
    /// Client reports a keyboard press or release.
    KeyEvent {
        /// True if pressed, false if released.
        down: bool,
        /// The X11 keysym for the key.
        key: u32,
    },
    /// Client reports pointer motion and/or a button state change.
    PointerEvent {
        /// Bitmask of currently pressed pointer buttons.
        button_mask: u8,
        /// X coordinate of the pointer.
        x: u16,
        /// Y coordinate of the pointer.
        y: u16,
    },
    /// Client pushes clipboard text to the server.
    ClientCutText(String),
}

impl ClientMessage {
    /// Reads and decodes one client message, having already consumed the
    /// leading type-tag byte (`tag`). Fields are read in declared wire
    /// order; this never partially decodes a message — either every field
    /// is read successfully or a [`crate::error::VncError`] propagates
    /// before the variant is constructed.
    pub async fn read_from<R: AsyncReadExt + Unpin>(r: &mut R, tag: u8) -> Result<Self> {
        match tag {
            CLIENT_MSG_SET_PIXEL_FORMAT => {
                wire::skip(r, 3).await?;
                let pf = PixelFormat::read_from(r).await?;
                Ok(ClientMessage::SetPixelFormat(pf))
            }
            CLIENT_MSG_SET_ENCODINGS => {
                wire::skip(r, 1).await?;
                let count = wire::read_u16(r).await? as usize;
                let mut encodings = Vec::with_capacity(count);
                for _ in 0..count {
                    encodings.push(wire::read_s32(r).await?);
                }
                Ok(ClientMessage::SetEncodings(encodings))
            }
            CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST => {
                let incremental = wire::read_u8(r).await? != 0;
                let x = wire::read_u16(r).await?;
                let y = wire::read_u16(r).await?;
                let width = wire::read_u16(r).await?;
                let height = wire::read_u16(r).await?;
                Ok(ClientMessage::FramebufferUpdateRequest {
                    incremental,
                    x,
                    y,
                    width,
                    height,
                })
            }
            CLIENT_MSG_KEY_EVENT => {
                let down = wire::read_u8(r).await? != 0;
                wire::skip(r, 2).await?;
                let key = wire::read_u32(r).await?;
                Ok(ClientMessage::KeyEvent { down, key })
            }
            CLIENT_MSG_POINTER_EVENT => {
                let button_mask = wire::read_u8(r).await?;
                let x = wire::read_u16(r).await?;
                let y = wire::read_u16(r).await?;
                Ok(ClientMessage::PointerEvent { button_mask, x, y })
            }
            CLIENT_MSG_CLIENT_CUT_TEXT => {
                wire::skip(r, 3).await?;
                let bytes = wire::read_length_prefixed(r, MAX_CUT_TEXT_LEN).await?;
                // RFC 6143 specifies Latin-1 for cut text, which maps
                // byte-for-byte onto the first 256 Unicode scalars.
                let text: String = bytes.iter().map(|&b| b as char).collect();
                Ok(ClientMessage::ClientCutText(text))
            }
            other => Err(VncError::protocol(format!(
                "unknown client message type: {other}"
            ))),
        }
    }

    /// Re-encodes this message exactly as it would appear on the wire,
    /// including its leading type tag. Used by the round-trip tests below.
    #[cfg(test)]
    pub async fn write_to<W: AsyncWriteExt + Unpin>(&self, w: &mut W) -> Result<()> {
        match self {
            ClientMessage::SetPixelFormat(pf) => {
                wire::write_u8(w, CLIENT_MSG_SET_PIXEL_FORMAT).await?;
                wire::write_padding(w, 3).await?;
                pf.write_to(w).await?;
            }
            ClientMessage::SetEncodings(encodings) => {
                wire::write_u8(w, CLIENT_MSG_SET_ENCODINGS).await?;
                wire::write_padding(w, 1).await?;
                wire::write_u16(w, encodings.len() as u16).await?;
                for e in encodings {
                    wire::write_s32(w, *e).await?;
                }
            }
            ClientMessage::FramebufferUpdateRequest {
                incremental,
                x,
                y,
                width,
                height,
            } => {
                wire::write_u8(w, CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST).await?;
                wire::write_u8(w, u8::from(*incremental)).await?;
                wire::write_u16(w, *x).await?;
                wire::write_u16(w, *y).await?;
                wire::write_u16(w, *width).await?;
                wire::write_u16(w, *height).await?;
            }
            ClientMessage::KeyEvent { down, key } => {
                wire::write_u8(w, CLIENT_MSG_KEY_EVENT).await?;
                wire::write_u8(w, u8::from(*down)).await?;
                wire::write_padding(w, 2).await?;
                wire::write_u32(w, *key).await?;
            }
            ClientMessage::PointerEvent { button_mask, x, y } => {
                wire::write_u8(w, CLIENT_MSG_POINTER_EVENT).await?;
                wire::write_u8(w, *button_mask).await?;
                wire::write_u16(w, *x).await?;
                wire::write_u16(w, *y).await?;
            }
            ClientMessage::ClientCutText(text) => {
                wire::write_u8(w, CLIENT_MSG_CLIENT_CUT_TEXT).await?;
                wire::write_padding(w, 3).await?;
                let bytes: Vec<u8> = text.chars().map(|c| c as u8).collect();
                wire::write_length_prefixed(w, &bytes).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn round_trip(msg: ClientMessage) -> ClientMessage {
        let mut buf = Vec::new();
        msg.write_to(&mut buf).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let tag = wire::read_u8(&mut cursor).await.unwrap();
        ClientMessage::read_from(&mut cursor, tag).await.unwrap()
    }

    #[tokio::test]
    async fn set_pixel_format_round_trips() {
        let msg = ClientMessage::SetPixelFormat(PixelFormat::rgba32());
        assert_eq!(round_trip(msg.clone()).await, msg);
    }

    #[tokio::test]
    async fn set_encodings_preserves_unknown_ids_in_order() {
        let msg = ClientMessage::SetEncodings(vec![
            ENCODING_RAW,
            ENCODING_HEXTILE,
            ENCODING_CURSOR,
            9999, // unknown, must be preserved
        ]);
        assert_eq!(round_trip(msg.clone()).await, msg);
    }

    #[tokio::test]
    async fn framebuffer_update_request_round_trips() {
        let msg = ClientMessage::FramebufferUpdateRequest {
            incremental: true,
            x: 10,
            y: 20,
            width: 640,
            height: 480,
        };
        assert_eq!(round_trip(msg.clone()).await, msg);
    }

    #[tokio::test]
    async fn key_event_round_trips() {
        let msg = ClientMessage::KeyEvent { down: true, key: 0xFF0D };
        assert_eq!(round_trip(msg.clone()).await, msg);
    }

    #[tokio::test]
    async fn pointer_event_round_trips() {
        let msg = ClientMessage::PointerEvent {
            button_mask: 0b101,
            x: 1,
            y: 2,
        };
        assert_eq!(round_trip(msg.clone()).await, msg);
    }

    #[tokio::test]
    async fn client_cut_text_round_trips() {
        let msg = ClientMessage::ClientCutText("hello clipboard".to_string());
        assert_eq!(round_trip(msg.clone()).await, msg);
    }

    #[tokio::test]
    async fn unknown_message_tag_is_a_protocol_error() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let err = ClientMessage::read_from(&mut cursor, 200).await.unwrap_err();
        assert!(matches!(err, VncError::Protocol(_)));
    }

    #[tokio::test]
    async fn encoded_length_matches_declared_field_widths() {
        let msg = ClientMessage::PointerEvent {
            button_mask: 1,
            x: 5,
            y: 6,
        };
        let mut buf = Vec::new();
        msg.write_to(&mut buf).await.unwrap();
        // type(1) + button_mask(1) + x(2) + y(2)
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn pixel_format_validity_matches_data_model_invariant() {
        assert!(PixelFormat::rgba32().is_valid());
        let mut bad = PixelFormat::rgba32();
        bad.bits_per_pixel = 24;
        assert!(!bad.is_valid());
        let mut bad_depth = PixelFormat::rgba32();
        bad_depth.depth = 40;
        assert!(!bad_depth.is_valid());
    }

    #[test]
    fn version_format_is_exactly_twelve_bytes() {
        let s = format_version(3, 8);
        assert_eq!(s.as_bytes().len(), 12);
        assert_eq!(s, "RFB 003.008\n");
    }

    #[test]
    fn version_parses_back() {
        let mut buf = [0u8; 12];
        buf.copy_from_slice(b"RFB 003.007\n");
        assert_eq!(parse_version(&buf).unwrap(), (3, 7));
    }

    #[test]
    fn malformed_version_is_a_protocol_error() {
        let mut buf = [0u8; 12];
        buf.copy_from_slice(b"NOT A VALID!");
        assert!(parse_version(&buf).is_err());
    }

    #[test]
    fn non_ascii_multibyte_version_is_a_protocol_error_not_a_panic() {
        // 12 bytes of valid UTF-8 (a 3-byte character at indices 5-7)
        // straddling the major-version field boundary a naive `&str`
        // byte-index slice would panic on.
        let buf: [u8; 12] = *b"RFB 0\xe0\xa4\x800.8\n";
        assert!(parse_version(&buf).is_err());
    }
}
