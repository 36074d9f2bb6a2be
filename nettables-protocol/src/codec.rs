//! Primitive encoders and decoders, plus the streaming message decoder.
//!
//! Encoders write into any [`BufMut`]. Decoders read from a byte slice cursor
//! (`&mut &[u8]`) and report [`ProtocolError::Incomplete`] when the slice ends
//! early, which lets [`Decoder`] retry once more bytes arrive.

use crate::error::ProtocolError;
use crate::tag;
use crate::wire::WireMessage;
use bytes::{Buf, BufMut, BytesMut};

/// Sentinel length byte announcing a NUL-terminated long string.
const LONG_STRING: u8 = 0xFF;

/// Longest string, in bytes, a peer sends or accepts.
pub const MAX_STRING_LEN: usize = 1 << 20;

/// Ids below this value are packed into the tag byte itself.
fn inline_limit(tag: u8) -> u32 {
    tag as u32 - 4
}

/// Tag byte announcing a 1..=4 byte id; the low two bits hold the width.
fn full_tag(tag: u8) -> u8 {
    (tag | (tag - 1)) ^ 3
}

fn range_name(tag: u8) -> &'static str {
    match tag {
        tag::ID => "key id",
        tag::TABLE_ID => "table id",
        tag::CONFIRMATION => "confirmation",
        tag::DENIAL => "denial",
        _ => "unknown",
    }
}

fn need(src: &[u8], n: usize) -> Result<(), ProtocolError> {
    if src.len() < n {
        return Err(ProtocolError::Incomplete {
            needed: n - src.len(),
        });
    }
    Ok(())
}

pub fn get_u8(src: &mut &[u8]) -> Result<u8, ProtocolError> {
    need(src, 1)?;
    Ok(src.get_u8())
}

/// Writes `id` in the range opened by `tag`.
pub fn put_id(buf: &mut impl BufMut, tag: u8, id: u32) {
    if id < inline_limit(tag) {
        buf.put_u8(tag | id as u8);
        return;
    }
    let width: u8 = if id < 1 << 8 {
        0
    } else if id < 1 << 16 {
        1
    } else if id < 1 << 24 {
        2
    } else {
        3
    };
    buf.put_u8(full_tag(tag) | width);
    buf.put_uint(id as u64, width as usize + 1);
}

pub fn get_id(src: &mut &[u8], tag: u8) -> Result<u32, ProtocolError> {
    let byte = get_u8(src)?;
    get_id_after(src, tag, byte)
}

/// Finishes decoding an id whose leading byte was already consumed.
pub fn get_id_after(src: &mut &[u8], tag: u8, byte: u8) -> Result<u32, ProtocolError> {
    if !tag::in_range(tag, byte) {
        return Err(ProtocolError::OutOfRange {
            byte,
            range: range_name(tag),
        });
    }
    let value = (byte ^ tag) as u32;
    if value < inline_limit(tag) {
        return Ok(value);
    }
    let width = (value & 3) as usize + 1;
    need(src, width)?;
    Ok(src.get_uint(width) as u32)
}

/// Checks that `value` fits the string encoding: short strings may hold any
/// bytes, long ones must stay under [`MAX_STRING_LEN`] and contain no NUL.
pub fn check_string(value: &str) -> Result<(), ProtocolError> {
    let bytes = value.as_bytes();
    if bytes.len() < LONG_STRING as usize {
        return Ok(());
    }
    if bytes.len() > MAX_STRING_LEN {
        return Err(ProtocolError::StringTooLong {
            len: bytes.len(),
            max: MAX_STRING_LEN,
        });
    }
    if bytes.contains(&0) {
        return Err(ProtocolError::NulInLongString { len: bytes.len() });
    }
    Ok(())
}

pub fn put_string(buf: &mut impl BufMut, value: &str) -> Result<(), ProtocolError> {
    let bytes = value.as_bytes();
    if bytes.len() < LONG_STRING as usize {
        buf.put_u8(bytes.len() as u8);
        buf.put_slice(bytes);
        return Ok(());
    }
    check_string(value)?;
    buf.put_u8(LONG_STRING);
    buf.put_slice(bytes);
    buf.put_u8(0);
    Ok(())
}

pub fn get_string(src: &mut &[u8]) -> Result<String, ProtocolError> {
    let len = get_u8(src)?;
    let raw = if len == LONG_STRING {
        let window = &src[..src.len().min(MAX_STRING_LEN + 1)];
        let end = match window.iter().position(|&b| b == 0) {
            Some(end) => end,
            None if src.len() > MAX_STRING_LEN => {
                return Err(ProtocolError::StringTooLong {
                    len: src.len(),
                    max: MAX_STRING_LEN,
                })
            }
            None => return Err(ProtocolError::Incomplete { needed: 1 }),
        };
        let raw = src[..end].to_vec();
        src.advance(end + 1);
        raw
    } else {
        need(src, len as usize)?;
        let raw = src[..len as usize].to_vec();
        src.advance(len as usize);
        raw
    };
    String::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8)
}

pub fn get_i32(src: &mut &[u8]) -> Result<i32, ProtocolError> {
    need(src, 4)?;
    Ok(src.get_i32())
}

pub fn get_f64(src: &mut &[u8]) -> Result<f64, ProtocolError> {
    need(src, 8)?;
    Ok(src.get_f64())
}

/// Largest count a single control byte of class `tag` carries.
///
/// Confirmation stops one short of its range so a count never produces PING.
pub fn run_capacity(tag: u8) -> u32 {
    match tag {
        tag::CONFIRMATION => (tag::CONFIRMATION - 2) as u32,
        _ => (tag - 1) as u32,
    }
}

fn is_run_byte(tag: u8, byte: u8) -> bool {
    tag::in_range(tag, byte) && byte != tag::PING
}

/// Writes `count` as consecutive control bytes of class `tag`.
pub fn put_run(buf: &mut impl BufMut, tag: u8, count: u32) {
    let capacity = run_capacity(tag);
    let mut remaining = count;
    while remaining > 0 {
        let n = remaining.min(capacity);
        buf.put_u8(tag | n as u8);
        remaining -= n;
    }
}

/// Sums the run whose first byte was already consumed, absorbing every
/// following byte of the same class that is already buffered.
pub fn get_run_after(src: &mut &[u8], tag: u8, byte: u8) -> Result<u32, ProtocolError> {
    if !is_run_byte(tag, byte) {
        return Err(ProtocolError::OutOfRange {
            byte,
            range: range_name(tag),
        });
    }
    let mask = tag - 1;
    let mut count = (byte & mask) as u32;
    while let Some(&next) = src.first() {
        if !is_run_byte(tag, next) {
            break;
        }
        count += (next & mask) as u32;
        src.advance(1);
    }
    Ok(count)
}

/// Accumulates socket bytes and yields complete messages.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Decodes the next message, leaving a partial message buffered.
    pub fn decode_message(&mut self) -> Result<Option<WireMessage>, ProtocolError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let (message, consumed) = {
            let mut src: &[u8] = &self.buffer;
            match WireMessage::decode(&mut src) {
                Ok(message) => (message, self.buffer.len() - src.len()),
                Err(e) if e.is_incomplete() => return Ok(None),
                Err(e) => return Err(e),
            }
        };
        self.buffer.advance(consumed);
        Ok(Some(message))
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
