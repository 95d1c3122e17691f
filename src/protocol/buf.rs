//! Length-encoded integer and string primitives.
//!
//! Readers take `&mut &[u8]` and advance the cursor past what they consume.

use bytes::{Buf, BufMut, BytesMut};

use super::error::ProtocolError;

pub const LENENC_NULL: u8 = 0xFB;
const LENENC_2: u8 = 0xFC;
const LENENC_3: u8 = 0xFD;
const LENENC_8: u8 = 0xFE;

fn ensure(buf: &[u8], need: usize, what: &str) -> Result<(), ProtocolError> {
    if buf.len() < need {
        return Err(ProtocolError::malformed(format!(
            "{}: need {} bytes, have {}",
            what,
            need,
            buf.len()
        )));
    }
    Ok(())
}

/// Read a length-encoded integer. `None` means the NULL marker.
pub fn get_lenenc_int(buf: &mut &[u8]) -> Result<Option<u64>, ProtocolError> {
    ensure(buf, 1, "lenenc int")?;
    let first = buf.get_u8();
    let value = match first {
        LENENC_NULL => return Ok(None),
        LENENC_2 => {
            ensure(buf, 2, "lenenc int")?;
            buf.get_u16_le() as u64
        }
        LENENC_3 => {
            ensure(buf, 3, "lenenc int")?;
            buf.get_uint_le(3)
        }
        LENENC_8 => {
            ensure(buf, 8, "lenenc int")?;
            buf.get_u64_le()
        }
        0xFF => return Err(ProtocolError::malformed("lenenc int: invalid prefix 0xff")),
        v => v as u64,
    };
    Ok(Some(value))
}

/// Read a length-encoded string. `None` means SQL NULL.
pub fn get_lenenc_bytes<'a>(buf: &mut &'a [u8]) -> Result<Option<&'a [u8]>, ProtocolError> {
    let len = match get_lenenc_int(buf)? {
        Some(len) => len as usize,
        None => return Ok(None),
    };
    ensure(buf, len, "lenenc string")?;
    let (value, rest) = buf.split_at(len);
    *buf = rest;
    Ok(Some(value))
}

pub fn skip_lenenc_bytes(buf: &mut &[u8]) -> Result<(), ProtocolError> {
    get_lenenc_bytes(buf).map(|_| ())
}

/// Read bytes up to (and consume) the next NUL
pub fn get_null_terminated<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], ProtocolError> {
    let pos = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| ProtocolError::malformed("missing NUL terminator"))?;
    let value = &buf[..pos];
    *buf = &buf[pos + 1..];
    Ok(value)
}

pub fn get_fixed<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8], ProtocolError> {
    ensure(buf, len, "fixed field")?;
    let (value, rest) = buf.split_at(len);
    *buf = rest;
    Ok(value)
}

pub fn get_u8(buf: &mut &[u8]) -> Result<u8, ProtocolError> {
    ensure(buf, 1, "u8")?;
    Ok(buf.get_u8())
}

pub fn get_u16(buf: &mut &[u8]) -> Result<u16, ProtocolError> {
    ensure(buf, 2, "u16")?;
    Ok(buf.get_u16_le())
}

pub fn get_u32(buf: &mut &[u8]) -> Result<u32, ProtocolError> {
    ensure(buf, 4, "u32")?;
    Ok(buf.get_u32_le())
}

pub fn put_lenenc_int(buf: &mut BytesMut, value: u64) {
    if value < LENENC_NULL as u64 {
        buf.put_u8(value as u8);
    } else if value <= 0xFFFF {
        buf.put_u8(LENENC_2);
        buf.put_u16_le(value as u16);
    } else if value <= 0xFF_FFFF {
        buf.put_u8(LENENC_3);
        buf.put_uint_le(value, 3);
    } else {
        buf.put_u8(LENENC_8);
        buf.put_u64_le(value);
    }
}

pub fn put_lenenc_bytes(buf: &mut BytesMut, value: &[u8]) {
    put_lenenc_int(buf, value.len() as u64);
    buf.extend_from_slice(value);
}
