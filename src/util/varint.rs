//! Variable-length integer encoding.
//!
//! Little-endian base-128: the low 7 bits of each byte carry value bits in
//! increasing significance, the high bit marks continuation. A `u32` encodes
//! to 1-5 bytes; anything longer is rejected as corrupt.

use std::io::{Read, Write};

use byteorder::ReadBytesExt;

use crate::error::{QuaverError, Result};

/// Maximum encoded size of a 32-bit varint.
pub const MAX_VARINT32_BYTES: usize = 5;

/// Return the encoded size of a 32-bit varint.
pub fn varint32_len(value: u32) -> usize {
    if value < (1 << 7) {
        1
    } else if value < (1 << 14) {
        2
    } else if value < (1 << 21) {
        3
    } else if value < (1 << 28) {
        4
    } else {
        5
    }
}

/// Encode a u32 into the start of `buf`, returning the number of bytes
/// written. `buf` must have room for [`MAX_VARINT32_BYTES`].
pub fn encode_u32_into(buf: &mut [u8], value: u32) -> usize {
    let mut val = value;
    let mut i = 0;
    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;
        if val != 0 {
            byte |= 0x80;
        }
        buf[i] = byte;
        i += 1;
        if val == 0 {
            return i;
        }
    }
}

/// Decode a u32 from the start of `bytes`, returning the value and the
/// number of bytes consumed.
pub fn decode_u32(bytes: &[u8]) -> Result<(u32, usize)> {
    let mut result = 0u32;
    let mut i = 0;
    loop {
        if i >= bytes.len() {
            return Err(QuaverError::corrupt("truncated varint"));
        }
        if i >= MAX_VARINT32_BYTES {
            return Err(QuaverError::corrupt("varint longer than 5 bytes"));
        }
        let byte = bytes[i];
        result |= ((byte & 0x7F) as u32).wrapping_shl(7 * i as u32);
        i += 1;
        if byte & 0x80 == 0 {
            return Ok((result, i));
        }
    }
}

/// Write a varint-encoded u32 to a writer, returning the encoded size.
pub fn write_u32<W: Write + ?Sized>(writer: &mut W, value: u32) -> Result<usize> {
    let mut buf = [0u8; MAX_VARINT32_BYTES];
    let len = encode_u32_into(&mut buf, value);
    writer.write_all(&buf[..len])?;
    Ok(len)
}

/// Read a varint-encoded u32 from a reader.
pub fn read_u32<R: Read + ?Sized>(reader: &mut R) -> Result<u32> {
    let mut result = 0u32;
    let mut i = 0;
    loop {
        if i >= MAX_VARINT32_BYTES {
            return Err(QuaverError::corrupt("varint longer than 5 bytes"));
        }
        let byte = reader.read_u8()?;
        result |= ((byte & 0x7F) as u32).wrapping_shl(7 * i as u32);
        i += 1;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }
}
