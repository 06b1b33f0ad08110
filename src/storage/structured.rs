//! Structured binary I/O over directory streams.
//!
//! Thin wrappers around `Read`/`Write` that add the fixed-width big-endian
//! fields and varints used by the index file formats, with position tracking
//! and a rolling CRC32.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{QuaverError, Result};
use crate::util::varint;

/// A structured writer for index files.
pub struct StructWriter<W> {
    writer: W,
    hasher: crc32fast::Hasher,
    position: u64,
}

impl<W: std::io::Write> StructWriter<W> {
    /// Create a new structured writer.
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: crc32fast::Hasher::new(),
            position: 0,
        }
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        self.hasher.update(&[value]);
        self.position += 1;
        Ok(())
    }

    /// Write a u16 value (big-endian).
    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.writer.write_u16::<BigEndian>(value)?;
        self.hasher.update(&value.to_be_bytes());
        self.position += 2;
        Ok(())
    }

    /// Write a u32 value (big-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<BigEndian>(value)?;
        self.hasher.update(&value.to_be_bytes());
        self.position += 4;
        Ok(())
    }

    /// Write a u64 value (big-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<BigEndian>(value)?;
        self.hasher.update(&value.to_be_bytes());
        self.position += 8;
        Ok(())
    }

    /// Write a variable-length encoded u32.
    pub fn write_vint32(&mut self, value: u32) -> Result<()> {
        let mut buf = [0u8; varint::MAX_VARINT32_BYTES];
        let len = varint::encode_u32_into(&mut buf, value);
        self.write_raw(&buf[..len])
    }

    /// Write a byte slice with a varint length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_vint32(value.len() as u32)?;
        self.write_raw(value)
    }

    /// Write raw bytes without a length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.hasher.update(value);
        self.position += value.len() as u64;
        Ok(())
    }

    /// Current position in the output.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Rolling CRC32 of everything written so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Unwrap the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// A structured reader for index files.
pub struct StructReader<R> {
    reader: R,
    hasher: crc32fast::Hasher,
    position: u64,
}

impl<R: std::io::Read> StructReader<R> {
    /// Create a new structured reader.
    pub fn new(reader: R) -> Self {
        StructReader {
            reader,
            hasher: crc32fast::Hasher::new(),
            position: 0,
        }
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        let value = self.reader.read_u8()?;
        self.hasher.update(&[value]);
        self.position += 1;
        Ok(value)
    }

    /// Read a u16 value (big-endian).
    pub fn read_u16(&mut self) -> Result<u16> {
        let value = self.reader.read_u16::<BigEndian>()?;
        self.hasher.update(&value.to_be_bytes());
        self.position += 2;
        Ok(value)
    }

    /// Read a u32 value (big-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self.reader.read_u32::<BigEndian>()?;
        self.hasher.update(&value.to_be_bytes());
        self.position += 4;
        Ok(value)
    }

    /// Read a u64 value (big-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        let value = self.reader.read_u64::<BigEndian>()?;
        self.hasher.update(&value.to_be_bytes());
        self.position += 8;
        Ok(value)
    }

    /// Read a variable-length encoded u32.
    pub fn read_vint32(&mut self) -> Result<u32> {
        let mut result = 0u32;
        let mut i = 0;
        loop {
            if i >= varint::MAX_VARINT32_BYTES {
                return Err(QuaverError::corrupt("varint longer than 5 bytes"));
            }
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u32).wrapping_shl(7 * i as u32);
            i += 1;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
    }

    /// Read a varint-length-prefixed byte vector.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_vint32()? as usize;
        let mut buf = vec![0u8; len];
        self.read_raw(&mut buf)?;
        Ok(buf)
    }

    /// Read exactly `buf.len()` raw bytes.
    pub fn read_raw(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader.read_exact(buf)?;
        self.hasher.update(buf);
        self.position += buf.len() as u64;
        Ok(())
    }

    /// Current position in the input.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Rolling CRC32 of everything read so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Unwrap the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_write_read_roundtrip() {
        let mut writer = StructWriter::new(Vec::new());
        writer.write_u8(7).unwrap();
        writer.write_u16(512).unwrap();
        writer.write_u32(0xDEADBEEF).unwrap();
        writer.write_u64(1 << 40).unwrap();
        writer.write_vint32(300).unwrap();
        writer.write_bytes(b"hello").unwrap();
        let written_checksum = writer.checksum();
        let buffer = writer.into_inner();

        let mut reader = StructReader::new(Cursor::new(buffer));
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert_eq!(reader.read_u16().unwrap(), 512);
        assert_eq!(reader.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(reader.read_u64().unwrap(), 1 << 40);
        assert_eq!(reader.read_vint32().unwrap(), 300);
        assert_eq!(reader.read_bytes().unwrap(), b"hello");
        assert_eq!(reader.checksum(), written_checksum);
    }

    #[test]
    fn test_big_endian_layout() {
        let mut writer = StructWriter::new(Vec::new());
        writer.write_u16(0x0102).unwrap();
        writer.write_u32(0x03040506).unwrap();
        let buffer = writer.into_inner();

        assert_eq!(buffer, vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    }

    #[test]
    fn test_position_tracking() {
        let mut writer = StructWriter::new(Vec::new());
        writer.write_u32(1).unwrap();
        writer.write_vint32(128).unwrap();
        assert_eq!(writer.position(), 6);
    }
}
