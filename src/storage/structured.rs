//! Typed binary readers and writers over storage streams.
//!
//! All fixed-width integers are little endian. Variable-length integers use the
//! layout from [`crate::util::varint`]. Strings and byte arrays are written as a
//! vint length followed by the raw bytes.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, TesseraError};
use crate::storage::{StorageInput, StorageOutput};

/// Typed writer tracking its own byte position.
#[derive(Debug)]
pub struct StructWriter<W: Write> {
    inner: W,
    position: u64,
}

impl<W: Write> StructWriter<W> {
    pub fn new(inner: W) -> Self {
        StructWriter { inner, position: 0 }
    }

    /// Bytes written through this writer.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.inner.write_u8(value)?;
        self.position += 1;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.inner.write_u32::<LittleEndian>(value)?;
        self.position += 4;
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.inner.write_i32::<LittleEndian>(value)?;
        self.position += 4;
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.inner.write_u64::<LittleEndian>(value)?;
        self.position += 8;
        Ok(())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.inner.write_f32::<LittleEndian>(value)?;
        self.position += 4;
        Ok(())
    }

    /// Variable-length u32.
    pub fn write_vint(&mut self, value: u32) -> Result<()> {
        self.write_vlong(value as u64)
    }

    /// Variable-length u64.
    pub fn write_vlong(&mut self, mut value: u64) -> Result<()> {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.write_u8(byte)?;
            if value == 0 {
                return Ok(());
            }
        }
    }

    /// Raw bytes without a length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Length-prefixed bytes.
    pub fn write_vbytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_vint(bytes.len() as u32)?;
        self.write_bytes(bytes)
    }

    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_vbytes(value.as_bytes())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl StructWriter<Vec<u8>> {
    /// Writer over an in-memory buffer.
    pub fn in_memory() -> Self {
        StructWriter::new(Vec::new())
    }
}

impl StructWriter<Box<dyn StorageOutput>> {
    /// Flush and close the underlying output.
    pub fn close(mut self) -> Result<()> {
        self.inner.close()
    }
}

/// Typed reader over a seekable stream.
#[derive(Debug)]
pub struct StructReader<R: Read + Seek> {
    inner: R,
}

impl<R: Read + Seek> StructReader<R> {
    pub fn new(inner: R) -> Self {
        StructReader { inner }
    }

    pub fn position(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.inner.read_u8()?)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.inner.read_u32::<LittleEndian>()?)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.inner.read_i32::<LittleEndian>()?)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(self.inner.read_u64::<LittleEndian>()?)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(self.inner.read_f32::<LittleEndian>()?)
    }

    pub fn read_vint(&mut self) -> Result<u32> {
        let value = self.read_vlong()?;
        u32::try_from(value)
            .map_err(|_| TesseraError::corrupt(format!("vint {value} exceeds u32")))
    }

    pub fn read_vlong(&mut self) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0;
        loop {
            if shift >= 64 {
                return Err(TesseraError::corrupt("VarInt overflow"));
            }
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    /// Read exactly `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Fill `buf` completely.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf)?;
        Ok(())
    }

    pub fn read_vbytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_vint()? as usize;
        self.read_bytes(len)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_vbytes()?;
        String::from_utf8(bytes).map_err(|e| TesseraError::corrupt(format!("invalid UTF-8: {e}")))
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl StructReader<Box<dyn StorageInput>> {
    pub fn size(&self) -> Result<u64> {
        self.inner.size()
    }

    /// Independent reader over the same bytes, positioned where this one is.
    pub fn try_clone(&mut self) -> Result<Self> {
        let pos = self.position()?;
        let mut clone = StructReader::new(self.inner.clone_input()?);
        clone.seek(pos)?;
        Ok(clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_typed_roundtrip() {
        let mut w = StructWriter::in_memory();
        w.write_u8(7).unwrap();
        w.write_u32(0xDEADBEEF).unwrap();
        w.write_i32(-3).unwrap();
        w.write_u64(u64::MAX - 1).unwrap();
        w.write_f32(1.5).unwrap();
        w.write_vint(300).unwrap();
        w.write_vlong(1 << 40).unwrap();
        w.write_string("héllo").unwrap();
        w.write_vbytes(&[1, 2, 3]).unwrap();
        let pos = w.position();
        let bytes = w.into_inner();
        assert_eq!(pos, bytes.len() as u64);

        let mut r = StructReader::new(Cursor::new(bytes));
        assert_eq!(r.read_u8().unwrap(), 7);
        assert_eq!(r.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(r.read_i32().unwrap(), -3);
        assert_eq!(r.read_u64().unwrap(), u64::MAX - 1);
        assert_eq!(r.read_f32().unwrap(), 1.5);
        assert_eq!(r.read_vint().unwrap(), 300);
        assert_eq!(r.read_vlong().unwrap(), 1 << 40);
        assert_eq!(r.read_string().unwrap(), "héllo");
        assert_eq!(r.read_vbytes().unwrap(), vec![1, 2, 3]);
        assert!(r.read_u8().is_err());
    }

    #[test]
    fn test_vint_matches_varint_module() {
        let mut w = StructWriter::in_memory();
        w.write_vlong(16384).unwrap();
        assert_eq!(w.into_inner(), crate::util::varint::encode_u64(16384));
    }

    #[test]
    fn test_invalid_utf8_is_corrupt() {
        let mut w = StructWriter::in_memory();
        w.write_vbytes(&[0xFF, 0xFE]).unwrap();
        let mut r = StructReader::new(Cursor::new(w.into_inner()));
        assert!(matches!(r.read_string(), Err(TesseraError::Corrupt(_))));
    }
}
