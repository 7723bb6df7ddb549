//! Positioned output stream.

use std::io::{BufWriter, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::util::{Error, Result};

/// Buffered output stream that tracks its write position.
pub struct OStream<W: Write + Seek> {
    writer: BufWriter<W>,
    pos: u64,
}

impl<W: Write + Seek> OStream<W> {
    /// Wrap a seekable writer, starting at its beginning.
    pub fn new(inner: W) -> Result<Self> {
        let mut writer = BufWriter::with_capacity(2 * 1024 * 1024, inner); // 2MB buffer
        writer.seek(SeekFrom::Start(0))?;
        Ok(Self { writer, pos: 0 })
    }

    /// Get the current write position.
    #[inline]
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Write bytes and advance position.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.pos += data.len() as u64;
        Ok(())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<LittleEndian>(value)?;
        self.pos += 8;
        Ok(())
    }

    /// Write a u16 value (little-endian).
    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.writer.write_u16::<LittleEndian>(value)?;
        self.pos += 2;
        Ok(())
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        self.pos += 4;
        Ok(())
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        self.pos += 1;
        Ok(())
    }

    /// Write zeroes up to `pos`.
    pub fn pad_to(&mut self, pos: u64) -> Result<()> {
        if pos < self.pos {
            return Err(Error::invalid(format!(
                "cannot pad backwards from {} to {}",
                self.pos, pos
            )));
        }
        const ZEROS: [u8; 64] = [0; 64];
        while self.pos < pos {
            let n = (pos - self.pos).min(ZEROS.len() as u64) as usize;
            self.write_bytes(&ZEROS[..n])?;
        }
        Ok(())
    }

    /// Seek to a position and return it.
    pub fn seek(&mut self, pos: u64) -> Result<u64> {
        self.writer.flush()?;
        let new_pos = self.writer.seek(SeekFrom::Start(pos))?;
        self.pos = new_pos;
        Ok(new_pos)
    }

    /// Flush the buffer to the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer.into_inner().map_err(|e| Error::Io(e.into_error()))
    }
}

/// Blocks placed by the allocator, waiting to be written in offset order.
#[derive(Default)]
pub struct WritePlan {
    blocks: Vec<(u64, Vec<u8>)>,
}

impl WritePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `bytes` for writing at `offset`.
    pub fn push(&mut self, offset: u64, bytes: Vec<u8>) {
        self.blocks.push((offset, bytes));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Write every block in offset order, zero-filling alignment gaps, and
    /// pad the stream to `eof`. Overlapping blocks are an error.
    pub fn write_to<W: Write + Seek>(mut self, stream: &mut OStream<W>, eof: u64) -> Result<()> {
        self.blocks.sort_by_key(|(offset, _)| *offset);
        for (offset, bytes) in self.blocks {
            stream.pad_to(offset)?;
            stream.write_bytes(&bytes)?;
        }
        stream.pad_to(eof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_stream_positions() -> Result<()> {
        let mut stream = OStream::new(Cursor::new(Vec::new()))?;
        stream.write_u8(1)?;
        stream.write_u32(2)?;
        stream.write_u64(3)?;
        assert_eq!(stream.pos(), 13);
        stream.pad_to(16)?;
        stream.seek(0)?;
        stream.write_u8(9)?;
        let bytes = stream.into_inner()?.into_inner();
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes[0], 9);
        assert_eq!(&bytes[1..5], &2u32.to_le_bytes());
        Ok(())
    }

    #[test]
    fn test_plan_orders_blocks() -> Result<()> {
        let mut plan = WritePlan::new();
        plan.push(8, vec![2, 2]);
        plan.push(2, vec![1]);
        let mut stream = OStream::new(Cursor::new(Vec::new()))?;
        plan.write_to(&mut stream, 12)?;
        let bytes = stream.into_inner()?.into_inner();
        assert_eq!(bytes, vec![0, 0, 1, 0, 0, 0, 0, 0, 2, 2, 0, 0]);
        Ok(())
    }

    #[test]
    fn test_plan_rejects_overlap() -> Result<()> {
        let mut plan = WritePlan::new();
        plan.push(0, vec![1, 1, 1]);
        plan.push(1, vec![2]);
        let mut stream = OStream::new(Cursor::new(Vec::new()))?;
        assert!(plan.write_to(&mut stream, 4).is_err());
        Ok(())
    }
}
