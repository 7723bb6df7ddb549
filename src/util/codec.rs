//! Little-endian encode/decode helpers shared by the attribute encoder and
//! the container format.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{ElementType, Error, Result};

/// Bounds-checked little-endian reader over a byte slice.
///
/// `base` is the file position of the slice, used in error reports.
pub(crate) struct Decoder<'a> {
    cursor: Cursor<&'a [u8]>,
    base: u64,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self::at(buf, 0)
    }

    pub(crate) fn at(buf: &'a [u8], base: u64) -> Self {
        Self { cursor: Cursor::new(buf), base }
    }

    #[inline]
    pub(crate) fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn eof_at(&self, pos: usize, wanted: usize) -> Error {
        Error::UnexpectedEof(self.base.saturating_add(pos as u64).saturating_add(wanted as u64))
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        let pos = self.position();
        self.cursor.read_u8().map_err(|_| self.eof_at(pos, 1))
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        let pos = self.position();
        self.cursor.read_u16::<LittleEndian>().map_err(|_| self.eof_at(pos, 2))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let pos = self.position();
        self.cursor.read_u32::<LittleEndian>().map_err(|_| self.eof_at(pos, 4))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        let pos = self.position();
        self.cursor.read_u64::<LittleEndian>().map_err(|_| self.eof_at(pos, 8))
    }

    /// Borrow the next `len` bytes.
    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let buf: &'a [u8] = *self.cursor.get_ref();
        let start = self.position();
        let end = start.checked_add(len).filter(|&end| end <= buf.len());
        match end {
            Some(end) => {
                self.cursor.set_position(end as u64);
                Ok(&buf[start..end])
            }
            None => Err(self.eof_at(start, len)),
        }
    }

    /// Read a length that must fit in memory.
    pub(crate) fn len_u64(&mut self) -> Result<usize> {
        let pos = self.position();
        let len = self.u64()?;
        usize::try_from(len)
            .ok()
            .filter(|&l| l <= self.remaining())
            .ok_or_else(|| self.eof_at(pos + 8, len.min(usize::MAX as u64) as usize))
    }

    /// Name with a u16 length prefix.
    pub(crate) fn name(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        Ok(String::from_utf8(self.bytes(len)?.to_vec())?)
    }

    /// String with a u32 length prefix.
    pub(crate) fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        Ok(String::from_utf8(self.bytes(len)?.to_vec())?)
    }

    /// `count` variable-length cells, each a u64 length and its bytes.
    pub(crate) fn cells(&mut self, count: usize) -> Result<Vec<Vec<u8>>> {
        let mut cells = Vec::with_capacity(count.min(self.remaining() / 8));
        for _ in 0..count {
            let len = self.len_u64()?;
            cells.push(self.bytes(len)?.to_vec());
        }
        Ok(cells)
    }

    /// Element type encoding: tag, plus length and pad for fixed strings.
    pub(crate) fn element_type(&mut self) -> Result<ElementType> {
        let pos = self.base + self.position() as u64;
        let tag = self.u8()?;
        if tag == (ElementType::FixedString { len: 0, pad: 0 }).tag() {
            let len = self.u32()?;
            let pad = self.u8()?;
            if len == 0 {
                return Err(Error::invalid(format!("zero-length fixed string type at {}", pos)));
            }
            return Ok(ElementType::FixedString { len, pad });
        }
        ElementType::from_simple_tag(tag)
            .ok_or_else(|| Error::invalid(format!("unknown element type tag {} at {}", tag, pos)))
    }
}

/// Write a name with a u16 length prefix.
pub(crate) fn put_name(buf: &mut Vec<u8>, name: &str) -> Result<()> {
    let len = u16::try_from(name.len())
        .map_err(|_| Error::InvalidName(name.to_string()))?;
    buf.write_u16::<LittleEndian>(len)?;
    buf.extend_from_slice(name.as_bytes());
    Ok(())
}

/// Write a string with a u32 length prefix.
pub(crate) fn put_string(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = u32::try_from(s.len())
        .map_err(|_| Error::ValueTooLong { len: s.len(), max: u32::MAX as usize })?;
    buf.write_u32::<LittleEndian>(len)?;
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Write variable-length cells, each as a u64 length and its bytes.
pub(crate) fn put_cells<C: AsRef<[u8]>>(buf: &mut Vec<u8>, cells: &[C]) {
    for cell in cells {
        let cell = cell.as_ref();
        buf.extend_from_slice(&(cell.len() as u64).to_le_bytes());
        buf.extend_from_slice(cell);
    }
}

/// Write an element type encoding.
pub(crate) fn put_element_type(buf: &mut Vec<u8>, ty: ElementType) {
    buf.push(ty.tag());
    if let ElementType::FixedString { len, pad } = ty {
        buf.extend_from_slice(&len.to_le_bytes());
        buf.push(pad);
    }
}
