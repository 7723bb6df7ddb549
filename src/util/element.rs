//! Element types - the storage types of dataset cells and attribute values.

use bytemuck::Pod;
use std::fmt;

use super::{Error, Result};

/// Storage type of a single dataset cell or attribute element.
///
/// Numeric types are stored little-endian. Fixed-length strings are
/// right-padded with `pad`. Variable-length types store a length-prefixed
/// byte sequence per element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// Signed 8-bit integer
    Int8,
    /// Signed 16-bit integer
    Int16,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 8-bit integer
    UInt8,
    /// Unsigned 16-bit integer
    UInt16,
    /// Unsigned 32-bit integer
    UInt32,
    /// Unsigned 64-bit integer
    UInt64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// Boolean stored as one byte, 0 or 1
    Bool,
    /// Fixed-length byte string of `len` bytes, right-padded with `pad`
    FixedString { len: u32, pad: u8 },
    /// Variable-length byte sequence
    VarBytes,
    /// Variable-length UTF-8 string
    VarString,
}

impl ElementType {
    /// Size in bytes of one element, or `None` for variable-length types.
    #[inline]
    pub const fn size(self) -> Option<usize> {
        match self {
            Self::Int8 | Self::UInt8 | Self::Bool => Some(1),
            Self::Int16 | Self::UInt16 => Some(2),
            Self::Int32 | Self::UInt32 | Self::Float32 => Some(4),
            Self::Int64 | Self::UInt64 | Self::Float64 => Some(8),
            Self::FixedString { len, .. } => Some(len as usize),
            Self::VarBytes | Self::VarString => None,
        }
    }

    /// On-disk tag of this type.
    pub const fn tag(self) -> u8 {
        match self {
            Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int32 => 3,
            Self::Int64 => 4,
            Self::UInt8 => 5,
            Self::UInt16 => 6,
            Self::UInt32 => 7,
            Self::UInt64 => 8,
            Self::Float32 => 9,
            Self::Float64 => 10,
            Self::Bool => 11,
            Self::FixedString { .. } => 12,
            Self::VarBytes => 13,
            Self::VarString => 14,
        }
    }

    /// Convert from an on-disk tag. Fixed strings need their parameters,
    /// so they are not constructible from the tag alone.
    pub const fn from_simple_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Int8),
            2 => Some(Self::Int16),
            3 => Some(Self::Int32),
            4 => Some(Self::Int64),
            5 => Some(Self::UInt8),
            6 => Some(Self::UInt16),
            7 => Some(Self::UInt32),
            8 => Some(Self::UInt64),
            9 => Some(Self::Float32),
            10 => Some(Self::Float64),
            11 => Some(Self::Bool),
            13 => Some(Self::VarBytes),
            14 => Some(Self::VarString),
            _ => None,
        }
    }

    /// Short name used in listings.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int8 => "i8",
            Self::Int16 => "i16",
            Self::Int32 => "i32",
            Self::Int64 => "i64",
            Self::UInt8 => "u8",
            Self::UInt16 => "u16",
            Self::UInt32 => "u32",
            Self::UInt64 => "u64",
            Self::Float32 => "f32",
            Self::Float64 => "f64",
            Self::Bool => "bool",
            Self::FixedString { .. } => "string",
            Self::VarBytes => "vlen<u8>",
            Self::VarString => "vlen<str>",
        }
    }

    /// Returns true for variable-length types.
    #[inline]
    pub const fn is_variable(self) -> bool {
        matches!(self, Self::VarBytes | Self::VarString)
    }

    /// Returns true if this is a numeric type (int or float).
    #[inline]
    pub const fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Returns true if this is an integer type.
    #[inline]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::UInt8
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
        )
    }

    /// Returns true if this is a floating point type.
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Returns true if this is a string type (fixed or variable).
    #[inline]
    pub const fn is_string(self) -> bool {
        matches!(self, Self::FixedString { .. } | Self::VarString)
    }

    /// Check that every element occupies storage: fixed-length strings need
    /// a positive length.
    pub fn validate(self) -> Result<()> {
        match self {
            Self::FixedString { len: 0, .. } => Err(Error::TypeMismatch {
                expected: "fixed-length string of at least one byte".to_string(),
                actual: self.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

// === Cell formatting ===

macro_rules! le_cell {
    ($t:ty, $cell:expr) => {
        <$t>::from_le_bytes(<[u8; std::mem::size_of::<$t>()]>::try_from($cell).unwrap_or_default())
    };
}

impl ElementType {
    /// Numeric value of one little-endian cell, `None` for non-numeric types
    /// or a cell of the wrong width.
    pub fn cell_to_f64(self, cell: &[u8]) -> Option<f64> {
        if self.size() != Some(cell.len()) {
            return None;
        }
        let v = match self {
            Self::Int8 => cell[0] as i8 as f64,
            Self::Int16 => le_cell!(i16, cell) as f64,
            Self::Int32 => le_cell!(i32, cell) as f64,
            Self::Int64 => le_cell!(i64, cell) as f64,
            Self::UInt8 => cell[0] as f64,
            Self::UInt16 => le_cell!(u16, cell) as f64,
            Self::UInt32 => le_cell!(u32, cell) as f64,
            Self::UInt64 => le_cell!(u64, cell) as f64,
            Self::Float32 => le_cell!(f32, cell) as f64,
            Self::Float64 => le_cell!(f64, cell),
            Self::Bool => cell[0] as f64,
            _ => return None,
        };
        Some(v)
    }

    /// Render one cell for listings.
    ///
    /// Integers print exactly, strings are quoted with escapes, fixed
    /// strings lose their trailing padding.
    pub fn format_cell(self, cell: &[u8]) -> String {
        match self {
            Self::Int64 if cell.len() == 8 => le_cell!(i64, cell).to_string(),
            Self::UInt64 if cell.len() == 8 => le_cell!(u64, cell).to_string(),
            Self::Float32 if cell.len() == 4 => le_cell!(f32, cell).to_string(),
            Self::Bool => match cell {
                [0] => "false".to_string(),
                [1] => "true".to_string(),
                other => format!("{:?}", other),
            },
            Self::FixedString { pad, .. } => {
                format!("{:?}", String::from_utf8_lossy(strip_padding(cell, pad)))
            }
            Self::VarString => format!("{:?}", String::from_utf8_lossy(cell)),
            Self::VarBytes => format!("<{} bytes>", cell.len()),
            other => match other.cell_to_f64(cell) {
                Some(v) => v.to_string(),
                None => format!("{:?}", cell),
            },
        }
    }
}

/// Strip trailing `pad` bytes from a fixed-length string cell.
pub(crate) fn strip_padding(cell: &[u8], pad: u8) -> &[u8] {
    let end = cell.iter().rposition(|&b| b != pad).map_or(0, |i| i + 1);
    &cell[..end]
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FixedString { len, .. } => write!(f, "string[{}]", len),
            other => write!(f, "{}", other.name()),
        }
    }
}

// === Element trait for typed access ===

/// Numeric types that can be stored as dataset cells or attribute elements.
pub trait Element: Pod + Default + PartialEq + fmt::Debug {
    /// The corresponding element type.
    const TYPE: ElementType;

    /// Size of this type in bytes.
    const SIZE: usize = std::mem::size_of::<Self>();

    /// Lossy conversion used by previews.
    fn to_f64(self) -> f64;
}

macro_rules! impl_element {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl Element for $t {
                const TYPE: ElementType = ElementType::$variant;

                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_element!(
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
);

/// Encode typed values as little-endian bytes.
pub fn encode_elements<T: Element>(values: &[T]) -> Vec<u8> {
    let mut out = bytemuck::cast_slice::<T, u8>(values).to_vec();
    if cfg!(target_endian = "big") {
        for cell in out.chunks_exact_mut(T::SIZE) {
            cell.reverse();
        }
    }
    out
}

/// Decode little-endian bytes into typed values.
pub fn decode_elements<T: Element>(bytes: &[u8]) -> Result<Vec<T>> {
    if bytes.len() % T::SIZE != 0 {
        return Err(Error::shape(format!(
            "{} bytes is not a whole number of {} elements",
            bytes.len(),
            T::TYPE
        )));
    }
    let mut out: Vec<T> = bytemuck::pod_collect_to_vec(bytes);
    if cfg!(target_endian = "big") {
        for v in &mut out {
            bytemuck::bytes_of_mut(v).reverse();
        }
    }
    Ok(out)
}

/// Encode booleans as one byte each.
pub fn encode_bools(values: &[bool]) -> Vec<u8> {
    values.iter().map(|&b| b as u8).collect()
}

/// Decode booleans, rejecting any byte other than 0 or 1.
pub fn decode_bools(bytes: &[u8]) -> Result<Vec<bool>> {
    bytes
        .iter()
        .map(|&b| match b {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::InvalidBoolEncoding(other)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(ElementType::Bool.size(), Some(1));
        assert_eq!(ElementType::Int32.size(), Some(4));
        assert_eq!(ElementType::Float64.size(), Some(8));
        assert_eq!(ElementType::FixedString { len: 5, pad: 0 }.size(), Some(5));
        assert_eq!(ElementType::VarBytes.size(), None);
    }

    #[test]
    fn test_tags() {
        for tag in 1..=14u8 {
            if let Some(ty) = ElementType::from_simple_tag(tag) {
                assert_eq!(ty.tag(), tag);
            } else {
                assert_eq!(tag, 12);
            }
        }
        assert_eq!(ElementType::from_simple_tag(0), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(ElementType::Float32.to_string(), "f32");
        assert_eq!(ElementType::FixedString { len: 10, pad: 0 }.to_string(), "string[10]");
    }

    #[test]
    fn test_elements_little_endian() -> Result<()> {
        let bytes = encode_elements(&[1i32, -2]);
        assert_eq!(bytes, vec![1, 0, 0, 0, 0xfe, 0xff, 0xff, 0xff]);
        assert_eq!(decode_elements::<i32>(&bytes)?, vec![1, -2]);
        Ok(())
    }

    #[test]
    fn test_decode_partial_element() {
        assert!(matches!(decode_elements::<u32>(&[1, 2, 3]), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_format_cell() {
        assert_eq!(ElementType::Int32.format_cell(&(-7i32).to_le_bytes()), "-7");
        assert_eq!(ElementType::Float64.format_cell(&2.5f64.to_le_bytes()), "2.5");
        assert_eq!(ElementType::Bool.format_cell(&[1]), "true");
        assert_eq!(
            ElementType::FixedString { len: 5, pad: 0 }.format_cell(b"hi\0\0\0"),
            "\"hi\""
        );
        assert_eq!(ElementType::VarBytes.format_cell(&[1, 2, 3]), "<3 bytes>");
        assert_eq!(ElementType::UInt16.cell_to_f64(&[1, 1]), Some(257.0));
        assert_eq!(ElementType::VarString.cell_to_f64(b"x"), None);
    }

    #[test]
    fn test_bools() {
        assert_eq!(decode_bools(&[0, 1]).unwrap(), vec![false, true]);
        assert!(matches!(decode_bools(&[0, 2]), Err(Error::InvalidBoolEncoding(2))));
    }
}
