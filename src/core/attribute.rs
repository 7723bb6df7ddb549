//! Attribute values and their binary encoding.
//!
//! An attribute is a small typed scalar or array stored inline with the
//! object that owns it. The encoded form is
//!
//! ```text
//! rank: u32 | dims: u64 * rank | payload
//! ```
//!
//! where the payload holds the raw little-endian cells for fixed-size types
//! and a `(u64 len, bytes)` sequence for variable-length types.

use std::fmt;

use crate::util::codec::{put_cells, Decoder};
use crate::util::{
    decode_bools, decode_elements, encode_bools, encode_elements, strip_padding, Coord, Element,
    ElementType, Error, Result,
};

/// Cell storage of an attribute value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttributeData {
    /// Fixed-size cells packed back to back.
    Fixed(Vec<u8>),
    /// One byte sequence per cell.
    VarLen(Vec<Vec<u8>>),
}

/// A typed scalar or array attached to a group or dataset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeValue {
    element_type: ElementType,
    dims: Coord,
    data: AttributeData,
}

fn element_count(dims: &[u64]) -> Result<usize> {
    dims.iter()
        .try_fold(1u64, |acc, &d| acc.checked_mul(d))
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| Error::shape(format!("attribute extents {:?} overflow", dims)))
}

fn type_mismatch(expected: impl fmt::Display, actual: ElementType) -> Error {
    Error::TypeMismatch { expected: expected.to_string(), actual: actual.to_string() }
}

impl AttributeValue {
    /// Build a value from its parts, checking that the cells agree with the
    /// type and extents.
    pub fn from_parts(element_type: ElementType, dims: &[u64], data: AttributeData) -> Result<Self> {
        element_type.validate()?;
        let count = element_count(dims)?;
        match (&data, element_type.size()) {
            (AttributeData::Fixed(bytes), Some(size)) => {
                let expected = count
                    .checked_mul(size)
                    .ok_or_else(|| Error::shape("attribute size overflows"))?;
                if bytes.len() != expected {
                    return Err(Error::shape(format!(
                        "{} bytes for {} {} elements, expected {}",
                        bytes.len(),
                        count,
                        element_type,
                        expected
                    )));
                }
                if element_type == ElementType::Bool {
                    decode_bools(bytes)?;
                }
            }
            (AttributeData::VarLen(cells), None) => {
                if cells.len() != count {
                    return Err(Error::shape(format!(
                        "{} cells for {} elements",
                        cells.len(),
                        count
                    )));
                }
                if element_type == ElementType::VarString {
                    for cell in cells {
                        std::str::from_utf8(cell)
                            .map_err(|e| Error::invalid(format!("string attribute: {}", e)))?;
                    }
                }
            }
            (AttributeData::Fixed(_), None) => {
                return Err(type_mismatch("fixed-size type", element_type));
            }
            (AttributeData::VarLen(_), Some(_)) => {
                return Err(type_mismatch("variable-length type", element_type));
            }
        }
        Ok(Self { element_type, dims: dims.into(), data })
    }

    // ========================================================================
    // Constructors
    // ========================================================================

    /// Numeric scalar.
    pub fn scalar<T: Element>(value: T) -> Self {
        Self {
            element_type: T::TYPE,
            dims: Coord::new(),
            data: AttributeData::Fixed(encode_elements(&[value])),
        }
    }

    /// One-dimensional numeric array.
    pub fn array<T: Element>(values: &[T]) -> Self {
        Self {
            element_type: T::TYPE,
            dims: Coord::from_slice(&[values.len() as u64]),
            data: AttributeData::Fixed(encode_elements(values)),
        }
    }

    /// Multi-dimensional numeric array in row-major order.
    pub fn array_nd<T: Element>(dims: &[u64], values: &[T]) -> Result<Self> {
        Self::from_parts(T::TYPE, dims, AttributeData::Fixed(encode_elements(values)))
    }

    pub fn boolean(value: bool) -> Self {
        Self {
            element_type: ElementType::Bool,
            dims: Coord::new(),
            data: AttributeData::Fixed(encode_bools(&[value])),
        }
    }

    pub fn booleans(values: &[bool]) -> Self {
        Self {
            element_type: ElementType::Bool,
            dims: Coord::from_slice(&[values.len() as u64]),
            data: AttributeData::Fixed(encode_bools(values)),
        }
    }

    /// Variable-length UTF-8 string scalar.
    pub fn string(value: &str) -> Self {
        Self {
            element_type: ElementType::VarString,
            dims: Coord::new(),
            data: AttributeData::VarLen(vec![value.as_bytes().to_vec()]),
        }
    }

    /// Array of variable-length UTF-8 strings.
    pub fn strings<S: AsRef<str>>(values: &[S]) -> Self {
        Self {
            element_type: ElementType::VarString,
            dims: Coord::from_slice(&[values.len() as u64]),
            data: AttributeData::VarLen(
                values.iter().map(|s| s.as_ref().as_bytes().to_vec()).collect(),
            ),
        }
    }

    /// Fixed-length string scalar, right-padded with `pad`.
    ///
    /// Fails with [`Error::ValueTooLong`] rather than truncating.
    pub fn fixed_string(value: &[u8], len: u32, pad: u8) -> Result<Self> {
        Self::fixed_strings(&[value], len, pad).map(|mut v| {
            v.dims.clear();
            v
        })
    }

    /// Array of fixed-length strings, each right-padded with `pad`.
    pub fn fixed_strings<S: AsRef<[u8]>>(values: &[S], len: u32, pad: u8) -> Result<Self> {
        ElementType::FixedString { len, pad }.validate()?;
        let width = len as usize;
        let mut data = Vec::with_capacity(values.len() * width);
        for value in values {
            let value = value.as_ref();
            if value.len() > width {
                return Err(Error::ValueTooLong { len: value.len(), max: width });
            }
            data.extend_from_slice(value);
            data.resize(data.len() + width - value.len(), pad);
        }
        Ok(Self {
            element_type: ElementType::FixedString { len, pad },
            dims: Coord::from_slice(&[values.len() as u64]),
            data: AttributeData::Fixed(data),
        })
    }

    /// Opaque variable-length byte sequence.
    pub fn bytes(value: &[u8]) -> Self {
        Self {
            element_type: ElementType::VarBytes,
            dims: Coord::new(),
            data: AttributeData::VarLen(vec![value.to_vec()]),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Extents; empty for a scalar.
    #[inline]
    pub fn dims(&self) -> &[u64] {
        &self.dims
    }

    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    #[inline]
    pub fn data(&self) -> &AttributeData {
        &self.data
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match (&self.data, self.element_type.size()) {
            (AttributeData::Fixed(bytes), Some(size)) if size > 0 => bytes.len() / size,
            (AttributeData::Fixed(_), _) => element_count(&self.dims).unwrap_or(0),
            (AttributeData::VarLen(cells), _) => cells.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fixed_bytes(&self) -> Result<&[u8]> {
        match &self.data {
            AttributeData::Fixed(bytes) => Ok(bytes),
            AttributeData::VarLen(_) => Err(type_mismatch("fixed-size type", self.element_type)),
        }
    }

    fn single(&self) -> Result<()> {
        if self.len() != 1 {
            return Err(Error::shape(format!(
                "expected a single element, attribute has {}",
                self.len()
            )));
        }
        Ok(())
    }

    /// The single numeric element.
    pub fn as_scalar<T: Element>(&self) -> Result<T> {
        self.single()?;
        self.as_vec::<T>()?
            .pop()
            .ok_or_else(|| Error::shape("empty attribute"))
    }

    /// All numeric elements in row-major order.
    pub fn as_vec<T: Element>(&self) -> Result<Vec<T>> {
        if self.element_type != T::TYPE {
            return Err(type_mismatch(T::TYPE, self.element_type));
        }
        decode_elements(self.fixed_bytes()?)
    }

    pub fn as_bool(&self) -> Result<bool> {
        self.single()?;
        Ok(self.as_bools()?.first().copied().unwrap_or_default())
    }

    pub fn as_bools(&self) -> Result<Vec<bool>> {
        if self.element_type != ElementType::Bool {
            return Err(type_mismatch(ElementType::Bool, self.element_type));
        }
        decode_bools(self.fixed_bytes()?)
    }

    /// The single string element, fixed or variable length.
    pub fn as_string(&self) -> Result<String> {
        self.single()?;
        self.as_strings()?
            .pop()
            .ok_or_else(|| Error::shape("empty attribute"))
    }

    /// All string elements. Fixed-length strings lose their trailing padding.
    pub fn as_strings(&self) -> Result<Vec<String>> {
        match (self.element_type, &self.data) {
            (ElementType::VarString, AttributeData::VarLen(cells)) => cells
                .iter()
                .map(|c| String::from_utf8(c.clone()).map_err(Error::from))
                .collect(),
            (ElementType::FixedString { len, pad }, AttributeData::Fixed(bytes)) if len > 0 => bytes
                .chunks_exact(len as usize)
                .map(|c| String::from_utf8(strip_padding(c, pad).to_vec()).map_err(Error::from))
                .collect(),
            (other, _) => Err(type_mismatch("string", other)),
        }
    }

    /// The single opaque byte sequence.
    pub fn as_bytes(&self) -> Result<&[u8]> {
        self.single()?;
        match (&self.data, self.element_type) {
            (AttributeData::VarLen(cells), ElementType::VarBytes) => Ok(&cells[0]),
            (_, other) => Err(type_mismatch(ElementType::VarBytes, other)),
        }
    }

    /// Iterate over the raw cells.
    pub fn cells(&self) -> Box<dyn Iterator<Item = &[u8]> + '_> {
        match (&self.data, self.element_type.size()) {
            (AttributeData::Fixed(bytes), Some(size)) if size > 0 => Box::new(bytes.chunks_exact(size)),
            (AttributeData::Fixed(_), _) => Box::new((0..self.len()).map(|_| &[][..])),
            (AttributeData::VarLen(cells), _) => Box::new(cells.iter().map(Vec::as_slice)),
        }
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Encode as `rank | dims | payload`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 8 * self.dims.len() + self.payload_len());
        buf.extend_from_slice(&(self.dims.len() as u32).to_le_bytes());
        for &d in &self.dims {
            buf.extend_from_slice(&d.to_le_bytes());
        }
        match &self.data {
            AttributeData::Fixed(bytes) => buf.extend_from_slice(bytes),
            AttributeData::VarLen(cells) => put_cells(&mut buf, cells),
        }
        buf
    }

    /// Decode a value of the given element type.
    pub fn decode(bytes: &[u8], element_type: ElementType) -> Result<Self> {
        let mut d = Decoder::new(bytes);
        let value = Self::decode_from(&mut d, element_type)?;
        if !d.is_empty() {
            return Err(Error::invalid(format!(
                "{} trailing bytes after attribute value",
                d.remaining()
            )));
        }
        Ok(value)
    }

    pub(crate) fn decode_from(d: &mut Decoder<'_>, element_type: ElementType) -> Result<Self> {
        let rank = d.u32()? as usize;
        if rank > d.remaining() / 8 {
            return Err(Error::invalid(format!("attribute rank {} exceeds its block", rank)));
        }
        let mut dims = Coord::with_capacity(rank);
        for _ in 0..rank {
            dims.push(d.u64()?);
        }
        element_type.validate()?;
        let count = element_count(&dims)?;
        let data = match element_type.size() {
            Some(size) => {
                let len = count
                    .checked_mul(size)
                    .ok_or_else(|| Error::invalid("attribute size overflows"))?;
                AttributeData::Fixed(d.bytes(len)?.to_vec())
            }
            None => AttributeData::VarLen(d.cells(count)?),
        };
        Self::from_parts(element_type, &dims, data)
    }

    fn payload_len(&self) -> usize {
        match &self.data {
            AttributeData::Fixed(bytes) => bytes.len(),
            AttributeData::VarLen(cells) => cells.iter().map(|c| 8 + c.len()).sum(),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_scalar() {
            if let Some(cell) = self.cells().next() {
                return write!(f, "{}", self.element_type.format_cell(cell));
            }
        }
        write!(f, "[")?;
        for (i, cell) in self.cells().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", self.element_type.format_cell(cell))?;
        }
        write!(f, "]")
    }
}

macro_rules! impl_from_scalar {
    ($($t:ty),*) => {
        $(
            impl From<$t> for AttributeValue {
                fn from(value: $t) -> Self {
                    Self::scalar(value)
                }
            }
        )*
    };
}

impl_from_scalar!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::boolean(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::string(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: &AttributeValue) -> AttributeValue {
        AttributeValue::decode(&value.encode(), value.element_type()).unwrap()
    }

    #[test]
    fn test_numeric_round_trip() {
        let values = [
            AttributeValue::scalar(42i64),
            AttributeValue::scalar(-3i8),
            AttributeValue::scalar(u64::MAX),
            AttributeValue::scalar(3.14f64),
            AttributeValue::array(&[1.0f32, 2.0, 3.0]),
            AttributeValue::array(&[1i32, 2, 3, 4, 5]),
            AttributeValue::array_nd(&[2, 3], &[1u16, 2, 3, 4, 5, 6]).unwrap(),
            AttributeValue::array::<u8>(&[]),
        ];
        for value in &values {
            assert_eq!(&round_trip(value), value);
        }
        assert_eq!(round_trip(&values[0]).as_scalar::<i64>().unwrap(), 42);
        assert_eq!(round_trip(&values[6]).dims(), &[2, 3]);
    }

    #[test]
    fn test_string_round_trip() {
        let note = AttributeValue::string("hello");
        assert_eq!(round_trip(&note).as_string().unwrap(), "hello");

        let empty = AttributeValue::string("");
        let decoded = round_trip(&empty);
        assert_eq!(decoded.as_string().unwrap(), "");
        assert_eq!(decoded.len(), 1);

        let many = AttributeValue::strings(&["a", "", "long\nvalue"]);
        assert_eq!(round_trip(&many).as_strings().unwrap(), vec!["a", "", "long\nvalue"]);
    }

    #[test]
    fn test_fixed_strings() {
        let value = AttributeValue::fixed_strings(&[&b"hello"[..], b"wo"], 5, b' ').unwrap();
        assert_eq!(value.data(), &AttributeData::Fixed(b"hellowo   ".to_vec()));
        let decoded = round_trip(&value);
        assert_eq!(decoded.element_type(), ElementType::FixedString { len: 5, pad: b' ' });
        assert_eq!(decoded.as_strings().unwrap(), vec!["hello", "wo"]);

        // Fixed and variable-length strings stay distinct types.
        assert_ne!(decoded.element_type(), AttributeValue::strings(&["hello", "wo"]).element_type());
    }

    #[test]
    fn test_fixed_string_too_long() {
        let err = AttributeValue::fixed_string(b"toolong", 5, 0).unwrap_err();
        assert!(matches!(err, Error::ValueTooLong { len: 7, max: 5 }));
    }

    #[test]
    fn test_zero_width_strings_rejected() {
        let zero = ElementType::FixedString { len: 0, pad: 0 };
        assert!(matches!(AttributeValue::fixed_strings(&[b""], 0, 0), Err(Error::TypeMismatch { .. })));
        assert!(AttributeValue::from_parts(zero, &[3], AttributeData::Fixed(Vec::new())).is_err());

        // A huge element count with no payload must not be accepted.
        let mut bytes = 1u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(1u64 << 40).to_le_bytes());
        assert!(matches!(AttributeValue::decode(&bytes, zero), Err(Error::TypeMismatch { .. })));
        let wide = ElementType::FixedString { len: 4, pad: 0 };
        assert!(matches!(AttributeValue::decode(&bytes, wide), Err(Error::UnexpectedEof(_))));
    }

    #[test]
    fn test_bool_encoding() {
        let value = AttributeValue::booleans(&[true, false, true]);
        assert_eq!(value.encode()[12..], [1, 0, 1]);
        assert_eq!(round_trip(&value).as_bools().unwrap(), vec![true, false, true]);

        let mut bytes = AttributeValue::boolean(true).encode();
        *bytes.last_mut().unwrap() = 2;
        assert!(matches!(
            AttributeValue::decode(&bytes, ElementType::Bool),
            Err(Error::InvalidBoolEncoding(2))
        ));
    }

    #[test]
    fn test_bytes_round_trip() {
        let value = AttributeValue::bytes(&[0, 255, 7]);
        assert_eq!(round_trip(&value).as_bytes().unwrap(), &[0, 255, 7]);
    }

    #[test]
    fn test_type_mismatch() {
        let value = AttributeValue::scalar(1i32);
        assert!(matches!(value.as_scalar::<f64>(), Err(Error::TypeMismatch { .. })));
        assert!(matches!(value.as_string(), Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_truncated_decode() {
        let bytes = AttributeValue::array(&[1u32, 2, 3]).encode();
        assert!(matches!(
            AttributeValue::decode(&bytes[..bytes.len() - 1], ElementType::UInt32),
            Err(Error::UnexpectedEof(_))
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(AttributeValue::scalar(42i32).to_string(), "42");
        assert_eq!(AttributeValue::array(&[1i64, 2]).to_string(), "[1, 2]");
        assert_eq!(AttributeValue::string("hi").to_string(), "\"hi\"");
        assert_eq!(AttributeValue::booleans(&[true, false]).to_string(), "[true, false]");
    }
}
