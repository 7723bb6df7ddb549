//! Dataset shapes.
//!
//! A shape is an ordered list of dimensions, each with a current extent and
//! a maximum extent (`None` meaning unlimited).

use smallvec::SmallVec;
use std::fmt;

/// Coordinates or extents along each dimension.
pub type Coord = SmallVec<[u64; 4]>;

/// Marker for the maximum of an unlimited dimension on disk.
pub const UNLIMITED: u64 = u64::MAX;

/// A single dimension of a dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Dim {
    /// Current extent.
    pub size: u64,
    /// Maximum extent, `None` for unlimited.
    pub max: Option<u64>,
}

impl Dim {
    /// A dimension that can never change.
    pub const fn fixed(size: u64) -> Self {
        Self { size, max: Some(size) }
    }

    /// A dimension that can grow without bound.
    pub const fn unlimited(size: u64) -> Self {
        Self { size, max: None }
    }

    /// A dimension that can grow up to `max`.
    pub const fn limited(size: u64, max: u64) -> Self {
        Self { size, max: Some(max) }
    }

    #[inline]
    pub const fn is_unlimited(&self) -> bool {
        self.max.is_none()
    }

    /// Check if the dimension may take the given extent.
    #[inline]
    pub fn allows(&self, size: u64) -> bool {
        self.max.map_or(true, |max| size <= max)
    }
}

/// Shape of a dataset or attribute.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Shape {
    /// Dimensions in row-major order. Empty means scalar (rank 0).
    dims: SmallVec<[Dim; 4]>,
}

impl Shape {
    /// Scalar shape (rank 0).
    pub fn scalar() -> Self {
        Self { dims: SmallVec::new() }
    }

    /// Shape with fixed dimensions.
    pub fn fixed(sizes: &[u64]) -> Self {
        Self { dims: sizes.iter().map(|&s| Dim::fixed(s)).collect() }
    }

    /// Shape from explicit dimensions.
    pub fn new(dims: impl IntoIterator<Item = Dim>) -> Self {
        Self { dims: dims.into_iter().collect() }
    }

    /// Get the rank (number of dimensions).
    #[inline]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Check if this represents a scalar (rank 0).
    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Get all dimensions.
    #[inline]
    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    /// Current extents.
    pub fn sizes(&self) -> Coord {
        self.dims.iter().map(|d| d.size).collect()
    }

    /// Maximum extents (`None` for unlimited).
    pub fn max_sizes(&self) -> SmallVec<[Option<u64>; 4]> {
        self.dims.iter().map(|d| d.max).collect()
    }

    /// Total number of elements, saturating at `u64::MAX`.
    pub fn num_elements(&self) -> u64 {
        self.dims
            .iter()
            .try_fold(1u64, |acc, d| acc.checked_mul(d.size))
            .unwrap_or(u64::MAX)
    }

    /// Returns true if any dimension may change extent.
    pub fn is_resizable(&self) -> bool {
        self.dims.iter().any(|d| d.max != Some(d.size))
    }

    /// Copy of this shape with new current extents (maxima unchanged).
    pub(crate) fn with_sizes(&self, sizes: &[u64]) -> Self {
        Self {
            dims: self
                .dims
                .iter()
                .zip(sizes)
                .map(|(d, &size)| Dim { size, max: d.max })
                .collect(),
        }
    }
}

impl From<&[u64]> for Shape {
    fn from(sizes: &[u64]) -> Self {
        Self::fixed(sizes)
    }
}

impl<const N: usize> From<[u64; N]> for Shape {
    fn from(sizes: [u64; N]) -> Self {
        Self::fixed(&sizes)
    }
}

impl From<Vec<Dim>> for Shape {
    fn from(dims: Vec<Dim>) -> Self {
        Self { dims: SmallVec::from_vec(dims) }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, " x ")?;
            }
            match d.max {
                Some(max) if max == d.size => write!(f, "{}", d.size)?,
                Some(max) => write!(f, "{}/{}", d.size, max)?,
                None => write!(f, "{}/inf", d.size)?,
            }
        }
        write!(f, "]")
    }
}

/// Row-major linear index of `point` within a block of extents `dims`.
#[inline]
pub(crate) fn linear_index(point: &[u64], dims: &[u64]) -> u64 {
    point
        .iter()
        .zip(dims)
        .fold(0u64, |acc, (&p, &d)| acc * d + p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar() {
        let s = Shape::scalar();
        assert_eq!(s.rank(), 0);
        assert!(s.is_scalar());
        assert_eq!(s.num_elements(), 1);
    }

    #[test]
    fn test_fixed() {
        let s = Shape::from([640, 480]);
        assert_eq!(s.rank(), 2);
        assert_eq!(s.num_elements(), 640 * 480);
        assert!(!s.is_resizable());
        assert_eq!(s.to_string(), "[640 x 480]");
    }

    #[test]
    fn test_unlimited() {
        let s = Shape::new([Dim::unlimited(3), Dim::limited(2, 8)]);
        assert!(s.is_resizable());
        assert!(s.dims()[0].allows(1 << 40));
        assert!(!s.dims()[1].allows(9));
        assert_eq!(s.to_string(), "[3/inf x 2/8]");
    }

    #[test]
    fn test_overflow_saturates() {
        let s = Shape::from([u64::MAX, 2]);
        assert_eq!(s.num_elements(), u64::MAX);
    }

    #[test]
    fn test_linear_index() {
        assert_eq!(linear_index(&[1, 2], &[3, 4]), 6);
        assert_eq!(linear_index(&[], &[]), 0);
    }
}
