//! Hyper-rectangular selections over a dataset's element grid.

use std::fmt;
use std::ops::Range;

use crate::util::{Coord, Error, Result};

/// A half-open index range per dimension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    start: Coord,
    count: Coord,
}

impl Selection {
    /// Selection from one range per dimension.
    pub fn new(ranges: &[Range<u64>]) -> Self {
        Self {
            start: ranges.iter().map(|r| r.start).collect(),
            count: ranges.iter().map(|r| r.end.saturating_sub(r.start)).collect(),
        }
    }

    /// Selection covering every element of the given extents.
    pub fn all(sizes: &[u64]) -> Self {
        Self {
            start: sizes.iter().map(|_| 0).collect(),
            count: sizes.iter().copied().collect(),
        }
    }

    /// Selection of a single element of a scalar dataset.
    pub fn scalar() -> Self {
        Self { start: Coord::new(), count: Coord::new() }
    }

    /// Selection from explicit start and count vectors.
    pub fn from_start_count(start: &[u64], count: &[u64]) -> Result<Self> {
        if start.len() != count.len() {
            return Err(Error::shape(format!(
                "start has rank {}, count has rank {}",
                start.len(),
                count.len()
            )));
        }
        Ok(Self { start: start.into(), count: count.into() })
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.start.len()
    }

    #[inline]
    pub fn start(&self) -> &[u64] {
        &self.start
    }

    #[inline]
    pub fn count(&self) -> &[u64] {
        &self.count
    }

    /// Number of selected elements.
    pub fn num_elements(&self) -> u64 {
        self.count
            .iter()
            .try_fold(1u64, |acc, &c| acc.checked_mul(c))
            .unwrap_or(u64::MAX)
    }

    /// Returns true if nothing is selected.
    pub fn is_empty(&self) -> bool {
        self.count.iter().any(|&c| c == 0)
    }

    /// Check that the selection has the given rank and lies inside `sizes`.
    pub fn validate(&self, sizes: &[u64]) -> Result<()> {
        if self.rank() != sizes.len() {
            return Err(Error::shape(format!(
                "selection has rank {}, dataset has rank {}",
                self.rank(),
                sizes.len()
            )));
        }
        for (dim, ((&s, &c), &size)) in self.start.iter().zip(&self.count).zip(sizes).enumerate() {
            let end = s.checked_add(c).ok_or_else(|| Error::shape("selection end overflows"))?;
            if end > size {
                return Err(Error::shape(format!(
                    "selection {}..{} exceeds extent {} in dimension {}",
                    s, end, size, dim
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (s, c)) in self.start.iter().zip(&self.count).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}..{}", s, s + c)?;
        }
        write!(f, "]")
    }
}

impl From<Range<u64>> for Selection {
    fn from(range: Range<u64>) -> Self {
        Self::new(&[range])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all() {
        let sel = Selection::all(&[4, 5]);
        assert_eq!(sel.num_elements(), 20);
        assert!(sel.validate(&[4, 5]).is_ok());
        assert_eq!(sel.to_string(), "[0..4, 0..5]");
    }

    #[test]
    fn test_out_of_range() {
        let sel = Selection::from(8..12);
        assert!(matches!(sel.validate(&[10]), Err(Error::ShapeMismatch(_))));
        assert!(Selection::from(8..10).validate(&[10]).is_ok());
    }

    #[test]
    fn test_rank_mismatch() {
        let sel = Selection::from(0..1);
        assert!(matches!(sel.validate(&[1, 1]), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_scalar_and_empty() {
        let sel = Selection::scalar();
        assert_eq!(sel.num_elements(), 1);
        assert!(sel.validate(&[]).is_ok());
        assert!(Selection::from(3..3).is_empty());
    }
}
