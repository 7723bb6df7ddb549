//! Chunk and run arithmetic for hyper-rectangular selections.
//!
//! A selection is split into the chunks it touches; within each chunk it is
//! split into runs that are contiguous both in the chunk buffer and in the
//! row-major selection buffer.

use crate::util::{linear_index, Coord};

/// A contiguous span of cells, in elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Run {
    /// Start of the run within the chunk buffer.
    pub chunk_offset: usize,
    /// Start of the run within the selection buffer.
    pub sel_offset: usize,
    pub len: usize,
}

/// Step `coord` to the next point of the box `[lo, hi)` in row-major order.
fn advance(coord: &mut [u64], lo: &[u64], hi: &[u64]) -> bool {
    for d in (0..coord.len()).rev() {
        coord[d] += 1;
        if coord[d] < hi[d] {
            return true;
        }
        coord[d] = lo[d];
    }
    false
}

/// Coordinates of every chunk that intersects the selection.
pub(crate) fn intersecting_chunks(start: &[u64], count: &[u64], chunk: &[u64]) -> Vec<Coord> {
    if count.iter().any(|&c| c == 0) {
        return Vec::new();
    }
    if start.is_empty() {
        return vec![Coord::new()];
    }
    let lo: Coord = start.iter().zip(chunk).map(|(&s, &c)| s / c).collect();
    let hi: Coord = start
        .iter()
        .zip(count)
        .zip(chunk)
        .map(|((&s, &n), &c)| (s + n - 1) / c + 1)
        .collect();

    let mut out = Vec::new();
    let mut coord = lo.clone();
    loop {
        out.push(coord.clone());
        if !advance(&mut coord, &lo, &hi) {
            break;
        }
    }
    out
}

/// Runs of the selection that fall inside chunk `coord`.
pub(crate) fn chunk_runs(start: &[u64], count: &[u64], chunk: &[u64], coord: &[u64]) -> Vec<Run> {
    let rank = start.len();
    if rank == 0 {
        return vec![Run { chunk_offset: 0, sel_offset: 0, len: 1 }];
    }

    let origin: Coord = coord.iter().zip(chunk).map(|(&i, &c)| i * c).collect();
    let lo: Coord = start.iter().zip(&origin).map(|(&s, &o)| s.max(o)).collect();
    let hi: Coord = start
        .iter()
        .zip(count)
        .zip(origin.iter().zip(chunk))
        .map(|((&s, &n), (&o, &c))| (s + n).min(o + c))
        .collect();
    if lo.iter().zip(&hi).any(|(l, h)| l >= h) {
        return Vec::new();
    }

    let len = (hi[rank - 1] - lo[rank - 1]) as usize;
    let mut runs = Vec::new();
    let mut point = lo.clone();
    let mut local = Coord::from_elem(0, rank);
    let mut rel = Coord::from_elem(0, rank);
    loop {
        for d in 0..rank {
            local[d] = point[d] - origin[d];
            rel[d] = point[d] - start[d];
        }
        runs.push(Run {
            chunk_offset: linear_index(&local, chunk) as usize,
            sel_offset: linear_index(&rel, count) as usize,
            len,
        });
        if !advance(&mut point[..rank - 1], &lo[..rank - 1], &hi[..rank - 1]) {
            break;
        }
    }
    runs
}

/// Visit every cell of a chunk, passing its global coordinate and its
/// index within the chunk buffer.
pub(crate) fn for_each_cell(chunk: &[u64], coord: &[u64], mut f: impl FnMut(&[u64], usize)) {
    let rank = chunk.len();
    if chunk.iter().any(|&c| c == 0) {
        return;
    }
    let origin: Coord = coord.iter().zip(chunk).map(|(&i, &c)| i * c).collect();
    let hi: Coord = origin.iter().zip(chunk).map(|(&o, &c)| o + c).collect();
    let mut point = origin.clone();
    let mut index = 0usize;
    loop {
        f(&point, index);
        index += 1;
        if rank == 0 || !advance(&mut point, &origin, &hi) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_1d() {
        let chunks = intersecting_chunks(&[3], &[6], &[4]);
        assert_eq!(chunks, vec![Coord::from_slice(&[0]), Coord::from_slice(&[1]), Coord::from_slice(&[2])]);
        assert!(intersecting_chunks(&[3], &[0], &[4]).is_empty());
    }

    #[test]
    fn test_runs_1d() {
        let runs = chunk_runs(&[3], &[6], &[4], &[1]);
        assert_eq!(runs, vec![Run { chunk_offset: 0, sel_offset: 1, len: 4 }]);
        let runs = chunk_runs(&[3], &[6], &[4], &[0]);
        assert_eq!(runs, vec![Run { chunk_offset: 3, sel_offset: 0, len: 1 }]);
    }

    #[test]
    fn test_runs_2d() {
        // 2x2 selection at (1,1) inside a single 4x4 chunk.
        let runs = chunk_runs(&[1, 1], &[2, 2], &[4, 4], &[0, 0]);
        assert_eq!(
            runs,
            vec![
                Run { chunk_offset: 5, sel_offset: 0, len: 2 },
                Run { chunk_offset: 9, sel_offset: 2, len: 2 },
            ]
        );
    }

    #[test]
    fn test_runs_cover_selection() {
        let (start, count, chunk) = ([1u64, 2, 0], [5u64, 3, 7], [2u64, 2, 3]);
        let total: usize = intersecting_chunks(&start, &count, &chunk)
            .iter()
            .flat_map(|c| chunk_runs(&start, &count, &chunk, c))
            .map(|r| r.len)
            .sum();
        assert_eq!(total, 5 * 3 * 7);
    }

    #[test]
    fn test_scalar() {
        assert_eq!(intersecting_chunks(&[], &[], &[]), vec![Coord::new()]);
        assert_eq!(chunk_runs(&[], &[], &[], &[]).len(), 1);
        let mut cells = 0;
        for_each_cell(&[], &[], |_, _| cells += 1);
        assert_eq!(cells, 1);
    }

    #[test]
    fn test_for_each_cell() {
        let mut seen = Vec::new();
        for_each_cell(&[2, 2], &[1, 0], |p, i| seen.push((p[0], p[1], i)));
        assert_eq!(seen, vec![(2, 0, 0), (2, 1, 1), (3, 0, 2), (3, 1, 3)]);
    }
}
