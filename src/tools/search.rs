//! Fuzzy path search over a container's traversal.

use std::ops::Range;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;

use crate::format::ContainerReader;
use crate::util::Result;

/// One matching path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchHit {
    pub path: String,
    pub score: i64,
    /// Character indices of `path` matched by the query.
    pub indices: Vec<usize>,
}

impl SearchHit {
    /// Matched indices merged into contiguous ranges.
    pub fn spans(&self) -> Vec<Range<usize>> {
        highlight_spans(&self.indices)
    }
}

/// Every path of the container in depth-first order.
pub fn full_traversal(reader: &ContainerReader) -> Result<Vec<String>> {
    Ok(reader.walk()?.into_iter().map(|e| e.path).collect())
}

/// Rank `paths` against `query`, best match first. Paths that do not match
/// are dropped; equal scores keep their input order.
pub fn search<S: AsRef<str>>(paths: &[S], query: &str) -> Vec<SearchHit> {
    let matcher = SkimMatcherV2::default();
    let mut hits: Vec<SearchHit> = paths
        .iter()
        .filter_map(|p| {
            let path = p.as_ref();
            matcher.fuzzy_indices(path, query).map(|(score, indices)| SearchHit {
                path: path.to_string(),
                score,
                indices,
            })
        })
        .collect();
    hits.sort_by(|a, b| b.score.cmp(&a.score));
    hits
}

/// Merge sorted indices into half-open ranges.
pub fn highlight_spans(indices: &[usize]) -> Vec<Range<usize>> {
    let mut spans: Vec<Range<usize>> = Vec::new();
    for &i in indices {
        match spans.last_mut() {
            Some(span) if span.end == i => span.end += 1,
            _ => spans.push(i..i + 1),
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_ranks_best_first() {
        let paths = ["/group_1/group_2/data", "/sin", "/chunked_dataset", "/cos"];
        let hits = search(&paths, "chunk");
        assert_eq!(hits[0].path, "/chunked_dataset");
        assert!(hits.iter().all(|h| h.path != "/sin"));
        assert!(search(&paths, "zzz").is_empty());
    }

    #[test]
    fn test_spans() {
        assert_eq!(highlight_spans(&[1, 2, 3, 7, 9, 10]), vec![1..4, 7..8, 9..11]);
        assert!(highlight_spans(&[]).is_empty());
    }
}
