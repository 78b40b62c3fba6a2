//! Match index of the active search

use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use super::{FilterMatch, SearchFilter};
use crate::error::GrabError;

/// The match closest to a stream position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NearestPosition {
    /// Index in the match list
    pub index: u64,
    /// Stream position of the match
    pub position: u64,
}

/// Per-bucket `(filter, count)` pairs, sorted by filter
pub type ScaledMap = Vec<Vec<(u8, u16)>>;

#[derive(Debug, Default)]
pub struct SearchMap {
    matches: Vec<FilterMatch>,
    stats: HashMap<String, u64>,
    stream_len: u64,
}

impl SearchMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn matches(&self) -> &[FilterMatch] {
        &self.matches
    }

    /// Matches per filter value
    pub fn stats(&self) -> &HashMap<String, u64> {
        &self.stats
    }

    pub fn stream_len(&self) -> u64 {
        self.stream_len
    }

    pub fn set_stream_len(&mut self, len: u64) {
        self.stream_len = len;
    }

    pub fn clear(&mut self) {
        self.matches.clear();
        self.stats.clear();
    }

    /// Append matches that follow every match already held
    pub fn append(&mut self, matches: Vec<FilterMatch>, filters: &[SearchFilter]) {
        for found in &matches {
            for filter in &found.filters {
                if let Some(filter) = filters.get(*filter as usize) {
                    *self.stats.entry(filter.value.clone()).or_default() += 1;
                }
            }
        }
        self.matches.extend(matches);
    }

    /// `count` matches starting at match index `start`
    pub fn indexes(&self, start: u64, count: u64) -> Result<&[FilterMatch], GrabError> {
        let len = self.matches.len() as u64;
        if count == 0 || start.checked_add(count).is_none_or(|end| end > len) {
            return Err(GrabError::InvalidRange {
                range: start..start.saturating_add(count),
                context: format!("search result holds {} matches", len),
            });
        }
        Ok(&self.matches[start as usize..(start + count) as usize])
    }

    /// Scaled distribution of matches over `range` (whole stream by default)
    ///
    /// With at most `dataset_len` lines every line gets its own bucket.
    /// Otherwise a match at `pos` lands in `(pos - from) * dataset_len / span`.
    pub fn scaled(&self, dataset_len: u16, range: Option<RangeInclusive<u64>>) -> ScaledMap {
        if self.stream_len == 0 || dataset_len == 0 {
            return Vec::new();
        }
        let range = range.unwrap_or(0..=self.stream_len - 1);
        let (from, to) = (*range.start(), (*range.end()).min(self.stream_len - 1));
        if from > to {
            return Vec::new();
        }
        let span = to - from + 1;
        let buckets = span.min(dataset_len as u64);
        let mut map: Vec<BTreeMap<u8, u16>> = vec![BTreeMap::new(); buckets as usize];
        let first = self.matches.partition_point(|m| m.index < from);
        for found in self.matches[first..].iter().take_while(|m| m.index <= to) {
            let bucket = ((found.index - from) as u128 * buckets as u128 / span as u128) as usize;
            for filter in &found.filters {
                let count = map[bucket].entry(*filter).or_default();
                *count = count.saturating_add(1);
            }
        }
        map.into_iter().map(|bucket| bucket.into_iter().collect()).collect()
    }

    /// Match with the minimal distance to `position`; the earlier one on a tie
    pub fn nearest_to(&self, position: u64) -> Option<NearestPosition> {
        let after = self.matches.partition_point(|m| m.index < position);
        let candidates = [after.checked_sub(1), Some(after)];
        candidates
            .into_iter()
            .flatten()
            .filter_map(|i| self.matches.get(i).map(|m| (i, m.index)))
            .min_by_key(|(_, index)| index.abs_diff(position))
            .map(|(i, index)| NearestPosition {
                index: i as u64,
                position: index,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(positions: &[u64], stream_len: u64) -> SearchMap {
        let mut map = SearchMap::new();
        map.set_stream_len(stream_len);
        let matches = positions
            .iter()
            .map(|p| FilterMatch {
                index: *p,
                filters: vec![0],
            })
            .collect();
        map.append(matches, &[SearchFilter::plain("x")]);
        map
    }

    #[test]
    fn test_stats_count_per_filter_value() {
        let mut map = SearchMap::new();
        let filters = vec![SearchFilter::plain("a"), SearchFilter::plain("b")];
        map.append(
            vec![
                FilterMatch {
                    index: 1,
                    filters: vec![0, 1],
                },
                FilterMatch {
                    index: 2,
                    filters: vec![1],
                },
            ],
            &filters,
        );
        assert_eq!(map.stats()["a"], 1);
        assert_eq!(map.stats()["b"], 2);
        map.clear();
        assert!(map.stats().is_empty());
    }

    #[test]
    fn test_indexes_bounds() {
        let map = map_with(&[1, 2, 3], 10);
        assert_eq!(map.indexes(1, 2).unwrap()[0].index, 2);
        assert!(map.indexes(2, 2).is_err());
        assert!(map.indexes(0, 0).is_err());
        assert!(map.indexes(u64::MAX, 2).is_err());
    }

    #[test]
    fn test_scaled_one_bucket_per_line() {
        let map = map_with(&[0, 3], 5);
        let scaled = map.scaled(10, None);
        assert_eq!(scaled.len(), 5);
        assert_eq!(scaled[0], vec![(0, 1)]);
        assert!(scaled[1].is_empty());
        assert_eq!(scaled[3], vec![(0, 1)]);
    }

    #[test]
    fn test_scaled_buckets() {
        let positions: Vec<u64> = (0..100).step_by(10).collect();
        let map = map_with(&positions, 100);
        let scaled = map.scaled(5, None);
        assert_eq!(scaled.len(), 5);
        for bucket in &scaled {
            assert_eq!(bucket, &vec![(0, 2)]);
        }

        let scaled = map.scaled(2, Some(50..=99));
        assert_eq!(scaled, vec![vec![(0, 3)], vec![(0, 2)]]);
    }

    #[test]
    fn test_scaled_empty_stream() {
        let map = SearchMap::new();
        assert!(map.scaled(10, None).is_empty());
    }

    #[test]
    fn test_nearest() {
        let map = map_with(&[10, 20, 30], 100);
        assert_eq!(
            map.nearest_to(14),
            Some(NearestPosition {
                index: 0,
                position: 10
            })
        );
        assert_eq!(map.nearest_to(15).unwrap().position, 10);
        assert_eq!(map.nearest_to(16).unwrap().position, 20);
        assert_eq!(map.nearest_to(0).unwrap().position, 10);
        assert_eq!(map.nearest_to(99).unwrap().index, 2);
        assert_eq!(map.nearest_to(20).unwrap().index, 1);
        assert!(SearchMap::new().nearest_to(5).is_none());
    }
}
