//! Position map with breadcrumbs layout

use std::collections::BTreeMap;
use std::ops::{Bound, RangeInclusive};

use tracing::debug;

use super::{Frame, Index, Nature, index_error};
use crate::error::NativeError;

#[derive(Debug, Default)]
pub struct Map {
    indexes: BTreeMap<u64, Index>,
    stream_len: u64,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    pub fn stream_len(&self) -> u64 {
        self.stream_len
    }

    pub fn set_stream_len(&mut self, len: u64) {
        self.stream_len = len;
    }

    pub fn get(&self, position: u64) -> Option<&Index> {
        self.indexes.get(&position)
    }

    pub fn insert(&mut self, positions: &[u64], nature: Nature) {
        for position in positions {
            self.insert_one(*position, nature);
        }
    }

    fn insert_one(&mut self, position: u64, nature: Nature) {
        self.indexes
            .entry(position)
            .and_modify(|index| index.extend(nature))
            .or_insert_with(|| Index::new(position, nature));
    }

    pub fn insert_range(&mut self, range: RangeInclusive<u64>, nature: Nature) {
        for position in range {
            self.insert_one(position, nature);
        }
    }

    pub fn remove(&mut self, positions: &[u64], nature: Nature) {
        for position in positions {
            if let Some(index) = self.indexes.get_mut(position)
                && index.abbreviate(nature)
            {
                self.indexes.remove(position);
            }
        }
    }

    pub fn remove_range(&mut self, range: RangeInclusive<u64>, nature: Nature) {
        let emptied: Vec<u64> = self
            .indexes
            .range_mut(range)
            .filter_map(|(position, index)| index.abbreviate(nature).then_some(*position))
            .collect();
        for position in emptied {
            self.indexes.remove(&position);
        }
    }

    /// Remove `nature` everywhere
    pub fn clean(&mut self, nature: Nature) {
        self.indexes.retain(|_, index| !index.abbreviate(nature));
    }

    /// Positions carrying `nature`, ascending
    pub fn positions_of(&self, nature: Nature) -> Vec<u64> {
        self.indexes
            .values()
            .filter(|index| index.includes(nature))
            .map(|index| index.position)
            .collect()
    }

    /// Last position carrying any of `natures`
    pub fn last_key_for(&self, natures: &[Nature]) -> Option<u64> {
        self.indexes
            .values()
            .rev()
            .find(|index| natures.iter().any(|n| index.includes(*n)))
            .map(|index| index.position)
    }

    /// `min_offset` breadcrumbs at each end of `range`, one separator in the middle
    fn insert_between(&mut self, range: RangeInclusive<u64>, min_offset: u64) -> Result<(), NativeError> {
        let (start, end) = (*range.start(), *range.end());
        if end >= self.stream_len {
            return Err(index_error(format!(
                "Out of range. Invalid index: {}. Stream len: {}",
                end, self.stream_len
            )));
        }
        if end - start < min_offset * 2 + 1 {
            return Err(index_error(format!(
                "Invalid min offset configuration. Offset: {}. Range: {:?}",
                min_offset, range
            )));
        }
        let middle = (end - start) / 2 + start;
        self.insert_range(start..=start + min_offset - 1, Nature::Breadcrumb);
        self.insert_one(middle, Nature::BreadcrumbSeparator);
        self.insert_range(end - min_offset + 1..=end, Nature::Breadcrumb);
        Ok(())
    }

    /// Lay breadcrumbs out from the key at view index `from_key_index` to the end
    fn insert_breadcrumbs(&mut self, from_key_index: usize, min_distance: u64, min_offset: u64) -> Result<(), NativeError> {
        if self.stream_len == 0 || self.is_empty() {
            return Ok(());
        }
        if from_key_index >= self.len() {
            return Err(index_error(format!(
                "Cannot insert breadcrumbs from {}, map len is {}",
                from_key_index,
                self.len()
            )));
        }
        let keys: Vec<u64> = self.indexes.keys().copied().collect();
        if from_key_index == 0 {
            let first = keys[0];
            if first > 0 {
                if first <= min_distance + 2 {
                    self.insert_range(0..=first - 1, Nature::Breadcrumb);
                } else {
                    self.insert_between(0..=first - 1, min_offset)?;
                }
            }
        }
        for pair in keys[from_key_index..].windows(2) {
            let (from, to) = (pair[0], pair[1]);
            let distance = to - from;
            if distance == 1 {
                continue;
            }
            if distance <= min_distance + 2 {
                self.insert_range(from..=to - 1, Nature::Breadcrumb);
            } else {
                self.insert_between(from + 1..=to - 1, min_offset)?;
            }
        }
        let last = keys[keys.len() - 1];
        if last < self.stream_len - 1 {
            let rest = self.stream_len - last;
            if rest <= min_distance + 2 {
                self.insert_range(last..=self.stream_len - 1, Nature::Breadcrumb);
            } else {
                self.insert_between(last + 1..=self.stream_len - 1, min_offset)?;
            }
        }
        Ok(())
    }

    /// Drop every breadcrumb and lay them out again around the anchors
    pub fn build_breadcrumbs(&mut self, min_distance: u64, min_offset: u64) -> Result<(), NativeError> {
        debug!(min_distance, min_offset, len = self.len(), "build_breadcrumbs: called");
        self.clean(Nature::Breadcrumb);
        self.clean(Nature::BreadcrumbSeparator);
        self.insert_breadcrumbs(0, min_distance, min_offset)
    }

    /// Re-lay breadcrumbs from anchor `from` to the end of the stream
    pub fn update_breadcrumbs(&mut self, from: u64, min_distance: u64, min_offset: u64) -> Result<(), NativeError> {
        if self.stream_len == 0 {
            return Ok(());
        }
        let tail = from..=self.stream_len.max(from + 1) - 1;
        self.remove_range(tail.clone(), Nature::Breadcrumb);
        self.remove_range(tail, Nature::BreadcrumbSeparator);
        let key_index = self.key_position(from)?;
        self.insert_breadcrumbs(key_index, min_distance, min_offset)
    }

    /// Reveal up to `offset` hidden lines next to `separator`
    ///
    /// Once the gap on both sides is closed the separator becomes a plain
    /// breadcrumb.
    pub fn extend_breadcrumbs(&mut self, separator: u64, offset: u64, above: bool) -> Result<(), NativeError> {
        let index = self
            .indexes
            .get(&separator)
            .ok_or_else(|| index_error(format!("Index {} cannot be found", separator)))?;
        if !index.includes(Nature::BreadcrumbSeparator) {
            return Err(index_error(format!("Index {} isn't a breadcrumb separator", separator)));
        }
        let (before, after) = self.neighbours(separator);
        let mut closed = false;
        if above {
            if let Some(before) = before
                && before != separator - 1
            {
                let until = (separator - 1).min(before + offset);
                self.insert_range(before + 1..=until, Nature::Breadcrumb);
                closed = until == separator - 1;
            }
        } else if let Some(after) = after
            && after != separator + 1
        {
            let from = (separator + 1).max(after.saturating_sub(offset));
            self.insert_range(from..=after - 1, Nature::Breadcrumb);
            closed = from == separator + 1;
        }
        if closed {
            let (before, after) = self.neighbours(separator);
            let before_closed = before.is_none_or(|b| b + 1 == separator);
            let after_closed = after.is_none_or(|a| a == separator + 1);
            if before_closed && after_closed {
                debug!(separator, "extend_breadcrumbs: gap closed, separator becomes breadcrumb");
                self.remove(&[separator], Nature::BreadcrumbSeparator);
                self.insert_one(separator, Nature::Breadcrumb);
            }
        }
        Ok(())
    }

    fn key_position(&self, key: u64) -> Result<usize, NativeError> {
        if !self.indexes.contains_key(&key) {
            return Err(index_error(format!("Key {} doesn't exist. Map len: {}", key, self.len())));
        }
        Ok(self.indexes.range(..key).count())
    }

    /// Positions of the view entries directly before and after `position`
    fn neighbours(&self, position: u64) -> (Option<u64>, Option<u64>) {
        let before = self.indexes.range(..position).next_back().map(|(k, _)| *k);
        let after = self
            .indexes
            .range((Bound::Excluded(position), Bound::Unbounded))
            .next()
            .map(|(k, _)| *k);
        (before, after)
    }

    /// View indexes of the entries strictly before and after a stream position
    pub fn around(&self, position: u64) -> (Option<u64>, Option<u64>) {
        let below = self.indexes.range(..position).count() as u64;
        let before = below.checked_sub(1);
        let after_index = if self.indexes.contains_key(&position) {
            below + 1
        } else {
            below
        };
        let after = (after_index < self.len() as u64).then_some(after_index);
        (before, after)
    }

    /// Entries at view indexes `range`
    pub fn frame(&self, range: RangeInclusive<u64>) -> Result<Frame<'_>, NativeError> {
        let len = self.len() as u64;
        if *range.end() >= len || range.start() > range.end() {
            return Err(index_error(format!(
                "Out of range. Map len: {}; requested: {:?}",
                len, range
            )));
        }
        let count = (range.end() - range.start() + 1) as usize;
        Ok(Frame {
            indexes: self.indexes.values().skip(*range.start() as usize).take(count).collect(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Index> {
        self.indexes.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn picture(map: &Map) -> Vec<(u64, Nature)> {
        map.iter().map(|i| (i.position, i.natures()[0])).collect()
    }

    fn nature_sum(frame: &Frame) -> u64 {
        frame
            .indexes
            .iter()
            .map(|i| i.natures().iter().map(|n| n.as_u8() as u64).sum::<u64>())
            .sum()
    }

    use crate::indexes::Nature::{Bookmark as K, Breadcrumb as B, BreadcrumbSeparator as P, Search as S};

    #[test]
    fn test_basic_natures() {
        let mut map = Map::new();
        let matches: Vec<u64> = (0..10).map(|i| i * 10).collect();
        map.insert(&matches, S);
        assert_eq!(map.len(), 10);
        assert_eq!(nature_sum(&map.frame(0..=9).unwrap()), 0);

        map.insert(&matches, K);
        assert_eq!(map.len(), 10);
        assert_eq!(nature_sum(&map.frame(0..=9).unwrap()), 10);

        map.remove_range(0..=90, K);
        assert_eq!(nature_sum(&map.frame(0..=9).unwrap()), 0);

        map.insert_range(1..=9, K);
        assert_eq!(map.len(), 19);
        let frame = map.frame(0..=10).unwrap();
        assert_eq!(nature_sum(&frame), 9);
        assert_eq!(frame.indexes[0].natures(), &[S]);
        assert_eq!(frame.indexes[10].natures(), &[S]);

        map.insert_range(91..=100, Nature::Selection);
        assert_eq!(map.len(), 29);
        assert_eq!(nature_sum(&map.frame(19..=28).unwrap()), 20);

        map.remove_range(0..=100, S);
        assert_eq!(map.len(), 19);
        assert_eq!(nature_sum(&map.frame(0..=18).unwrap()), 9 + 20);
        assert!(map.frame(0..=19).is_err());
    }

    #[test]
    fn test_breadcrumbs_basic() {
        let mut map = Map::new();
        map.set_stream_len(30);
        map.insert(&[0, 10, 20], S);
        map.build_breadcrumbs(4, 2).unwrap();
        assert_eq!(
            picture(&map),
            vec![
                (0, S),
                (1, B),
                (2, B),
                (5, P),
                (8, B),
                (9, B),
                (10, S),
                (11, B),
                (12, B),
                (15, P),
                (18, B),
                (19, B),
                (20, S),
                (21, B),
                (22, B),
                (25, P),
                (28, B),
                (29, B),
            ]
        );
    }

    #[test]
    fn test_breadcrumbs_head_gap() {
        let mut map = Map::new();
        map.set_stream_len(20);
        map.insert(&[10, 20], S);
        map.build_breadcrumbs(4, 2).unwrap();
        assert_eq!(
            picture(&map),
            vec![
                (0, B),
                (1, B),
                (4, P),
                (8, B),
                (9, B),
                (10, S),
                (11, B),
                (12, B),
                (15, P),
                (18, B),
                (19, B),
                (20, S),
            ]
        );
    }

    #[test]
    fn test_breadcrumbs_short_gaps_fully_shown() {
        let mut map = Map::new();
        map.set_stream_len(25);
        map.insert(&[5, 10, 20], S);
        map.build_breadcrumbs(4, 2).unwrap();
        let mut expected: Vec<(u64, Nature)> = (0..5).map(|p| (p, B)).collect();
        expected.push((5, S));
        expected.extend((6..10).map(|p| (p, B)));
        expected.extend([(10, S), (11, B), (12, B), (15, P), (18, B), (19, B), (20, S)]);
        expected.extend((21..25).map(|p| (p, B)));
        assert_eq!(picture(&map), expected);
    }

    #[test]
    fn test_breadcrumbs_near_borders() {
        let mut map = Map::new();
        map.set_stream_len(22);
        map.insert(&[1, 10, 20], S);
        map.build_breadcrumbs(4, 2).unwrap();
        assert_eq!(
            picture(&map),
            vec![
                (0, B),
                (1, S),
                (2, B),
                (3, B),
                (5, P),
                (8, B),
                (9, B),
                (10, S),
                (11, B),
                (12, B),
                (15, P),
                (18, B),
                (19, B),
                (20, S),
                (21, B),
            ]
        );
    }

    #[test]
    fn test_breadcrumbs_without_anchors() {
        let mut map = Map::new();
        map.set_stream_len(20);
        map.build_breadcrumbs(4, 2).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_breadcrumbs_around_bookmark() {
        let mut map = Map::new();
        map.set_stream_len(20);
        map.insert(&[20], S);
        map.insert(&[10], K);
        map.build_breadcrumbs(4, 2).unwrap();
        assert_eq!(
            picture(&map),
            vec![
                (0, B),
                (1, B),
                (4, P),
                (8, B),
                (9, B),
                (10, K),
                (11, B),
                (12, B),
                (15, P),
                (18, B),
                (19, B),
                (20, S),
            ]
        );
    }

    #[test]
    fn test_extend_above_then_below_closes_separator() {
        let mut map = Map::new();
        map.set_stream_len(51);
        map.insert(&[10, 20, 50], S);
        map.build_breadcrumbs(4, 2).unwrap();
        assert_eq!(map.get(35).unwrap().natures(), &[P]);

        map.extend_breadcrumbs(35, 10, true).unwrap();
        assert!((23..=32).all(|p| map.get(p).is_some()));
        assert!(map.get(33).is_none());

        map.extend_breadcrumbs(35, 10, true).unwrap();
        assert!(map.get(34).is_some());
        assert_eq!(map.get(35).unwrap().natures(), &[P]);
        let len = map.len();
        map.extend_breadcrumbs(35, 10, true).unwrap();
        assert_eq!(map.len(), len);

        map.extend_breadcrumbs(35, 15, false).unwrap();
        assert!((21..=49).all(|p| map.get(p).is_some()));
        assert_eq!(map.get(35).unwrap().natures(), &[B]);
        assert!(map.extend_breadcrumbs(35, 1, true).is_err());
    }

    #[test]
    fn test_extend_with_large_offset() {
        let mut map = Map::new();
        map.set_stream_len(20);
        map.insert(&[10], S);
        map.build_breadcrumbs(4, 2).unwrap();

        map.extend_breadcrumbs(4, 10, true).unwrap();
        map.extend_breadcrumbs(4, 10, false).unwrap();
        map.extend_breadcrumbs(15, 100, true).unwrap();
        map.extend_breadcrumbs(15, 100, false).unwrap();

        let mut expected: Vec<(u64, Nature)> = (0..10).map(|p| (p, B)).collect();
        expected.push((10, S));
        expected.extend((11..20).map(|p| (p, B)));
        assert_eq!(picture(&map), expected);
    }

    #[test]
    fn test_extend_requires_separator() {
        let mut map = Map::new();
        map.set_stream_len(30);
        map.insert(&[0, 10, 20], S);
        map.build_breadcrumbs(4, 2).unwrap();
        assert!(map.extend_breadcrumbs(10, 2, true).is_err());
        assert!(map.extend_breadcrumbs(3, 2, true).is_err());
    }

    #[test]
    fn test_around() {
        let mut map = Map::new();
        map.insert(&[10, 20, 30], S);
        assert_eq!(map.around(5), (None, Some(0)));
        assert_eq!(map.around(15), (Some(0), Some(1)));
        assert_eq!(map.around(20), (Some(0), Some(2)));
        assert_eq!(map.around(35), (Some(2), None));
    }
}
