//! Inclusive byte ranges and the set operations the planner needs.

use std::fmt;

use crate::TransferError;

/// A byte range `[start, end]`, inclusive on both ends.
///
/// Page blob range writes address bytes inclusively, so the same convention
/// is used for every range in the pipeline. A range always covers at least
/// one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexRange {
    start: u64,
    end: u64,
}

impl IndexRange {
    /// Creates the range `[start, end]`.
    pub fn new(start: u64, end: u64) -> Result<Self, TransferError> {
        if start > end {
            return Err(TransferError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Creates the range of `length` bytes beginning at `start`.
    pub fn from_length(start: u64, length: u64) -> Result<Self, TransferError> {
        if length == 0 {
            return Err(TransferError::InvalidRange {
                start,
                end: start.wrapping_sub(1),
            });
        }
        let end = start
            .checked_add(length - 1)
            .ok_or(TransferError::InvalidRange { start, end: u64::MAX })?;
        Ok(Self { start, end })
    }

    /// First byte offset.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last byte offset (inclusive).
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of bytes covered.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Returns `true` if `offset` lies inside the range.
    pub fn contains(&self, offset: u64) -> bool {
        self.start <= offset && offset <= self.end
    }

    /// Returns `true` if the two ranges share at least one byte.
    pub fn intersects(&self, other: &IndexRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Returns `true` if `other` lies entirely inside `self`.
    pub fn subsumes(&self, other: &IndexRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Returns `true` if `other` begins right after `self` ends, or the reverse.
    pub fn is_adjacent(&self, other: &IndexRange) -> bool {
        self.end.checked_add(1) == Some(other.start) || other.end.checked_add(1) == Some(self.start)
    }

    /// Returns the bytes common to both ranges.
    pub fn intersection(&self, other: &IndexRange) -> Option<IndexRange> {
        if !self.intersects(other) {
            return None;
        }
        Some(IndexRange {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        })
    }

    /// Returns the pieces of `self` not covered by `other` (zero, one or two).
    pub fn subtract(&self, other: &IndexRange) -> Vec<IndexRange> {
        let Some(common) = self.intersection(other) else {
            return vec![*self];
        };

        let mut pieces = Vec::with_capacity(2);
        if common.start > self.start {
            pieces.push(IndexRange {
                start: self.start,
                end: common.start - 1,
            });
        }
        if common.end < self.end {
            pieces.push(IndexRange {
                start: common.end + 1,
                end: self.end,
            });
        }
        pieces
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Sorts `ranges` by start and merges overlapping or adjacent entries.
pub fn normalize_ranges(ranges: &[IndexRange]) -> Vec<IndexRange> {
    let mut sorted = ranges.to_vec();
    sorted.sort_unstable();

    let mut merged: Vec<IndexRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if last.intersects(&range) || last.is_adjacent(&range) => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Removes every byte covered by `to_remove` from `ranges`.
///
/// Both inputs must be sorted and non-overlapping (see [`normalize_ranges`]);
/// the output keeps that property.
pub fn subtract_ranges(ranges: &[IndexRange], to_remove: &[IndexRange]) -> Vec<IndexRange> {
    let mut result = Vec::with_capacity(ranges.len());
    let mut first_candidate = 0;

    for range in ranges {
        // Removals ending before this range cannot touch any later range either.
        while first_candidate < to_remove.len() && to_remove[first_candidate].end < range.start {
            first_candidate += 1;
        }

        let mut remaining = vec![*range];
        for removal in to_remove[first_candidate..]
            .iter()
            .take_while(|r| r.start <= range.end)
        {
            remaining = remaining
                .iter()
                .flat_map(|piece| piece.subtract(removal))
                .collect();
        }
        result.extend(remaining);
    }
    result
}

/// Splits `range` into consecutive pieces of at most `size` bytes.
pub fn chunk_range_by_size(range: &IndexRange, size: u64) -> Vec<IndexRange> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(range.length().div_ceil(size) as usize);
    let mut start = range.start;
    loop {
        let end = start.saturating_add(size - 1).min(range.end);
        chunks.push(IndexRange { start, end });
        if end == range.end {
            break;
        }
        start = end + 1;
    }
    chunks
}

/// Sum of the lengths of `ranges`.
pub fn total_length(ranges: &[IndexRange]) -> u64 {
    ranges.iter().map(IndexRange::length).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(start: u64, end: u64) -> IndexRange {
        IndexRange::new(start, end).unwrap()
    }

    #[test]
    fn new_rejects_reversed_bounds() {
        assert!(matches!(
            IndexRange::new(10, 9),
            Err(TransferError::InvalidRange { start: 10, end: 9 })
        ));
        assert_eq!(r(5, 5).length(), 1);
    }

    #[test]
    fn from_length_is_inclusive() {
        let range = IndexRange::from_length(1024, 512).unwrap();
        assert_eq!(range.start(), 1024);
        assert_eq!(range.end(), 1535);
        assert_eq!(range.length(), 512);
        assert!(IndexRange::from_length(0, 0).is_err());
        assert!(IndexRange::from_length(u64::MAX, 2).is_err());
    }

    #[test]
    fn display_matches_item_id_format() {
        assert_eq!(r(0, 2_097_151).to_string(), "[0, 2097151]");
    }

    #[test]
    fn intersection_and_subsumes() {
        let a = r(0, 99);
        let b = r(50, 149);
        assert_eq!(a.intersection(&b), Some(r(50, 99)));
        assert!(a.intersection(&r(100, 200)).is_none());
        assert!(a.subsumes(&r(10, 20)));
        assert!(!a.subsumes(&b));
        assert!(a.is_adjacent(&r(100, 120)));
        assert!(r(100, 120).is_adjacent(&a));
    }

    #[test]
    fn subtract_middle_splits_in_two() {
        assert_eq!(r(0, 99).subtract(&r(40, 59)), vec![r(0, 39), r(60, 99)]);
        assert_eq!(r(0, 99).subtract(&r(0, 49)), vec![r(50, 99)]);
        assert_eq!(r(0, 99).subtract(&r(50, 200)), vec![r(0, 49)]);
        assert!(r(10, 20).subtract(&r(0, 99)).is_empty());
        assert_eq!(r(10, 20).subtract(&r(30, 40)), vec![r(10, 20)]);
    }

    #[test]
    fn normalize_merges_overlaps_and_neighbours() {
        let input = [r(50, 60), r(0, 9), r(10, 19), r(55, 70), r(100, 110)];
        assert_eq!(
            normalize_ranges(&input),
            vec![r(0, 19), r(50, 70), r(100, 110)]
        );
    }

    #[test]
    fn subtract_ranges_removes_only_covered_bytes() {
        let ranges = [r(0, 99), r(200, 299)];
        let skip = [r(90, 209), r(250, 259)];
        assert_eq!(
            subtract_ranges(&ranges, &skip),
            vec![r(0, 89), r(210, 249), r(260, 299)]
        );
    }

    #[test]
    fn chunk_by_size_leaves_short_tail() {
        let chunks = chunk_range_by_size(&r(0, 9), 4);
        assert_eq!(chunks, vec![r(0, 3), r(4, 7), r(8, 9)]);
        assert_eq!(total_length(&chunks), 10);
        assert_eq!(chunk_range_by_size(&r(0, 3), 4), vec![r(0, 3)]);
    }
}
