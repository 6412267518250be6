//! Ordinal-set helpers shared by both naming modes.
//!
//! Explicit constraints are kept as normalized inclusive ranges so a
//! template declaring `0..=99999` costs two integers, not a hundred
//! thousand set entries.

use std::collections::BTreeSet;

use iset_id::{ordinal_of, parse_parent_and_ordinal};
use tracing::warn;

use crate::error::ValidationError;
use crate::model::Ordinals;

pub type OrdinalSet = BTreeSet<i32>;

/// A set of ordinals stored as sorted, disjoint, inclusive ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrdinalSpace {
    ranges: Vec<(i32, i32)>,
}

impl OrdinalSpace {
    /// Converts a declared constraint, rejecting negative ordinals and
    /// inverted ranges. Overlap inside one constraint is tolerated.
    pub fn from_ordinals(ordinals: &Ordinals) -> Result<Self, ValidationError> {
        let mut ranges = Vec::with_capacity(ordinals.ranges.len() + ordinals.discrete.len());
        for range in &ordinals.ranges {
            if range.end < range.start {
                return Err(ValidationError::InvalidRange {
                    start: range.start,
                    end: range.end,
                });
            }
            if range.start < 0 {
                return Err(ValidationError::NegativeOrdinal(range.start));
            }
            ranges.push((range.start, range.end));
        }
        for &ordinal in &ordinals.discrete {
            if ordinal < 0 {
                return Err(ValidationError::NegativeOrdinal(ordinal));
            }
            ranges.push((ordinal, ordinal));
        }
        Ok(Self::normalize(ranges))
    }

    fn normalize(mut ranges: Vec<(i32, i32)>) -> Self {
        ranges.sort_unstable();
        let mut merged: Vec<(i32, i32)> = Vec::with_capacity(ranges.len());
        for (start, end) in ranges {
            match merged.last_mut() {
                Some(last) if start <= last.1 => {
                    warn!(start, end, "Overlapping ordinals in one constraint");
                    last.1 = last.1.max(end);
                }
                Some(last) if i64::from(start) == i64::from(last.1) + 1 => last.1 = end,
                _ => merged.push((start, end)),
            }
        }
        Self { ranges: merged }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> u64 {
        self.ranges
            .iter()
            .map(|(s, e)| (i64::from(*e) - i64::from(*s) + 1) as u64)
            .sum()
    }

    pub fn contains(&self, ordinal: i32) -> bool {
        self.range_containing(ordinal).is_some()
    }

    /// The `(start, end)` range holding `ordinal`.
    pub fn range_containing(&self, ordinal: i32) -> Option<(i32, i32)> {
        let idx = self.ranges.partition_point(|(_, end)| *end < ordinal);
        self.ranges
            .get(idx)
            .copied()
            .filter(|(start, _)| *start <= ordinal)
    }

    /// Ascending iterator over every ordinal in the space.
    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.ranges.iter().flat_map(|(s, e)| *s..=*e)
    }

    /// Lowest ordinal present in both spaces.
    pub fn first_common(&self, other: &OrdinalSpace) -> Option<i32> {
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let (a_start, a_end) = self.ranges[i];
            let (b_start, b_end) = other.ranges[j];
            let start = a_start.max(b_start);
            if start <= a_end.min(b_end) {
                return Some(start);
            }
            if a_end < b_end {
                i += 1;
            } else {
                j += 1;
            }
        }
        None
    }

    /// Number of ordinals left once `excluded` is removed.
    pub fn available_excluding(&self, excluded: &OrdinalSet) -> u64 {
        let hidden = excluded.iter().filter(|o| self.contains(**o)).count() as u64;
        self.len() - hidden
    }
}

/// Drops the highest ordinals until `set` holds at most `target`.
pub fn shrink_to(set: &mut OrdinalSet, target: usize) {
    while set.len() > target {
        set.pop_last();
    }
}

/// Adds candidates in order until `set` holds `target` ordinals.
///
/// Returns how many slots could not be filled.
pub fn fill_from(set: &mut OrdinalSet, target: usize, candidates: impl Iterator<Item = i32>) -> usize {
    for candidate in candidates {
        if set.len() >= target {
            break;
        }
        set.insert(candidate);
    }
    target.saturating_sub(set.len())
}

/// Lowest ordinal `>= from` that is neither taken nor inside a reserved
/// space. `None` once the ordinal range is exhausted.
pub fn next_free(
    from: i32,
    taken: &OrdinalSet,
    reserved: &[&OrdinalSpace],
) -> Option<i32> {
    let mut candidate = from;
    loop {
        if taken.contains(&candidate) {
            candidate = candidate.checked_add(1)?;
            continue;
        }
        match reserved.iter().find_map(|s| s.range_containing(candidate)) {
            Some((_, end)) => candidate = end.checked_add(1)?,
            None => return Some(candidate),
        }
    }
}

/// Ordinals of offline names in the flat namespace: the trailing number
/// of each name, whatever its prefix.
pub fn flat_offline_ordinals<S: AsRef<str>>(names: &[S]) -> OrdinalSet {
    names
        .iter()
        .filter_map(|n| ordinal_of(n.as_ref()).ok())
        .collect()
}

/// Ordinals of offline names that belong to one template prefix.
pub fn offline_ordinals_with_prefix<S: AsRef<str>>(names: &[S], prefix: &str) -> OrdinalSet {
    names
        .iter()
        .filter_map(|n| match parse_parent_and_ordinal(n.as_ref()) {
            (parent, Some(ordinal)) if parent == prefix => Some(ordinal),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OrdinalRange;

    fn space(ranges: &[(i32, i32)], discrete: &[i32]) -> OrdinalSpace {
        OrdinalSpace::from_ordinals(&Ordinals {
            ranges: ranges
                .iter()
                .map(|(start, end)| OrdinalRange {
                    start: *start,
                    end: *end,
                })
                .collect(),
            discrete: discrete.to_vec(),
        })
        .unwrap()
    }

    #[test]
    fn test_space_normalizes_and_counts() {
        let s = space(&[(2, 3), (5, 7)], &[0, 4, 6]);
        assert_eq!(s.len(), 7);
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![0, 2, 3, 4, 5, 6, 7]);
        assert!(s.contains(4));
        assert!(!s.contains(1));
        assert_eq!(s.range_containing(5), Some((2, 7)));
    }

    #[test]
    fn test_space_rejects_invalid() {
        let inverted = Ordinals {
            ranges: vec![OrdinalRange { start: 3, end: 1 }],
            discrete: vec![],
        };
        assert_eq!(
            OrdinalSpace::from_ordinals(&inverted),
            Err(ValidationError::InvalidRange { start: 3, end: 1 })
        );

        let negative = Ordinals {
            ranges: vec![],
            discrete: vec![-1],
        };
        assert_eq!(
            OrdinalSpace::from_ordinals(&negative),
            Err(ValidationError::NegativeOrdinal(-1))
        );
    }

    #[test]
    fn test_first_common() {
        let a = space(&[(0, 2)], &[10]);
        let b = space(&[(5, 9)], &[1]);
        let c = space(&[(3, 9)], &[]);
        assert_eq!(a.first_common(&b), Some(1));
        assert_eq!(a.first_common(&c), None);
    }

    #[test]
    fn test_huge_range_is_cheap() {
        let s = space(&[(0, i32::MAX)], &[]);
        assert_eq!(s.len(), i32::MAX as u64 + 1);
        assert_eq!(next_free(0, &OrdinalSet::new(), &[&s]), None);
    }

    #[test]
    fn test_next_free_skips_taken_and_reserved() {
        let reserved = space(&[(1, 3)], &[]);
        let taken = OrdinalSet::from([0, 4]);
        assert_eq!(next_free(0, &taken, &[&reserved]), Some(5));
    }

    #[test]
    fn test_shrink_and_fill() {
        let mut set = OrdinalSet::from([1, 5, 9]);
        shrink_to(&mut set, 2);
        assert_eq!(set, OrdinalSet::from([1, 5]));

        let short = fill_from(&mut set, 4, [2].into_iter());
        assert_eq!(set, OrdinalSet::from([1, 2, 5]));
        assert_eq!(short, 1);
    }

    #[test]
    fn test_offline_ordinals() {
        let names = ["foo-2", "foo-t1-0", "pod-7", "bad"];
        assert_eq!(flat_offline_ordinals(&names), OrdinalSet::from([0, 2, 7]));
        assert_eq!(offline_ordinals_with_prefix(&names, "foo"), OrdinalSet::from([2]));
        assert_eq!(
            offline_ordinals_with_prefix(&names, "foo-t1"),
            OrdinalSet::from([0])
        );
    }
}
