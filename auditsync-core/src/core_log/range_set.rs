/*
    range_set.rs - Sparse sets of event ids

    A RangeSet describes which ids exist in a log (or which versions exist in
    a repository) as a sorted list of disjoint closed ranges.

    Invariants:
    - Ranges are stored in ascending order
    - Ranges never overlap
    - Ranges are never adjacent (high + 1 < next.low); adjacency is merged

    Textual form: comma separated ranges, each either `low-high` or a single
    id. The empty set is the empty string.
*/

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing the textual range format
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeParseError {
    /// A bound was not a non-negative integer
    #[error("Invalid range bound: '{0}'")]
    InvalidNumber(String),

    /// Low bound greater than high bound
    #[error("Inverted range: {low}-{high}")]
    Inverted { low: u64, high: u64 },
}

/// A closed interval `[low, high]` of ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Range {
    low: u64,
    high: u64,
}

impl Range {
    /// Create a range, rejecting `low > high`
    pub fn new(low: u64, high: u64) -> Result<Self, RangeParseError> {
        if low > high {
            return Err(RangeParseError::Inverted { low, high });
        }
        Ok(Range { low, high })
    }

    /// A range holding exactly one id
    pub fn single(id: u64) -> Self {
        Range { low: id, high: id }
    }

    pub fn low(&self) -> u64 {
        self.low
    }

    pub fn high(&self) -> u64 {
        self.high
    }

    pub fn contains(&self, id: u64) -> bool {
        self.low <= id && id <= self.high
    }

    /// Number of ids covered by this range
    pub fn len(&self) -> u64 {
        (self.high - self.low).saturating_add(1)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.low == self.high {
            write!(f, "{}", self.low)
        } else {
            write!(f, "{}-{}", self.low, self.high)
        }
    }
}

impl FromStr for Range {
    type Err = RangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.trim()
                .parse::<u64>()
                .map_err(|_| RangeParseError::InvalidNumber(part.trim().to_string()))
        };

        match s.split_once('-') {
            Some((low, high)) => Range::new(parse(low)?, parse(high)?),
            None => Ok(Range::single(parse(s)?)),
        }
    }
}

/// Sorted set of ids stored as disjoint, non-adjacent ranges
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RangeSet {
    ranges: Vec<Range>,
}

impl RangeSet {
    /// The empty set
    pub fn new() -> Self {
        RangeSet { ranges: Vec::new() }
    }

    /// Build a set from explicit ids. Input order and duplicates do not matter.
    pub fn from_ids(ids: &[u64]) -> Self {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut ranges: Vec<Range> = Vec::new();
        for id in sorted {
            match ranges.last_mut() {
                Some(last) if last.high + 1 == id => last.high = id,
                _ => ranges.push(Range::single(id)),
            }
        }
        RangeSet { ranges }
    }

    /// All ids from `low` to `high` inclusive
    pub fn from_bounds(low: u64, high: u64) -> Result<Self, RangeParseError> {
        Ok(RangeSet::from(Range::new(low, high)?))
    }

    fn from_unsorted(mut ranges: Vec<Range>) -> Self {
        ranges.sort_unstable();

        let mut merged: Vec<Range> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if last.high.saturating_add(1) >= range.low => {
                    last.high = last.high.max(range.high);
                }
                _ => merged.push(range),
            }
        }
        RangeSet { ranges: merged }
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of ids in the set
    pub fn len(&self) -> u64 {
        self.ranges.iter().map(Range::len).sum()
    }

    /// Lowest id, if any
    pub fn low(&self) -> Option<u64> {
        self.ranges.first().map(|r| r.low)
    }

    /// Highest id, if any
    pub fn high(&self) -> Option<u64> {
        self.ranges.last().map(|r| r.high)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ranges
            .binary_search_by(|r| {
                if r.high < id {
                    std::cmp::Ordering::Less
                } else if r.low > id {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// Iterate over every id in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.ranges.iter().flat_map(|r| r.low..=r.high)
    }

    pub fn union(&self, other: &RangeSet) -> RangeSet {
        let mut all = self.ranges.clone();
        all.extend_from_slice(&other.ranges);
        RangeSet::from_unsorted(all)
    }

    /// Ids present in `self` but absent from `other`.
    ///
    /// This is the only primitive the sync protocol needs: the delta a peer
    /// is missing is `difference(ours, theirs)`.
    pub fn difference(&self, other: &RangeSet) -> RangeSet {
        let mut result = Vec::new();
        let mut others = other.ranges.iter().peekable();

        for range in &self.ranges {
            let mut low = range.low;

            while let Some(o) = others.peek() {
                if o.high < low {
                    others.next();
                } else {
                    break;
                }
            }

            let mut remaining = true;
            for o in others.clone() {
                if o.low > range.high {
                    break;
                }
                if o.low > low {
                    result.push(Range { low, high: o.low - 1 });
                }
                if o.high >= range.high {
                    remaining = false;
                    break;
                }
                low = o.high + 1;
            }

            if remaining {
                result.push(Range { low, high: range.high });
            }
        }

        RangeSet { ranges: result }
    }

    pub fn intersection(&self, other: &RangeSet) -> RangeSet {
        self.difference(&self.difference(other))
    }

    /// The subset of ids that are `>= lowest`
    pub fn at_or_above(&self, lowest: u64) -> RangeSet {
        if lowest == 0 {
            return self.clone();
        }
        self.difference(&RangeSet::from(Range { low: 0, high: lowest - 1 }))
    }
}

impl From<Range> for RangeSet {
    fn from(range: Range) -> Self {
        RangeSet { ranges: vec![range] }
    }
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", range)?;
        }
        Ok(())
    }
}

impl FromStr for RangeSet {
    type Err = RangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(RangeSet::new());
        }

        let ranges = s
            .split(',')
            .map(str::parse::<Range>)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RangeSet::from_unsorted(ranges))
    }
}

impl TryFrom<String> for RangeSet {
    type Error = RangeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RangeSet> for String {
    fn from(set: RangeSet) -> Self {
        set.to_string()
    }
}
