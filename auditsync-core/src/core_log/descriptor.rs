/*
    descriptor.rs - Log identity and delta computation

    A Descriptor pairs a log's identity (target id, log id) with a RangeSet
    snapshot of the ids it holds. Comparing the descriptors of two stores
    yields the minimal set of ids one side is missing.
*/

use crate::core_log::range_set::RangeSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identity of a single log: (target id, log id)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogKey {
    pub target_id: String,
    pub log_id: u64,
}

impl LogKey {
    pub fn new(target_id: impl Into<String>, log_id: u64) -> Self {
        LogKey { target_id: target_id.into(), log_id }
    }
}

impl fmt::Display for LogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.target_id, self.log_id)
    }
}

/// Identity plus the ids a log currently holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub target_id: String,
    pub log_id: u64,
    pub range_set: RangeSet,
}

impl Descriptor {
    pub fn new(target_id: impl Into<String>, log_id: u64, range_set: RangeSet) -> Self {
        Descriptor { target_id: target_id.into(), log_id, range_set }
    }

    pub fn key(&self) -> LogKey {
        LogKey::new(self.target_id.clone(), self.log_id)
    }

    /// Two descriptors describe the same log iff target and log ids match
    pub fn same_log(&self, other: &Descriptor) -> bool {
        self.target_id == other.target_id && self.log_id == other.log_id
    }
}

/// Ids below `lowest_id` are known to be purged on the owning side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowWatermark {
    pub target_id: String,
    pub log_id: u64,
    pub lowest_id: u64,
}

impl LowWatermark {
    pub fn new(target_id: impl Into<String>, log_id: u64, lowest_id: u64) -> Self {
        LowWatermark { target_id: target_id.into(), log_id, lowest_id }
    }
}

/// What `destination` is missing relative to `source`.
///
/// For each source descriptor with a matching destination log, the result
/// carries `difference(source, destination)` when non-empty. Source logs the
/// destination does not know at all are returned whole. Destination-only
/// logs are ignored; callers swap the arguments for the other direction.
pub fn calculate_delta(source: &[Descriptor], destination: &[Descriptor]) -> Vec<Descriptor> {
    let by_key: HashMap<(&str, u64), &Descriptor> = destination
        .iter()
        .map(|d| ((d.target_id.as_str(), d.log_id), d))
        .collect();

    source
        .iter()
        .filter_map(|s| match by_key.get(&(s.target_id.as_str(), s.log_id)) {
            Some(d) => {
                let missing = s.range_set.difference(&d.range_set);
                (!missing.is_empty())
                    .then(|| Descriptor::new(s.target_id.clone(), s.log_id, missing))
            }
            None => Some(s.clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(target: &str, log: u64, range: &str) -> Descriptor {
        Descriptor::new(target, log, range.parse().unwrap())
    }

    #[test]
    fn test_delta_against_empty_destination() {
        let delta = calculate_delta(&[desc("t", 1, "1-3")], &[]);
        assert_eq!(delta, vec![desc("t", 1, "1-3")]);
    }

    #[test]
    fn test_delta_only_missing_ids() {
        let delta = calculate_delta(&[desc("t", 1, "1-10")], &[desc("t", 1, "1-4,7")]);
        assert_eq!(delta, vec![desc("t", 1, "5-6,8-10")]);
    }

    #[test]
    fn test_delta_skips_identical_logs() {
        let source = vec![desc("t", 1, "1-3"), desc("t", 2, "5")];
        let delta = calculate_delta(&source, &source);
        assert!(delta.is_empty());
    }

    #[test]
    fn test_delta_ignores_destination_only_logs() {
        let delta = calculate_delta(&[desc("a", 1, "1")], &[desc("a", 1, "1"), desc("b", 1, "1-9")]);
        assert!(delta.is_empty());
    }

    #[test]
    fn test_delta_matches_on_target_and_log() {
        let source = vec![desc("a", 1, "1-2"), desc("b", 1, "1-2")];
        let destination = vec![desc("a", 2, "1-2"), desc("b", 1, "1")];
        let delta = calculate_delta(&source, &destination);
        assert_eq!(delta, vec![desc("a", 1, "1-2"), desc("b", 1, "2")]);
    }

    #[test]
    fn test_same_log() {
        assert!(desc("t", 1, "1").same_log(&desc("t", 1, "5-9")));
        assert!(!desc("t", 1, "1").same_log(&desc("t", 2, "1")));
    }
}
