/// Series store and merge engine.
///
/// A `Series` holds the samples for one station+parameter pair, strictly
/// increasing by timestamp with no duplicate timestamps. The only way to
/// grow a series is `merge` (or `merge_with_policy`), which returns a new
/// series and leaves its inputs untouched. Paging in another date range is
/// just another merge with the extra batch.

use serde::{Deserialize, Serialize};

use crate::model::{RawReading, Sample};

// ---------------------------------------------------------------------------
// Duplicate resolution
// ---------------------------------------------------------------------------

/// Which sample survives when two share a timestamp.
///
/// `FirstWins` keeps whichever sample came first in concatenation order
/// (existing series before the incoming batch). This silently discards
/// revised readings published later for the same instant; `LastWins` keeps
/// the revision instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    #[default]
    FirstWins,
    LastWins,
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Series {
    samples: Vec<Sample>,
}

impl Series {
    pub fn new() -> Self {
        Series::default()
    }

    /// Builds a series from already-validated samples in any order,
    /// dropping non-finite values and duplicate timestamps (first wins).
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        let samples = samples.into_iter().filter(|s| s.value.is_finite()).collect();
        Series {
            samples: normalize(samples, DuplicatePolicy::FirstWins),
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Most recent sample by time.
    pub fn latest(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// True when timestamps are strictly increasing.
    pub fn is_strictly_increasing(&self) -> bool {
        self.samples
            .windows(2)
            .all(|pair| pair[0].timestamp < pair[1].timestamp)
    }
}

// ---------------------------------------------------------------------------
// Merge engine
// ---------------------------------------------------------------------------

/// Merges a freshly fetched batch into `existing`, first-seen wins on
/// duplicate timestamps.
///
/// Readings with a missing, non-numeric or non-finite value, or with an
/// unparseable timestamp, are dropped before merging. An empty batch
/// returns a copy of `existing`.
pub fn merge(existing: &Series, incoming: &[RawReading]) -> Series {
    merge_with_policy(existing, incoming, DuplicatePolicy::FirstWins)
}

/// `merge` with an explicit duplicate-resolution policy.
pub fn merge_with_policy(
    existing: &Series,
    incoming: &[RawReading],
    policy: DuplicatePolicy,
) -> Series {
    let mut combined = Vec::with_capacity(existing.len() + incoming.len());
    combined.extend_from_slice(&existing.samples);
    combined.extend(incoming.iter().filter_map(RawReading::to_sample));

    Series {
        samples: normalize(combined, policy),
    }
}

/// Stable sort by timestamp, then collapse runs of equal timestamps.
///
/// The sort is stable, so within a run the samples keep their
/// concatenation order and the policy can pick the first or the last.
fn normalize(mut samples: Vec<Sample>, policy: DuplicatePolicy) -> Vec<Sample> {
    samples.sort_by_key(|s| s.timestamp);

    let mut out: Vec<Sample> = Vec::with_capacity(samples.len());
    for sample in samples {
        match out.last_mut() {
            Some(last) if last.timestamp == sample.timestamp => {
                if policy == DuplicatePolicy::LastWins {
                    *last = sample;
                }
            }
            _ => out.push(sample),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
