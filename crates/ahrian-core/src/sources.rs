use std::collections::HashSet;

use crate::types::{GroundingSource, StepResult};

/// Merge every step's sources in step order, keeping the first occurrence of
/// each `uri`.
pub fn merge_sources(results: &[StepResult]) -> Vec<GroundingSource> {
    dedup_sources(
        results
            .iter()
            .filter_map(|r| r.sources.as_deref())
            .flatten(),
    )
}

/// First-seen dedup by `uri` over an arbitrary source sequence.
pub fn dedup_sources<'a>(
    sources: impl IntoIterator<Item = &'a GroundingSource>,
) -> Vec<GroundingSource> {
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .filter(|s| seen.insert(s.uri.clone()))
        .cloned()
        .collect()
}
