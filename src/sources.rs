//! Grounding source deduplication.
//!
//! Citations arrive in batches, one batch per streamed chunk. The running
//! list for a response is keyed by `uri`: a uri seen before keeps its slot
//! and takes the newest title, a new uri goes to the end.

use std::collections::HashMap;

use crate::models::GroundingSource;

/// Fold `incoming` into `current` and return the merged list.
pub fn merge_sources<I>(mut current: Vec<GroundingSource>, incoming: I) -> Vec<GroundingSource>
where
    I: IntoIterator<Item = GroundingSource>,
{
    let mut index: HashMap<String, usize> = current
        .iter()
        .enumerate()
        .map(|(i, s)| (s.uri.clone(), i))
        .collect();

    for source in incoming {
        match index.get(&source.uri) {
            Some(&pos) => current[pos].title = source.title,
            None => {
                index.insert(source.uri.clone(), current.len());
                current.push(source);
            }
        }
    }

    current
}
