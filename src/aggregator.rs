//! Result merging and deduplication.

use std::collections::HashMap;

use crate::SearchResult;

/// Merges result batches from several sources into one deduplicated list.
///
/// Results are keyed by normalized URL. The first result seen for a key
/// keeps its display fields; later duplicates only add their sources. The
/// set of keys and each key's source set do not depend on arrival order.
#[derive(Debug, Default)]
pub struct Aggregator {
    results: Vec<SearchResult>,
    index: HashMap<String, usize>,
}

impl Aggregator {
    /// Creates a new aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one source's batch, in arrival order.
    pub fn add(&mut self, batch: Vec<SearchResult>) {
        for result in batch {
            self.add_one(result);
        }
    }

    fn add_one(&mut self, result: SearchResult) {
        let key = result.key();

        if let Some(&position) = self.index.get(&key) {
            let existing = &mut self.results[position];
            existing.sources.extend(result.sources);
            existing.sources.insert(result.source);
        } else {
            self.index.insert(key, self.results.len());
            self.results.push(result);
        }
    }

    /// Returns the number of distinct results so far.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns whether no result has been added.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Consumes the aggregator and returns the merged results.
    pub fn finish(self) -> Vec<SearchResult> {
        self.results
    }

    /// Merges batches in the given order.
    pub fn merge(batches: impl IntoIterator<Item = Vec<SearchResult>>) -> Vec<SearchResult> {
        let mut aggregator = Self::new();
        for batch in batches {
            aggregator.add(batch);
        }
        aggregator.finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use chrono::Utc;

    use super::*;
    use crate::SourceId;

    fn result(source: SourceId, url: &str, title: &str) -> SearchResult {
        SearchResult::new(source, url, title, format!("{} description", title), Utc::now())
    }

    fn summary(results: &[SearchResult]) -> BTreeMap<String, BTreeSet<SourceId>> {
        results
            .iter()
            .map(|r| (r.key(), r.sources.clone()))
            .collect()
    }

    fn batches() -> Vec<Vec<SearchResult>> {
        vec![
            vec![
                result(SourceId::Ahmia, "http://example.onion/a", "A from ahmia"),
                result(SourceId::Ahmia, "http://market.onion/", "Market"),
            ],
            vec![
                result(SourceId::Torch, "http://example.onion/a/", "A from torch"),
                result(SourceId::Torch, "http://forum.onion/t?id=1&utm_source=x", "Forum"),
            ],
            vec![
                result(SourceId::Haystak, "http://forum.onion/t?id=1", "Forum again"),
                result(SourceId::Haystak, "http://market.onion", "Market again"),
                result(SourceId::Haystak, "http://wiki.onion/", "Wiki"),
            ],
        ]
    }

    #[test]
    fn test_aggregator_new() {
        let aggregator = Aggregator::new();
        assert!(aggregator.is_empty());
        assert_eq!(aggregator.len(), 0);
    }

    #[test]
    fn test_merge_empty() {
        assert!(Aggregator::merge(Vec::new()).is_empty());
    }

    #[test]
    fn test_trailing_slash_duplicates_merge() {
        let merged = Aggregator::merge(vec![
            vec![result(SourceId::Ahmia, "http://example.onion/a", "A")],
            vec![result(SourceId::Torch, "http://example.onion/a/", "A/")],
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(
            merged[0].sources,
            BTreeSet::from([SourceId::Ahmia, SourceId::Torch])
        );
    }

    #[test]
    fn test_first_arrival_keeps_display_fields() {
        let merged = Aggregator::merge(vec![
            vec![result(SourceId::Torch, "http://example.onion/a", "Short")],
            vec![result(
                SourceId::Ahmia,
                "http://example.onion/a",
                "A much longer and better title",
            )],
        ]);
        assert_eq!(merged[0].title, "Short");
        assert_eq!(merged[0].description, "Short description");
        assert_eq!(merged[0].source, SourceId::Torch);
        assert_eq!(merged[0].sources.len(), 2);
    }

    #[test]
    fn test_same_source_duplicates_collapse() {
        let merged = Aggregator::merge(vec![vec![
            result(SourceId::Ahmia, "http://dup.onion/", "One"),
            result(SourceId::Ahmia, "http://dup.onion", "Two"),
        ]]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].sources, BTreeSet::from([SourceId::Ahmia]));
    }

    #[test]
    fn test_merge_is_commutative_across_arrival_orders() {
        let expected = summary(&Aggregator::merge(batches()));
        assert_eq!(expected.len(), 4);

        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let all = batches();
            let permuted: Vec<_> = order.iter().map(|&i| all[i].clone()).collect();
            assert_eq!(summary(&Aggregator::merge(permuted)), expected, "order {:?}", order);
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let once = Aggregator::merge(batches());
        let twice = Aggregator::merge(batches().into_iter().chain(batches()));
        assert_eq!(summary(&once), summary(&twice));

        let remerged = Aggregator::merge(vec![once.clone()]);
        assert_eq!(summary(&remerged), summary(&once));
    }

    #[test]
    fn test_merged_results_keep_union_of_sources() {
        let merged = Aggregator::merge(vec![
            {
                let mut r = result(SourceId::Ahmia, "http://x.onion", "X");
                r.sources.insert(SourceId::Haystak);
                vec![r]
            },
            vec![result(SourceId::Torch, "http://x.onion/", "X")],
        ]);
        assert_eq!(merged[0].sources.len(), 3);
    }

    #[test]
    fn test_aggregator_debug() {
        let aggregator = Aggregator::new();
        let debug_str = format!("{:?}", aggregator);
        assert!(debug_str.contains("Aggregator"));
    }
}
