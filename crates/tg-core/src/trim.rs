//! Rank-based eviction.

use std::collections::HashSet;

use crate::graph::AdjacencyGraph;
use crate::rank::{RankConfig, Ranks, rank};
use crate::stats::RunningStats;
use crate::token::Token;

/// `mean + k * std` over the rank distribution.
pub fn rank_threshold(ranks: &Ranks, k: f64) -> f64 {
    let stats: RunningStats = ranks.values().collect();
    stats.mean() + k * stats.std_dev()
}

/// Evict every token ranked strictly below `mean + k * std`, then drop edges
/// whose preceding token is no longer a key. Returns the evicted tokens.
pub fn trim(graph: &mut AdjacencyGraph, k: f64) -> HashSet<Token> {
    trim_with(graph, k, &RankConfig::default())
}

pub fn trim_with(graph: &mut AdjacencyGraph, k: f64, config: &RankConfig) -> HashSet<Token> {
    let ranks = rank(graph, config);
    if ranks.is_empty() {
        return HashSet::new();
    }
    let threshold = rank_threshold(&ranks, k);

    let removed: HashSet<Token> = ranks
        .iter()
        .filter(|(_, score)| *score < threshold)
        .map(|(token, _)| token.clone())
        .collect();

    graph.retain_keys(|token| !removed.contains(token));
    graph.drop_dangling();
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn t(s: &str) -> Token {
        Token::from_text(s)
    }

    fn graph(pairs: &[(&str, &str)]) -> AdjacencyGraph {
        let mut g = AdjacencyGraph::new();
        for (i, (from, to)) in pairs.iter().enumerate() {
            g.record(&t(to), Some(&t(from)), i as u64 + 1, Uuid::nil());
        }
        g
    }

    fn assert_consistent(g: &AdjacencyGraph) {
        let keys: HashSet<&Token> = g.keys().collect();
        for key in g.keys() {
            for edge in g.incoming(key) {
                assert!(keys.contains(&edge.preceding), "dangling edge into {key}");
            }
        }
    }

    #[test]
    fn test_empty_graph_removes_nothing() {
        let mut g = AdjacencyGraph::new();
        assert!(trim(&mut g, 1.0).is_empty());
    }

    #[test]
    fn test_hub_survives_leaves_evicted() {
        let mut g = graph(&[
            ("a", "h"),
            ("b", "h"),
            ("c", "h"),
            ("d", "h"),
            ("h", "a"),
        ]);
        let removed = trim(&mut g, 0.0);

        assert!(!removed.contains(&t("h")));
        assert!(g.contains(&t("h")));
        assert!(removed.contains(&t("b")));
        assert_consistent(&g);
    }

    #[test]
    fn test_uniform_ranks_keep_everything() {
        let mut g = graph(&[("a", "b"), ("b", "c"), ("c", "a")]);
        let before = g.edge_count();
        // every score equals the mean; the comparison is strict
        let removed = trim(&mut g, 1.0);
        assert!(removed.is_empty(), "removed {removed:?}");
        assert_eq!(g.edge_count(), before);
    }

    #[test]
    fn test_large_k_evicts_all_but_consistent() {
        let mut g = graph(&[("a", "b"), ("b", "c"), ("c", "d"), ("a", "d")]);
        trim(&mut g, 10.0);
        assert!(g.is_empty());
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_negative_k_keeps_all_keys_drops_orphans() {
        // "a" is only ever a preceding token, never a key
        let mut g = graph(&[("a", "b"), ("b", "c")]);
        let removed = trim(&mut g, -10.0);
        assert!(removed.is_empty());
        assert!(g.incoming(&t("b")).is_empty());
        assert_eq!(g.incoming(&t("c")).len(), 1);
        assert_consistent(&g);
    }
}
