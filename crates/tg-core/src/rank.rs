//! PageRank over the adjacency multigraph.
//!
//! Edge weight is multiplicity: a pair seen three times carries three times
//! the mass. Nodes are visited in [`AdjacencyGraph::nodes`] order so repeated
//! runs over the same construction sequence are bit-identical.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants::{DAMPING_FACTOR, MAX_ITERATIONS, TOLERANCE};
use crate::graph::AdjacencyGraph;
use crate::token::Token;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankConfig {
    pub damping: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            damping: DAMPING_FACTOR,
            max_iterations: MAX_ITERATIONS,
            tolerance: TOLERANCE,
        }
    }
}

/// Scores in node order, plus how the iteration ended.
#[derive(Clone, Debug, Default)]
pub struct Ranks {
    scores: Vec<(Token, f64)>,
    index: HashMap<Token, usize>,
    pub iterations: usize,
    pub converged: bool,
}

impl Ranks {
    pub fn get(&self, token: &Token) -> Option<f64> {
        self.index.get(token).map(|&i| self.scores[i].1)
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Token, f64)> {
        self.scores.iter().map(|(t, r)| (t, *r))
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.scores.iter().map(|(_, r)| *r)
    }

    pub fn total(&self) -> f64 {
        self.values().sum()
    }

    /// Tokens sorted by descending score. Ties keep node order.
    pub fn descending(&self) -> Vec<(Token, f64)> {
        let mut sorted = self.scores.clone();
        sorted.sort_by(|a, b| b.1.total_cmp(&a.1));
        sorted
    }

    pub fn into_map(self) -> HashMap<Token, f64> {
        self.scores.into_iter().collect()
    }
}

/// Rank every node of `graph`.
///
/// Mass held by nodes without outgoing edges is spread uniformly each
/// iteration, so scores always sum to 1 for a non-empty graph. Graphs with
/// sink nodes therefore score higher than `(1-d)/N + d * Σ` alone gives.
pub fn rank(graph: &AdjacencyGraph, config: &RankConfig) -> Ranks {
    let nodes = graph.nodes();
    let n = nodes.len();
    if n == 0 {
        return Ranks {
            converged: true,
            ..Ranks::default()
        };
    }

    let index: HashMap<Token, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, t)| (t.clone(), i))
        .collect();

    // incoming[v] lists the preceding node of every edge into v
    let mut incoming: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut out_degree = vec![0usize; n];
    for (v, token) in nodes.iter().enumerate() {
        for edge in graph.incoming(token) {
            if let Some(&u) = index.get(&edge.preceding) {
                incoming[v].push(u);
                out_degree[u] += 1;
            }
        }
    }

    let d = config.damping;
    let nf = n as f64;
    let mut ranks = vec![1.0 / nf; n];
    let mut next = vec![0.0; n];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < config.max_iterations {
        iterations += 1;

        let dangling: f64 = (0..n)
            .filter(|&u| out_degree[u] == 0)
            .map(|u| ranks[u])
            .sum();
        let base = (1.0 - d) / nf + d * dangling / nf;

        for v in 0..n {
            let inflow: f64 = incoming[v]
                .iter()
                .map(|&u| ranks[u] / out_degree[u].max(1) as f64)
                .sum();
            next[v] = base + d * inflow;
        }

        let delta: f64 = ranks
            .iter()
            .zip(&next)
            .map(|(old, new)| (old - new).abs())
            .sum();
        std::mem::swap(&mut ranks, &mut next);

        if delta < config.tolerance {
            converged = true;
            break;
        }
    }

    Ranks {
        scores: nodes.into_iter().zip(ranks).collect(),
        index,
        iterations,
        converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use uuid::Uuid;

    fn t(s: &str) -> Token {
        Token::from_text(s)
    }

    fn chain(pairs: &[(&str, &str)]) -> AdjacencyGraph {
        let mut g = AdjacencyGraph::new();
        for (i, (from, to)) in pairs.iter().enumerate() {
            g.record(&t(to), Some(&t(from)), i as u64 + 1, Uuid::nil());
        }
        g
    }

    #[test]
    fn test_empty_graph() {
        let r = rank(&AdjacencyGraph::new(), &RankConfig::default());
        assert!(r.is_empty());
        assert!(r.converged);
        assert_eq!(r.iterations, 0);
    }

    #[test]
    fn test_single_edge_sums_to_one() {
        let r = rank(&chain(&[("a", "b")]), &RankConfig::default());
        assert_eq!(r.len(), 2);
        assert_relative_eq!(r.total(), 1.0, epsilon = 1e-9);
        // b is pointed at, a is not
        assert!(r.get(&t("b")).unwrap() > r.get(&t("a")).unwrap());
        assert!(r.converged);
    }

    #[test]
    fn test_symmetric_cycle_is_uniform() {
        let r = rank(
            &chain(&[("a", "b"), ("b", "c"), ("c", "a")]),
            &RankConfig::default(),
        );
        for (_, score) in r.iter() {
            assert_relative_eq!(score, 1.0 / 3.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_multiplicity_adds_weight() {
        // a→b twice, a→c once
        let r = rank(
            &chain(&[("a", "b"), ("a", "b"), ("a", "c")]),
            &RankConfig::default(),
        );
        assert!(r.get(&t("b")).unwrap() > r.get(&t("c")).unwrap());
        assert_relative_eq!(r.total(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_hub_ranks_highest() {
        let r = rank(
            &chain(&[("a", "h"), ("b", "h"), ("c", "h"), ("h", "a")]),
            &RankConfig::default(),
        );
        let top = &r.descending()[0];
        assert_eq!(top.0, t("h"));
    }

    #[test]
    fn test_iteration_cap() {
        let config = RankConfig {
            max_iterations: 2,
            tolerance: 0.0,
            ..RankConfig::default()
        };
        let r = rank(&chain(&[("a", "b"), ("b", "c")]), &config);
        assert_eq!(r.iterations, 2);
        assert!(!r.converged);
        assert_relative_eq!(r.total(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_deterministic() {
        let g = chain(&[("x", "y"), ("y", "z"), ("z", "x"), ("x", "z")]);
        let a = rank(&g, &RankConfig::default());
        let b = rank(&g, &RankConfig::default());
        let va: Vec<f64> = a.values().collect();
        let vb: Vec<f64> = b.values().collect();
        assert_eq!(va, vb);
    }
}
