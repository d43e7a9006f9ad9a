//! Token adjacency multigraph.
//!
//! Keyed by the *following* token; each key holds one edge per occurrence,
//! pointing back at the token that preceded it. Multi-edges are kept on
//! purpose: their multiplicity is the occurrence count.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tokenizer::Emission;
use crate::token::Token;

/// `preceding → token`, tagged with the sequence index of `token` and the
/// session that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdjacencyEdge {
    pub preceding: Token,
    pub token: Token,
    pub index: u64,
    pub session_id: Uuid,
}

#[derive(Clone, Debug, Default)]
pub struct AdjacencyGraph {
    order: Vec<Token>,
    edges: HashMap<Token, Vec<AdjacencyEdge>>,
}

impl AdjacencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph of a single emitted sequence.
    pub fn from_emissions(emissions: &[Emission], session_id: Uuid) -> Self {
        let mut graph = Self::new();
        let mut previous: Option<&Token> = None;
        for emission in emissions {
            graph.record(&emission.token, previous, emission.index, session_id);
            previous = Some(&emission.token);
        }
        graph
    }

    /// Record that `current` followed `previous`. No-op for the first token
    /// of a stream.
    pub fn record(
        &mut self,
        current: &Token,
        previous: Option<&Token>,
        index: u64,
        session_id: Uuid,
    ) {
        let Some(previous) = previous else {
            return;
        };
        self.push_edge(AdjacencyEdge {
            preceding: previous.clone(),
            token: current.clone(),
            index,
            session_id,
        });
    }

    fn push_edge(&mut self, edge: AdjacencyEdge) {
        if !self.edges.contains_key(&edge.token) {
            self.order.push(edge.token.clone());
        }
        self.edges.entry(edge.token.clone()).or_default().push(edge);
    }

    /// Concatenate another graph's edge lists into this one. Never dedupes.
    pub fn merge(&mut self, other: AdjacencyGraph) {
        let AdjacencyGraph { order, mut edges } = other;
        for token in order {
            if let Some(list) = edges.remove(&token) {
                for edge in list {
                    self.push_edge(edge);
                }
            }
        }
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn contains(&self, token: &Token) -> bool {
        self.edges.contains_key(token)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &Token> {
        self.order.iter()
    }

    /// Edges into `token` (its preceding occurrences).
    pub fn incoming(&self, token: &Token) -> &[AdjacencyEdge] {
        self.edges.get(token).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every token that appears as a key or as a preceding token, in
    /// first-appearance order. Stable for a given construction sequence.
    pub fn nodes(&self) -> Vec<Token> {
        let mut seen: HashSet<&Token> = HashSet::new();
        let mut nodes = Vec::new();
        for key in &self.order {
            if seen.insert(key) {
                nodes.push(key.clone());
            }
            for edge in self.incoming(key) {
                if seen.insert(&edge.preceding) {
                    nodes.push(edge.preceding.clone());
                }
            }
        }
        nodes
    }

    /// Outgoing edge count per token, counting multi-edges.
    pub fn out_degrees(&self) -> HashMap<&Token, usize> {
        let mut degrees: HashMap<&Token, usize> = HashMap::new();
        for list in self.edges.values() {
            for edge in list {
                *degrees.entry(&edge.preceding).or_default() += 1;
            }
        }
        degrees
    }

    /// All edges ordered by sequence index (stable across sessions), the
    /// order the store needs to rebuild sequences.
    pub fn edges_in_sequence(&self) -> Vec<AdjacencyEdge> {
        let mut all: Vec<AdjacencyEdge> = self
            .order
            .iter()
            .flat_map(|k| self.incoming(k).iter().cloned())
            .collect();
        all.sort_by_key(|e| e.index);
        all
    }

    /// Keep at most the `keep` most recent edges into each key. Returns how
    /// many edges were dropped.
    pub fn compact(&mut self, keep: usize) -> usize {
        let mut dropped = 0;
        for list in self.edges.values_mut() {
            if list.len() > keep {
                let excess = list.len() - keep;
                list.drain(..excess);
                dropped += excess;
            }
        }
        dropped
    }

    /// Remove keys for which `keep` is false.
    pub(crate) fn retain_keys(&mut self, mut keep: impl FnMut(&Token) -> bool) {
        let edges = &mut self.edges;
        self.order.retain(|token| {
            let kept = keep(token);
            if !kept {
                edges.remove(token);
            }
            kept
        });
    }

    /// Drop edges whose preceding token is no longer a key.
    pub(crate) fn drop_dangling(&mut self) {
        let keys: HashSet<Token> = self.order.iter().cloned().collect();
        for list in self.edges.values_mut() {
            list.retain(|edge| keys.contains(&edge.preceding));
        }
    }
}
