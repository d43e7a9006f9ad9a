//! Semantic-drift chunking.
//!
//! Tokens arrive with an embedding (produced elsewhere). A rolling centroid
//! over every embedding seen so far moves a little with each item; when the
//! cosine distance between successive centroids jumps outside the current
//! chunk's usual range, a new chunk begins.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stats::RunningStats;

#[derive(Debug, Error, PartialEq)]
pub enum DriftError {
    #[error("embedding has {got} dimensions, expected {expected}")]
    Dimension { expected: usize, got: usize },
    #[error("zero vector has no direction")]
    ZeroVector,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkOptions {
    /// Items a chunk must hold before it may be closed.
    pub min_chunk: usize,
    /// Standard deviations of drift tolerated inside a chunk.
    pub k: f64,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self { min_chunk: 10, k: 1.0 }
    }
}

/// Running mean of a stream of equal-length vectors.
#[derive(Clone, Debug)]
pub struct RollingCentroid {
    sum: Vec<f64>,
    count: usize,
}

impl RollingCentroid {
    pub fn new(dimensions: usize) -> Self {
        Self {
            sum: vec![0.0; dimensions],
            count: 0,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.sum.len()
    }

    pub fn add(&mut self, vector: &[f64]) -> Result<(), DriftError> {
        if vector.len() != self.sum.len() {
            return Err(DriftError::Dimension {
                expected: self.sum.len(),
                got: vector.len(),
            });
        }
        for (acc, v) in self.sum.iter_mut().zip(vector) {
            *acc += v;
        }
        self.count += 1;
        Ok(())
    }

    /// `None` until the first vector is added.
    pub fn centroid(&self) -> Option<Vec<f64>> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(self.sum.iter().map(|v| v / n).collect())
    }
}

pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Result<f64, DriftError> {
    if a.len() != b.len() {
        return Err(DriftError::Dimension {
            expected: a.len(),
            got: b.len(),
        });
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(DriftError::ZeroVector);
    }
    Ok(dot / (norm_a * norm_b))
}

/// Group `items` into chunks of semantically coherent tokens.
pub fn chunk_by_drift<T>(
    items: impl IntoIterator<Item = (Vec<f64>, T)>,
    options: &ChunkOptions,
) -> Result<Vec<Vec<T>>, DriftError> {
    let mut items = items.into_iter().peekable();
    let Some((first, _)) = items.peek() else {
        return Ok(Vec::new());
    };

    let mut centroid = RollingCentroid::new(first.len());
    let mut stats = RunningStats::new();
    let mut chunks: Vec<Vec<T>> = Vec::new();

    for (embedding, token) in items {
        let previous = centroid.centroid();
        centroid.add(&embedding)?;

        let (Some(previous), Some(current)) = (previous, centroid.centroid()) else {
            chunks.push(vec![token]);
            continue;
        };

        let drift = 1.0 - cosine_similarity(&previous, &current)?;
        let limit = (stats.mean() + options.k * stats.std_dev()).abs();
        let Some(open) = chunks.last_mut() else {
            chunks.push(vec![token]);
            continue;
        };

        if drift > limit && open.len() >= options.min_chunk {
            stats.reset();
            chunks.push(vec![token]);
        } else {
            stats.push(drift);
            open.push(token);
        }
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_centroid() {
        let mut c = RollingCentroid::new(2);
        assert!(c.centroid().is_none());
        c.add(&[1.0, 0.0]).unwrap();
        c.add(&[3.0, 2.0]).unwrap();
        assert_eq!(c.centroid().unwrap(), vec![2.0, 1.0]);
    }

    #[test]
    fn test_centroid_dimension_mismatch() {
        let mut c = RollingCentroid::new(3);
        assert_eq!(
            c.add(&[1.0]),
            Err(DriftError::Dimension {
                expected: 3,
                got: 1
            })
        );
    }

    #[test]
    fn test_cosine() {
        assert_relative_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap(), 0.0);
        assert_relative_eq!(cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]).unwrap(), 1.0);
        assert_eq!(
            cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]),
            Err(DriftError::ZeroVector)
        );
    }

    #[test]
    fn test_empty_input() {
        let chunks = chunk_by_drift(Vec::<(Vec<f64>, &str)>::new(), &ChunkOptions::default());
        assert!(chunks.unwrap().is_empty());
    }

    #[test]
    fn test_constant_direction_is_one_chunk() {
        let items = (0..30).map(|i| (vec![2.0, 0.0], i));
        let chunks = chunk_by_drift(items, &ChunkOptions::default()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 30);
    }

    #[test]
    fn test_topic_shift_starts_new_chunk() {
        // twelve items along x, then a hard turn to y
        let mut items: Vec<(Vec<f64>, usize)> = (0..12).map(|i| (vec![1.0, 0.0], i)).collect();
        items.push((vec![0.0, 50.0], 12));

        let options = ChunkOptions { min_chunk: 5, k: 1.0 };
        let chunks = chunk_by_drift(items, &options).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], vec![12]);
        assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), 13);
    }

    #[test]
    fn test_min_chunk_holds_boundary() {
        let items = vec![
            (vec![1.0, 0.0], 'a'),
            (vec![0.0, 1.0], 'b'),
            (vec![-1.0, 3.0], 'c'),
        ];
        let options = ChunkOptions { min_chunk: 10, k: 0.0 };
        let chunks = chunk_by_drift(items, &options).unwrap();
        assert_eq!(chunks, vec![vec!['a', 'b', 'c']]);
    }
}
