/// PageRank damping factor.
pub const DAMPING_FACTOR: f64 = 0.85;

/// Upper bound on PageRank iterations.
pub const MAX_ITERATIONS: usize = 100;

/// Convergence tolerance: sum of absolute rank deltas per iteration.
pub const TOLERANCE: f64 = 1e-6;

/// Trim threshold multiplier: tokens ranked below `mean + k * std` are evicted.
pub const TRIM_K: f64 = 1.0;

/// Width of one symbol on the wire (little-endian i32).
pub const SYMBOL_WIDTH: usize = 4;

/// Buffered emitted tokens that trigger a background push.
pub const PUSH_THRESHOLD: usize = 20;

/// Edges per store transaction.
pub const BATCH_SIZE: usize = 200;

/// Share of top-ranked store tokens used to seed a session bank.
pub const SEED_PERCENTILE: f64 = 0.2;

/// Occurrences a session graph keeps per token once it outgrows its
/// budget; older multi-edges are dropped first.
pub const MAX_EDGES_PER_TOKEN: usize = 64;
