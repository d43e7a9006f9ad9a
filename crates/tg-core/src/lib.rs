//! Token graph engine.
//!
//! Learns a dictionary of recurring substrings from an unbounded symbol
//! stream with a greedy one-pass tokenizer, records which token followed
//! which in an adjacency multigraph, scores tokens by PageRank over that
//! graph and evicts the ones that rank poorly.
//!
//! Zero I/O: persistence lives in `tg-store`, transport in `tg-cli`.

pub mod bank;
pub mod constants;
pub mod drift;
pub mod graph;
pub mod rank;
pub mod stats;
pub mod token;
pub mod tokenizer;
pub mod trim;

pub use bank::{BankMode, BankProfile, TokenBank, trim_by_length};
pub use constants::{
    BATCH_SIZE, DAMPING_FACTOR, MAX_EDGES_PER_TOKEN, MAX_ITERATIONS, PUSH_THRESHOLD,
    SEED_PERCENTILE, SYMBOL_WIDTH, TOLERANCE, TRIM_K,
};
pub use drift::{ChunkOptions, DriftError, RollingCentroid, chunk_by_drift, cosine_similarity};
pub use graph::{AdjacencyEdge, AdjacencyGraph};
pub use rank::{RankConfig, Ranks, rank};
pub use stats::RunningStats;
pub use token::{
    CodecError, SymbolDecoder, Token, decode, encode, symbols_to_text_lossy, text_symbols,
};
pub use tokenizer::{Emission, Step, Tokenizer, reassemble, segment};
pub use trim::{rank_threshold, trim, trim_with};
