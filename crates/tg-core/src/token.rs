//! Token encoding.
//!
//! A token is a run of base symbols (32-bit signed integers: Unicode code
//! points for documents, raw wire values for streams). Its canonical form is
//! the base64 of the concatenated little-endian bytes, which is also what the
//! store persists. Token identity is equality of that encoded string.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::SYMBOL_WIDTH;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("encoded length {0} is not a multiple of 4 bytes")]
    Misaligned(usize),
}

/// Encode a symbol sequence as base64 of its little-endian i32 bytes.
pub fn encode(symbols: &[i32]) -> String {
    let mut bytes = Vec::with_capacity(symbols.len() * SYMBOL_WIDTH);
    for s in symbols {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Exact inverse of [`encode`].
pub fn decode(encoded: &str) -> Result<Vec<i32>, CodecError> {
    let bytes = STANDARD.decode(encoded)?;
    if bytes.len() % SYMBOL_WIDTH != 0 {
        return Err(CodecError::Misaligned(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(SYMBOL_WIDTH)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Content-addressed, immutable token.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn from_symbols(symbols: &[i32]) -> Self {
        Self(encode(symbols))
    }

    /// Wrap an already-encoded value (e.g. read back from the store).
    /// The value is not validated; [`Token::symbols`] reports bad encodings.
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Tokenize text by Unicode scalar value.
    pub fn from_text(text: &str) -> Self {
        Self::from_symbols(&text_symbols(text))
    }

    pub fn symbols(&self) -> Result<Vec<i32>, CodecError> {
        decode(&self.0)
    }

    /// Number of symbols, derived from the encoded length.
    pub fn symbol_len(&self) -> usize {
        // base64 of n bytes is 4 * ceil(n / 3) chars; padding tells the remainder.
        let padding = self.0.bytes().rev().take_while(|&b| b == b'=').count();
        (self.0.len() / 4 * 3).saturating_sub(padding) / SYMBOL_WIDTH
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Render symbols as characters; invalid scalars become U+FFFD.
    pub fn to_text_lossy(&self) -> String {
        match self.symbols() {
            Ok(symbols) => symbols_to_text_lossy(&symbols),
            Err(_) => String::from(char::REPLACEMENT_CHARACTER),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unicode scalar values of `text` as symbols.
pub fn text_symbols(text: &str) -> Vec<i32> {
    text.chars().map(|c| c as i32).collect()
}

pub fn symbols_to_text_lossy(symbols: &[i32]) -> String {
    symbols
        .iter()
        .map(|&s| {
            u32::try_from(s)
                .ok()
                .and_then(char::from_u32)
                .unwrap_or(char::REPLACEMENT_CHARACTER)
        })
        .collect()
}

/// Reassembles fixed-width symbols from transport chunks whose boundaries
/// need not fall on a symbol boundary.
#[derive(Debug, Default)]
pub struct SymbolDecoder {
    pending: Vec<u8>,
}

impl SymbolDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the complete symbols in `chunk` to `out`. Leftover bytes are
    /// held until the next chunk.
    pub fn push(&mut self, chunk: &[u8], out: &mut Vec<i32>) {
        let mut rest = chunk;

        if !self.pending.is_empty() {
            let need = SYMBOL_WIDTH - self.pending.len();
            let take = need.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() < SYMBOL_WIDTH {
                return;
            }
            let p = &self.pending;
            out.push(i32::from_le_bytes([p[0], p[1], p[2], p[3]]));
            self.pending.clear();
        }

        let mut groups = rest.chunks_exact(SYMBOL_WIDTH);
        for c in groups.by_ref() {
            out.push(i32::from_le_bytes([c[0], c[1], c[2], c[3]]));
        }
        self.pending.extend_from_slice(groups.remainder());
    }

    /// Bytes held back waiting for the rest of a symbol.
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    /// End of stream. Returns the number of dangling bytes discarded.
    pub fn finish(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}
