//! Greedy online segmentation.
//!
//! The window grows while `window + symbol` is already a known token. The
//! first time the extension is novel it is added to the bank, the window is
//! emitted as a confirmed token and the window restarts at the unmatched
//! symbol. One pass, no backtracking: earlier emissions are never revisited.

use serde::{Deserialize, Serialize};

use crate::bank::TokenBank;
use crate::token::Token;

/// A confirmed token and where it sits in the stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emission {
    pub token: Token,
    /// Sequence index among emitted tokens (0-based).
    pub index: u64,
    /// Symbol offset where the token starts.
    pub start: usize,
}

/// Outcome of feeding one symbol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// `window + symbol` was known; the window grew.
    Extended,
    /// `window + symbol` was novel and is now in the bank. The previous
    /// window, if any, was emitted.
    Novel(Option<Emission>),
}

impl Step {
    pub fn into_emission(self) -> Option<Emission> {
        match self {
            Step::Novel(emission) => emission,
            Step::Extended => None,
        }
    }
}

/// Segmentation state that survives chunk boundaries within a session.
/// The bank is lent per call so it can be swapped between calls.
#[derive(Clone, Debug, Default)]
pub struct Tokenizer {
    window: Vec<i32>,
    window_start: usize,
    position: usize,
    emitted: u64,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The unconfirmed candidate being accumulated.
    pub fn window(&self) -> &[i32] {
        &self.window
    }

    /// Symbols consumed so far.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Tokens emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn feed(&mut self, symbol: i32, bank: &mut TokenBank) -> Step {
        let position = self.position;
        self.position += 1;

        self.window.push(symbol);
        let candidate = Token::from_symbols(&self.window);
        if !bank.insert_novel(candidate) {
            return Step::Extended;
        }

        self.window.pop();
        let emission = self.take_window(bank);
        self.window.push(symbol);
        self.window_start = position;
        Step::Novel(emission)
    }

    /// Feed a run of symbols, appending emissions to `out`.
    pub fn feed_all(&mut self, symbols: &[i32], bank: &mut TokenBank, out: &mut Vec<Emission>) {
        for &symbol in symbols {
            if let Some(emission) = self.feed(symbol, bank).into_emission() {
                out.push(emission);
            }
        }
    }

    /// End of stream: emit whatever is in the window, known or not.
    pub fn finish(&mut self, bank: &mut TokenBank) -> Option<Emission> {
        self.take_window(bank)
    }

    fn take_window(&mut self, bank: &mut TokenBank) -> Option<Emission> {
        if self.window.is_empty() {
            return None;
        }
        let token = Token::from_symbols(&self.window);
        self.window.clear();
        bank.record_emission(&token, self.window_start);

        let emission = Emission {
            token,
            index: self.emitted,
            start: self.window_start,
        };
        self.emitted += 1;
        Some(emission)
    }
}

/// Segment a complete sequence, flushing the final window.
pub fn segment(symbols: &[i32], bank: &mut TokenBank) -> Vec<Emission> {
    let mut tokenizer = Tokenizer::new();
    let mut out = Vec::new();
    tokenizer.feed_all(symbols, bank, &mut out);
    out.extend(tokenizer.finish(bank));
    out
}

/// Concatenate emitted tokens back into symbols.
pub fn reassemble(emissions: &[Emission]) -> Vec<i32> {
    emissions
        .iter()
        .flat_map(|e| e.token.symbols().unwrap_or_default())
        .collect()
}
