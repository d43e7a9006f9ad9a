//! The session dictionary of known tokens.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::stats::RunningStats;
use crate::token::Token;

/// Whether the bank records where each token was emitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BankMode {
    /// Keep the start position of every emission.
    Tracking,
    /// Known-ness only; positions are never stored.
    #[default]
    Compact,
}

/// Token → occurrence metadata, iterated in insertion order.
///
/// Grows only through the tokenizer (insert-on-novelty) and shrinks only
/// through eviction. A bank is owned by exactly one session worker.
#[derive(Clone, Debug, Default)]
pub struct TokenBank {
    mode: BankMode,
    entries: HashMap<Token, Vec<usize>>,
    order: Vec<Token>,
}

impl TokenBank {
    pub fn new(mode: BankMode) -> Self {
        Self {
            mode,
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Seed a bank from a store snapshot. Seeded tokens carry no positions.
    pub fn from_tokens(tokens: impl IntoIterator<Item = Token>, mode: BankMode) -> Self {
        let mut bank = Self::new(mode);
        for token in tokens {
            bank.insert_novel(token);
        }
        bank
    }

    pub fn mode(&self) -> BankMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, token: &Token) -> bool {
        self.entries.contains_key(token)
    }

    /// Insert `token` if unknown. Returns true when the bank grew.
    pub fn insert_novel(&mut self, token: Token) -> bool {
        if self.entries.contains_key(&token) {
            return false;
        }
        self.entries.insert(token.clone(), Vec::new());
        self.order.push(token);
        true
    }

    /// Note an emission of `token` starting at symbol `position`.
    ///
    /// Emitted tokens are always known afterwards: a window reset to a lone
    /// symbol, or a token dropped by a reseed, is inserted here. Positions
    /// are only kept in tracking mode.
    pub fn record_emission(&mut self, token: &Token, position: usize) {
        if !self.entries.contains_key(token) {
            self.insert_novel(token.clone());
        }
        if self.mode == BankMode::Compact {
            return;
        }
        if let Some(positions) = self.entries.get_mut(token) {
            positions.push(position);
        }
    }

    /// Recorded start positions (always empty in compact mode).
    pub fn positions(&self, token: &Token) -> Option<&[usize]> {
        self.entries.get(token).map(Vec::as_slice)
    }

    pub fn remove(&mut self, token: &Token) -> bool {
        if self.entries.remove(token).is_none() {
            return false;
        }
        self.order.retain(|t| t != token);
        true
    }

    /// Evict a set of tokens in one pass. Returns how many were present.
    pub fn remove_all(&mut self, tokens: &HashSet<Token>) -> usize {
        let before = self.order.len();
        self.order.retain(|t| !tokens.contains(t));
        for token in tokens {
            self.entries.remove(token);
        }
        before - self.order.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.order.iter()
    }

    pub fn profile(&self) -> BankProfile {
        BankProfile::of(self.iter())
    }
}

/// Length distribution of a set of tokens, in symbols.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BankProfile {
    pub size: usize,
    pub mean_len: f64,
    pub std_len: f64,
    pub max_len: usize,
}

impl BankProfile {
    pub fn of<'a>(tokens: impl IntoIterator<Item = &'a Token>) -> Self {
        let mut stats = RunningStats::new();
        let mut max_len = 0;
        for token in tokens {
            let len = token.symbol_len();
            max_len = max_len.max(len);
            stats.push(len as f64);
        }
        Self {
            size: stats.count() as usize,
            mean_len: stats.mean(),
            std_len: stats.std_dev(),
            max_len,
        }
    }
}

/// Drop tokens longer than `mean + k * std` symbols. Returns the evicted tokens.
pub fn trim_by_length(bank: &mut TokenBank, k: f64) -> HashSet<Token> {
    let profile = bank.profile();
    let cutoff = profile.mean_len + k * profile.std_len;
    let evicted: HashSet<Token> = bank
        .iter()
        .filter(|t| t.symbol_len() as f64 > cutoff)
        .cloned()
        .collect();
    bank.remove_all(&evicted);
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> Token {
        Token::from_text(s)
    }

    #[test]
    fn test_insert_novel_reports_growth() {
        let mut bank = TokenBank::new(BankMode::Compact);
        assert!(bank.insert_novel(t("a")));
        assert!(!bank.insert_novel(t("a")));
        assert!(bank.insert_novel(t("ab")));
        assert_eq!(bank.len(), 2);
        assert!(bank.contains(&t("ab")));
    }

    #[test]
    fn test_insertion_order_preserved() {
        let bank = TokenBank::from_tokens([t("c"), t("a"), t("b"), t("a")], BankMode::Compact);
        let order: Vec<String> = bank.iter().map(Token::to_text_lossy).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_compact_mode_ignores_positions() {
        let mut bank = TokenBank::new(BankMode::Compact);
        bank.insert_novel(t("a"));
        bank.record_emission(&t("a"), 3);
        assert_eq!(bank.positions(&t("a")), Some(&[][..]));
    }

    #[test]
    fn test_tracking_mode_records_positions() {
        let mut bank = TokenBank::new(BankMode::Tracking);
        bank.insert_novel(t("a"));
        bank.record_emission(&t("a"), 0);
        bank.record_emission(&t("a"), 4);
        assert_eq!(bank.positions(&t("a")), Some(&[0, 4][..]));
    }

    #[test]
    fn test_emission_inserts_missing_token() {
        let mut bank = TokenBank::new(BankMode::Tracking);
        bank.record_emission(&t("zz"), 7);
        assert!(bank.contains(&t("zz")));
        assert_eq!(bank.positions(&t("zz")), Some(&[7][..]));

        let mut compact = TokenBank::new(BankMode::Compact);
        compact.record_emission(&t("zz"), 7);
        assert!(compact.contains(&t("zz")));
    }

    #[test]
    fn test_remove_and_remove_all() {
        let mut bank = TokenBank::from_tokens([t("a"), t("b"), t("c")], BankMode::Compact);
        assert!(bank.remove(&t("b")));
        assert!(!bank.remove(&t("b")));

        let gone: HashSet<Token> = [t("a"), t("missing")].into_iter().collect();
        assert_eq!(bank.remove_all(&gone), 1);
        let left: Vec<&Token> = bank.iter().collect();
        assert_eq!(left, vec![&t("c")]);
    }

    #[test]
    fn test_profile() {
        let bank = TokenBank::from_tokens([t("a"), t("abc"), t("ab")], BankMode::Compact);
        let p = bank.profile();
        assert_eq!(p.size, 3);
        assert_eq!(p.max_len, 3);
        assert!((p.mean_len - 2.0).abs() < 1e-12);
        assert!((p.std_len - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_profile_empty() {
        let p = TokenBank::default().profile();
        assert_eq!(p.size, 0);
        assert_eq!(p.max_len, 0);
    }

    #[test]
    fn test_trim_by_length_drops_outliers() {
        let mut bank = TokenBank::from_tokens(
            [t("a"), t("b"), t("c"), t("d"), t("abcdefghij")],
            BankMode::Compact,
        );
        let evicted = trim_by_length(&mut bank, 1.0);
        assert_eq!(evicted.len(), 1);
        assert!(evicted.contains(&t("abcdefghij")));
        assert_eq!(bank.len(), 4);
    }
}
