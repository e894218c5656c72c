//! Subscription Set
//!
//! The instruments a single stream must be subscribed to. The set is fixed
//! when the stream is constructed and replayed verbatim after every
//! reconnect, so the upstream always sees the same subscribe sequence.

// =============================================================================
// Types
// =============================================================================

/// A symbol string (bare ticker or venue-qualified crypto pair).
pub type Symbol = String;

/// Ordered, de-duplicated set of instrument identifiers.
///
/// Insertion order is preserved; later duplicates and blank entries are
/// dropped.
///
/// # Example
///
/// ```rust
/// use market_stream::domain::subscription::SubscriptionSet;
///
/// let set = SubscriptionSet::new(["AAPL", " MSFT ", "AAPL", ""]);
/// assert_eq!(set.as_slice(), ["AAPL", "MSFT"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    symbols: Vec<Symbol>,
}

impl SubscriptionSet {
    /// Create a subscription set.
    #[must_use]
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<Symbol> = Vec::new();
        for symbol in symbols {
            let symbol = symbol.as_ref().trim();
            if symbol.is_empty() || unique.iter().any(|s| s == symbol) {
                continue;
            }
            unique.push(symbol.to_string());
        }
        Self { symbols: unique }
    }

    /// Parse a comma-separated list (`"AAPL,MSFT,GOOGL"`).
    #[must_use]
    pub fn from_csv(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// Symbols in subscribe order.
    #[must_use]
    pub fn as_slice(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Iterate symbols in subscribe order.
    pub fn iter(&self) -> std::slice::Iter<'_, Symbol> {
        self.symbols.iter()
    }

    /// Number of symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Check if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Check if a symbol is part of the set.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s == symbol)
    }
}

impl<'a> IntoIterator for &'a SubscriptionSet {
    type Item = &'a Symbol;
    type IntoIter = std::slice::Iter<'a, Symbol>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
