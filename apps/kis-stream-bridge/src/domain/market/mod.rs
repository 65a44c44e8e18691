//! Market Data Types
//!
//! Codec-agnostic representation of the trade prices that flow from the
//! upstream feed to downstream sessions.

/// An exchange ticker (e.g. `"005930"`). Treated as an opaque key.
pub type Symbol = String;

/// A single trade price for one symbol.
///
/// The price is carried as the vendor's decimal string so it reaches the
/// browser exactly as the exchange printed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceTick {
    /// Symbol the trade belongs to.
    pub symbol: Symbol,
    /// Current (last traded) price.
    pub price: String,
}

impl PriceTick {
    /// Create a new tick.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, price: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            price: price.into(),
        }
    }
}
