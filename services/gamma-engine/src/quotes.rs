//! Latest-NBBO cache for option symbols and the underlying index
//!
//! Updates are last-writer-wins on the exchange timestamp; crossed quotes
//! never enter the cache. Reads return value copies.

use common::{Quote, Ts};
use dashmap::DashMap;

/// What happened to an incoming quote update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteUpdate {
    /// Stored as the latest quote for the symbol
    Applied,
    /// Strictly older than the stored quote, discarded
    Stale,
    /// `bid > ask`, rejected
    Crossed,
}

/// Concurrent map of symbol to latest NBBO
#[derive(Debug)]
pub struct QuoteCache {
    quotes: DashMap<String, Quote>,
    stale_after_ms: u64,
}

impl QuoteCache {
    /// Create a cache with the given staleness window
    #[must_use]
    pub fn new(stale_after_ms: u64) -> Self {
        Self {
            quotes: DashMap::new(),
            stale_after_ms,
        }
    }

    /// Apply an update, keeping the newest quote per symbol.
    pub fn update(&self, symbol: &str, quote: Quote) -> QuoteUpdate {
        if quote.bid > quote.ask {
            return QuoteUpdate::Crossed;
        }

        match self.quotes.entry(symbol.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if quote.ts < entry.get().ts {
                    return QuoteUpdate::Stale;
                }
                entry.insert(quote);
                QuoteUpdate::Applied
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(quote);
                QuoteUpdate::Applied
            }
        }
    }

    /// Latest quote for a symbol, regardless of freshness
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<Quote> {
        self.quotes.get(symbol).map(|entry| *entry.value())
    }

    /// Latest quote if it is usable and fresh at `now`
    #[must_use]
    pub fn usable(&self, symbol: &str, now: Ts) -> Option<Quote> {
        let quote = self.get(symbol)?;
        if !quote.is_usable() {
            return None;
        }
        if quote.ts.age_millis(now) > self.stale_after_ms {
            return None;
        }
        Some(quote)
    }

    /// Fresh midpoint, `None` when the NBBO is missing, stale or one-sided
    #[must_use]
    pub fn mid(&self, symbol: &str, now: Ts) -> Option<f64> {
        self.usable(symbol, now).map(|quote| quote.mid())
    }

    /// Number of symbols observed this session
    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    /// True when no quote has been observed yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}
