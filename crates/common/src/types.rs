//! Quote, trade and timestamp primitives shared across the engine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp in milliseconds since UNIX epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ts(pub u64);

impl Ts {
    /// Get current wall-clock timestamp
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| std::time::Duration::from_secs(0))
            .as_millis() as u64;
        Self(millis)
    }

    /// Create timestamp from milliseconds
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Get timestamp as milliseconds
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Seconds since epoch as f64 (gamma-store row format)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// Age relative to `now`, saturating at zero for future stamps
    #[must_use]
    pub const fn age_millis(&self, now: Ts) -> u64 {
        now.0.saturating_sub(self.0)
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Option right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionRight {
    /// Call option
    Call,
    /// Put option
    Put,
}

impl OptionRight {
    /// Single-letter OCC code
    #[must_use]
    pub const fn code(&self) -> char {
        match self {
            Self::Call => 'C',
            Self::Put => 'P',
        }
    }
}

impl fmt::Display for OptionRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Inferred aggressor side of a customer trade
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeSide {
    /// Customer lifted the offer
    Buy,
    /// Customer hit the bid
    Sell,
    /// No usable NBBO, or trade exactly at mid
    #[default]
    Unknown,
}

impl TradeSide {
    /// Customer sign: +1 buy, -1 sell, 0 unknown
    #[must_use]
    pub const fn sign(&self) -> i64 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
            Self::Unknown => 0,
        }
    }
}

/// National best bid and offer for one symbol
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Best bid price
    pub bid: f64,
    /// Best ask price
    pub ask: f64,
    /// Exchange timestamp of the update
    pub ts: Ts,
}

impl Quote {
    /// Create a new quote
    #[must_use]
    pub const fn new(bid: f64, ask: f64, ts: Ts) -> Self {
        Self { bid, ask, ts }
    }

    /// A quote is usable when both sides are strictly positive and not crossed
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.bid > 0.0 && self.ask > 0.0 && self.bid <= self.ask
    }

    /// Midpoint of bid and ask
    #[must_use]
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

/// A single option trade print
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// OCC-style wire symbol
    pub symbol: String,
    /// Execution price
    pub price: f64,
    /// Contracts traded
    pub size: u32,
    /// Exchange timestamp
    pub ts: Ts,
    /// Classifier-assigned side
    #[serde(default)]
    pub side: TradeSide,
}

impl Trade {
    /// Create an unclassified trade
    #[must_use]
    pub fn new(symbol: impl Into<String>, price: f64, size: u32, ts: Ts) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            size,
            ts,
            side: TradeSide::Unknown,
        }
    }
}
