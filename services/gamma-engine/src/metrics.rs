//! Session counters
//!
//! Every terminal state of the trade lifecycle increments exactly one
//! counter; the snapshot task logs a summary once per tick.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters shared across tasks
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Trades seen on the wire
    pub trades_received: AtomicU64,
    /// Classified customer buys
    pub classified_buy: AtomicU64,
    /// Classified customer sells
    pub classified_sell: AtomicU64,
    /// Unknown-side trades (counted, not applied)
    pub unknown_side: AtomicU64,
    /// Trades applied to the book
    pub trades_applied: AtomicU64,
    /// Frames or symbols that failed to parse
    pub parse_failures: AtomicU64,
    /// Trades dropped for lack of an underlying spot
    pub missing_spot: AtomicU64,
    /// Trades dropped for a non-finite gamma
    pub bad_gamma: AtomicU64,
    /// Solver failures resolved by the moneyness fallback
    pub iv_fallback_used: AtomicU64,
    /// Crossed quote updates rejected by the cache
    pub quote_rejected_crossed: AtomicU64,
    /// Trades shed under sustained backpressure
    pub trade_dropped_backpressure: AtomicU64,
    /// Rows accepted by the gamma sink
    pub snapshots_written: AtomicU64,
    /// Sink append failures awaiting retry
    pub sink_retries: AtomicU64,
    /// Upstream reconnects performed by the supervisor
    pub reconnects: AtomicU64,
}

impl EngineMetrics {
    /// Bump a counter by one
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter
    #[must_use]
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// One-line session summary for periodic logging
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "recv={} buy={} sell={} unknown={} applied={} parse_fail={} \
             no_spot={} iv_fallback={} crossed={} shed={} snapshots={}",
            Self::get(&self.trades_received),
            Self::get(&self.classified_buy),
            Self::get(&self.classified_sell),
            Self::get(&self.unknown_side),
            Self::get(&self.trades_applied),
            Self::get(&self.parse_failures),
            Self::get(&self.missing_spot),
            Self::get(&self.iv_fallback_used),
            Self::get(&self.quote_rejected_crossed),
            Self::get(&self.trade_dropped_backpressure),
            Self::get(&self.snapshots_written),
        )
    }
}
