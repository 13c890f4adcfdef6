//! Per-strike book of inferred dealer positioning
//!
//! Each entry tracks the customer's net contracts and the running
//! dealer-gamma contribution for one `(expiry, right, strike)` contract.
//! The dealer holds the opposite of the customer position, so a customer
//! buy subtracts gamma from the book and a customer sell adds it.

use chrono::NaiveDate;
use common::{OccSymbol, OptionRight, TradeSide, Ts};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Book key: contract identity minus the root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BookKey {
    /// Expiry date
    pub expiry: NaiveDate,
    /// Call or put
    pub right: OptionRight,
    /// Strike in thousandths
    pub strike_mils: i64,
}

impl From<&OccSymbol> for BookKey {
    fn from(sym: &OccSymbol) -> Self {
        Self {
            expiry: sym.expiry,
            right: sym.right,
            strike_mils: sym.strike_mils,
        }
    }
}

/// Accumulated state for one contract
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BookEntry {
    /// Customer net contracts; positive = customer net long
    pub net_customer_contracts: i64,
    /// Running dealer gamma: sum of -sign * size * gamma * multiplier
    pub cum_gamma_weighted: f64,
    /// Timestamp of the last applied trade
    pub last_update_ts: Ts,
}

/// Call/put/net gamma grouped at one strike
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StrikeGamma {
    /// Dealer gamma from calls
    pub call: f64,
    /// Dealer gamma from puts
    pub put: f64,
    /// Call + put
    pub net: f64,
}

/// Per-strike dealer book. Mutated only by the engine task.
#[derive(Debug)]
pub struct StrikeBook {
    entries: FxHashMap<BookKey, BookEntry>,
    contract_multiplier: f64,
}

impl StrikeBook {
    /// Create a book with the given contract multiplier
    #[must_use]
    pub fn new(contract_multiplier: u32) -> Self {
        Self {
            entries: FxHashMap::default(),
            contract_multiplier: f64::from(contract_multiplier),
        }
    }

    /// Apply one classified trade.
    ///
    /// `net_customer_contracts` always moves by the customer sign times
    /// size, including for expired contracts whose gamma contribution is
    /// zero. Unknown-side trades are the caller's responsibility and are
    /// ignored here.
    pub fn apply(
        &mut self,
        key: BookKey,
        side: TradeSide,
        size: u32,
        gamma_per_contract: f64,
        ts: Ts,
    ) {
        let sign = side.sign();
        if sign == 0 {
            return;
        }

        let entry = self.entries.entry(key).or_default();
        entry.net_customer_contracts += sign * i64::from(size);
        #[allow(clippy::cast_precision_loss)]
        let delta_gamma =
            -(sign as f64) * f64::from(size) * gamma_per_contract * self.contract_multiplier;
        entry.cum_gamma_weighted += delta_gamma;
        entry.last_update_ts = ts;
    }

    /// Aggregate dealer gamma across the whole book
    #[must_use]
    pub fn aggregate_gamma(&self) -> f64 {
        self.entries.values().map(|e| e.cum_gamma_weighted).sum()
    }

    /// Entry for one contract, if it has traded
    #[must_use]
    pub fn entry(&self, key: &BookKey) -> Option<BookEntry> {
        self.entries.get(key).copied()
    }

    /// Number of distinct contracts touched this session
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no trade has been applied
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot grouped by strike: calls and puts separately, plus net.
    #[must_use]
    pub fn by_strike(&self) -> BTreeMap<i64, StrikeGamma> {
        let mut grouped: BTreeMap<i64, StrikeGamma> = BTreeMap::new();
        for (key, entry) in &self.entries {
            let slot = grouped.entry(key.strike_mils).or_default();
            match key.right {
                OptionRight::Call => slot.call += entry.cum_gamma_weighted,
                OptionRight::Put => slot.put += entry.cum_gamma_weighted,
            }
            slot.net += entry.cum_gamma_weighted;
        }
        grouped
    }

    /// Strikes with the largest absolute net dealer gamma, candidates for
    /// pinning behavior near expiry.
    #[must_use]
    pub fn pin_candidates(&self, top_n: usize) -> Vec<(f64, f64)> {
        let mut strikes: Vec<(f64, f64)> = self
            .by_strike()
            .into_iter()
            .map(|(strike_mils, gamma)| {
                #[allow(clippy::cast_precision_loss)]
                let strike = strike_mils as f64 / 1000.0;
                (strike, gamma.net)
            })
            .collect();
        strikes.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        strikes.truncate(top_n);
        strikes
    }

    /// Distance-weighted sum of net dealer gamma around the spot; positive
    /// values indicate hedging flow pulling the underlying upward.
    #[must_use]
    pub fn directional_force(&self, spot: f64) -> f64 {
        self.by_strike()
            .into_iter()
            .map(|(strike_mils, gamma)| {
                #[allow(clippy::cast_precision_loss)]
                let strike = strike_mils as f64 / 1000.0;
                gamma.net * (strike - spot)
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::NaiveDate;

    fn key(right: OptionRight, strike_mils: i64) -> BookKey {
        BookKey {
            expiry: NaiveDate::from_ymd_opt(2025, 5, 30).unwrap(),
            right,
            strike_mils,
        }
    }

    #[test]
    fn customer_buy_subtracts_dealer_gamma() {
        let mut book = StrikeBook::new(100);
        let k = key(OptionRight::Call, 5_900_000);
        book.apply(k, TradeSide::Buy, 10, 0.00547, Ts::from_millis(1));

        let entry = book.entry(&k).unwrap();
        assert_eq!(entry.net_customer_contracts, 10);
        assert_abs_diff_eq!(entry.cum_gamma_weighted, -5.47, epsilon = 1e-9);
        assert_abs_diff_eq!(book.aggregate_gamma(), -5.47, epsilon = 1e-9);
    }

    #[test]
    fn customer_sell_adds_dealer_gamma() {
        let mut book = StrikeBook::new(100);
        let k = key(OptionRight::Put, 5_800_000);
        book.apply(k, TradeSide::Sell, 5, 0.00453, Ts::from_millis(1));

        let entry = book.entry(&k).unwrap();
        assert_eq!(entry.net_customer_contracts, -5);
        assert_abs_diff_eq!(entry.cum_gamma_weighted, 2.265, epsilon = 1e-9);
    }

    #[test]
    fn unknown_side_is_ignored() {
        let mut book = StrikeBook::new(100);
        book.apply(
            key(OptionRight::Call, 5_900_000),
            TradeSide::Unknown,
            10,
            0.005,
            Ts::from_millis(1),
        );
        assert!(book.is_empty());
        assert_eq!(book.aggregate_gamma(), 0.0);
    }

    #[test]
    fn inverse_trade_restores_book() {
        let mut book = StrikeBook::new(100);
        let k = key(OptionRight::Call, 5_900_000);
        book.apply(k, TradeSide::Buy, 10, 0.00547, Ts::from_millis(1));
        book.apply(k, TradeSide::Sell, 10, 0.00547, Ts::from_millis(2));

        let entry = book.entry(&k).unwrap();
        assert_eq!(entry.net_customer_contracts, 0);
        assert_abs_diff_eq!(entry.cum_gamma_weighted, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(book.aggregate_gamma(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn expired_contract_moves_position_only() {
        let mut book = StrikeBook::new(100);
        let k = key(OptionRight::Call, 5_900_000);
        book.apply(k, TradeSide::Buy, 3, 0.0, Ts::from_millis(1));

        let entry = book.entry(&k).unwrap();
        assert_eq!(entry.net_customer_contracts, 3);
        assert_eq!(entry.cum_gamma_weighted, 0.0);
    }

    #[test]
    fn aggregate_matches_by_strike_sum() {
        let mut book = StrikeBook::new(100);
        book.apply(key(OptionRight::Call, 5_900_000), TradeSide::Buy, 10, 0.005, Ts::from_millis(1));
        book.apply(key(OptionRight::Put, 5_900_000), TradeSide::Sell, 4, 0.004, Ts::from_millis(2));
        book.apply(key(OptionRight::Put, 5_800_000), TradeSide::Sell, 5, 0.0045, Ts::from_millis(3));

        let by_strike = book.by_strike();
        let total: f64 = by_strike.values().map(|g| g.net).sum();
        assert_abs_diff_eq!(book.aggregate_gamma(), total, epsilon = 1e-9);

        let atm = by_strike.get(&5_900_000).unwrap();
        assert_abs_diff_eq!(atm.call, -5.0, epsilon = 1e-9);
        assert_abs_diff_eq!(atm.put, 1.6, epsilon = 1e-9);
        assert_abs_diff_eq!(atm.net, -3.4, epsilon = 1e-9);
    }

    #[test]
    fn pin_candidates_rank_by_magnitude() {
        let mut book = StrikeBook::new(100);
        book.apply(key(OptionRight::Call, 5_900_000), TradeSide::Buy, 10, 0.005, Ts::from_millis(1));
        book.apply(key(OptionRight::Put, 5_800_000), TradeSide::Sell, 2, 0.004, Ts::from_millis(2));

        let pins = book.pin_candidates(1);
        assert_eq!(pins.len(), 1);
        assert_abs_diff_eq!(pins[0].0, 5900.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pins[0].1, -5.0, epsilon = 1e-9);
    }

    #[test]
    fn directional_force_weights_by_distance() {
        let mut book = StrikeBook::new(100);
        // Dealer long gamma at 5800 (customer sold puts there)
        book.apply(key(OptionRight::Put, 5_800_000), TradeSide::Sell, 5, 0.0045, Ts::from_millis(1));

        // Strike below spot with positive net gamma pulls force negative
        let force = book.directional_force(5900.0);
        assert_abs_diff_eq!(force, 2.25 * -100.0, epsilon = 1e-6);
    }
}
