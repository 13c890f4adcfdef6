//! Dealer engine: classification, gamma revaluation, book updates,
//! periodic snapshot emission
//!
//! One engine task drains the trade channel, so trades apply in enqueue
//! order. The snapshot task is the only writer to the gamma sink and the
//! only retrier of failed appends.

use crate::book::BookKey;
use crate::context::EngineContext;
use crate::greeks::BlackScholes;
use crate::metrics::EngineMetrics;
use crate::surface::IvSource;
use chrono::NaiveDate;
use common::{OccSymbol, Quote, Trade, TradeSide, Ts};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use storage::{GammaSink, GammaSnapshot};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Seconds in an ACT/365 year
const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;

/// Why a trade reached a terminal `dropped` state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Unparseable option symbol
    ParseFailure,
    /// No underlying spot from index quote or snapshot seed
    MissingSpot,
    /// Gamma came back non-finite
    BadGamma,
}

/// Terminal state of one trade through the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TradeOutcome {
    /// Applied to the book with this per-contract gamma
    Applied {
        /// Side assigned by the classifier
        side: TradeSide,
        /// Gamma per contract used for the update
        gamma: f64,
    },
    /// Counted but not applied
    UnknownSide,
    /// Dropped before pricing
    Dropped(DropReason),
}

/// Classify a trade print against the prevailing NBBO.
///
/// At or through the ask is a customer buy, at or through the bid a
/// customer sell; inside the spread the midpoint decides, and exactly at
/// mid stays unknown.
#[must_use]
pub fn classify(price: f64, quote: &Quote) -> TradeSide {
    if price >= quote.ask {
        return TradeSide::Buy;
    }
    if price <= quote.bid {
        return TradeSide::Sell;
    }
    let mid = quote.mid();
    if price > mid {
        TradeSide::Buy
    } else if price < mid {
        TradeSide::Sell
    } else {
        TradeSide::Unknown
    }
}

/// ACT/365 year fraction from `now` to the contract close on expiry day.
#[must_use]
pub fn time_to_expiry_years(expiry: NaiveDate, close_utc_s: u64, now: Ts) -> f64 {
    let midnight_ms = expiry
        .and_hms_opt(0, 0, 0)
        .map_or(0, |dt| dt.and_utc().timestamp_millis());
    #[allow(clippy::cast_possible_wrap)]
    let close_ms = midnight_ms + (close_utc_s as i64) * 1_000;
    #[allow(clippy::cast_possible_wrap)]
    let now_ms = now.as_millis() as i64;
    #[allow(clippy::cast_precision_loss)]
    let remaining_s = (close_ms - now_ms) as f64 / 1_000.0;
    remaining_s / SECONDS_PER_YEAR
}

/// The trade-processing half of the engine
pub struct DealerEngine {
    ctx: Arc<EngineContext>,
}

impl DealerEngine {
    /// Create an engine over the shared session state
    #[must_use]
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Process one trade at the current wall clock.
    pub fn process_trade(&self, trade: &Trade) -> TradeOutcome {
        self.process_trade_at(trade, Ts::now())
    }

    /// Process one trade at an explicit clock (deterministic in tests).
    pub fn process_trade_at(&self, trade: &Trade, now: Ts) -> TradeOutcome {
        let metrics = &self.ctx.metrics;
        EngineMetrics::incr(&metrics.trades_received);

        let symbol = match OccSymbol::parse(&trade.symbol) {
            Ok(symbol) => symbol,
            Err(err) => {
                debug!("dropping trade: {err}");
                EngineMetrics::incr(&metrics.parse_failures);
                return TradeOutcome::Dropped(DropReason::ParseFailure);
            }
        };

        let Some(nbbo) = self.ctx.quotes.usable(&trade.symbol, now) else {
            EngineMetrics::incr(&metrics.unknown_side);
            return TradeOutcome::UnknownSide;
        };

        let side = classify(trade.price, &nbbo);
        match side {
            TradeSide::Buy => EngineMetrics::incr(&metrics.classified_buy),
            TradeSide::Sell => EngineMetrics::incr(&metrics.classified_sell),
            TradeSide::Unknown => {
                EngineMetrics::incr(&metrics.unknown_side);
                return TradeOutcome::UnknownSide;
            }
        }

        let Some(spot) = self.ctx.spot(now) else {
            EngineMetrics::incr(&metrics.missing_spot);
            return TradeOutcome::Dropped(DropReason::MissingSpot);
        };

        let t_years =
            time_to_expiry_years(symbol.expiry, self.ctx.config.expiry_close_utc_s, now);

        // Expired contracts still move the customer position; their gamma
        // contribution is exactly zero.
        let gamma = if t_years <= 0.0 {
            0.0
        } else {
            let (sigma, source) = self.ctx.surface.iv_for(
                &trade.symbol,
                symbol.right,
                spot,
                symbol.strike(),
                t_years,
                nbbo.mid(),
                now,
            );
            if source == IvSource::Fallback {
                EngineMetrics::incr(&metrics.iv_fallback_used);
            }

            match BlackScholes::gamma(
                spot,
                symbol.strike(),
                t_years,
                self.ctx.config.risk_free_rate,
                0.0,
                sigma,
            ) {
                Some(gamma) if gamma.is_finite() => gamma,
                _ => {
                    EngineMetrics::incr(&metrics.bad_gamma);
                    return TradeOutcome::Dropped(DropReason::BadGamma);
                }
            }
        };

        self.ctx
            .book
            .write()
            .apply(BookKey::from(&symbol), side, trade.size, gamma, trade.ts);
        EngineMetrics::incr(&metrics.trades_applied);
        TradeOutcome::Applied { side, gamma }
    }
}

/// Drain the trade channel until the ingest side closes it.
///
/// When a blocked sender has flagged sustained backpressure, the queued
/// backlog (the oldest trades) is shed in favor of what follows.
pub async fn run_engine(ctx: Arc<EngineContext>, mut rx: mpsc::Receiver<Trade>) {
    let engine = DealerEngine::new(ctx.clone());
    info!("engine task started");

    while let Some(trade) = rx.recv().await {
        if ctx.shed_backlog.swap(false, Ordering::AcqRel) {
            let mut shed = 1u64; // the trade just received is the oldest
            while let Ok(_stale) = rx.try_recv() {
                shed += 1;
            }
            ctx.metrics
                .trade_dropped_backpressure
                .fetch_add(shed, Ordering::Relaxed);
            warn!("backpressure: shed {shed} queued trades");
            continue;
        }
        engine.process_trade(&trade);
    }

    info!("engine task drained and stopped");
}

/// Timer-driven snapshot emission.
///
/// Each tick reads the book aggregate and appends a row to the sink.
/// Failed appends stay buffered and retry next tick; trade processing
/// never waits on sink I/O. On shutdown one final snapshot is emitted and
/// the sink is flushed.
pub async fn run_snapshotter(
    ctx: Arc<EngineContext>,
    mut sink: Box<dyn GammaSink>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(ctx.config.snapshot_interval());
    let mut pending: Vec<GammaSnapshot> = Vec::new();
    info!("snapshot task started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                capture(&ctx, &mut pending);
                drain(&ctx, sink.as_mut(), &mut pending);
                info!("session: {}", ctx.metrics.summary());
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    // Final snapshot, then flush
    capture(&ctx, &mut pending);
    drain(&ctx, sink.as_mut(), &mut pending);
    if let Err(err) = sink.flush() {
        warn!("gamma sink flush failed: {err}");
    }
    info!("snapshot task stopped");
}

fn capture(ctx: &EngineContext, pending: &mut Vec<GammaSnapshot>) {
    let dealer_gamma = ctx.book.read().aggregate_gamma();
    pending.push(GammaSnapshot {
        ts: Ts::now(),
        dealer_gamma,
    });
}

fn drain(ctx: &EngineContext, sink: &mut dyn GammaSink, pending: &mut Vec<GammaSnapshot>) {
    while let Some(snapshot) = pending.first().copied() {
        match sink.append(&snapshot) {
            Ok(()) => {
                pending.remove(0);
                EngineMetrics::incr(&ctx.metrics.snapshots_written);
            }
            Err(err) => {
                EngineMetrics::incr(&ctx.metrics.sink_retries);
                warn!("gamma sink append failed, will retry: {err}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use approx::assert_abs_diff_eq;

    const SYM: &str = "SPXW250530C05900000";

    fn quote(bid: f64, ask: f64) -> Quote {
        Quote::new(bid, ask, Ts::from_millis(1_000))
    }

    #[test]
    fn classify_against_nbbo() {
        let q = quote(5.0, 5.1);
        assert_eq!(classify(5.10, &q), TradeSide::Buy);
        assert_eq!(classify(5.25, &q), TradeSide::Buy);
        assert_eq!(classify(5.00, &q), TradeSide::Sell);
        assert_eq!(classify(4.80, &q), TradeSide::Sell);
        assert_eq!(classify(5.06, &q), TradeSide::Buy);
        assert_eq!(classify(5.04, &q), TradeSide::Sell);
        assert_eq!(classify(5.05, &q), TradeSide::Unknown);
    }

    #[test]
    fn expiry_clock_is_act365() {
        let expiry = NaiveDate::from_ymd_opt(2025, 5, 30).unwrap();
        let close_utc_s = 20 * 3600;
        // 6 hours before the close
        let close_ms = expiry.and_hms_opt(20, 0, 0).unwrap().and_utc().timestamp_millis();
        #[allow(clippy::cast_sign_loss)]
        let now = Ts::from_millis((close_ms - 6 * 3600 * 1000) as u64);

        let t = time_to_expiry_years(expiry, close_utc_s, now);
        assert_abs_diff_eq!(t, 6.0 / (24.0 * 365.0), epsilon = 1e-12);

        // Past the close the fraction goes negative
        #[allow(clippy::cast_sign_loss)]
        let late = Ts::from_millis((close_ms + 1_000) as u64);
        assert!(time_to_expiry_years(expiry, close_utc_s, late) < 0.0);
    }

    fn engine_at(now_ms: u64) -> (DealerEngine, Ts) {
        let ctx = EngineContext::new(EngineConfig::default());
        ctx.set_seed_spot(5900.0);
        (DealerEngine::new(ctx), Ts::from_millis(now_ms))
    }

    #[test]
    fn parse_failure_drops() {
        let (engine, now) = engine_at(1_000);
        let trade = Trade::new("GARBAGE", 5.1, 10, now);
        assert_eq!(
            engine.process_trade_at(&trade, now),
            TradeOutcome::Dropped(DropReason::ParseFailure)
        );
        assert_eq!(
            EngineMetrics::get(&engine.ctx.metrics.parse_failures),
            1
        );
    }

    #[test]
    fn missing_nbbo_is_unknown() {
        let (engine, now) = engine_at(1_000);
        let trade = Trade::new(SYM, 5.1, 10, now);
        assert_eq!(engine.process_trade_at(&trade, now), TradeOutcome::UnknownSide);
        assert_eq!(EngineMetrics::get(&engine.ctx.metrics.unknown_side), 1);
        assert!(engine.ctx.book.read().is_empty());
    }

    #[test]
    fn stale_nbbo_is_unknown() {
        let (engine, _) = engine_at(0);
        engine
            .ctx
            .quotes
            .update(SYM, Quote::new(5.0, 5.1, Ts::from_millis(1_000)));
        // 10 s later with a 5 s staleness window
        let now = Ts::from_millis(11_000);
        let trade = Trade::new(SYM, 5.1, 10, now);
        assert_eq!(engine.process_trade_at(&trade, now), TradeOutcome::UnknownSide);
    }

    #[test]
    fn missing_spot_drops() {
        let ctx = EngineContext::new(EngineConfig::default());
        let engine = DealerEngine::new(ctx);
        let now = Ts::from_millis(1_000);
        engine.ctx.quotes.update(SYM, Quote::new(5.0, 5.1, now));

        let trade = Trade::new(SYM, 5.1, 10, now);
        assert_eq!(
            engine.process_trade_at(&trade, now),
            TradeOutcome::Dropped(DropReason::MissingSpot)
        );
        assert_eq!(EngineMetrics::get(&engine.ctx.metrics.missing_spot), 1);
    }

    #[test]
    fn buy_at_ask_applies_negative_dealer_gamma() {
        // 6 hours before the 2025-05-30 close
        let close_ms = NaiveDate::from_ymd_opt(2025, 5, 30)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis();
        #[allow(clippy::cast_sign_loss)]
        let now = Ts::from_millis((close_ms - 6 * 3600 * 1000) as u64);

        let (engine, _) = engine_at(0);
        engine.ctx.quotes.update(SYM, Quote::new(5.0, 5.1, now));

        let trade = Trade::new(SYM, 5.1, 10, now);
        let outcome = engine.process_trade_at(&trade, now);
        let TradeOutcome::Applied { side, gamma } = outcome else {
            panic!("expected applied, got {outcome:?}");
        };
        assert_eq!(side, TradeSide::Buy);
        assert!(gamma > 0.0);

        let aggregate = engine.ctx.book.read().aggregate_gamma();
        assert_abs_diff_eq!(aggregate, -10.0 * gamma * 100.0, epsilon = 1e-9);
    }

    #[test]
    fn expired_trade_moves_position_with_zero_gamma() {
        let close_ms = NaiveDate::from_ymd_opt(2025, 5, 30)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis();
        #[allow(clippy::cast_sign_loss)]
        let now = Ts::from_millis((close_ms + 60_000) as u64);

        let (engine, _) = engine_at(0);
        engine.ctx.quotes.update(SYM, Quote::new(5.0, 5.1, now));

        let trade = Trade::new(SYM, 5.1, 10, now);
        let outcome = engine.process_trade_at(&trade, now);
        assert_eq!(
            outcome,
            TradeOutcome::Applied {
                side: TradeSide::Buy,
                gamma: 0.0
            }
        );

        let symbol = OccSymbol::parse(SYM).unwrap();
        let entry = engine.ctx.book.read().entry(&BookKey::from(&symbol)).unwrap();
        assert_eq!(entry.net_customer_contracts, 10);
        assert_eq!(entry.cum_gamma_weighted, 0.0);
    }
}
