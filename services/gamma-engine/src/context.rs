//! Shared session state
//!
//! One `EngineContext` per session, built in `main` and handed to every
//! task constructor. Channels are deliberately not part of the context;
//! they are created inside the supervisor scope.

use crate::book::StrikeBook;
use crate::config::EngineConfig;
use crate::metrics::EngineMetrics;
use crate::quotes::QuoteCache;
use crate::surface::{SurfaceCache, SurfaceConfig};
use common::Ts;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Shared state for the ingest, engine and snapshot tasks
pub struct EngineContext {
    /// Immutable session configuration
    pub config: EngineConfig,
    /// Latest NBBO per symbol plus the index quote
    pub quotes: QuoteCache,
    /// Memoized implied-vol surface
    pub surface: SurfaceCache,
    /// Per-strike dealer book; written by the engine task only
    pub book: RwLock<StrikeBook>,
    /// Session counters
    pub metrics: EngineMetrics,
    /// Set by a blocked ingest send; tells the engine to shed its backlog
    pub shed_backlog: AtomicBool,
    seed_spot: Mutex<Option<f64>>,
}

impl EngineContext {
    /// Build the shared state from configuration
    #[must_use]
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let surface = SurfaceCache::new(SurfaceConfig {
            ttl_ms: config.surface_ttl_s * 1_000,
            fallback_ttl_ms: config.surface_fallback_ttl_s * 1_000,
            capacity: config.surface_capacity,
            under_bucket: config.surface_under_bucket,
            ttm_bucket_s: config.surface_ttm_bucket_s,
            base_iv: config.fallback_base_iv,
            slope: config.fallback_iv_slope,
            risk_free_rate: config.risk_free_rate,
        });
        let quotes = QuoteCache::new(config.quote_stale_ms());
        let book = RwLock::new(StrikeBook::new(config.contract_multiplier));

        Arc::new(Self {
            config,
            quotes,
            surface,
            book,
            metrics: EngineMetrics::default(),
            shed_backlog: AtomicBool::new(false),
            seed_spot: Mutex::new(None),
        })
    }

    /// Record the fallback spot observed in the startup chain snapshot
    pub fn set_seed_spot(&self, spot: f64) {
        *self.seed_spot.lock() = Some(spot);
    }

    /// Current underlying spot: the live index quote when present, else
    /// the chain-snapshot seed.
    #[must_use]
    pub fn spot(&self, _now: Ts) -> Option<f64> {
        let live = self
            .quotes
            .get(&self.config.index_symbol)
            .filter(|quote| quote.is_usable())
            .map(|quote| quote.mid());
        live.or_else(|| *self.seed_spot.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Quote;

    #[test]
    fn spot_prefers_live_index_quote() {
        let ctx = EngineContext::new(EngineConfig::default());
        assert_eq!(ctx.spot(Ts::from_millis(0)), None);

        ctx.set_seed_spot(5895.0);
        assert_eq!(ctx.spot(Ts::from_millis(0)), Some(5895.0));

        ctx.quotes.update(
            "I:SPX",
            Quote::new(5899.5, 5900.5, Ts::from_millis(1_000)),
        );
        assert_eq!(ctx.spot(Ts::from_millis(1_000)), Some(5900.0));
    }
}
