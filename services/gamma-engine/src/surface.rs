//! Memoized implied-volatility surface
//!
//! IV is cached by (symbol, underlying-price bucket, time-to-expiry
//! bucket) so neighbouring trades share a solve. Entries expire on a TTL;
//! solver failures fall back to a moneyness-sloped estimate stored with a
//! shorter TTL so a later clean solve replaces it.

use crate::greeks::BlackScholes;
use common::{OptionRight, Ts};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use tracing::debug;

/// IV values outside this band are failed computations
const IV_VALID_MIN: f64 = 0.0;
const IV_VALID_MAX: f64 = 5.0;

/// Surface cache tuning
#[derive(Debug, Clone)]
pub struct SurfaceConfig {
    /// TTL for solver-produced entries, milliseconds
    pub ttl_ms: u64,
    /// TTL for fallback entries, milliseconds
    pub fallback_ttl_ms: u64,
    /// Maximum resident entries before LRU eviction
    pub capacity: usize,
    /// Underlying price bucket width in points
    pub under_bucket: f64,
    /// Time-to-expiry bucket width in seconds
    pub ttm_bucket_s: u64,
    /// Fallback anchor volatility
    pub base_iv: f64,
    /// Fallback slope per unit |ln(K/S)|
    pub slope: f64,
    /// Risk-free rate fed to the solver
    pub risk_free_rate: f64,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 30_000,
            fallback_ttl_ms: 10_000,
            capacity: 50_000,
            under_bucket: 1.0,
            ttm_bucket_s: 60,
            base_iv: 0.2,
            slope: 0.5,
            risk_free_rate: 0.0,
        }
    }
}

/// Where a sigma came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IvSource {
    /// Fresh cache hit
    Cache,
    /// Solved from the market mid this call
    Solver,
    /// Moneyness fallback after a solver failure
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SurfaceKey {
    symbol: String,
    under_bucket: i64,
    ttm_bucket: u64,
}

#[derive(Debug, Clone, Copy)]
struct SurfaceEntry {
    iv: f64,
    computed_at: Ts,
    fallback: bool,
    access_seq: u64,
}

#[derive(Default)]
struct SurfaceInner {
    entries: FxHashMap<SurfaceKey, SurfaceEntry>,
    // access_seq -> key, oldest first; sweeps drive LRU eviction
    order: BTreeMap<u64, SurfaceKey>,
    next_seq: u64,
}

/// Bounded, TTL'd IV cache
pub struct SurfaceCache {
    config: SurfaceConfig,
    inner: Mutex<SurfaceInner>,
}

impl SurfaceCache {
    /// Create a cache with the given tuning
    #[must_use]
    pub fn new(config: SurfaceConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(SurfaceInner::default()),
        }
    }

    /// Sigma for a contract given the current spot, time to expiry in
    /// years, and the option's market mid. Always yields a usable sigma;
    /// the source tells the caller whether the solver failed.
    pub fn iv_for(
        &self,
        symbol: &str,
        right: OptionRight,
        s: f64,
        k: f64,
        t_years: f64,
        mid: f64,
        now: Ts,
    ) -> (f64, IvSource) {
        let key = self.key_for(symbol, s, t_years);

        if let Some(iv) = self.lookup(&key, now) {
            return (iv, IvSource::Cache);
        }

        let solved = BlackScholes::implied_vol(
            right,
            mid,
            s,
            k,
            t_years,
            self.config.risk_free_rate,
            0.0,
        )
        .filter(|sigma| *sigma > IV_VALID_MIN && *sigma < IV_VALID_MAX);

        match solved {
            Some(sigma) => {
                self.insert(key, sigma, now, false);
                (sigma, IvSource::Solver)
            }
            None => {
                let sigma = self.moneyness_fallback(s, k);
                debug!(symbol, sigma, "iv solver failed, using moneyness fallback");
                self.insert(key, sigma, now, true);
                (sigma, IvSource::Fallback)
            }
        }
    }

    /// Resident entry count
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True when nothing is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// sigma = clamp(base + slope * |ln(K/S)|, 0.05, 3.0)
    #[must_use]
    pub fn moneyness_fallback(&self, s: f64, k: f64) -> f64 {
        let log_moneyness = if s > 0.0 && k > 0.0 {
            (k / s).ln().abs()
        } else {
            0.0
        };
        (self.config.base_iv + self.config.slope * log_moneyness).clamp(0.05, 3.0)
    }

    fn key_for(&self, symbol: &str, s: f64, t_years: f64) -> SurfaceKey {
        #[allow(clippy::cast_possible_truncation)]
        let under_bucket = (s / self.config.under_bucket).floor() as i64;
        let ttm_secs = (t_years * 365.0 * 24.0 * 3600.0).max(0.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let ttm_bucket = (ttm_secs as u64) / self.config.ttm_bucket_s.max(1);
        SurfaceKey {
            symbol: symbol.to_string(),
            under_bucket,
            ttm_bucket,
        }
    }

    fn ttl_for(&self, entry: &SurfaceEntry) -> u64 {
        if entry.fallback {
            self.config.fallback_ttl_ms
        } else {
            self.config.ttl_ms
        }
    }

    fn lookup(&self, key: &SurfaceKey, now: Ts) -> Option<f64> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get(key).copied()?;

        if entry.computed_at.age_millis(now) > self.ttl_for(&entry) {
            inner.order.remove(&entry.access_seq);
            inner.entries.remove(key);
            return None;
        }

        // Refresh LRU position
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.remove(&entry.access_seq);
        inner.order.insert(seq, key.clone());
        if let Some(stored) = inner.entries.get_mut(key) {
            stored.access_seq = seq;
        }
        Some(entry.iv)
    }

    fn insert(&self, key: SurfaceKey, iv: f64, now: Ts, fallback: bool) {
        let mut inner = self.inner.lock();

        if let Some(old) = inner.entries.get(&key).copied() {
            inner.order.remove(&old.access_seq);
        } else if inner.entries.len() >= self.config.capacity {
            // Evict the least recently touched entry
            if let Some((_, victim)) = inner.order.pop_first() {
                inner.entries.remove(&victim);
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.clone());
        inner.entries.insert(
            key,
            SurfaceEntry {
                iv,
                computed_at: now,
                fallback,
                access_seq: seq,
            },
        );
    }
}
