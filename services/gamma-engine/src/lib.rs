//! Real-time dealer-gamma engine for 0DTE index options
//!
//! Consumes a live stream of option trades and NBBO updates, classifies
//! each trade as customer buy or sell against the prevailing quote,
//! revalues Black-Scholes gamma against the current underlying, and
//! maintains a per-strike book of the dealer's inferred positioning.
//! Aggregate gamma is snapshotted on a fixed cadence into an append-only
//! store.

pub mod book;
pub mod chain;
pub mod config;
pub mod context;
pub mod engine;
pub mod greeks;
pub mod ingest;
pub mod metrics;
pub mod quotes;
pub mod surface;

pub use book::{BookEntry, BookKey, StrikeBook, StrikeGamma};
pub use chain::{ChainSnapshot, load_chain};
pub use config::EngineConfig;
pub use context::EngineContext;
pub use engine::{DealerEngine, DropReason, TradeOutcome, classify, time_to_expiry_years};
pub use greeks::{BlackScholes, Greeks};
pub use metrics::EngineMetrics;
pub use quotes::{QuoteCache, QuoteUpdate};
pub use surface::{IvSource, SurfaceCache, SurfaceConfig};
