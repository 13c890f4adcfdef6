//! Append-only storage for intraday dealer-gamma snapshots

pub mod segment;
pub mod store;

pub use segment::{Segment, SegmentReader};
pub use store::{GammaSink, GammaSnapshot, StoreError, WalGammaStore};
