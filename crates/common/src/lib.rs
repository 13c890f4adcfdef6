//! Core types for the dealer-gamma engine

pub mod occ;
pub mod types;

pub use occ::{OccSymbol, SymbolError};
pub use types::{OptionRight, Quote, Trade, TradeSide, Ts};
