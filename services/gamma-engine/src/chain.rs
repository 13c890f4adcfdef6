//! Startup chain-snapshot loader
//!
//! An external collaborator drops periodic option-chain snapshots as CSV.
//! The engine reads the latest one once at startup to seed the symbol
//! universe and a fallback underlying spot; nothing else depends on
//! snapshot contents.

use chrono::NaiveDate;
use common::OptionRight;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Chain snapshot failures
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("snapshot has no rows: {0}")]
    Empty(String),
}

/// One chain row as produced by the snapshot collaborator
#[derive(Debug, Clone, Deserialize)]
pub struct ChainRow {
    /// OCC-style option symbol
    pub symbol: String,
    /// Strike price
    pub strike: f64,
    /// "C" or "P"
    pub right: String,
    /// Best bid at snapshot time
    pub bid: f64,
    /// Best ask at snapshot time
    pub ask: f64,
    /// Snapshot implied volatility
    pub iv: f64,
    /// Snapshot gamma
    pub gamma: f64,
    /// Underlying price at snapshot time
    pub under_px: f64,
    /// Expiry date
    pub expiry: NaiveDate,
}

impl ChainRow {
    /// Parsed right, `None` for unexpected codes
    #[must_use]
    pub fn option_right(&self) -> Option<OptionRight> {
        match self.right.trim() {
            "C" | "c" | "call" | "CALL" => Some(OptionRight::Call),
            "P" | "p" | "put" | "PUT" => Some(OptionRight::Put),
            _ => None,
        }
    }
}

/// The startup view of the chain
#[derive(Debug, Clone)]
pub struct ChainSnapshot {
    /// Distinct option symbols, in file order
    pub symbols: Vec<String>,
    /// Underlying spot recorded in the snapshot
    pub under_px: f64,
    /// All rows, for callers that need strikes or snapshot Greeks
    pub rows: Vec<ChainRow>,
}

/// Load the latest chain snapshot from a CSV file.
pub fn load_chain(path: &Path) -> Result<ChainSnapshot, ChainError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows: Vec<ChainRow> = Vec::new();
    for record in reader.deserialize() {
        let row: ChainRow = record?;
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(ChainError::Empty(path.display().to_string()));
    }

    let mut symbols: Vec<String> = Vec::with_capacity(rows.len());
    for row in &rows {
        if !symbols.contains(&row.symbol) {
            symbols.push(row.symbol.clone());
        }
    }

    let under_px = rows
        .iter()
        .rev()
        .map(|row| row.under_px)
        .find(|px| px.is_finite() && *px > 0.0)
        .unwrap_or(0.0);

    info!(
        "chain snapshot: {} rows, {} symbols, under_px {under_px}",
        rows.len(),
        symbols.len()
    );

    Ok(ChainSnapshot {
        symbols,
        under_px,
        rows,
    })
}
