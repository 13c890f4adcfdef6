//! OCC-style option symbol grammar
//!
//! `<root><YY><MM><DD><C|P><strike*1000, 8 digits>`, optionally prefixed
//! with `O:`; e.g. `SPXW250530C05900000` = SPXW 2025-05-30 call 5900.000.

use crate::types::OptionRight;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Length of the fixed tail: YYMMDD + right + 8-digit strike
const TAIL_LEN: usize = 6 + 1 + 8;

/// Symbol parse failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("symbol too short: {0}")]
    TooShort(String),
    #[error("empty root in {0}")]
    EmptyRoot(String),
    #[error("invalid expiry date in {0}")]
    BadExpiry(String),
    #[error("invalid right '{1}' in {0}")]
    BadRight(String, char),
    #[error("invalid strike field in {0}")]
    BadStrike(String),
}

/// Parsed option contract identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OccSymbol {
    /// Underlying root, e.g. SPXW
    pub root: String,
    /// Expiry date
    pub expiry: NaiveDate,
    /// Call or put
    pub right: OptionRight,
    /// Strike in thousandths (5900.0 -> 5_900_000)
    pub strike_mils: i64,
}

impl OccSymbol {
    /// Parse a wire symbol, accepting an optional `O:` prefix.
    ///
    /// The identity is derived from the symbol text alone; no side channel
    /// is consulted.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let sym = raw.strip_prefix("O:").unwrap_or(raw);

        if sym.len() <= TAIL_LEN {
            return Err(SymbolError::TooShort(raw.to_string()));
        }
        if !sym.is_ascii() {
            return Err(SymbolError::TooShort(raw.to_string()));
        }

        let (root, tail) = sym.split_at(sym.len() - TAIL_LEN);
        if root.is_empty() || !root.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(SymbolError::EmptyRoot(raw.to_string()));
        }

        let yy: i32 = tail[0..2]
            .parse()
            .map_err(|_| SymbolError::BadExpiry(raw.to_string()))?;
        let mm: u32 = tail[2..4]
            .parse()
            .map_err(|_| SymbolError::BadExpiry(raw.to_string()))?;
        let dd: u32 = tail[4..6]
            .parse()
            .map_err(|_| SymbolError::BadExpiry(raw.to_string()))?;
        let expiry = NaiveDate::from_ymd_opt(2000 + yy, mm, dd)
            .ok_or_else(|| SymbolError::BadExpiry(raw.to_string()))?;

        let right_ch = tail.as_bytes()[6] as char;
        let right = match right_ch {
            'C' => OptionRight::Call,
            'P' => OptionRight::Put,
            other => return Err(SymbolError::BadRight(raw.to_string(), other)),
        };

        let strike_field = &tail[7..];
        if !strike_field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SymbolError::BadStrike(raw.to_string()));
        }
        let strike_mils: i64 = strike_field
            .parse()
            .map_err(|_| SymbolError::BadStrike(raw.to_string()))?;
        if strike_mils == 0 {
            return Err(SymbolError::BadStrike(raw.to_string()));
        }

        Ok(Self {
            root: root.to_string(),
            expiry,
            right,
            strike_mils,
        })
    }

    /// Strike as a price
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn strike(&self) -> f64 {
        self.strike_mils as f64 / 1000.0
    }
}

impl fmt::Display for OccSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{:08}",
            self.root,
            self.expiry.format("%y%m%d"),
            self.right.code(),
            self.strike_mils
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call() -> Result<(), SymbolError> {
        let sym = OccSymbol::parse("SPXW250530C05900000")?;
        assert_eq!(sym.root, "SPXW");
        assert_eq!(sym.expiry, NaiveDate::from_ymd_opt(2025, 5, 30).unwrap());
        assert_eq!(sym.right, OptionRight::Call);
        assert_eq!(sym.strike_mils, 5_900_000);
        assert!((sym.strike() - 5900.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn parses_put_with_prefix() -> Result<(), SymbolError> {
        let sym = OccSymbol::parse("O:SPXW250530P05800000")?;
        assert_eq!(sym.right, OptionRight::Put);
        assert_eq!(sym.strike_mils, 5_800_000);
        Ok(())
    }

    #[test]
    fn fractional_strike() -> Result<(), SymbolError> {
        let sym = OccSymbol::parse("SPXW250530C05902500")?;
        assert!((sym.strike() - 5902.5).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn roundtrips_display() -> Result<(), SymbolError> {
        let raw = "SPXW250530C05900000";
        let sym = OccSymbol::parse(raw)?;
        assert_eq!(sym.to_string(), raw);
        Ok(())
    }

    #[test]
    fn rejects_bad_inputs() {
        assert!(matches!(
            OccSymbol::parse("C05900000"),
            Err(SymbolError::TooShort(_))
        ));
        assert!(matches!(
            OccSymbol::parse("SPXW251340C05900000"),
            Err(SymbolError::BadExpiry(_))
        ));
        assert!(matches!(
            OccSymbol::parse("SPXW250530X05900000"),
            Err(SymbolError::BadRight(_, 'X'))
        ));
        assert!(matches!(
            OccSymbol::parse("SPXW250530C0590000O"),
            Err(SymbolError::BadStrike(_))
        ));
        assert!(matches!(
            OccSymbol::parse("SPXW250530C00000000"),
            Err(SymbolError::BadStrike(_))
        ));
    }
}
