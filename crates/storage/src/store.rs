//! Intraday gamma store: append-only `(ts, dealer_gamma)` rows
//!
//! Rows are bincode-framed into CRC-checked segments (one directory per
//! session). Appends are idempotent on `ts` and monotonic per writer;
//! replay yields every intact row in append order.

use common::Ts;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::segment::{Segment, SegmentReader};

/// Default maximum segment size
const DEFAULT_SEGMENT_SIZE: u64 = 16 * 1024 * 1024;

/// Storage failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("encode: {0}")]
    Encode(#[from] bincode::Error),
    #[error("bad segment: {0}")]
    BadSegment(String),
    #[error("segment full")]
    SegmentFull,
}

/// One aggregate dealer-gamma observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GammaSnapshot {
    /// Observation timestamp
    pub ts: Ts,
    /// Book aggregate dealer gamma at that instant
    pub dealer_gamma: f64,
}

impl GammaSnapshot {
    /// Row in the store's `(ts DOUBLE, dealer_gamma DOUBLE)` shape
    #[must_use]
    pub fn as_row(&self) -> (f64, f64) {
        (self.ts.as_secs_f64(), self.dealer_gamma)
    }
}

/// Destination for periodic gamma snapshots.
///
/// The engine owns a sink handle; the sink holds no back-reference.
pub trait GammaSink: Send {
    /// Append a snapshot. Duplicate timestamps are a no-op.
    fn append(&mut self, snapshot: &GammaSnapshot) -> Result<(), StoreError>;

    /// Flush buffered rows to durable storage.
    fn flush(&mut self) -> Result<(), StoreError>;
}

/// Segment-backed gamma store
pub struct WalGammaStore {
    dir: PathBuf,
    current: Segment,
    segment_index: u64,
    segment_max_size: u64,
    last_ts: Option<Ts>,
    rows_written: u64,
}

impl WalGammaStore {
    /// Open a store in `dir`, continuing after any existing segments.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        Self::open_with_segment_size(dir, DEFAULT_SEGMENT_SIZE)
    }

    /// Open with an explicit segment size cap.
    pub fn open_with_segment_size(dir: &Path, segment_max_size: u64) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;

        let existing = Self::segment_paths(dir)?;
        let last_ts = match existing.last() {
            Some(path) => Self::last_row_ts(path)?,
            None => None,
        };
        let segment_index = existing.len() as u64;

        let current = Segment::create(&Self::segment_path(dir, segment_index), segment_max_size)?;
        info!(
            "gamma store open at {} (segment {}, resume ts {:?})",
            dir.display(),
            segment_index,
            last_ts
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            current,
            segment_index,
            segment_max_size,
            last_ts,
            rows_written: 0,
        })
    }

    /// Replay every intact row across all segments in `dir`, in order.
    pub fn replay(dir: &Path) -> Result<Vec<GammaSnapshot>, StoreError> {
        let mut rows = Vec::new();
        for path in Self::segment_paths(dir)? {
            let mut reader = Segment::open(&path)?;
            while let Some(data) = reader.read_next()? {
                let snapshot: GammaSnapshot = bincode::deserialize(&data)?;
                rows.push(snapshot);
            }
        }
        Ok(rows)
    }

    /// Rows appended by this writer
    #[must_use]
    pub const fn rows_written(&self) -> u64 {
        self.rows_written
    }

    fn segment_path(dir: &Path, index: u64) -> PathBuf {
        dir.join(format!("gamma-{index:05}.seg"))
    }

    fn segment_paths(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension().is_some_and(|ext| ext == "seg")
                    && path
                        .file_stem()
                        .and_then(|stem| stem.to_str())
                        .is_some_and(|stem| stem.starts_with("gamma-"))
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn last_row_ts(path: &Path) -> Result<Option<Ts>, StoreError> {
        let mut reader: SegmentReader = Segment::open(path)?;
        let mut last = None;
        while let Some(data) = reader.read_next()? {
            let snapshot: GammaSnapshot = bincode::deserialize(&data)?;
            last = Some(snapshot.ts);
        }
        Ok(last)
    }

    fn rotate(&mut self) -> Result<(), StoreError> {
        self.current.flush()?;
        self.segment_index += 1;
        self.current = Segment::create(
            &Self::segment_path(&self.dir, self.segment_index),
            self.segment_max_size,
        )?;
        debug!("rotated to segment {}", self.segment_index);
        Ok(())
    }
}

impl GammaSink for WalGammaStore {
    fn append(&mut self, snapshot: &GammaSnapshot) -> Result<(), StoreError> {
        // Idempotent on ts; out-of-order stamps are skipped, not persisted
        if let Some(last) = self.last_ts {
            if snapshot.ts == last {
                return Ok(());
            }
            if snapshot.ts < last {
                warn!(
                    "non-monotonic snapshot ts {} < {}, skipping",
                    snapshot.ts, last
                );
                return Ok(());
            }
        }

        let data = bincode::serialize(snapshot)?;
        if self.current.is_full(data.len()) {
            self.rotate()?;
        }
        self.current.append(&data)?;
        self.last_ts = Some(snapshot.ts);
        self.rows_written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.current.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snap(ts_ms: u64, gamma: f64) -> GammaSnapshot {
        GammaSnapshot {
            ts: Ts::from_millis(ts_ms),
            dealer_gamma: gamma,
        }
    }

    #[test]
    fn append_and_replay() -> Result<(), StoreError> {
        let dir = TempDir::new()?;

        {
            let mut store = WalGammaStore::open(dir.path())?;
            store.append(&snap(1_000, -5.47))?;
            store.append(&snap(2_000, -3.2))?;
            store.append(&snap(3_000, 2.265))?;
            store.flush()?;
            assert_eq!(store.rows_written(), 3);
        }

        let rows = WalGammaStore::replay(dir.path())?;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], snap(1_000, -5.47));
        assert_eq!(rows[2], snap(3_000, 2.265));

        let (ts, gamma) = rows[0].as_row();
        assert!((ts - 1.0).abs() < 1e-12);
        assert!((gamma + 5.47).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn duplicate_and_stale_ts_are_skipped() -> Result<(), StoreError> {
        let dir = TempDir::new()?;
        let mut store = WalGammaStore::open(dir.path())?;

        store.append(&snap(2_000, 1.0))?;
        store.append(&snap(2_000, 9.0))?; // duplicate ts
        store.append(&snap(1_000, 9.0))?; // older ts
        store.append(&snap(3_000, 2.0))?;
        store.flush()?;

        let rows = WalGammaStore::replay(dir.path())?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ts, Ts::from_millis(2_000));
        assert_eq!(rows[1].ts, Ts::from_millis(3_000));
        Ok(())
    }

    #[test]
    fn reopen_resumes_monotonicity() -> Result<(), StoreError> {
        let dir = TempDir::new()?;

        {
            let mut store = WalGammaStore::open(dir.path())?;
            store.append(&snap(5_000, 1.5))?;
            store.flush()?;
        }

        {
            let mut store = WalGammaStore::open(dir.path())?;
            store.append(&snap(4_000, 9.0))?; // behind prior session, skipped
            store.append(&snap(6_000, 2.5))?;
            store.flush()?;
        }

        let rows = WalGammaStore::replay(dir.path())?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ts, Ts::from_millis(5_000));
        assert_eq!(rows[1].ts, Ts::from_millis(6_000));
        Ok(())
    }

    #[test]
    fn rotation_preserves_replay_order() -> Result<(), StoreError> {
        let dir = TempDir::new()?;
        // Tiny cap so a handful of rows spans several segments
        let mut store = WalGammaStore::open_with_segment_size(dir.path(), 96)?;

        for i in 0..10u64 {
            store.append(&snap(1_000 + i * 1_000, i as f64))?;
        }
        store.flush()?;

        let rows = WalGammaStore::replay(dir.path())?;
        assert_eq!(rows.len(), 10);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.ts, Ts::from_millis(1_000 + i as u64 * 1_000));
        }
        Ok(())
    }
}
