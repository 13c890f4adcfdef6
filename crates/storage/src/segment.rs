//! Append-only segment files with CRC32-framed entries

use crate::store::StoreError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

/// Size of segment header in bytes
const SEGMENT_HEADER_SIZE: u64 = 8;

/// Magic number for gamma segment files
const SEGMENT_MAGIC: u32 = 0x4447_5353; // "DGSS"

/// Version of segment format
const SEGMENT_VERSION: u32 = 1;

/// A single append-only segment file.
///
/// Entries are framed as `[length: u32][crc32: u32][payload]`. The header
/// carries no entry count; readers scan to end-of-file, so a segment left
/// open by a crashed writer replays up to its last intact frame.
pub struct Segment {
    path: PathBuf,
    file: BufWriter<File>,
    size: u64,
    max_size: u64,
    entries: u64,
}

impl Segment {
    /// Create a new segment file, truncating any previous content.
    pub fn create(path: &Path, max_size: u64) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);
        writer.write_u32::<LittleEndian>(SEGMENT_MAGIC)?;
        writer.write_u32::<LittleEndian>(SEGMENT_VERSION)?;
        writer.flush()?;

        Ok(Self {
            path: path.to_path_buf(),
            file: writer,
            size: SEGMENT_HEADER_SIZE,
            max_size,
            entries: 0,
        })
    }

    /// Open an existing segment for replay.
    pub fn open(path: &Path) -> Result<SegmentReader, StoreError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != SEGMENT_MAGIC {
            return Err(StoreError::BadSegment(format!(
                "invalid magic {magic:#x} in {}",
                path.display()
            )));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != SEGMENT_VERSION {
            return Err(StoreError::BadSegment(format!(
                "unsupported version {version} in {}",
                path.display()
            )));
        }

        Ok(SegmentReader {
            path: path.to_path_buf(),
            reader,
            entries_read: 0,
        })
    }

    /// Append a framed entry.
    pub fn append(&mut self, data: &[u8]) -> Result<(), StoreError> {
        if self.is_full(data.len()) {
            return Err(StoreError::SegmentFull);
        }

        let mut hasher = Hasher::new();
        hasher.update(data);
        let crc = hasher.finalize();

        let len = u32::try_from(data.len())
            .map_err(|_| StoreError::BadSegment("entry too large".to_string()))?;
        self.file.write_u32::<LittleEndian>(len)?;
        self.file.write_u32::<LittleEndian>(crc)?;
        self.file.write_all(data)?;

        self.size += 8 + u64::from(len);
        self.entries += 1;
        trace!("appended entry {} ({} bytes)", self.entries, data.len());
        Ok(())
    }

    /// Whether the next entry of the given size would overflow the segment
    #[must_use]
    pub const fn is_full(&self, next_entry_size: usize) -> bool {
        self.size
            .saturating_add(8)
            .saturating_add(next_entry_size as u64)
            > self.max_size
    }

    /// Flush buffered frames to disk.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.file.flush()?;
        self.file.get_mut().sync_all()?;
        Ok(())
    }

    /// Entries appended so far
    #[must_use]
    pub const fn entry_count(&self) -> u64 {
        self.entries
    }

    /// Current size in bytes including header
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Segment file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Replay reader for a segment
pub struct SegmentReader {
    path: PathBuf,
    reader: BufReader<File>,
    entries_read: u64,
}

impl SegmentReader {
    /// Read the next intact entry.
    ///
    /// A truncated or CRC-corrupt tail ends replay with `Ok(None)` after a
    /// warning; the rows read so far remain valid.
    pub fn read_next(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
        let length = match self.reader.read_u32::<LittleEndian>() {
            Ok(len) => len as usize,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let expected_crc = match self.reader.read_u32::<LittleEndian>() {
            Ok(crc) => crc,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                warn!("truncated frame header in {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut data = vec![0u8; length];
        if let Err(e) = self.reader.read_exact(&mut data) {
            if e.kind() == ErrorKind::UnexpectedEof {
                warn!(
                    "truncated entry after {} rows in {}",
                    self.entries_read,
                    self.path.display()
                );
                return Ok(None);
            }
            return Err(e.into());
        }

        let mut hasher = Hasher::new();
        hasher.update(&data);
        if hasher.finalize() != expected_crc {
            warn!(
                "crc mismatch after {} rows in {}, stopping replay",
                self.entries_read,
                self.path.display()
            );
            return Ok(None);
        }

        self.entries_read += 1;
        Ok(Some(data))
    }

    /// Entries successfully read so far
    #[must_use]
    pub const fn entries_read(&self) -> u64 {
        self.entries_read
    }

    /// Rewind to the first entry.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        self.reader.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE))?;
        self.entries_read = 0;
        Ok(())
    }
}
