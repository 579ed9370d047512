//! Memory-mapped append-only log.
//!
//! Layout: an 8-byte little-endian header holding the payload length,
//! followed by UTF-8 JSONL with `\n` terminators. The map starts at 1 MiB
//! and doubles on demand; truncation rewrites the header without shrinking
//! the file. Durability is the page cache's business: the module flushes
//! after appends and truncations but never fsyncs.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use tracing::warn;

use docx_session_core::SessionError;

const HEADER_LEN: u64 = 8;
const INITIAL_CAPACITY: u64 = 1024 * 1024;

pub struct MappedWal {
    file: File,
    map: MmapMut,
    /// Mapped file length in bytes, header included.
    capacity: u64,
    /// Payload bytes currently in use.
    data_len: u64,
    /// Payload-relative byte offset of each line start.
    offsets: Vec<u64>,
    path: PathBuf,
}

impl std::fmt::Debug for MappedWal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedWal")
            .field("path", &self.path)
            .field("entries", &self.offsets.len())
            .field("data_len", &self.data_len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl MappedWal {
    /// Open or create the log at `path`, scanning existing content to build
    /// the offsets table.
    pub fn open(path: &Path) -> Result<Self, SessionError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| SessionError::io(format!("failed to open WAL {}", path.display()), e))?;

        let file_len = file
            .metadata()
            .map_err(|e| SessionError::io(format!("failed to stat WAL {}", path.display()), e))?
            .len();
        let fresh = file_len < HEADER_LEN;
        let capacity = file_len.max(INITIAL_CAPACITY);
        if capacity != file_len {
            file.set_len(capacity).map_err(|e| {
                SessionError::io(format!("failed to size WAL {}", path.display()), e)
            })?;
        }

        let map = map_file(&file, path)?;
        let mut wal = Self {
            file,
            map,
            capacity,
            data_len: 0,
            offsets: Vec::new(),
            path: path.to_path_buf(),
        };

        if fresh {
            wal.write_header();
            wal.flush()?;
            return Ok(wal);
        }

        let mut header = [0u8; HEADER_LEN as usize];
        header.copy_from_slice(&wal.map[..HEADER_LEN as usize]);
        let claimed = u64::from_le_bytes(header);
        let available = capacity - HEADER_LEN;
        wal.data_len = if claimed > available {
            warn!(
                path = %path.display(),
                claimed, available, "WAL header exceeds file size, clamping"
            );
            available
        } else {
            claimed
        };
        wal.scan_offsets();
        Ok(wal)
    }

    /// Number of complete entries.
    pub fn len(&self) -> u64 {
        self.offsets.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// The line at 0-based `index` (logical position `index + 1`), without
    /// its terminator. `None` for out-of-range or non-UTF-8 lines.
    pub fn entry(&self, index: usize) -> Option<&str> {
        let start = *self.offsets.get(index)?;
        let end = self
            .offsets
            .get(index + 1)
            .copied()
            .unwrap_or(self.data_len);
        let bytes = &self.payload()[start as usize..end as usize];
        let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
        std::str::from_utf8(bytes).ok()
    }

    /// All entries in `(from_position, to_position]`, 1-based inclusive of
    /// `to_position`.
    pub fn range(&self, from_position: u64, to_position: u64) -> impl Iterator<Item = &str> {
        let lo = from_position as usize;
        let hi = (to_position as usize).min(self.offsets.len());
        (lo..hi).filter_map(|i| self.entry(i))
    }

    /// Append one line, returning the new logical position.
    pub fn append(&mut self, line: &str) -> Result<u64, SessionError> {
        if line.contains('\n') {
            return Err(SessionError::Internal(
                "WAL lines must not contain newlines".into(),
            ));
        }
        let bytes = line.as_bytes();
        let needed = HEADER_LEN + self.data_len + bytes.len() as u64 + 1;
        if needed > self.capacity {
            self.grow(needed)?;
        }

        let start = (HEADER_LEN + self.data_len) as usize;
        self.map[start..start + bytes.len()].copy_from_slice(bytes);
        self.map[start + bytes.len()] = b'\n';
        self.offsets.push(self.data_len);
        self.data_len += bytes.len() as u64 + 1;
        self.write_header();
        self.flush()?;
        Ok(self.offsets.len() as u64)
    }

    /// Keep only the first `keep` entries. The file is not shrunk.
    pub fn truncate(&mut self, keep: u64) -> Result<(), SessionError> {
        let keep = keep as usize;
        if keep >= self.offsets.len() {
            return Ok(());
        }
        self.data_len = self.offsets[keep];
        self.offsets.truncate(keep);
        self.write_header();
        self.flush()
    }

    fn payload(&self) -> &[u8] {
        &self.map[HEADER_LEN as usize..(HEADER_LEN + self.data_len) as usize]
    }

    fn scan_offsets(&mut self) {
        self.offsets.clear();
        let payload = &self.map[HEADER_LEN as usize..(HEADER_LEN + self.data_len) as usize];
        let mut line_start = 0u64;
        for (i, &b) in payload.iter().enumerate() {
            if b == b'\n' {
                self.offsets.push(line_start);
                line_start = i as u64 + 1;
            }
        }
        // A tail without a terminator is a torn write; drop it.
        if line_start < self.data_len {
            warn!(
                path = %self.path.display(),
                dropped = self.data_len - line_start,
                "WAL tail has no terminator, truncating to last complete entry"
            );
            self.data_len = line_start;
            self.write_header();
        }
    }

    fn grow(&mut self, needed: u64) -> Result<(), SessionError> {
        let mut new_capacity = self.capacity.max(INITIAL_CAPACITY);
        while new_capacity < needed {
            new_capacity *= 2;
        }
        self.flush()?;
        self.file.set_len(new_capacity).map_err(|e| {
            SessionError::io(format!("failed to grow WAL {}", self.path.display()), e)
        })?;
        self.map = map_file(&self.file, &self.path)?;
        self.capacity = new_capacity;
        Ok(())
    }

    fn write_header(&mut self) {
        self.map[..HEADER_LEN as usize].copy_from_slice(&self.data_len.to_le_bytes());
    }

    fn flush(&self) -> Result<(), SessionError> {
        self.map.flush().map_err(|e| {
            SessionError::io(format!("failed to flush WAL {}", self.path.display()), e)
        })
    }
}

#[allow(unsafe_code)]
fn map_file(file: &File, path: &Path) -> Result<MmapMut, SessionError> {
    // SAFETY: the file is exclusively owned by this process for the mapped
    // region's lifetime; cross-process mutation is serialized by the
    // per-session advisory lock.
    unsafe { MmapMut::map_mut(file) }
        .map_err(|e| SessionError::io(format!("failed to map WAL {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn appends_and_reads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s1.wal");
        let mut wal = MappedWal::open(&path).unwrap();
        assert!(wal.is_empty());

        assert_eq!(wal.append(r#"{"n":1}"#).unwrap(), 1);
        assert_eq!(wal.append(r#"{"n":2}"#).unwrap(), 2);
        assert_eq!(wal.len(), 2);
        assert_eq!(wal.entry(0), Some(r#"{"n":1}"#));
        assert_eq!(wal.entry(1), Some(r#"{"n":2}"#));
        assert_eq!(wal.entry(2), None);
    }

    #[test]
    fn reopen_recovers_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s1.wal");
        {
            let mut wal = MappedWal::open(&path).unwrap();
            for n in 1..=5 {
                wal.append(&format!(r#"{{"n":{n}}}"#)).unwrap();
            }
        }
        let wal = MappedWal::open(&path).unwrap();
        assert_eq!(wal.len(), 5);
        assert_eq!(wal.entry(4), Some(r#"{"n":5}"#));
    }

    #[test]
    fn truncate_keeps_prefix_without_shrinking_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s1.wal");
        let mut wal = MappedWal::open(&path).unwrap();
        for n in 1..=4 {
            wal.append(&format!(r#"{{"n":{n}}}"#)).unwrap();
        }
        let file_len = std::fs::metadata(&path).unwrap().len();

        wal.truncate(2).unwrap();
        assert_eq!(wal.len(), 2);
        assert_eq!(wal.entry(1), Some(r#"{"n":2}"#));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), file_len);

        // Appending after truncation overwrites the dropped tail.
        wal.append(r#"{"n":9}"#).unwrap();
        assert_eq!(wal.len(), 3);
        assert_eq!(wal.entry(2), Some(r#"{"n":9}"#));
    }

    #[test]
    fn truncate_to_zero_clears_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s1.wal");
        let mut wal = MappedWal::open(&path).unwrap();
        wal.append("x").unwrap();
        wal.truncate(0).unwrap();
        assert!(wal.is_empty());

        let reopened = MappedWal::open(&path).unwrap();
        assert!(reopened.is_empty());
    }

    #[test]
    fn grows_past_initial_capacity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s1.wal");
        let mut wal = MappedWal::open(&path).unwrap();
        let big = "x".repeat(300 * 1024);
        for _ in 0..5 {
            wal.append(&big).unwrap();
        }
        assert_eq!(wal.len(), 5);
        assert!(std::fs::metadata(&path).unwrap().len() > INITIAL_CAPACITY);
        assert_eq!(wal.entry(4).map(str::len), Some(big.len()));
    }

    #[test]
    fn torn_tail_is_dropped_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s1.wal");
        {
            let mut wal = MappedWal::open(&path).unwrap();
            wal.append(r#"{"n":1}"#).unwrap();
        }
        // Simulate a torn write: bump the header past a partial line.
        let mut bytes = std::fs::read(&path).unwrap();
        let data_len = u64::from_le_bytes(bytes[..8].try_into().unwrap());
        let partial = b"{\"n\":2";
        bytes[8 + data_len as usize..8 + data_len as usize + partial.len()]
            .copy_from_slice(partial);
        bytes[..8].copy_from_slice(&(data_len + partial.len() as u64).to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let wal = MappedWal::open(&path).unwrap();
        assert_eq!(wal.len(), 1);
        assert_eq!(wal.entry(0), Some(r#"{"n":1}"#));
    }

    #[test]
    fn range_is_half_open_on_the_left() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s1.wal");
        let mut wal = MappedWal::open(&path).unwrap();
        for n in 1..=5 {
            wal.append(&format!("e{n}")).unwrap();
        }
        // (2, 4] → entries at positions 3 and 4.
        let collected: Vec<&str> = wal.range(2, 4).collect();
        assert_eq!(collected, vec!["e3", "e4"]);
        // (0, len] → everything.
        assert_eq!(wal.range(0, wal.len()).count(), 5);
    }
}
