//! Durable manifest of flush results.
//!
//! The manifest is a WAL for database metadata instead of user data: an
//! append-only log of [`VersionEdit`] records establishing which flushed
//! tables exist. The write buffer commits flush results through
//! [`ManifestLog::log_and_apply`], and on startup the log is replayed to
//! reconstruct the table state.
//!
//! # File Format
//!
//! ```text
//! +------------------+
//! | Header (64 bytes)|
//! +------------------+
//! | VersionEdit 1    |
//! +------------------+
//! | VersionEdit 2    |
//! +------------------+
//! | ...              |
//! +------------------+
//! ```
//!
//! Each record is framed as:
//!
//! ```text
//! +-----------+------------------+-----------+
//! |length:u32 | serialized_edit  |crc32:u32  |
//! +-----------+------------------+-----------+
//! ```
//!
//! Big-endian encoding throughout; CRC-32/ISCSI checksums detect torn or
//! corrupted records; every commit is fsynced before it is applied to the
//! in-memory state. A `Snapshot` edit is written every
//! `snapshot_interval` edits so replay cost stays bounded.

pub mod edit;
pub mod header;
pub mod meta;

pub use edit::VersionEdit;
pub use meta::TableMeta;

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::error::{Error, Result};
use header::{ManifestHeader, HEADER_SIZE};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// The commit contract the write buffer needs from the manifest.
pub trait ManifestLog: Send + Sync {
    /// Durably appends `edits` in order and applies them. May release the
    /// DB mutex around file I/O; the mutex is held again on return.
    fn log_and_apply(&self, edits: Vec<VersionEdit>, guard: &mut MutexGuard<'_, ()>)
        -> Result<()>;
}

/// The durable set of committed flush results.
///
/// Appends go through an append-mode handle so the fixed header at offset
/// zero can be rewritten independently.
pub struct VersionSet {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    header_file: Mutex<File>,
    header: RwLock<ManifestHeader>,
    tables: RwLock<Vec<TableMeta>>,
    edit_count: AtomicU32,
}

impl VersionSet {
    /// Opens or creates the manifest at `path`, replaying any existing log.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut header_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        let header = if header_file.metadata()?.len() == 0 {
            let h = ManifestHeader::new();
            header_file.write_all(&h.encode())?;
            header_file.sync_all()?;
            h
        } else {
            let mut buf = [0u8; HEADER_SIZE];
            header_file.read_exact(&mut buf)?;
            ManifestHeader::decode(&buf)?
        };

        let writer = BufWriter::new(OpenOptions::new().append(true).open(&path)?);

        let set = Self {
            path,
            writer: Mutex::new(writer),
            header_file: Mutex::new(header_file),
            header: RwLock::new(header),
            tables: RwLock::new(Vec::new()),
            edit_count: AtomicU32::new(0),
        };

        let state = set.replay()?;
        {
            let mut header = set.header.write();
            header.current_seq = header.current_seq.max(state.last_seq);
            header.next_file_number = header.next_file_number.max(state.next_file_number);
        }
        *set.tables.write() = state.tables;

        Ok(set)
    }

    fn append(&self, edit: &VersionEdit) -> Result<()> {
        let edit_bytes = edit.encode();
        let checksum = CRC32.checksum(&edit_bytes);

        let mut writer = self.writer.lock();
        writer.write_u32::<BigEndian>(edit_bytes.len() as u32)?;
        writer.write_all(&edit_bytes)?;
        writer.write_u32::<BigEndian>(checksum)?;
        drop(writer);

        let seq = edit.seq();
        let mut header = self.header.write();
        header.current_seq = header.current_seq.max(seq);
        drop(header);

        self.edit_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Flushes buffered edits and the header to disk.
    pub fn sync(&self) -> Result<()> {
        self.writer.lock().flush()?;

        let header_bytes = self.header.read().encode();
        let mut file = self.header_file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header_bytes)?;
        file.sync_all()?;

        Ok(())
    }

    pub fn iter(&self) -> Result<ManifestIterator> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        Ok(ManifestIterator { reader })
    }

    /// Allocates the next file number for a flush artifact.
    pub fn new_file_number(&self) -> u64 {
        let mut header = self.header.write();
        let id = header.next_file_number;
        header.next_file_number += 1;
        id
    }

    /// Allocates the next manifest sequence number.
    pub fn next_seq(&self) -> u64 {
        let mut header = self.header.write();
        let seq = header.current_seq;
        header.current_seq += 1;
        seq
    }

    /// Committed tables, in commit order.
    pub fn tables(&self) -> Vec<TableMeta> {
        self.tables.read().clone()
    }

    pub fn should_snapshot(&self) -> bool {
        self.edit_count.load(Ordering::SeqCst) >= self.header.read().snapshot_interval
    }

    /// Appends a full-state checkpoint so replay cost stays bounded.
    pub fn write_snapshot(&self) -> Result<()> {
        let edit = VersionEdit::Snapshot {
            seq: self.next_seq(),
            tables: self.tables(),
            next_file_number: self.header.read().next_file_number,
        };
        self.append(&edit)?;
        self.sync()?;
        self.edit_count.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Folds the on-disk log into the table state it describes.
    pub fn replay(&self) -> Result<ManifestState> {
        let mut state = ManifestState::new();

        for edit in self.iter()? {
            match edit? {
                VersionEdit::Flush {
                    seq,
                    log_seq: _,
                    table,
                } => {
                    let table_id = table.id;
                    state.tables.push(table);
                    state.next_file_number = state.next_file_number.max(table_id + 1);
                    state.last_seq = state.last_seq.max(seq);
                }

                VersionEdit::Snapshot {
                    seq,
                    tables,
                    next_file_number,
                } => {
                    state.tables = tables;
                    state.next_file_number = state.next_file_number.max(next_file_number);
                    state.last_seq = state.last_seq.max(seq);
                }
            }
        }

        Ok(state)
    }
}

impl ManifestLog for VersionSet {
    fn log_and_apply(
        &self,
        edits: Vec<VersionEdit>,
        guard: &mut MutexGuard<'_, ()>,
    ) -> Result<()> {
        if edits.is_empty() {
            return Ok(());
        }

        // Durable I/O happens with the DB mutex released.
        MutexGuard::unlocked(guard, || {
            for edit in &edits {
                self.append(edit)?;
            }
            self.sync()
        })?;

        let mut tables = self.tables.write();
        for edit in edits {
            match edit {
                VersionEdit::Flush { table, .. } => tables.push(table),
                VersionEdit::Snapshot {
                    tables: snapshot, ..
                } => *tables = snapshot,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ManifestState {
    pub tables: Vec<TableMeta>,
    pub next_file_number: u64,
    pub last_seq: u64,
}

impl Default for ManifestState {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestState {
    pub fn new() -> Self {
        Self {
            tables: Vec::new(),
            next_file_number: 0,
            last_seq: 0,
        }
    }
}

pub struct ManifestIterator {
    reader: BufReader<File>,
}

impl Iterator for ManifestIterator {
    type Item = Result<VersionEdit>;

    fn next(&mut self) -> Option<Self::Item> {
        let edit_len = match self.reader.read_u32::<BigEndian>() {
            Ok(len) => len as usize,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return None,
            Err(e) => return Some(Err(e.into())),
        };

        let mut edit_bytes = vec![0u8; edit_len];
        if let Err(e) = self.reader.read_exact(&mut edit_bytes) {
            return Some(Err(e.into()));
        }

        let stored_checksum = match self.reader.read_u32::<BigEndian>() {
            Ok(checksum) => checksum,
            Err(e) => return Some(Err(e.into())),
        };

        let computed_checksum = CRC32.checksum(&edit_bytes);
        if computed_checksum != stored_checksum {
            return Some(Err(Error::InvalidData("checksum mismatch".to_string())));
        }

        Some(VersionEdit::decode(&edit_bytes))
    }
}
