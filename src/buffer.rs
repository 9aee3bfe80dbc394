//! Write buffer façade.
//!
//! Ties the pieces together the way an engine consumes them: one active
//! memtable taking writes, the immutable memtable list holding sealed
//! ones, the version set recording what got flushed, and the engine's
//! table writer doing artifact I/O.

use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::WriteBufferConfig;
use crate::error::{Error, Result};
use crate::flush::{self, TableWriter};
use crate::manifest::VersionSet;
use crate::memtable::{Memtable, MemtableList};

const MANIFEST_FILE: &str = "MANIFEST";

pub struct WriteBuffer {
    config: WriteBufferConfig,

    /// The DB-wide mutex; every list mutation happens under it.
    db_mutex: Mutex<()>,
    active: RwLock<Arc<Memtable>>,
    list: MemtableList,
    versions: Arc<VersionSet>,
    writer: Arc<dyn TableWriter>,
    next_memtable_id: AtomicU64,
}

impl WriteBuffer {
    /// Opens the write buffer, replaying the manifest in `config.dir`.
    pub fn open(config: WriteBufferConfig, writer: Arc<dyn TableWriter>) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        let versions = Arc::new(VersionSet::open(config.dir.join(MANIFEST_FILE))?);
        let list = MemtableList::new(config.min_flush_batch, config.max_history);

        tracing::info!(
            dir = %config.dir.display(),
            committed_tables = versions.tables().len(),
            "opened write buffer"
        );

        Ok(Self {
            config,
            db_mutex: Mutex::new(()),
            active: RwLock::new(Arc::new(Memtable::new(1))),
            list,
            versions,
            writer,
            next_memtable_id: AtomicU64::new(2),
        })
    }

    /// Inserts a key-value pair at the given write sequence.
    pub fn put(&self, seq: u64, key: &[u8], value: &[u8]) -> Result<()> {
        self.write(seq, key, Some(value))
    }

    /// Records a deletion tombstone at the given write sequence.
    pub fn delete(&self, seq: u64, key: &[u8]) -> Result<()> {
        self.write(seq, key, None)
    }

    fn write(&self, seq: u64, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        loop {
            let active = Arc::clone(&self.active.read());
            match active.add(seq, key, value) {
                Ok(()) => {
                    if active.size() >= self.config.max_memtable_size {
                        self.rotate()?;
                    }
                    return Ok(());
                }
                // Lost a race with rotation; retry against the new active.
                Err(Error::ReadOnly) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Retrieves the newest entry for `key` visible at `seq`, scanning the
    /// active memtable, then unflushed memtables newest-first, then (if
    /// configured) the flushed-memtable history.
    ///
    /// `Some(None)` reports a visible tombstone; on-disk layers below the
    /// write buffer must not be consulted in that case.
    pub fn get(&self, key: &[u8], seq: u64) -> Option<Option<Vec<u8>>> {
        if let Some(result) = self.active.read().get(key, seq) {
            return Some(result);
        }
        let current = self.list.current();
        if let Some(result) = current.get(key, seq) {
            return Some(result);
        }
        if self.config.read_from_history {
            if let Some(result) = current.get_from_history(key, seq) {
                return Some(result);
            }
        }
        None
    }

    /// Seals the active memtable into the unflushed queue and installs a
    /// fresh one. A no-op when the active memtable is empty.
    pub fn rotate(&self) -> Result<()> {
        let mut to_delete = Vec::new();
        {
            let guard = self.db_mutex.lock();
            let old = {
                let mut active = self.active.write();
                if active.is_empty() {
                    return Ok(());
                }
                active.seal()?;
                let id = self.next_memtable_id.fetch_add(1, Ordering::SeqCst);
                std::mem::replace(&mut *active, Arc::new(Memtable::new(id)))
            };
            tracing::debug!(
                memtable_id = old.id(),
                size = old.size(),
                entries = old.num_entries(),
                "sealed active memtable"
            );
            self.list.add(old, &mut to_delete, &guard);
        }
        // History evictions are destroyed here, outside the DB mutex.
        drop(to_delete);
        Ok(())
    }

    /// Latches a flush request, making the next flush pick whatever is
    /// queued even below the batch threshold.
    pub fn request_flush(&self) {
        let guard = self.db_mutex.lock();
        self.list.request_flush(&guard);
    }

    /// Flushes every pickable memtable. Returns whether anything was
    /// picked.
    pub fn flush(&self) -> Result<bool> {
        flush::flush_memtables(&self.list, &self.versions, self.writer.as_ref(), &self.db_mutex)
    }

    /// Advisory flush hint for background schedulers.
    pub fn flush_needed(&self) -> bool {
        self.list.flush_needed()
    }

    pub fn num_not_flushed(&self) -> usize {
        self.list.num_not_flushed()
    }

    pub fn num_flushed(&self) -> usize {
        self.list.num_flushed()
    }

    pub fn active_size(&self) -> usize {
        self.active.read().size()
    }

    pub fn config(&self) -> &WriteBufferConfig {
        &self.config
    }

    pub fn list(&self) -> &MemtableList {
        &self.list
    }

    pub fn versions(&self) -> &Arc<VersionSet> {
        &self.versions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::TableMeta;
    use crate::tmpfs::TempDir;

    /// Computes artifact metadata without writing table bytes.
    struct NullTableWriter;

    impl TableWriter for NullTableWriter {
        fn write(&self, file_number: u64, mems: &[Arc<Memtable>]) -> Result<TableMeta> {
            let entry_count = mems.iter().map(|m| m.num_entries() as u64).sum();
            Ok(TableMeta {
                id: file_number,
                size: mems.iter().map(|m| m.size() as u64).sum(),
                entry_count,
                smallest_key: Vec::new(),
                largest_key: Vec::new(),
            })
        }
    }

    fn open_buffer(config: WriteBufferConfig) -> WriteBuffer {
        WriteBuffer::open(config, Arc::new(NullTableWriter)).expect("failed to open write buffer")
    }

    fn test_config(dir: &TempDir) -> WriteBufferConfig {
        WriteBufferConfig::new(dir.path())
    }

    #[test]
    fn test_put_get_delete() -> Result<()> {
        let dir = TempDir::new()?;
        let buffer = open_buffer(test_config(&dir));

        buffer.put(1, b"key1", b"value1")?;
        buffer.put(2, b"key2", b"value2")?;
        buffer.delete(3, b"key1")?;

        assert_eq!(buffer.get(b"key1", 2), Some(Some(b"value1".to_vec())));
        assert_eq!(buffer.get(b"key1", 3), Some(None));
        assert_eq!(buffer.get(b"key2", 3), Some(Some(b"value2".to_vec())));
        assert_eq!(buffer.get(b"key3", 3), None);

        Ok(())
    }

    #[test]
    fn test_rotation_keeps_keys_readable() -> Result<()> {
        let dir = TempDir::new()?;
        let buffer = open_buffer(test_config(&dir).min_flush_batch(4));

        buffer.put(1, b"key1", b"value1")?;
        buffer.rotate()?;
        assert_eq!(buffer.num_not_flushed(), 1);
        assert_eq!(buffer.active_size(), 0);

        buffer.put(2, b"key2", b"value2")?;

        // Served from the sealed memtable and the active one respectively.
        assert_eq!(buffer.get(b"key1", 2), Some(Some(b"value1".to_vec())));
        assert_eq!(buffer.get(b"key2", 2), Some(Some(b"value2".to_vec())));

        // Rotating an empty active memtable is a no-op.
        buffer.rotate()?;
        buffer.rotate()?;
        assert_eq!(buffer.num_not_flushed(), 2);

        Ok(())
    }

    #[test]
    fn test_rotation_on_size_threshold() -> Result<()> {
        let dir = TempDir::new()?;
        let buffer = open_buffer(test_config(&dir).max_memtable_size(16).min_flush_batch(8));

        buffer.put(1, b"key00001", b"12345678")?;
        assert_eq!(buffer.num_not_flushed(), 1);
        buffer.put(2, b"key00002", b"12345678")?;
        assert_eq!(buffer.num_not_flushed(), 2);

        Ok(())
    }

    #[test]
    fn test_flush_end_to_end() -> Result<()> {
        let dir = TempDir::new()?;
        let buffer = open_buffer(test_config(&dir));

        buffer.put(1, b"key1", b"value1")?;
        buffer.rotate()?;
        assert!(buffer.flush_needed());

        assert!(buffer.flush()?);
        assert_eq!(buffer.num_not_flushed(), 0);
        assert!(!buffer.flush_needed());
        // History is disabled by default, so the key is now below the
        // write buffer.
        assert_eq!(buffer.get(b"key1", 1), None);
        assert_eq!(buffer.versions().tables().len(), 1);

        Ok(())
    }

    #[test]
    fn test_history_reads_after_flush() -> Result<()> {
        let dir = TempDir::new()?;
        let buffer = open_buffer(test_config(&dir).max_history(2).read_from_history(true));

        buffer.put(1, b"key1", b"value1")?;
        buffer.rotate()?;
        assert!(buffer.flush()?);

        assert_eq!(buffer.num_flushed(), 1);
        assert_eq!(buffer.get(b"key1", 1), Some(Some(b"value1".to_vec())));

        Ok(())
    }

    #[test]
    fn test_reopen_recovers_manifest() -> Result<()> {
        let dir = TempDir::new()?;
        {
            let buffer = open_buffer(test_config(&dir));
            buffer.put(1, b"key1", b"value1")?;
            buffer.rotate()?;
            buffer.flush()?;
        }

        let buffer = open_buffer(test_config(&dir));
        let tables = buffer.versions().tables();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].entry_count, 1);

        Ok(())
    }
}
