//! Flush driver: turns pickable memtables into committed flush results.
//!
//! The driver owns the phase structure of a flush (pick under the DB
//! mutex, materialize with no locks held, commit in creation order) while
//! the artifact bytes themselves are written by the engine through the
//! [`TableWriter`] seam.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::manifest::{TableMeta, VersionEdit, VersionSet};
use crate::memtable::{Memtable, MemtableList};

/// Writes a picked memtable batch as a durable table artifact.
///
/// The write buffer decides *what* to flush; the embedding engine supplies
/// *how* flushed bytes reach disk.
pub trait TableWriter: Send + Sync {
    /// Materializes `mems` (oldest first) under `file_number` and returns
    /// the artifact's metadata. Called with no locks held.
    fn write(&self, file_number: u64, mems: &[Arc<Memtable>]) -> Result<TableMeta>;
}

/// Flushes every pickable memtable. Returns whether anything was picked.
///
/// On a writer failure the pick is rolled back and the memtables become
/// pendable again. On a manifest failure the install path re-queues the
/// batch for retry; see
/// [`MemtableList::install_memtable_flush_results`].
pub fn flush_memtables(
    list: &MemtableList,
    versions: &VersionSet,
    writer: &dyn TableWriter,
    db_mutex: &Mutex<()>,
) -> Result<bool> {
    let picked = {
        let guard = db_mutex.lock();
        if !list.is_flush_pending(&guard) {
            return Ok(false);
        }
        list.pick_memtables_to_flush(&guard)
    };
    if picked.is_empty() {
        return Ok(false);
    }

    let file_number = versions.new_file_number();

    // Artifact I/O runs without any locks held.
    let meta = match writer.write(file_number, &picked) {
        Ok(meta) => meta,
        Err(e) => {
            tracing::warn!(file_number, error = %e, "table write failed, rolling back pick");
            let guard = db_mutex.lock();
            list.rollback_memtable_flush(&picked, &guard);
            return Err(e);
        }
    };

    // WALs up through the newest picked memtable are obsolete once the
    // edit is durable.
    let log_seq = picked.last().expect("picked is non-empty").id();
    picked[0].record_flush_edit(VersionEdit::Flush {
        seq: versions.next_seq(),
        log_seq,
        table: meta.clone(),
    });

    let mut to_delete = Vec::new();
    {
        let mut guard = db_mutex.lock();
        list.install_memtable_flush_results(
            &picked,
            file_number,
            versions,
            &mut guard,
            &mut to_delete,
        )?;
    }
    // Deferred memtable destruction happens here, outside the mutex.
    drop(to_delete);

    tracing::info!(
        file_number,
        memtables = picked.len(),
        entries = meta.entry_count,
        "flushed memtables"
    );

    if versions.should_snapshot() {
        versions.write_snapshot()?;
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::tmpfs::TempDir;

    /// Computes artifact metadata without writing anything to disk.
    struct MemoryTableWriter {
        written: Mutex<Vec<(u64, usize)>>,
    }

    impl MemoryTableWriter {
        fn new() -> Self {
            Self {
                written: Mutex::new(Vec::new()),
            }
        }
    }

    impl TableWriter for MemoryTableWriter {
        fn write(&self, file_number: u64, mems: &[Arc<Memtable>]) -> Result<TableMeta> {
            let mut smallest_key: Option<Vec<u8>> = None;
            let mut largest_key: Option<Vec<u8>> = None;
            let mut entry_count = 0u64;
            for mem in mems {
                entry_count += mem.num_entries() as u64;
                if let Some((smallest, largest)) = mem.bounds() {
                    smallest_key = Some(match smallest_key.take() {
                        Some(current) => current.min(smallest),
                        None => smallest,
                    });
                    largest_key = Some(match largest_key.take() {
                        Some(current) => current.max(largest),
                        None => largest,
                    });
                }
            }
            self.written.lock().push((file_number, mems.len()));
            Ok(TableMeta {
                id: file_number,
                size: mems.iter().map(|m| m.size() as u64).sum(),
                entry_count,
                smallest_key: smallest_key.unwrap_or_default(),
                largest_key: largest_key.unwrap_or_default(),
            })
        }
    }

    struct FailingTableWriter;

    impl TableWriter for FailingTableWriter {
        fn write(&self, _file_number: u64, _mems: &[Arc<Memtable>]) -> Result<TableMeta> {
            Err(Error::IO("injected table write failure".to_string()))
        }
    }

    fn add_memtable(
        list: &MemtableList,
        db_mutex: &Mutex<()>,
        id: u64,
        entries: &[(u64, &[u8], Option<&[u8]>)],
    ) -> Arc<Memtable> {
        let mem = Arc::new(Memtable::new(id));
        for (seq, key, value) in entries {
            mem.add(*seq, key, *value).expect("add failed");
        }
        let mut to_delete = Vec::new();
        let guard = db_mutex.lock();
        list.add(Arc::clone(&mem), &mut to_delete, &guard);
        mem
    }

    #[test]
    fn test_flush_nothing_pending() -> Result<()> {
        let dir = TempDir::new()?;
        let versions = VersionSet::open(dir.path().join("MANIFEST"))?;
        let list = MemtableList::new(1, 0);
        let db_mutex = Mutex::new(());
        let writer = MemoryTableWriter::new();

        assert!(!flush_memtables(&list, &versions, &writer, &db_mutex)?);
        assert!(writer.written.lock().is_empty());
        Ok(())
    }

    #[test]
    fn test_flush_writes_and_installs() -> Result<()> {
        let dir = TempDir::new()?;
        let versions = VersionSet::open(dir.path().join("MANIFEST"))?;
        let list = MemtableList::new(1, 0);
        let db_mutex = Mutex::new(());
        let writer = MemoryTableWriter::new();

        add_memtable(
            &list,
            &db_mutex,
            1,
            &[(1, b"apple", Some(b"1")), (2, b"pear", Some(b"2"))],
        );
        add_memtable(&list, &db_mutex, 2, &[(3, b"banana", None)]);

        assert!(flush_memtables(&list, &versions, &writer, &db_mutex)?);

        assert_eq!(list.num_not_flushed(), 0);
        assert_eq!(*writer.written.lock(), vec![(0, 2)]);

        let tables = versions.tables();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].entry_count, 3);
        assert_eq!(tables[0].smallest_key, b"apple".to_vec());
        assert_eq!(tables[0].largest_key, b"pear".to_vec());

        // Nothing left to do.
        assert!(!flush_memtables(&list, &versions, &writer, &db_mutex)?);
        Ok(())
    }

    #[test]
    fn test_flush_writer_failure_rolls_back() -> Result<()> {
        let dir = TempDir::new()?;
        let versions = VersionSet::open(dir.path().join("MANIFEST"))?;
        let list = MemtableList::new(1, 0);
        let db_mutex = Mutex::new(());

        let mem = add_memtable(&list, &db_mutex, 1, &[(1, b"key1", Some(b"value1"))]);

        let result = flush_memtables(&list, &versions, &FailingTableWriter, &db_mutex);
        assert!(matches!(result, Err(Error::IO(_))));

        // The pick was rolled back; the memtable is pendable again.
        assert!(!mem.is_flush_in_progress());
        assert_eq!(list.num_not_flushed(), 1);
        assert!(list.flush_needed());
        assert!(versions.tables().is_empty());

        // A retry with a healthy writer drains the queue.
        let writer = MemoryTableWriter::new();
        assert!(flush_memtables(&list, &versions, &writer, &db_mutex)?);
        assert_eq!(list.num_not_flushed(), 0);
        assert_eq!(versions.tables().len(), 1);
        Ok(())
    }
}
