//! Immutable snapshot of the memtable list.
//!
//! A version carries two newest-first queues of shared memtable handles:
//! the unflushed queue and the bounded history of already-flushed
//! memtables. Versions never change after publication; the list constructs
//! a successor from a clone and atomically swaps it in, so readers hold a
//! consistent snapshot for as long as they keep the `Arc`.
//!
//! Memtables released by a version are pushed onto the caller's
//! `to_delete` vector rather than dropped in place; callers drop that
//! vector after releasing the DB mutex so memtable destructors never run
//! inside the critical section.

use std::sync::Arc;

use super::core::Memtable;

/// Snapshot of the unflushed queue and the flushed-memtable history.
#[derive(Debug, Clone)]
pub struct MemtableListVersion {
    /// Unflushed memtables, newest first.
    memlist: Vec<Arc<Memtable>>,
    /// Flushed memtables retained for reads, newest first.
    memlist_history: Vec<Arc<Memtable>>,
    /// Retention window: the combined count of unflushed and history
    /// memtables the version may keep. Zero disables history.
    max_history: usize,
}

impl MemtableListVersion {
    pub(super) fn new(max_history: usize) -> Self {
        Self {
            memlist: Vec::new(),
            memlist_history: Vec::new(),
            max_history,
        }
    }

    /// Retrieves the newest entry for `key` visible at `seq` from the
    /// unflushed queue. History is not consulted.
    ///
    /// `Some(None)` reports a visible tombstone; a tombstone in a newer
    /// memtable masks values in older ones because the scan stops at the
    /// first hit.
    pub fn get(&self, key: &[u8], seq: u64) -> Option<Option<Vec<u8>>> {
        Self::get_from(&self.memlist, key, seq)
    }

    /// Same lookup against the flushed-memtable history only.
    pub fn get_from_history(&self, key: &[u8], seq: u64) -> Option<Option<Vec<u8>>> {
        Self::get_from(&self.memlist_history, key, seq)
    }

    fn get_from(list: &[Arc<Memtable>], key: &[u8], seq: u64) -> Option<Option<Vec<u8>>> {
        for mem in list {
            if let Some(result) = mem.get(key, seq) {
                return Some(result);
            }
        }
        None
    }

    /// Unflushed memtables, newest first.
    pub fn memtables(&self) -> &[Arc<Memtable>] {
        &self.memlist
    }

    /// Flushed memtables still retained, newest first.
    pub fn history(&self) -> &[Arc<Memtable>] {
        &self.memlist_history
    }

    pub fn num_not_flushed(&self) -> usize {
        self.memlist.len()
    }

    pub fn num_flushed(&self) -> usize {
        self.memlist_history.len()
    }

    /// Prepends a memtable to the unflushed queue, evicting from history
    /// if the retention window overflows.
    pub(super) fn add_memtable(&mut self, mem: Arc<Memtable>, to_delete: &mut Vec<Arc<Memtable>>) {
        debug_assert!(
            self.memlist.first().map_or(true, |m| m.id() < mem.id()),
            "memtable ids must increase"
        );
        self.memlist.insert(0, mem);
        self.trim_history(to_delete);
    }

    /// Removes an installed memtable from the unflushed queue, retiring it
    /// into history or straight onto `to_delete`.
    pub(super) fn remove(&mut self, mem: &Arc<Memtable>, to_delete: &mut Vec<Arc<Memtable>>) {
        let Some(pos) = self.memlist.iter().position(|m| Arc::ptr_eq(m, mem)) else {
            return;
        };
        let mem = self.memlist.remove(pos);
        if self.max_history > 0 {
            self.memlist_history.insert(0, mem);
            self.trim_history(to_delete);
        } else {
            to_delete.push(mem);
        }
    }

    /// Evicts oldest history entries while the retention window overflows.
    /// The window counts unflushed and history memtables together.
    pub(super) fn trim_history(&mut self, to_delete: &mut Vec<Arc<Memtable>>) {
        while self.memlist.len() + self.memlist_history.len() > self.max_history
            && !self.memlist_history.is_empty()
        {
            let evicted = self.memlist_history.pop().expect("history is non-empty");
            to_delete.push(evicted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed_memtable(id: u64, entries: &[(u64, &[u8], Option<&[u8]>)]) -> Arc<Memtable> {
        let mem = Memtable::new(id);
        for (seq, key, value) in entries {
            mem.add(*seq, key, *value).expect("add failed");
        }
        mem.mark_sealed();
        Arc::new(mem)
    }

    #[test]
    fn test_newer_memtable_masks_older() {
        let mut version = MemtableListVersion::new(0);
        let mut to_delete = Vec::new();

        let a = sealed_memtable(1, &[(4, b"key1", Some(b"value1"))]);
        let b = sealed_memtable(2, &[(6, b"key1", None)]);
        version.add_memtable(a, &mut to_delete);
        version.add_memtable(b, &mut to_delete);
        assert!(to_delete.is_empty());

        // The tombstone in the newer memtable shadows the older value.
        assert_eq!(version.get(b"key1", 7), Some(None));
        // At a sequence before the deletion the older value is visible.
        assert_eq!(version.get(b"key1", 5), Some(Some(b"value1".to_vec())));
        assert_eq!(version.get(b"key1", 1), None);
    }

    #[test]
    fn test_history_is_separate_from_unflushed() {
        let mut version = MemtableListVersion::new(2);
        let mut to_delete = Vec::new();

        let a = sealed_memtable(1, &[(2, b"key2", Some(b"value2"))]);
        version.add_memtable(Arc::clone(&a), &mut to_delete);
        version.remove(&a, &mut to_delete);

        assert_eq!(version.num_not_flushed(), 0);
        assert_eq!(version.num_flushed(), 1);
        assert!(to_delete.is_empty());

        assert_eq!(version.get(b"key2", 5), None);
        assert_eq!(
            version.get_from_history(b"key2", 5),
            Some(Some(b"value2".to_vec()))
        );
    }

    #[test]
    fn test_remove_without_history_defers_delete() {
        let mut version = MemtableListVersion::new(0);
        let mut to_delete = Vec::new();

        let a = sealed_memtable(1, &[]);
        version.add_memtable(Arc::clone(&a), &mut to_delete);
        version.remove(&a, &mut to_delete);

        assert_eq!(version.num_not_flushed(), 0);
        assert_eq!(version.num_flushed(), 0);
        assert_eq!(to_delete.len(), 1);
        assert!(Arc::ptr_eq(&to_delete[0], &a));
    }

    #[test]
    fn test_trim_counts_unflushed_against_window() {
        let mut version = MemtableListVersion::new(2);
        let mut to_delete = Vec::new();

        let a = sealed_memtable(1, &[]);
        let b = sealed_memtable(2, &[]);
        version.add_memtable(Arc::clone(&a), &mut to_delete);
        version.remove(&a, &mut to_delete);
        version.add_memtable(Arc::clone(&b), &mut to_delete);
        version.remove(&b, &mut to_delete);
        assert_eq!(version.num_flushed(), 2);
        assert!(to_delete.is_empty());

        // A third unflushed memtable pushes the oldest history entry out.
        let c = sealed_memtable(3, &[]);
        version.add_memtable(c, &mut to_delete);
        assert_eq!(version.num_not_flushed(), 1);
        assert_eq!(version.num_flushed(), 1);
        assert_eq!(to_delete.len(), 1);
        assert!(Arc::ptr_eq(&to_delete[0], &a));
    }

    #[test]
    fn test_ids_strictly_decrease_front_to_back() {
        let mut version = MemtableListVersion::new(4);
        let mut to_delete = Vec::new();

        for id in 1..=3 {
            version.add_memtable(sealed_memtable(id, &[]), &mut to_delete);
        }
        let oldest = Arc::clone(version.memtables().last().unwrap());
        version.remove(&oldest, &mut to_delete);

        let ids: Vec<_> = version.memtables().iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec![3, 2]);
        let history_ids: Vec<_> = version.history().iter().map(|m| m.id()).collect();
        assert_eq!(history_ids, vec![1]);

        // Every unflushed id is newer than every history id.
        let min_unflushed = ids.iter().min().unwrap();
        let max_history = history_ids.iter().max().unwrap();
        assert!(min_unflushed > max_history);
    }
}
