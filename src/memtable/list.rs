//! The immutable memtable list and its flush coordination.
//!
//! The list owns the queue of sealed-but-unflushed memtables and the
//! bounded history of recently flushed ones, published as an immutable
//! [`MemtableListVersion`] snapshot. Writers add sealed memtables, flush
//! workers pick batches and install their results, and readers query a
//! snapshot without blocking any of that.
//!
//! # Locking
//!
//! Every state-affecting operation requires the caller to hold the DB-wide
//! mutex and prove it by passing the guard. Readers never take the DB
//! mutex: `current()` clones the published `Arc` under a briefly-held
//! publication lock.
//!
//! The one suspension point is [`install_memtable_flush_results`]: the
//! manifest writer may release the DB mutex while it makes the commit
//! durable, which is why the completed-prefix is re-collected on every
//! commit round.
//!
//! # Flush hint
//!
//! `flush_needed` is an advisory atomic: true whenever at least one sealed
//! memtable is neither picked nor completed. Background schedulers read it
//! with acquire ordering to skip taking the DB mutex when there is nothing
//! to do. The authoritative predicate is [`is_flush_pending`], evaluated
//! under the mutex.
//!
//! [`install_memtable_flush_results`]: MemtableList::install_memtable_flush_results
//! [`is_flush_pending`]: MemtableList::is_flush_pending

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{MutexGuard, RwLock};

use crate::error::Result;
use crate::manifest::ManifestLog;

use super::core::Memtable;
use super::version::MemtableListVersion;

pub struct MemtableList {
    /// The published snapshot.
    current: RwLock<Arc<MemtableListVersion>>,
    /// Sealed-memtable count that makes a flush pending on its own.
    min_flush_batch: usize,

    /// Sealed memtables neither picked nor completed.
    num_flush_not_started: AtomicUsize,
    /// Latched by `request_flush`, cleared by any pick.
    flush_requested: AtomicBool,
    /// At most one thread commits flush results at a time.
    commit_in_progress: AtomicBool,
    /// Advisory hint for background schedulers.
    flush_needed: AtomicBool,
}

impl MemtableList {
    pub fn new(min_flush_batch: usize, max_history: usize) -> Self {
        Self {
            current: RwLock::new(Arc::new(MemtableListVersion::new(max_history))),
            min_flush_batch: min_flush_batch.max(1),
            num_flush_not_started: AtomicUsize::new(0),
            flush_requested: AtomicBool::new(false),
            commit_in_progress: AtomicBool::new(false),
            flush_needed: AtomicBool::new(false),
        }
    }

    /// The live snapshot. The returned version stays consistent (and its
    /// memtables stay alive) for as long as the caller holds it.
    pub fn current(&self) -> Arc<MemtableListVersion> {
        Arc::clone(&self.current.read())
    }

    /// Memtables not yet flushed.
    pub fn num_not_flushed(&self) -> usize {
        self.current.read().num_not_flushed()
    }

    /// Flushed memtables still retained for reads.
    pub fn num_flushed(&self) -> usize {
        self.current.read().num_flushed()
    }

    /// Advisory flush hint, published with release ordering.
    pub fn flush_needed(&self) -> bool {
        self.flush_needed.load(Ordering::Acquire)
    }

    /// Adds a sealed memtable to the front of the unflushed queue. Any
    /// history entries evicted by the retention window land in `to_delete`.
    pub fn add(
        &self,
        mem: Arc<Memtable>,
        to_delete: &mut Vec<Arc<Memtable>>,
        _guard: &MutexGuard<'_, ()>,
    ) {
        mem.mark_sealed();
        self.update_version(|version| version.add_memtable(mem, to_delete));
        self.num_flush_not_started.fetch_add(1, Ordering::SeqCst);
        self.refresh_flush_hint();
    }

    /// Latches a user-requested flush. Retained but not pending while the
    /// list is empty.
    pub fn request_flush(&self, _guard: &MutexGuard<'_, ()>) {
        self.flush_requested.store(true, Ordering::SeqCst);
        self.refresh_flush_hint();
    }

    /// True iff a flush worker calling [`pick_memtables_to_flush`] would
    /// get work: at least one unpicked memtable, and either the batch
    /// threshold is met or a flush was explicitly requested.
    ///
    /// [`pick_memtables_to_flush`]: Self::pick_memtables_to_flush
    pub fn is_flush_pending(&self, _guard: &MutexGuard<'_, ()>) -> bool {
        let not_started = self.num_flush_not_started.load(Ordering::SeqCst);
        (self.flush_requested.load(Ordering::SeqCst) && not_started >= 1)
            || not_started >= self.min_flush_batch
    }

    /// Picks every memtable not already being flushed, oldest first, and
    /// marks it in-progress. Memtables picked by a concurrent flush are
    /// skipped, so two picks always return disjoint sets. Clears any
    /// latched flush request.
    pub fn pick_memtables_to_flush(&self, _guard: &MutexGuard<'_, ()>) -> Vec<Arc<Memtable>> {
        let current = self.current();
        let mut picked = Vec::new();
        for mem in current.memtables().iter().rev() {
            if !mem.is_flush_in_progress() {
                debug_assert!(!mem.is_flush_completed());
                mem.set_flush_in_progress(true);
                self.num_flush_not_started.fetch_sub(1, Ordering::SeqCst);
                picked.push(Arc::clone(mem));
            }
        }
        self.flush_requested.store(false, Ordering::SeqCst);
        self.refresh_flush_hint();

        if !picked.is_empty() {
            tracing::debug!(
                count = picked.len(),
                oldest_id = picked[0].id(),
                "picked memtables for flush"
            );
        }
        picked
    }

    /// Returns a picked batch to the not-started state. Used when the
    /// flush job fails before producing an artifact.
    pub fn rollback_memtable_flush(&self, mems: &[Arc<Memtable>], _guard: &MutexGuard<'_, ()>) {
        for mem in mems {
            debug_assert!(mem.is_flush_in_progress());
            mem.clear_flush_state();
            self.num_flush_not_started.fetch_add(1, Ordering::SeqCst);
        }
        self.refresh_flush_hint();
        tracing::debug!(count = mems.len(), "rolled back memtable flush");
    }

    /// Commits flushed memtables to the manifest, in creation order.
    ///
    /// Marks every memtable in `mems` as completed, then commits the
    /// longest completed prefix starting from the oldest unflushed
    /// memtable. Completed memtables behind an in-flight straggler stay
    /// queued and are committed by whichever later install finds them at
    /// the front. Committed memtables move to the history window or onto
    /// `to_delete`.
    ///
    /// The manifest writer may release the DB mutex through `guard` while
    /// making the batch durable. On a manifest failure the batch is
    /// re-queued for retry (still picked) and the error is returned.
    pub fn install_memtable_flush_results(
        &self,
        mems: &[Arc<Memtable>],
        file_number: u64,
        versions: &dyn ManifestLog,
        guard: &mut MutexGuard<'_, ()>,
        to_delete: &mut Vec<Arc<Memtable>>,
    ) -> Result<()> {
        debug_assert!(!mems.is_empty(), "install called with an empty pick");
        if mems.is_empty() {
            return Ok(());
        }
        debug_assert!(mems.iter().all(|m| m.is_flush_in_progress()));

        for mem in mems {
            mem.mark_flush_completed(file_number);
        }

        // Only a single thread commits; a concurrent install's commit loop
        // will pick up the memtables marked above.
        if self.commit_in_progress.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.commit_flushed(versions, guard, to_delete);
        self.commit_in_progress.store(false, Ordering::SeqCst);
        self.refresh_flush_hint();
        result
    }

    /// Repeatedly commits the completed prefix of the unflushed queue.
    /// Re-collects after every round: the manifest write releases the DB
    /// mutex, so new completions may have arrived.
    fn commit_flushed(
        &self,
        versions: &dyn ManifestLog,
        guard: &mut MutexGuard<'_, ()>,
        to_delete: &mut Vec<Arc<Memtable>>,
    ) -> Result<()> {
        loop {
            // Longest completed prefix from the oldest memtable, in
            // creation order.
            let batch: Vec<Arc<Memtable>> = self
                .current
                .read()
                .memtables()
                .iter()
                .rev()
                .take_while(|m| m.is_flush_completed())
                .cloned()
                .collect();
            if batch.is_empty() {
                // The oldest memtable is still in flight; completed
                // successors wait for it.
                return Ok(());
            }

            let edits = batch.iter().filter_map(|m| m.pending_edit()).collect();
            match versions.log_and_apply(edits, guard) {
                Ok(()) => {
                    let mut next = (**self.current.read()).clone();
                    for mem in &batch {
                        tracing::debug!(
                            memtable_id = mem.id(),
                            file_number = mem.file_number(),
                            "memtable flush committed"
                        );
                        mem.clear_flush_edit();
                        next.remove(mem, to_delete);
                    }
                    *self.current.write() = Arc::new(next);
                }
                Err(e) => {
                    // Re-queue for retry: the batch stays picked, only the
                    // completion marks are reverted.
                    for mem in &batch {
                        mem.reset_flush_completed();
                    }
                    self.refresh_flush_hint();
                    tracing::warn!(
                        count = batch.len(),
                        error = %e,
                        "manifest commit failed, flush results re-queued"
                    );
                    return Err(e);
                }
            }
        }
    }

    fn update_version(&self, f: impl FnOnce(&mut MemtableListVersion)) {
        let mut next = (**self.current.read()).clone();
        f(&mut next);
        *self.current.write() = Arc::new(next);
    }

    fn refresh_flush_hint(&self) {
        let needed = self.num_flush_not_started.load(Ordering::SeqCst) > 0;
        self.flush_needed.store(needed, Ordering::Release);
    }
}
