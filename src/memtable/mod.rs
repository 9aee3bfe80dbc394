//! The in-memory write path of the engine.
//!
//! Writes land in one active memtable. When it fills up it is sealed and
//! queued on the immutable memtable list, where background flushes pick it
//! up and eventually commit the result to the manifest:
//!
//! ```text
//! ┌─────────────────┐  seal   ┌──────────────────────┐
//! │ Active Memtable │────────►│ MemtableList         │
//! │   (SkipMap)     │         │  unflushed (newest→) │
//! └─────────────────┘         │  history   (newest→) │
//!                             └──────────┬───────────┘
//!                       pick / install   │
//!                                        ▼
//!                             ┌──────────────────────┐
//!                             │ VersionSet (MANIFEST)│
//!                             └──────────────────────┘
//! ```
//!
//! Every mutation of the list publishes a fresh immutable
//! [`MemtableListVersion`]; readers clone the current version and query it
//! without taking the DB mutex. Flush results are committed to the
//! manifest strictly in memtable-creation order, no matter in which order
//! the flush jobs finish.

pub mod core;
pub mod list;
pub mod version;

pub use core::{InternalKey, Memtable};
pub use list::MemtableList;
pub use version::MemtableListVersion;
