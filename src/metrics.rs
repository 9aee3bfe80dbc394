use crate::buffer::WriteBuffer;
use crate::error::Result;

/// Collect write-buffer gauges and log them
pub fn collect_metrics(buffer: &WriteBuffer) -> Result<()> {
    tracing::info!(
        active_memtable_size = buffer.active_size(),
        unflushed_memtables = buffer.num_not_flushed(),
        history_memtables = buffer.num_flushed(),
        flush_needed = buffer.flush_needed(),
        committed_tables = buffer.versions().tables().len(),
        "write buffer metrics"
    );

    Ok(())
}
