use std::{sync::Arc, time::Duration};

use crate::{buffer::WriteBuffer, error::Result, metrics, scheduler::BackgroundTask};

/// Drains the unflushed queue whenever the list's advisory hint fires.
pub struct FlushTask {
    buffer: Arc<WriteBuffer>,
}

impl FlushTask {
    pub fn new(buffer: Arc<WriteBuffer>) -> Self {
        Self { buffer }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for FlushTask {
    fn name(&self) -> &'static str {
        "memtable-flush"
    }

    fn interval(&self) -> Duration {
        self.buffer.config().scheduler.flush_interval
    }

    async fn execute(&self) -> Result<()> {
        // The hint is advisory; flush re-checks the authoritative
        // predicate under the DB mutex.
        if !self.buffer.flush_needed() {
            return Ok(());
        }

        self.buffer.flush()?;
        Ok(())
    }
}

pub struct MetricsTask {
    buffer: Arc<WriteBuffer>,
}

impl MetricsTask {
    pub fn new(buffer: Arc<WriteBuffer>) -> Self {
        Self { buffer }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for MetricsTask {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn interval(&self) -> Duration {
        self.buffer.config().scheduler.metrics_interval
    }

    async fn execute(&self) -> Result<()> {
        metrics::collect_metrics(&self.buffer)
    }
}
