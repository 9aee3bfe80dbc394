use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the write buffer
#[derive(Debug, Clone)]
pub struct WriteBufferConfig {
    /// Directory holding the manifest
    pub dir: PathBuf,

    /// Maximum size of the active memtable before rotation (default: 64MB)
    pub max_memtable_size: usize,

    /// Number of sealed memtables that makes a flush pending on its own
    /// (default: 1)
    pub min_flush_batch: usize,

    /// Window of already-flushed memtables retained for reads; 0 disables
    /// retention (default: 0)
    pub max_history: usize,

    /// Serve point reads from the flushed-memtable history (default: false)
    pub read_from_history: bool,

    /// Scheduler configuration
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often to check the flush hint (default: 1s)
    pub flush_interval: Duration,

    /// How often to collect metrics (default: 5s)
    pub metrics_interval: Duration,
}

impl Default for WriteBufferConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./emberdb"),
            max_memtable_size: 64 * 1024 * 1024, // 64MB
            min_flush_batch: 1,
            max_history: 0,
            read_from_history: false,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(1),
            metrics_interval: Duration::from_secs(5),
        }
    }
}

impl WriteBufferConfig {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set maximum active memtable size
    pub fn max_memtable_size(mut self, size: usize) -> Self {
        self.max_memtable_size = size;
        self
    }

    /// Set the sealed-memtable count that triggers a flush
    pub fn min_flush_batch(mut self, count: usize) -> Self {
        self.min_flush_batch = count;
        self
    }

    /// Set the flushed-memtable retention window
    pub fn max_history(mut self, count: usize) -> Self {
        self.max_history = count;
        self
    }

    /// Serve point reads from retained flushed memtables
    pub fn read_from_history(mut self, enabled: bool) -> Self {
        self.read_from_history = enabled;
        self
    }

    /// Configure scheduler settings
    pub fn scheduler(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }
}

impl SchedulerConfig {
    /// Set flush check interval
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set metrics collection interval
    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }
}
