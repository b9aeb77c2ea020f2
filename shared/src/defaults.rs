//! Default values for configuration parameters
//!
//! This module centralizes all default value functions used by the
//! configuration structures. These functions are used by serde when
//! deserializing configuration files that don't specify certain optional
//! fields.

/// Default upper bound on live task records (128 tasks)
pub fn default_max_concurrent_tasks() -> usize {
    128
}

/// Default worker pool size (4 processes)
pub fn default_worker_count() -> usize {
    4
}

/// Default scheduler tick period (100 milliseconds)
pub fn default_scheduler_tick_interval_ms() -> u64 {
    100
}

/// Default window after which a silent executing task is defunct (60 seconds)
pub fn default_task_unresponsive_timeout() -> u64 {
    60
}

/// Default window after which an uncollected finished task is reaped (1 hour)
pub fn default_task_abandoned_timeout() -> u64 {
    3600
}

/// Default capacity of both message bus queues (1024 entries)
pub fn default_channel_buffer_size() -> usize {
    1024
}

/// Default wait for in-flight work during shutdown (10 seconds)
pub fn default_graceful_shutdown_timeout() -> u64 {
    10
}
