//! Transport configuration.

use std::time::Duration;

use gridlink_core::buffer::{DEFAULT_BLOCK_SIZE, DEFAULT_POOL_CAP};
use gridlink_core::error::{GridError, Result};
use gridlink_core::io::{DEFAULT_INITIAL_BLOCK_SIZE, DEFAULT_MAX_BLOCK_SIZE};
use gridlink_core::protocol::constants::DEFAULT_MAX_PAYLOAD;

/// Default number of I/O workers; zero means inline dispatch.
const DEFAULT_WORKER_COUNT: usize = 0;
/// Default listen backlog.
const DEFAULT_ACCEPT_BACKLOG: u32 = 512;
/// Default graceful-close timeout.
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);
/// Default outbound connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a [`crate::TransportManager`].
///
/// Build one with [`TransportConfig::builder()`]; all fields carry
/// conservative defaults.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    worker_count: usize,
    initial_block_size: usize,
    max_block_size: usize,
    pool_block_size: usize,
    buffer_pool_cap: usize,
    pool_limit: Option<usize>,
    max_payload: usize,
    accept_backlog: u32,
    reuse_addr: bool,
    close_timeout: Duration,
    connect_timeout: Option<Duration>,
}

impl TransportConfig {
    /// Returns a new configuration builder.
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::new()
    }

    /// Number of I/O workers; zero dispatches inline on the I/O tasks.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Initial block size of an outgoing message stream.
    pub fn initial_block_size(&self) -> usize {
        self.initial_block_size
    }

    /// Cap on stream block growth.
    pub fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    /// Fixed size of pooled receive blocks.
    pub fn pool_block_size(&self) -> usize {
        self.pool_block_size
    }

    /// Maximum number of idle blocks cached by the pool.
    pub fn buffer_pool_cap(&self) -> usize {
        self.buffer_pool_cap
    }

    /// Optional bound on outstanding pool blocks, driving read back-pressure.
    pub fn pool_limit(&self) -> Option<usize> {
        self.pool_limit
    }

    /// Maximum payload carried by one wire envelope. Peers must agree.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Listen backlog applied to new listeners.
    pub fn accept_backlog(&self) -> u32 {
        self.accept_backlog
    }

    /// Whether listeners set `SO_REUSEADDR`.
    pub fn reuse_addr(&self) -> bool {
        self.reuse_addr
    }

    /// Default graceful-close timeout.
    pub fn close_timeout(&self) -> Duration {
        self.close_timeout
    }

    /// Outbound connect timeout; `None` waits indefinitely.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfigBuilder::new().build().expect("default config is valid")
    }
}

/// Builder for [`TransportConfig`].
#[derive(Debug, Clone, Default)]
pub struct TransportConfigBuilder {
    worker_count: Option<usize>,
    initial_block_size: Option<usize>,
    max_block_size: Option<usize>,
    pool_block_size: Option<usize>,
    buffer_pool_cap: Option<usize>,
    pool_limit: Option<usize>,
    max_payload: Option<usize>,
    accept_backlog: Option<u32>,
    reuse_addr: Option<bool>,
    close_timeout: Option<Duration>,
    connect_timeout: Option<Option<Duration>>,
}

impl TransportConfigBuilder {
    /// Creates a builder with every field defaulted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of I/O workers.
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    /// Sets the initial stream block size.
    pub fn initial_block_size(mut self, size: usize) -> Self {
        self.initial_block_size = Some(size);
        self
    }

    /// Sets the cap on stream block growth.
    pub fn max_block_size(mut self, size: usize) -> Self {
        self.max_block_size = Some(size);
        self
    }

    /// Sets the fixed pooled block size.
    pub fn pool_block_size(mut self, size: usize) -> Self {
        self.pool_block_size = Some(size);
        self
    }

    /// Sets the cap on cached pool blocks.
    pub fn buffer_pool_cap(mut self, cap: usize) -> Self {
        self.buffer_pool_cap = Some(cap);
        self
    }

    /// Bounds the number of outstanding pool blocks.
    pub fn pool_limit(mut self, limit: usize) -> Self {
        self.pool_limit = Some(limit);
        self
    }

    /// Sets the maximum envelope payload.
    pub fn max_payload(mut self, max: usize) -> Self {
        self.max_payload = Some(max);
        self
    }

    /// Sets the listen backlog.
    pub fn accept_backlog(mut self, backlog: u32) -> Self {
        self.accept_backlog = Some(backlog);
        self
    }

    /// Sets `SO_REUSEADDR` on listeners.
    pub fn reuse_addr(mut self, reuse: bool) -> Self {
        self.reuse_addr = Some(reuse);
        self
    }

    /// Sets the default graceful-close timeout.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = Some(timeout);
        self
    }

    /// Sets the outbound connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(Some(timeout));
        self
    }

    /// Disables the outbound connect timeout.
    pub fn no_connect_timeout(mut self) -> Self {
        self.connect_timeout = Some(None);
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<TransportConfig> {
        let config = TransportConfig {
            worker_count: self.worker_count.unwrap_or(DEFAULT_WORKER_COUNT),
            initial_block_size: self.initial_block_size.unwrap_or(DEFAULT_INITIAL_BLOCK_SIZE),
            max_block_size: self.max_block_size.unwrap_or(DEFAULT_MAX_BLOCK_SIZE),
            pool_block_size: self.pool_block_size.unwrap_or(DEFAULT_BLOCK_SIZE),
            buffer_pool_cap: self.buffer_pool_cap.unwrap_or(DEFAULT_POOL_CAP),
            pool_limit: self.pool_limit,
            max_payload: self.max_payload.unwrap_or(DEFAULT_MAX_PAYLOAD),
            accept_backlog: self.accept_backlog.unwrap_or(DEFAULT_ACCEPT_BACKLOG),
            reuse_addr: self.reuse_addr.unwrap_or(true),
            close_timeout: self.close_timeout.unwrap_or(DEFAULT_CLOSE_TIMEOUT),
            connect_timeout: self
                .connect_timeout
                .unwrap_or(Some(DEFAULT_CONNECT_TIMEOUT)),
        };

        if config.initial_block_size == 0 {
            return Err(GridError::Configuration(
                "initial block size must be greater than zero".to_string(),
            ));
        }
        if config.max_block_size < config.initial_block_size {
            return Err(GridError::Configuration(
                "max block size below initial block size".to_string(),
            ));
        }
        if config.pool_block_size == 0 {
            return Err(GridError::Configuration(
                "pool block size must be greater than zero".to_string(),
            ));
        }
        if config.max_payload == 0 {
            return Err(GridError::Configuration(
                "max payload must be greater than zero".to_string(),
            ));
        }
        if let Some(limit) = config.pool_limit {
            if limit == 0 {
                return Err(GridError::Configuration(
                    "pool limit must be greater than zero".to_string(),
                ));
            }
        }

        Ok(config)
    }
}
