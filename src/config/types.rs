/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Configuration structure definitions
//!
//! Configuration is passed programmatically; nothing here reads files or the
//! environment.

use std::time::Duration;
use thiserror::Error;

/// Default time to wait for a response before an exchange expires
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval between expiry sweeps of an exchange table
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on a single socket read so shutdown is noticed while idle
pub const DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(5);

/// Timeout for the TCP exchange that follows a truncated UDP answer
pub const DEFAULT_TCP_TIMEOUT: Duration = Duration::from_secs(60);

/// Pause taken by the dispatch loop when no endpoint was ready to send
pub const DEFAULT_DISPATCH_IDLE: Duration = Duration::from_millis(1);

/// Standard DNS UDP buffer size used by every endpoint reader
pub const DEFAULT_UDP_BUFFER: usize = 4096;

/// Number of released requests kept around for reuse
pub const DEFAULT_REQUEST_POOL_SIZE: usize = 4096;

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("UDP buffer size must be at least 512 bytes, got {0}")]
    UdpBufferTooSmall(usize),
}

/// Tunables for a resolver pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Default exchange expiry applied to every endpoint
    pub timeout: Duration,

    /// How often each endpoint scans its exchange table for expired entries
    pub sweep_interval: Duration,

    /// Bound on a single UDP read
    pub read_deadline: Duration,

    /// Timeout of the TCP retry performed for truncated answers
    pub tcp_timeout: Duration,

    /// Pause of the dispatch loop when nothing was sent during a scan
    pub dispatch_idle: Duration,

    /// Receive buffer used to read UDP datagrams
    pub udp_buffer_size: usize,

    /// Capacity of the request free list (0 disables reuse)
    pub request_pool_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            timeout: DEFAULT_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            read_deadline: DEFAULT_READ_DEADLINE,
            tcp_timeout: DEFAULT_TCP_TIMEOUT,
            dispatch_idle: DEFAULT_DISPATCH_IDLE,
            udp_buffer_size: DEFAULT_UDP_BUFFER,
            request_pool_size: DEFAULT_REQUEST_POOL_SIZE,
        }
    }
}

impl PoolConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("timeout"));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("sweep_interval"));
        }
        if self.read_deadline.is_zero() {
            return Err(ConfigError::ZeroDuration("read_deadline"));
        }
        if self.tcp_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("tcp_timeout"));
        }
        if self.udp_buffer_size < 512 {
            return Err(ConfigError::UdpBufferTooSmall(self.udp_buffer_size));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level: off, trace, debug, info, warn, error
    pub level: String,

    /// Optional file path for log output (in addition to console)
    pub file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> LogConfig {
        LogConfig {
            level: default_level(),
            file: None,
        }
    }
}

impl LogConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.level.to_lowercase().as_str() {
            "off" | "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            _ => Err(ConfigError::InvalidLogLevel(self.level.clone())),
        }
    }
}

/// Default log level
fn default_level() -> String {
    "info".to_string()
}
