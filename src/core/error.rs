/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Unified error handling for the resolver pool
//!
//! Per-query failures never escape as a pool-wide fault: they travel through
//! the query's result channel as a [`NoResponse`] reason. The remaining
//! variants are returned synchronously from administrative calls or surfaced
//! to blocking callers.

use crate::config::types::ConfigError;
use std::fmt;
use thiserror::Error;

/// Main error type for the resolver pool
#[derive(Debug, Error)]
pub enum DnsError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration validation error (e.g. a non-positive endpoint rate)
    #[error("Configuration error: {0}")]
    Config(String),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Protocol(String),

    /// Message could not be encoded or decoded
    #[error("DNS Hickory protocol error: {0}")]
    HickoryProtocol(#[from] hickory_proto::error::ProtoError),

    /// No usable answer was produced for a query
    #[error("no response: {0}")]
    NoResponse(NoResponse),

    /// The blocking caller observed a closed or empty result channel
    #[error("query failed")]
    QueryFailed,

    /// The caller's context ended before a result arrived
    #[error("the context expired")]
    ContextExpired,
}

impl DnsError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        DnsError::Config(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        DnsError::Protocol(msg.into())
    }
}

/// Reason attached to a synthesized no-response outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoResponse {
    /// The pool was already shut down when the query arrived
    Shutdown,
    /// The caller's context was cancelled before the query hit the wire
    Cancelled,
    /// No endpoint was available to serve the query
    NoEndpoint,
    /// Writing the datagram failed
    SendFailed,
    /// Another exchange with the same id and name is still outstanding
    IdCollision,
    /// The exchange outlived its deadline
    Timeout,
    /// The TCP retry of a truncated answer failed
    TcpRetryFailed,
    /// The endpoint was stopped while the query was queued or in flight
    EndpointStopped,
    /// The submitted message carries no question
    EmptyQuestion,
}

impl fmt::Display for NoResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            NoResponse::Shutdown => "resolver pool has been shut down",
            NoResponse::Cancelled => "query context was cancelled",
            NoResponse::NoEndpoint => "no resolver endpoint available",
            NoResponse::SendFailed => "failed to write the query",
            NoResponse::IdCollision => "transaction id collision",
            NoResponse::Timeout => "exchange timed out",
            NoResponse::TcpRetryFailed => "TCP retry of truncated answer failed",
            NoResponse::EndpointStopped => "resolver endpoint stopped",
            NoResponse::EmptyQuestion => "query has no question section",
        };
        f.write_str(reason)
    }
}

impl From<NoResponse> for DnsError {
    fn from(reason: NoResponse) -> Self {
        DnsError::NoResponse(reason)
    }
}

/// Allow conversion from ConfigError to DnsError
impl From<ConfigError> for DnsError {
    fn from(e: ConfigError) -> Self {
        DnsError::Config(e.to_string())
    }
}

/// Convenient type alias for Results using DnsError
pub type Result<T> = std::result::Result<T, DnsError>;
