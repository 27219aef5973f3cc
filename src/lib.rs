/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! resolver-pool - a managed pool of DNS resolvers for high-volume querying
//!
//! The pool spreads queries over many resolver endpoints while:
//! - Pacing each endpoint to its own queries-per-second budget
//! - Optionally capping the aggregate rate of the whole pool
//! - Matching UDP answers to outstanding queries by id and name
//! - Retrying truncated answers over TCP
//! - Expiring exchanges that never receive an answer
//!
//! Every submitted query yields exactly one result on its channel, including
//! under cancellation, expiry and shutdown.

pub mod config;
pub mod core;
pub mod network;
pub mod pool;

pub use crate::config::types::{LogConfig, PoolConfig};
pub use crate::core::dns_utils::{RCODE_NO_RESPONSE, is_no_response};
pub use crate::core::error::{DnsError, NoResponse, Result};
pub use crate::network::connector::{Connector, DefaultConnector};
pub use crate::pool::request::{QueryResult, ResultSender};
pub use crate::pool::selector::{LeastLoadedSelector, RandomSelector, RoundRobinSelector, Selector};
pub use crate::pool::stats::StatsSnapshot;
pub use crate::pool::ResolverPool;
pub use tokio_util::sync::CancellationToken;
