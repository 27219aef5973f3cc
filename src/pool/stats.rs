/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Per-endpoint outcome counters
//!
//! Wildcard and misbehaviour detection lives outside this crate; it reads
//! these snapshots to decide whether an endpoint should be distrusted.

use crate::core::dns_utils::RCODE_NO_RESPONSE;
use hickory_proto::op::{Message, ResponseCode};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct EndpointStats {
    no_error: AtomicU64,
    nx_domain: AtomicU64,
    serv_fail: AtomicU64,
    refused: AtomicU64,
    other: AtomicU64,
    timeouts: AtomicU64,
    truncated: AtomicU64,
}

/// Point-in-time copy of an endpoint's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub no_error: u64,
    pub nx_domain: u64,
    pub serv_fail: u64,
    pub refused: u64,
    pub other: u64,
    pub timeouts: u64,
    pub truncated: u64,
}

impl StatsSnapshot {
    /// Answers received from the resolver, whatever their code
    pub fn answered(&self) -> u64 {
        self.no_error + self.nx_domain + self.serv_fail + self.refused + self.other
    }

    /// Fraction of finished exchanges that never got an answer
    pub fn timeout_ratio(&self) -> f64 {
        let total = self.answered() + self.timeouts;
        if total == 0 {
            return 0.0;
        }
        self.timeouts as f64 / total as f64
    }
}

impl EndpointStats {
    /// Count a finished exchange by the response code of its final message
    pub fn collect(&self, message: &Message) {
        let counter = match message.response_code() {
            ResponseCode::NoError => &self.no_error,
            ResponseCode::NXDomain => &self.nx_domain,
            ResponseCode::ServFail => &self.serv_fail,
            ResponseCode::Refused => &self.refused,
            code if u16::from(code) == RCODE_NO_RESPONSE => &self.timeouts,
            _ => &self.other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an exchange that expired or otherwise produced no answer
    pub fn collect_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an answer that had to be retried over TCP
    pub fn collect_truncated(&self) {
        self.truncated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            no_error: self.no_error.load(Ordering::Relaxed),
            nx_domain: self.nx_domain.load(Ordering::Relaxed),
            serv_fail: self.serv_fail.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
            other: self.other.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            truncated: self.truncated.load(Ordering::Relaxed),
        }
    }
}
