/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Global admission pacing
//!
//! Leaky-bucket limiter without burst: each `take()` reserves the next free
//! slot, one slot every `1s / qps`, and sleeps until it. The reservation is
//! made under a short lock that never spans the sleep.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, sleep_until};

#[derive(Debug)]
pub struct RateLimiter {
    qps: u32,
    per: Duration,
    next: Mutex<Instant>,
}

impl RateLimiter {
    /// Create a limiter allowing `qps` tokens per second; 0 means no limiter.
    pub fn new(qps: u32) -> Option<Self> {
        if qps == 0 {
            return None;
        }
        Some(Self {
            qps,
            per: Duration::from_secs(1) / qps,
            next: Mutex::new(Instant::now()),
        })
    }

    pub fn qps(&self) -> u32 {
        self.qps
    }

    /// Wait until the next token is available
    pub async fn take(&self) {
        let slot = {
            let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = (*next).max(Instant::now());
            *next = slot + self.per;
            slot
        };
        sleep_until(slot).await;
    }
}
