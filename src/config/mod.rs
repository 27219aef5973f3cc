/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Configuration module
//!
//! Programmatic tunables for the pool and its logging.

pub mod types;

pub use types::{LogConfig, PoolConfig};
