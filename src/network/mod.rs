/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Network plumbing: wire helpers and connection setup.

pub mod connector;
pub mod transport;
