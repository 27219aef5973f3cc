/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Endpoint selection policies
//!
//! The admission loop only depends on [`Selector`]; the active set itself is
//! a copy-on-write vector so `pick` never takes a lock.

use crate::pool::endpoint::Endpoint;
use arc_swap::ArcSwap;
use rand::Rng;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Chooses an endpoint for each admitted query
pub trait Selector: Send + Sync + Debug + 'static {
    /// Choose a running endpoint, or `None` if there is none
    fn pick(&self) -> Option<Arc<Endpoint>>;

    fn add(&self, endpoint: Arc<Endpoint>);

    /// Snapshot of every endpoint in the set
    fn all(&self) -> Vec<Arc<Endpoint>>;

    fn remove(&self, addr: &SocketAddr) -> Option<Arc<Endpoint>>;

    /// Empty the set, returning what it held
    fn close(&self) -> Vec<Arc<Endpoint>>;

    fn len(&self) -> usize {
        self.all().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Copy-on-write endpoint set shared by the policies below
#[derive(Debug)]
struct EndpointSet {
    endpoints: ArcSwap<Vec<Arc<Endpoint>>>,
}

impl Default for EndpointSet {
    fn default() -> Self {
        Self {
            endpoints: ArcSwap::from_pointee(Vec::new()),
        }
    }
}

impl EndpointSet {
    fn add(&self, endpoint: Arc<Endpoint>) {
        self.endpoints.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(endpoint.clone());
            next
        });
    }

    fn remove(&self, addr: &SocketAddr) -> Option<Arc<Endpoint>> {
        let mut removed = None;
        self.endpoints.rcu(|current| {
            removed = current.iter().find(|e| e.addr() == *addr).cloned();
            current
                .iter()
                .filter(|e| e.addr() != *addr)
                .cloned()
                .collect::<Vec<_>>()
        });
        removed
    }

    fn all(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints.load().as_ref().clone()
    }

    fn close(&self) -> Vec<Arc<Endpoint>> {
        let previous = self.endpoints.swap(Arc::new(Vec::new()));
        previous.as_ref().clone()
    }

    /// First running endpoint at or after `start`, wrapping around
    fn running_from(endpoints: &[Arc<Endpoint>], start: usize) -> Option<Arc<Endpoint>> {
        let len = endpoints.len();
        (0..len)
            .map(|offset| &endpoints[(start + offset) % len])
            .find(|e| !e.is_stopped())
            .cloned()
    }
}

/// Uniform random choice among running endpoints
#[derive(Debug, Default)]
pub struct RandomSelector {
    set: EndpointSet,
}

impl RandomSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Selector for RandomSelector {
    fn pick(&self) -> Option<Arc<Endpoint>> {
        let endpoints = self.set.endpoints.load();
        if endpoints.is_empty() {
            return None;
        }
        let start = rand::thread_rng().gen_range(0..endpoints.len());
        EndpointSet::running_from(&endpoints, start)
    }

    fn add(&self, endpoint: Arc<Endpoint>) {
        self.set.add(endpoint);
    }

    fn all(&self) -> Vec<Arc<Endpoint>> {
        self.set.all()
    }

    fn remove(&self, addr: &SocketAddr) -> Option<Arc<Endpoint>> {
        self.set.remove(addr)
    }

    fn close(&self) -> Vec<Arc<Endpoint>> {
        self.set.close()
    }

    fn len(&self) -> usize {
        self.set.endpoints.load().len()
    }
}

/// Strict rotation over running endpoints
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    set: EndpointSet,
    index: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Selector for RoundRobinSelector {
    fn pick(&self) -> Option<Arc<Endpoint>> {
        let endpoints = self.set.endpoints.load();
        if endpoints.is_empty() {
            return None;
        }
        let start = self.index.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        EndpointSet::running_from(&endpoints, start)
    }

    fn add(&self, endpoint: Arc<Endpoint>) {
        self.set.add(endpoint);
    }

    fn all(&self) -> Vec<Arc<Endpoint>> {
        self.set.all()
    }

    fn remove(&self, addr: &SocketAddr) -> Option<Arc<Endpoint>> {
        self.set.remove(addr)
    }

    fn close(&self) -> Vec<Arc<Endpoint>> {
        self.set.close()
    }

    fn len(&self) -> usize {
        self.set.endpoints.load().len()
    }
}

/// Running endpoint with the fewest queued plus in-flight queries
#[derive(Debug, Default)]
pub struct LeastLoadedSelector {
    set: EndpointSet,
}

impl LeastLoadedSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Selector for LeastLoadedSelector {
    fn pick(&self) -> Option<Arc<Endpoint>> {
        self.set
            .endpoints
            .load()
            .iter()
            .filter(|e| !e.is_stopped())
            .min_by_key(|e| e.queued() + e.in_flight())
            .cloned()
    }

    fn add(&self, endpoint: Arc<Endpoint>) {
        self.set.add(endpoint);
    }

    fn all(&self) -> Vec<Arc<Endpoint>> {
        self.set.all()
    }

    fn remove(&self, addr: &SocketAddr) -> Option<Arc<Endpoint>> {
        self.set.remove(addr)
    }

    fn close(&self) -> Vec<Arc<Endpoint>> {
        self.set.close()
    }

    fn len(&self) -> usize {
        self.set.endpoints.load().len()
    }
}
