/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Resolver pool
//!
//! [`ResolverPool`] accepts queries on an ingress queue and runs two loops:
//! - admission: takes a global token when a rate limit is set, picks an
//!   endpoint through the [`Selector`] and hands the query over
//! - dispatch: cycles every endpoint and triggers one send for each endpoint
//!   whose pacing slot has come
//!
//! Each endpoint matches its own answers and expires its own exchanges, see
//! [`endpoint`].

pub mod endpoint;
pub mod exchange_map;
pub mod queue;
pub mod rate_limiter;
pub mod request;
pub mod selector;
pub mod stats;


use crate::config::PoolConfig;
use crate::core::error::{DnsError, NoResponse, Result};
use crate::network::connector::{Connector, DefaultConnector, resolve_endpoint_addr};
use crate::pool::endpoint::{Endpoint, EndpointContext};
use crate::pool::queue::SignalQueue;
use crate::pool::rate_limiter::RateLimiter;
use crate::pool::request::{QueryResult, Request, RequestPool, ResultSender, reject};
use crate::pool::selector::{RandomSelector, Selector};
use crate::pool::stats::StatsSnapshot;
use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use hickory_proto::op::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::select;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A managed pool of DNS resolver endpoints
///
/// Dropping the pool shuts it down.
#[derive(Debug)]
pub struct ResolverPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    ingress: SignalQueue<Box<Request>>,
    selector: Arc<dyn Selector>,
    /// Addresses already in the pool, for dedup
    addrs: DashMap<SocketAddr, ()>,
    detector: ArcSwapOption<Endpoint>,
    limiter: ArcSwapOption<RateLimiter>,
    /// Sum of the rates of running endpoints
    endpoint_qps: AtomicU64,
    timeout_ms: AtomicU64,
    requests: Arc<RequestPool>,
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    shutdown: CancellationToken,
}

impl ResolverPool {
    /// Create a pool with default settings, random selection and plain
    /// UDP/TCP transport
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self::start(
            PoolConfig::default(),
            Arc::new(RandomSelector::new()),
            Arc::new(DefaultConnector),
        )
    }

    pub fn with_config(config: PoolConfig) -> Result<Self> {
        Self::with_parts(config, Arc::new(RandomSelector::new()), Arc::new(DefaultConnector))
    }

    /// Create a pool with a custom selection policy and transport
    pub fn with_parts(
        config: PoolConfig,
        selector: Arc<dyn Selector>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::start(config, selector, connector))
    }

    fn start(config: PoolConfig, selector: Arc<dyn Selector>, connector: Arc<dyn Connector>) -> Self {
        let inner = Arc::new(PoolInner {
            ingress: SignalQueue::new(),
            selector,
            addrs: DashMap::new(),
            detector: ArcSwapOption::empty(),
            limiter: ArcSwapOption::empty(),
            endpoint_qps: AtomicU64::new(0),
            timeout_ms: AtomicU64::new(duration_millis(config.timeout)),
            requests: Arc::new(RequestPool::new(config.request_pool_size)),
            connector,
            config,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(inner.clone().admission());
        tokio::spawn(inner.clone().dispatch());
        debug!(timeout_ms = duration_millis(inner.config.timeout), "Resolver pool started");

        Self { inner }
    }

    /// Submit a query; its single result arrives on the returned receiver
    pub fn submit(&self, ctx: &CancellationToken, msg: Message) -> oneshot::Receiver<QueryResult> {
        let (tx, rx) = oneshot::channel();
        self.submit_to(ctx, msg, tx);
        rx
    }

    /// Submit a query whose single result is delivered on `sender`
    ///
    /// Never blocks on I/O. A pool that is shut down, or an already
    /// cancelled `ctx`, yields an immediate no-response result.
    pub fn submit_to(&self, ctx: &CancellationToken, msg: Message, sender: impl Into<ResultSender>) {
        let inner = &self.inner;
        let Some(req) = inner.prepare(ctx, msg, sender.into()) else {
            return;
        };
        inner.ingress.append(req);

        // shutdown() may have drained ingress between the check and the append
        if inner.shutdown.is_cancelled() {
            inner.drain_ingress();
        }
    }

    /// Submit a query and wait for its answer
    ///
    /// Fails with [`DnsError::ContextExpired`] if `ctx` ends first, and with
    /// [`DnsError::QueryFailed`] if no usable answer was received.
    pub async fn query(&self, ctx: &CancellationToken, msg: Message) -> Result<Message> {
        if ctx.is_cancelled() {
            return Err(DnsError::ContextExpired);
        }
        let rx = self.submit(ctx, msg);
        select! {
            result = rx => match result {
                Ok(result) if result.is_answer() => Ok(result.message),
                Ok(result) if result.error == Some(NoResponse::Cancelled) => Err(DnsError::ContextExpired),
                _ => Err(DnsError::QueryFailed),
            },
            _ = ctx.cancelled() => Err(DnsError::ContextExpired),
        }
    }

    /// Add endpoints sending at most `qps` queries per second each
    ///
    /// Addresses already in the pool are ignored; addresses that cannot be
    /// resolved or connected are skipped. Returns how many were added.
    pub async fn add_endpoints<I, S>(&self, qps: u32, addrs: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if qps == 0 {
            return Err(DnsError::config(
                "endpoint queries per second must be greater than zero",
            ));
        }
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(NoResponse::Shutdown.into());
        }

        let mut added = 0;
        for addr in addrs {
            let addr = addr.as_ref();
            let sa = match resolve_endpoint_addr(addr).await {
                Ok(sa) => sa,
                Err(e) => {
                    warn!(endpoint = addr, error = %e, "Skipping unresolvable resolver address");
                    continue;
                }
            };

            match inner.addrs.entry(sa) {
                Entry::Occupied(_) => {
                    debug!(endpoint = %sa, "Resolver already in pool");
                    continue;
                }
                Entry::Vacant(slot) => {
                    slot.insert(());
                }
            }

            let endpoint = match inner.start_endpoint(sa, qps).await {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    inner.addrs.remove(&sa);
                    warn!(endpoint = %sa, error = %e, "Skipping resolver that failed to connect");
                    continue;
                }
            };
            inner.selector.add(endpoint.clone());
            inner.endpoint_qps.fetch_add(u64::from(qps), Ordering::Relaxed);
            added += 1;

            // shutdown() may have closed the selector before the add
            if inner.shutdown.is_cancelled() {
                inner.selector.remove(&sa);
                inner.retire(&endpoint, NoResponse::Shutdown);
            }
        }

        info!(added, total = inner.selector.len(), qps, "Resolvers added to pool");
        Ok(added)
    }

    /// Stop and remove the endpoint at `addr`
    ///
    /// Its queued and in-flight queries fail with
    /// [`NoResponse::EndpointStopped`]. Returns whether it was in the pool.
    pub async fn remove_endpoint(&self, addr: &str) -> Result<bool> {
        let sa = resolve_endpoint_addr(addr).await?;
        let inner = &self.inner;
        let Some(endpoint) = inner.selector.remove(&sa) else {
            return Ok(false);
        };
        inner.addrs.remove(&sa);
        inner.retire(&endpoint, NoResponse::EndpointStopped);
        info!(endpoint = %sa, "Resolver removed from pool");
        Ok(true)
    }

    /// Install the endpoint used for wildcard detection queries
    ///
    /// It is kept out of the selector but paced, expired and shut down like
    /// any other endpoint. A previous detection endpoint is stopped.
    pub async fn set_detection_endpoint(&self, qps: u32, addr: &str) -> Result<()> {
        if qps == 0 {
            return Err(DnsError::config(
                "endpoint queries per second must be greater than zero",
            ));
        }
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(NoResponse::Shutdown.into());
        }

        let sa = resolve_endpoint_addr(addr).await?;
        let endpoint = inner.start_endpoint(sa, qps).await?;
        inner.endpoint_qps.fetch_add(u64::from(qps), Ordering::Relaxed);
        if let Some(previous) = inner.detector.swap(Some(endpoint.clone())) {
            inner.retire(&previous, NoResponse::EndpointStopped);
        }
        if inner.shutdown.is_cancelled() {
            inner.retire(&endpoint, NoResponse::Shutdown);
        }
        info!(endpoint = %sa, qps, "Detection resolver installed");
        Ok(())
    }

    /// Submit a query straight to the detection endpoint
    pub fn detection_query(&self, ctx: &CancellationToken, msg: Message) -> oneshot::Receiver<QueryResult> {
        let (tx, rx) = oneshot::channel();
        let inner = &self.inner;
        if let Some(req) = inner.prepare(ctx, msg, tx.into()) {
            match inner.detector.load_full() {
                Some(endpoint) => endpoint.query(req),
                None => inner.requests.fail(req, NoResponse::NoEndpoint),
            }
        }
        rx
    }

    /// Cap the aggregate admission rate; 0 removes the cap
    pub fn set_rate_limit(&self, qps: u32) {
        let limiter = RateLimiter::new(qps).map(Arc::new);
        self.inner.limiter.store(limiter);
        info!(qps, "Pool rate limit updated");
    }

    /// Aggregate rate of the pool
    ///
    /// The explicit cap when one is set, otherwise the sum of the running
    /// endpoints' rates.
    pub fn qps(&self) -> u64 {
        match self.inner.limiter.load_full() {
            Some(limiter) => u64::from(limiter.qps()),
            None => self.inner.endpoint_qps.load(Ordering::Relaxed),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.inner.timeout_ms.load(Ordering::Relaxed))
    }

    /// Change how long sent queries wait for an answer, for current and
    /// future endpoints
    pub fn set_timeout(&self, timeout: Duration) {
        let inner = &self.inner;
        inner.timeout_ms.store(duration_millis(timeout), Ordering::Relaxed);
        for endpoint in inner.endpoints() {
            endpoint.set_timeout(timeout);
        }
    }

    /// Number of endpoints available for selection
    pub fn len(&self) -> usize {
        self.inner.selector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outcome counters of every endpoint, detection endpoint included
    pub fn endpoint_stats(&self) -> Vec<(SocketAddr, StatsSnapshot)> {
        self.inner
            .endpoints()
            .iter()
            .map(|endpoint| (endpoint.addr(), endpoint.stats()))
            .collect()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop admission and fail everything still pending
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Default for ResolverPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ResolverPool {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl PoolInner {
    /// Turn a submission into a request, or answer it right away
    fn prepare(&self, ctx: &CancellationToken, msg: Message, sender: ResultSender) -> Option<Box<Request>> {
        if self.shutdown.is_cancelled() {
            reject(msg, sender, NoResponse::Shutdown);
            return None;
        }
        if ctx.is_cancelled() {
            reject(msg, sender, NoResponse::Cancelled);
            return None;
        }
        match self.requests.acquire(ctx.clone(), msg, sender) {
            Ok(req) => Some(req),
            Err((msg, sender)) => {
                reject(msg, sender, NoResponse::EmptyQuestion);
                None
            }
        }
    }

    async fn start_endpoint(&self, addr: SocketAddr, qps: u32) -> Result<Arc<Endpoint>> {
        let socket = self.connector.connect_datagram(addr).await?;
        let ctx = EndpointContext {
            requests: self.requests.clone(),
            connector: self.connector.clone(),
            config: self.config.clone(),
        };
        let timeout = Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed));
        Ok(Endpoint::start(addr, socket, qps, timeout, ctx))
    }

    /// Stop an endpoint and take its rate out of the pool sum
    fn retire(&self, endpoint: &Endpoint, reason: NoResponse) {
        if endpoint.stop(reason) {
            self.endpoint_qps
                .fetch_sub(u64::from(endpoint.qps()), Ordering::Relaxed);
        }
    }

    /// Selector endpoints plus the detection endpoint
    fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        let mut all = self.selector.all();
        if let Some(detector) = self.detector.load_full() {
            all.push(detector);
        }
        all
    }

    fn drain_ingress(&self) -> usize {
        self.ingress
            .drain(|req| self.requests.fail(req, NoResponse::Shutdown))
    }

    fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        let drained = self.drain_ingress();
        let mut endpoints = self.selector.close();
        if let Some(detector) = self.detector.swap(None) {
            endpoints.push(detector);
        }
        for endpoint in &endpoints {
            self.retire(endpoint, NoResponse::Shutdown);
        }
        self.addrs.clear();
        info!(endpoints = endpoints.len(), drained, "Resolver pool shut down");
    }

    /// Admission loop: move ingress requests to endpoints
    async fn admission(self: Arc<Self>) {
        'outer: loop {
            while !self.ingress.is_empty() {
                if let Some(limiter) = self.limiter.load_full() {
                    select! {
                        _ = self.shutdown.cancelled() => break 'outer,
                        _ = limiter.take() => {}
                    }
                }
                let Some(req) = self.ingress.next() else {
                    break;
                };
                match self.selector.pick() {
                    Some(endpoint) => endpoint.query(req),
                    None => {
                        debug!(query_id = req.id, name = %req.name, "No resolver available");
                        self.requests.fail(req, NoResponse::NoEndpoint);
                    }
                }
            }

            select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.ingress.signal() => {}
            }
        }

        self.drain_ingress();
        debug!("Admission loop exited");
    }

    /// Dispatch loop: trigger each endpoint's send when its slot comes
    async fn dispatch(self: Arc<Self>) {
        let idle = self.config.dispatch_idle;
        while !self.shutdown.is_cancelled() {
            let now = Instant::now();
            let mut any_ready = false;
            for endpoint in self.endpoints() {
                if endpoint.ready(now) {
                    any_ready = true;
                    endpoint.write_next_msg().await;
                }
            }

            if !any_ready {
                select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = sleep(idle) => {}
                }
            }
        }
        debug!("Dispatch loop exited");
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
