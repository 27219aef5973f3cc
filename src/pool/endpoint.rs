/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! One resolver endpoint
//!
//! An endpoint owns a connected UDP socket, a send queue, and the exchange
//! table of queries it has written but not yet seen answered. Two background
//! tasks run per endpoint:
//! - the response reader, which matches datagrams to outstanding exchanges
//!   and hands truncated answers to a TCP retry
//! - the expiry sweeper, which fails exchanges whose deadline passed
//!
//! Sends are not made by the endpoint itself: the pool's dispatch loop asks
//! [`Endpoint::ready`] and then calls [`Endpoint::write_next_msg`], which keeps
//! one endpoint's writes spaced by at least `1s / qps`.

use crate::config::PoolConfig;
use crate::core::dns_utils::first_question;
use crate::core::error::{NoResponse, Result};
use crate::network::connector::Connector;
use crate::network::transport::{exchange_over_stream, recv_message_udp, send_message_udp};
use crate::pool::exchange_map::ExchangeMap;
use crate::pool::queue::SignalQueue;
use crate::pool::request::{Request, RequestPool};
use crate::pool::stats::{EndpointStats, StatsSnapshot};
use hickory_proto::op::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::time::{Instant, MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared collaborators every endpoint of a pool is built with
#[derive(Debug, Clone)]
pub(crate) struct EndpointContext {
    pub requests: Arc<RequestPool>,
    pub connector: Arc<dyn Connector>,
    pub config: PoolConfig,
}

#[derive(Debug)]
pub struct Endpoint {
    addr: SocketAddr,
    socket: UdpSocket,
    queue: SignalQueue<Box<Request>>,
    exchanges: ExchangeMap,
    qps: u32,
    /// Minimum spacing between two writes
    interval: Duration,
    epoch: Instant,
    /// Earliest next write, in nanoseconds since `epoch`
    next_send: AtomicU64,
    /// Exchange lifetime in milliseconds
    timeout_ms: AtomicU64,
    stats: EndpointStats,
    shutdown: CancellationToken,
    ctx: EndpointContext,
}

impl Endpoint {
    /// Build the endpoint and start its reader and sweeper tasks
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn start(
        addr: SocketAddr,
        socket: UdpSocket,
        qps: u32,
        exchange_timeout: Duration,
        ctx: EndpointContext,
    ) -> Arc<Self> {
        let qps = qps.max(1);
        let endpoint = Arc::new(Self {
            addr,
            socket,
            queue: SignalQueue::new(),
            exchanges: ExchangeMap::new(),
            qps,
            interval: Duration::from_secs(1) / qps,
            epoch: Instant::now(),
            next_send: AtomicU64::new(0),
            timeout_ms: AtomicU64::new(millis(exchange_timeout)),
            stats: EndpointStats::default(),
            shutdown: CancellationToken::new(),
            ctx,
        });

        tokio::spawn(endpoint.clone().responses());
        tokio::spawn(endpoint.clone().timeouts());

        info!(
            endpoint = %addr,
            qps,
            timeout_ms = millis(exchange_timeout),
            "Resolver endpoint started"
        );
        endpoint
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn qps(&self) -> u32 {
        self.qps
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Queries waiting for their send slot
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Queries written and still waiting for an answer
    pub fn in_flight(&self) -> usize {
        self.exchanges.len()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    /// Change the lifetime of exchanges inserted from now on
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms.store(millis(timeout), Ordering::Relaxed);
    }

    /// Accept a request for sending
    pub(crate) fn query(&self, req: Box<Request>) {
        if self.is_stopped() {
            self.ctx.requests.fail(req, NoResponse::EndpointStopped);
            return;
        }
        self.queue.append(req);

        // stop() may have drained the queue between the check and the append
        if self.is_stopped() {
            self.drain_queue(NoResponse::EndpointStopped);
        }
    }

    /// Whether a write is due at `now`
    pub(crate) fn ready(&self, now: Instant) -> bool {
        !self.is_stopped()
            && !self.queue.is_empty()
            && nanos_since(self.epoch, now) >= self.next_send.load(Ordering::Acquire)
    }

    /// Write the oldest queued query
    ///
    /// Returns whether the wire was touched, in which case the next write
    /// slot is pushed out by one interval.
    pub(crate) async fn write_next_msg(&self) -> bool {
        if self.is_stopped() {
            return false;
        }
        let Some(req) = self.queue.next() else {
            return false;
        };
        if req.is_cancelled() {
            debug!(endpoint = %self.addr, query_id = req.id, "Dropping cancelled query before send");
            self.ctx.requests.fail(req, NoResponse::Cancelled);
            return false;
        }

        let (id, name) = req.key();
        let msg = req.msg.clone();

        // Track before writing so a fast answer always finds its exchange.
        if let Err(req) = self.exchanges.insert(req, self.timeout()) {
            debug!(endpoint = %self.addr, query_id = id, name = %name, "Exchange key already in flight");
            self.ctx.requests.fail(req, NoResponse::IdCollision);
            return false;
        }

        let sent = send_message_udp(&self.socket, &msg).await;
        self.next_send.store(
            nanos_since(self.epoch, Instant::now() + self.interval),
            Ordering::Release,
        );

        if let Err(e) = sent {
            warn!(endpoint = %self.addr, query_id = id, error = %e, "UDP send failed");
            if let Some(req) = self.exchanges.remove(id, &name) {
                self.ctx.requests.fail(req, NoResponse::SendFailed);
            }
            return true;
        }

        debug!(endpoint = %self.addr, query_id = id, name = %name, "Query sent");

        // stop() may have drained the table before the insert became visible
        if self.is_stopped()
            && let Some(req) = self.exchanges.remove(id, &name)
        {
            self.ctx.requests.fail(req, NoResponse::EndpointStopped);
        }
        true
    }

    /// Stop the endpoint and fail everything it still holds
    ///
    /// Idempotent; returns false if the endpoint was already stopped.
    pub(crate) fn stop(&self, reason: NoResponse) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        self.shutdown.cancel();

        let queued = self.drain_queue(reason);
        let mut in_flight = 0;
        for req in self.exchanges.remove_all() {
            self.ctx.requests.fail(req, reason);
            in_flight += 1;
        }
        info!(endpoint = %self.addr, queued, in_flight, "Resolver endpoint stopped");
        true
    }

    fn drain_queue(&self, reason: NoResponse) -> usize {
        self.queue.drain(|req| self.ctx.requests.fail(req, reason))
    }

    /// Reader task: match answers to outstanding exchanges
    async fn responses(self: Arc<Self>) {
        let mut buf = vec![0u8; self.ctx.config.udp_buffer_size];
        let read_deadline = self.ctx.config.read_deadline;

        loop {
            select! {
                _ = self.shutdown.cancelled() => break,
                recv = timeout(read_deadline, recv_message_udp(&self.socket, &mut buf)) => {
                    match recv {
                        // Idle past the read deadline, poll shutdown again
                        Err(_) => continue,
                        Ok(Err(e)) => {
                            debug!(endpoint = %self.addr, error = %e, "UDP receive failed");
                        }
                        Ok(Ok(msg)) => self.handle_response(msg),
                    }
                }
            }
        }
        debug!(endpoint = %self.addr, "Response reader exited");
    }

    fn handle_response(self: &Arc<Self>, msg: Message) {
        let Some((id, name, _)) = first_question(&msg) else {
            debug!(endpoint = %self.addr, query_id = msg.id(), "Discarded answer without question");
            return;
        };
        let Some(req) = self.exchanges.remove(id, &name) else {
            debug!(
                endpoint = %self.addr,
                query_id = id,
                name = %name,
                "Discarded answer (no matching query or already expired)"
            );
            return;
        };

        if msg.truncated() {
            self.stats.collect_truncated();
            debug!(endpoint = %self.addr, query_id = id, name = %name, "Truncated answer, retrying over TCP");
            tokio::spawn(self.clone().tcp_exchange(req));
            return;
        }

        self.stats.collect(&msg);
        self.ctx.requests.complete(req, msg);
    }

    /// Repeat a truncated query over TCP and deliver its outcome
    async fn tcp_exchange(self: Arc<Self>, req: Box<Request>) {
        let outcome = select! {
            _ = self.shutdown.cancelled() => Err(NoResponse::EndpointStopped),
            answer = self.exchange_over_tcp(&req.msg) => answer.map_err(|e| {
                debug!(endpoint = %self.addr, query_id = req.id, error = %e, "TCP retry failed");
                NoResponse::TcpRetryFailed
            }),
        };

        match outcome {
            Ok(answer) => {
                self.stats.collect(&answer);
                self.ctx.requests.complete(req, answer);
            }
            Err(reason) => {
                self.stats.collect_timeout();
                self.ctx.requests.fail(req, reason);
            }
        }
    }

    async fn exchange_over_tcp(&self, msg: &Message) -> Result<Message> {
        let limit = self.ctx.config.tcp_timeout;
        let mut stream = self.ctx.connector.connect_stream(self.addr, limit).await?;
        exchange_over_stream(&mut stream, msg, limit).await
    }

    /// Sweeper task: fail exchanges past their deadline
    async fn timeouts(self: Arc<Self>) {
        let mut ticker = interval(self.ctx.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    for req in self.exchanges.remove_expired() {
                        debug!(endpoint = %self.addr, query_id = req.id, name = %req.name, "Query timed out");
                        self.stats.collect_timeout();
                        self.ctx.requests.fail(req, NoResponse::Timeout);
                    }
                }
            }
        }
        debug!(endpoint = %self.addr, "Expiry sweeper exited");
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn nanos_since(epoch: Instant, t: Instant) -> u64 {
    u64::try_from(t.saturating_duration_since(epoch).as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::connector::DefaultConnector;
    use crate::pool::request::QueryResult;
    use hickory_proto::op::Query;
    use hickory_proto::rr::{Name, RecordType};
    use std::str::FromStr;
    use tokio::sync::oneshot;

    fn context() -> EndpointContext {
        EndpointContext {
            requests: Arc::new(RequestPool::new(16)),
            connector: Arc::new(DefaultConnector),
            config: PoolConfig::default(),
        }
    }

    async fn silent_endpoint(qps: u32, timeout: Duration) -> (Arc<Endpoint>, UdpSocket) {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let ctx = context();
        let socket = ctx.connector.connect_datagram(addr).await.unwrap();
        (Endpoint::start(addr, socket, qps, timeout, ctx), server)
    }

    fn request(
        endpoint: &Endpoint,
        ctx: CancellationToken,
        id: u16,
        name: &str,
    ) -> (Box<Request>, oneshot::Receiver<QueryResult>) {
        let mut msg = Message::new();
        msg.set_id(id);
        msg.add_query(Query::query(Name::from_str(name).unwrap(), RecordType::A));
        let (tx, rx) = oneshot::channel();
        let req = endpoint.ctx.requests.acquire(ctx, msg, tx.into()).unwrap();
        (req, rx)
    }

    #[tokio::test]
    async fn ready_respects_interval() {
        let (endpoint, _server) = silent_endpoint(10, Duration::from_secs(5)).await;
        let (a, _rx_a) = request(&endpoint, CancellationToken::new(), 1, "a.example.");
        let (b, _rx_b) = request(&endpoint, CancellationToken::new(), 2, "b.example.");
        endpoint.query(a);
        endpoint.query(b);

        assert!(endpoint.ready(Instant::now()));
        assert!(endpoint.write_next_msg().await);
        assert!(!endpoint.ready(Instant::now()));
        assert!(endpoint.ready(Instant::now() + Duration::from_millis(100)));
        assert_eq!(endpoint.in_flight(), 1);
        assert_eq!(endpoint.queued(), 1);
        endpoint.stop(NoResponse::Shutdown);
    }

    #[tokio::test]
    async fn cancelled_request_is_not_sent() {
        let (endpoint, server) = silent_endpoint(100, Duration::from_secs(5)).await;
        let ctx = CancellationToken::new();
        let (req, rx) = request(&endpoint, ctx.clone(), 7, "gone.example.");
        ctx.cancel();
        endpoint.query(req);

        assert!(!endpoint.write_next_msg().await);
        assert_eq!(rx.await.unwrap().error, Some(NoResponse::Cancelled));
        assert!(!endpoint.ready(Instant::now()));

        let mut buf = [0u8; 512];
        assert!(timeout(Duration::from_millis(50), server.recv_from(&mut buf)).await.is_err());
        endpoint.stop(NoResponse::Shutdown);
    }

    #[tokio::test]
    async fn colliding_key_fails_second_request() {
        let (endpoint, _server) = silent_endpoint(1000, Duration::from_secs(5)).await;
        let (first, _rx1) = request(&endpoint, CancellationToken::new(), 3, "same.example.");
        let (second, rx2) = request(&endpoint, CancellationToken::new(), 3, "same.example.");
        endpoint.query(first);
        endpoint.query(second);

        assert!(endpoint.write_next_msg().await);
        assert!(!endpoint.write_next_msg().await);
        assert_eq!(rx2.await.unwrap().error, Some(NoResponse::IdCollision));
        assert_eq!(endpoint.in_flight(), 1);
        endpoint.stop(NoResponse::Shutdown);
    }

    #[tokio::test]
    async fn unanswered_exchange_expires() {
        let (endpoint, _server) = silent_endpoint(100, Duration::from_millis(50)).await;
        let (req, rx) = request(&endpoint, CancellationToken::new(), 11, "slow.example.");
        endpoint.query(req);
        assert!(endpoint.write_next_msg().await);

        let result = timeout(Duration::from_millis(500), rx).await.unwrap().unwrap();
        assert_eq!(result.error, Some(NoResponse::Timeout));
        assert_eq!(endpoint.stats().timeouts, 1);
        endpoint.stop(NoResponse::Shutdown);
    }

    #[tokio::test]
    async fn stop_fails_queued_and_in_flight_once() {
        let (endpoint, _server) = silent_endpoint(1000, Duration::from_secs(30)).await;
        let (sent, rx_sent) = request(&endpoint, CancellationToken::new(), 1, "sent.example.");
        endpoint.query(sent);
        assert!(endpoint.write_next_msg().await);
        let (queued, rx_queued) = request(&endpoint, CancellationToken::new(), 2, "queued.example.");
        endpoint.query(queued);

        assert!(endpoint.stop(NoResponse::Shutdown));
        assert!(!endpoint.stop(NoResponse::Shutdown));
        assert_eq!(rx_sent.await.unwrap().error, Some(NoResponse::Shutdown));
        assert_eq!(rx_queued.await.unwrap().error, Some(NoResponse::Shutdown));

        let (late, rx_late) = request(&endpoint, CancellationToken::new(), 3, "late.example.");
        endpoint.query(late);
        assert_eq!(rx_late.await.unwrap().error, Some(NoResponse::EndpointStopped));
        assert_eq!(endpoint.in_flight(), 0);
        assert_eq!(endpoint.queued(), 0);
    }
}
