/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Request lifecycle
//!
//! A [`Request`] is boxed once and then moved from the ingress queue to an
//! endpoint queue to an exchange table. The two terminal operations,
//! [`RequestPool::complete`] and [`RequestPool::fail`], take the box by value,
//! so a request can be answered at most once; every path that drops a request
//! goes through one of them, so it is answered at least once.

use crate::core::dns_utils::{first_question, mark_no_response};
use crate::core::error::{DnsError, NoResponse, Result};
use crossbeam_queue::ArrayQueue;
use hickory_proto::op::Message;
use hickory_proto::rr::RecordType;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Outcome delivered on a query's result channel
///
/// A real answer carries `error: None`. A synthesized failure carries the
/// original query with response code [`RCODE_NO_RESPONSE`] and the reason.
///
/// [`RCODE_NO_RESPONSE`]: crate::core::dns_utils::RCODE_NO_RESPONSE
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub message: Message,
    pub error: Option<NoResponse>,
}

impl QueryResult {
    /// Whether a real answer was received
    pub fn is_answer(&self) -> bool {
        self.error.is_none()
    }

    /// Convert into the answer, or the no-response reason
    pub fn into_result(self) -> Result<Message> {
        match self.error {
            None => Ok(self.message),
            Some(reason) => Err(DnsError::NoResponse(reason)),
        }
    }
}

/// Where a query's single result is delivered
///
/// A shared unbounded channel lets one consumer collect the results of many
/// queries, the usual shape for brute-force enumeration.
#[derive(Debug)]
pub enum ResultSender {
    Oneshot(oneshot::Sender<QueryResult>),
    Channel(mpsc::UnboundedSender<QueryResult>),
}

impl ResultSender {
    /// Deliver the result; a receiver that went away is not an error.
    fn send(self, result: QueryResult) {
        match self {
            ResultSender::Oneshot(tx) => {
                let _ = tx.send(result);
            }
            ResultSender::Channel(tx) => {
                let _ = tx.send(result);
            }
        }
    }
}

impl From<oneshot::Sender<QueryResult>> for ResultSender {
    fn from(tx: oneshot::Sender<QueryResult>) -> Self {
        ResultSender::Oneshot(tx)
    }
}

impl From<mpsc::UnboundedSender<QueryResult>> for ResultSender {
    fn from(tx: mpsc::UnboundedSender<QueryResult>) -> Self {
        ResultSender::Channel(tx)
    }
}

/// One in-flight query
#[derive(Debug)]
pub struct Request {
    ctx: Option<CancellationToken>,
    pub(crate) id: u16,
    /// Query name without the trailing root label, lower-cased
    pub(crate) name: String,
    pub(crate) qtype: RecordType,
    pub(crate) msg: Message,
    result: Option<ResultSender>,
}

impl Request {
    fn empty() -> Self {
        Request {
            ctx: None,
            id: 0,
            name: String::new(),
            qtype: RecordType::A,
            msg: Message::new(),
            result: None,
        }
    }

    /// Whether the caller's context has been cancelled
    pub(crate) fn is_cancelled(&self) -> bool {
        self.ctx.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Exchange table key of this request
    pub(crate) fn key(&self) -> (u16, String) {
        (self.id, self.name.clone())
    }
}

/// Free list of request allocations
///
/// Purely an allocation cache modeled on the reuse connection pool: released
/// requests are scrubbed and parked in a bounded queue, and a full queue
/// simply drops them.
#[derive(Debug)]
pub struct RequestPool {
    free: Option<ArrayQueue<Box<Request>>>,
}

impl RequestPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: (capacity > 0).then(|| ArrayQueue::new(capacity)),
        }
    }

    /// Wrap a query into a request, reusing a parked allocation if possible
    ///
    /// A message without a question cannot be matched to an answer; it is
    /// handed back unchanged together with the sender.
    pub fn acquire(
        &self,
        ctx: CancellationToken,
        msg: Message,
        result: ResultSender,
    ) -> std::result::Result<Box<Request>, (Message, ResultSender)> {
        let Some((id, name, qtype)) = first_question(&msg) else {
            return Err((msg, result));
        };

        let mut req = self
            .free
            .as_ref()
            .and_then(ArrayQueue::pop)
            .unwrap_or_else(|| Box::new(Request::empty()));
        req.ctx = Some(ctx);
        req.id = id;
        req.name.clear();
        req.name.push_str(&name);
        req.qtype = qtype;
        req.msg = msg;
        req.result = Some(result);
        Ok(req)
    }

    /// Terminal action: deliver a real answer
    pub fn complete(&self, mut req: Box<Request>, answer: Message) {
        if let Some(result) = req.result.take() {
            result.send(QueryResult {
                message: answer,
                error: None,
            });
        }
        self.release(req);
    }

    /// Terminal action: deliver a synthesized no-response outcome
    pub fn fail(&self, mut req: Box<Request>, reason: NoResponse) {
        if let Some(result) = req.result.take() {
            let mut message = std::mem::replace(&mut req.msg, Message::new());
            mark_no_response(&mut message);
            result.send(QueryResult {
                message,
                error: Some(reason),
            });
        }
        self.release(req);
    }

    /// Number of parked allocations
    pub fn idle(&self) -> usize {
        self.free.as_ref().map_or(0, ArrayQueue::len)
    }

    fn release(&self, mut req: Box<Request>) {
        req.ctx = None;
        req.msg = Message::new();
        req.result = None;
        if let Some(free) = &self.free {
            let _ = free.push(req);
        }
    }
}

/// Deliver a no-response outcome for a message that never became a request
pub(crate) fn reject(msg: Message, result: ResultSender, reason: NoResponse) {
    let mut message = msg;
    mark_no_response(&mut message);
    result.send(QueryResult {
        message,
        error: Some(reason),
    });
}
