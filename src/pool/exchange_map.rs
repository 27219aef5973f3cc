/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Request/response correlation table of one endpoint
//!
//! Keys are `(transaction id, query name)`. Ids alone are a 16-bit space
//! shared by thousands of outstanding brute-force queries, so the name is
//! part of the key to keep unrelated queries that reuse an id apart.
//!
//! Insert (send step), remove-on-match (reader) and remove-on-expiry (sweeper)
//! run concurrently; the sharded map keeps each of them to a single shard lock
//! that is never held across I/O.

use crate::pool::request::Request;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::Duration;
use tokio::time::Instant;

type Key = (u16, String);

#[derive(Debug)]
struct Exchange {
    request: Box<Request>,
    deadline: Instant,
}

#[derive(Debug, Default)]
pub struct ExchangeMap {
    entries: DashMap<Key, Exchange>,
}

impl ExchangeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a sent request until `now + timeout`
    ///
    /// A live entry with the same key is never overwritten: the new request is
    /// handed back so the caller can fail it.
    pub fn insert(&self, request: Box<Request>, timeout: Duration) -> Result<(), Box<Request>> {
        match self.entries.entry(request.key()) {
            Entry::Occupied(_) => Err(request),
            Entry::Vacant(slot) => {
                slot.insert(Exchange {
                    request,
                    deadline: Instant::now() + timeout,
                });
                Ok(())
            }
        }
    }

    /// Take the request waiting for `(id, name)`
    pub fn remove(&self, id: u16, name: &str) -> Option<Box<Request>> {
        self.entries
            .remove(&(id, name.to_string()))
            .map(|(_, exchange)| exchange.request)
    }

    /// Take every request whose deadline has passed
    pub fn remove_expired(&self) -> Vec<Box<Request>> {
        let now = Instant::now();
        let expired: Vec<Key> = self
            .entries
            .iter()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| entry.key().clone())
            .collect();

        // Re-check under the shard lock: the reader may have matched the entry
        // between the scan and the removal.
        expired
            .into_iter()
            .filter_map(|key| {
                self.entries
                    .remove_if(&key, |_, exchange| exchange.deadline <= now)
                    .map(|(_, exchange)| exchange.request)
            })
            .collect()
    }

    /// Take every tracked request
    pub fn remove_all(&self) -> Vec<Box<Request>> {
        let keys: Vec<Key> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|(_, exchange)| exchange.request))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::request::RequestPool;
    use hickory_proto::op::{Message, Query};
    use hickory_proto::rr::{Name, RecordType};
    use std::str::FromStr;
    use std::sync::Arc;
    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;

    fn request(pool: &RequestPool, id: u16, name: &str) -> Box<Request> {
        let mut msg = Message::new();
        msg.set_id(id);
        msg.add_query(Query::query(Name::from_str(name).unwrap(), RecordType::A));
        let (tx, _rx) = oneshot::channel();
        pool.acquire(CancellationToken::new(), msg, tx.into()).unwrap()
    }

    #[test]
    fn same_id_different_names_coexist() {
        let pool = RequestPool::new(0);
        let map = ExchangeMap::new();
        assert!(map.insert(request(&pool, 1, "a.example."), Duration::from_secs(5)).is_ok());
        assert!(map.insert(request(&pool, 1, "b.example."), Duration::from_secs(5)).is_ok());
        assert_eq!(map.len(), 2);

        let a = map.remove(1, "a.example").unwrap();
        assert_eq!(a.name, "a.example");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn collision_is_rejected_without_overwrite() {
        let pool = RequestPool::new(0);
        let map = ExchangeMap::new();
        let mut first = request(&pool, 9, "dup.example.");
        first.qtype = RecordType::MX;
        map.insert(first, Duration::from_secs(5)).unwrap();

        let rejected = map
            .insert(request(&pool, 9, "dup.example."), Duration::from_secs(5))
            .unwrap_err();
        assert_eq!(rejected.qtype, RecordType::A);

        let kept = map.remove(9, "dup.example").unwrap();
        assert_eq!(kept.qtype, RecordType::MX);
        assert!(map.is_empty());
    }

    #[test]
    fn unknown_key_is_ignored() {
        let map = ExchangeMap::new();
        assert!(map.remove(5, "nothing.example").is_none());
    }

    #[tokio::test]
    async fn only_expired_entries_are_swept() {
        let pool = RequestPool::new(0);
        let map = ExchangeMap::new();
        map.insert(request(&pool, 1, "short.example."), Duration::from_millis(10))
            .unwrap();
        map.insert(request(&pool, 2, "long.example."), Duration::from_secs(60))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let expired = map.remove_expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].name, "short.example");
        assert_eq!(map.len(), 1);
        assert!(map.remove(1, "short.example").is_none());
    }

    #[test]
    fn remove_all_empties_the_table() {
        let pool = RequestPool::new(0);
        let map = ExchangeMap::new();
        for id in 0..50u16 {
            map.insert(request(&pool, id, "bulk.example."), Duration::from_secs(5))
                .unwrap();
        }
        assert_eq!(map.remove_all().len(), 50);
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn concurrent_match_and_sweep_take_each_entry_once() {
        let pool = RequestPool::new(0);
        let map = Arc::new(ExchangeMap::new());
        for id in 0..500u16 {
            map.insert(request(&pool, id, "race.example."), Duration::ZERO)
                .unwrap();
        }

        let matcher = {
            let map = map.clone();
            tokio::spawn(async move {
                (0..500u16)
                    .filter(|id| map.remove(*id, "race.example").is_some())
                    .count()
            })
        };
        let sweeper = {
            let map = map.clone();
            tokio::spawn(async move { map.remove_expired().len() })
        };

        let matched = matcher.await.unwrap();
        let swept = sweeper.await.unwrap();
        assert_eq!(matched + swept, 500);
        assert!(map.is_empty());
    }
}
