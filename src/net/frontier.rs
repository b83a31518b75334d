//! The shared, deduplicated, bounded queue of addresses still to probe,
//! and the registry of already-seen addresses.
//!
//! Grounded on the original `net/addrman.rs`'s stats-struct idiom and its
//! `tokio::sync::Mutex`-guarded shared-state pattern; its bucketed
//! new/tried-table machinery has no counterpart here and is not carried
//! over.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, Notify};

use crate::address::Address;

/// Default age threshold past which an address, while still recorded, is
/// excluded from first-discovery `offer`.
pub const DEFAULT_MAX_ADDRESS_AGE: Duration = Duration::from_secs(2 * 24 * 60 * 60);

#[derive(Debug, Default, Clone, Copy)]
pub struct FrontierStats {
    pub seen: usize,
    pub pending: usize,
    pub in_flight: usize,
}

struct Inner {
    seen: HashSet<Address>,
    pending: VecDeque<Address>,
    in_flight: usize,
    closed: bool,
}

/// Owns `seen` and `pending` exclusively.
/// `take()` atomically pops an address and marks it in-flight, so the
/// controller's quiescence check (pending empty, nothing in-flight) can
/// never race with a worker that has popped an address but not yet
/// re-offered the addresses it discovers — see `net/controller.rs`.
pub struct Frontier {
    inner: Mutex<Inner>,
    notify: Notify,
    max_address_age: Duration,
}

impl Frontier {
    pub fn new(max_address_age: Duration) -> Frontier {
        Frontier {
            inner: Mutex::new(Inner {
                seen: HashSet::new(),
                pending: VecDeque::new(),
                in_flight: 0,
                closed: false,
            }),
            notify: Notify::new(),
            max_address_age,
        }
    }

    /// If `addr` is not already in `seen`, inserts into `seen` and
    /// `pending` and returns `true`; otherwise returns `false`. Atomic
    /// with respect to the dedup decision.
    pub async fn offer(&self, addr: Address) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.closed || inner.seen.contains(&addr) {
            return false;
        }
        inner.seen.insert(addr.clone());
        inner.pending.push_back(addr);
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// As [`Frontier::offer`], but additionally excludes addresses older
    /// than the configured age threshold from `pending` while still
    /// recording them in `seen`. Used by first-discovery
    /// ingestion of `addr`/`addrv2` timestamps.
    pub async fn offer_with_age(&self, addr: Address, advertised_unix_ts: u32) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let age = now.saturating_sub(advertised_unix_ts as u64);
        if age > self.max_address_age.as_secs() {
            let mut inner = self.inner.lock().await;
            if inner.closed || inner.seen.contains(&addr) {
                return false;
            }
            inner.seen.insert(addr);
            return false;
        }
        self.offer(addr).await
    }

    /// Blocks until an address is available or the frontier is closed.
    /// Returns `None` only once `pending` is drained and [`Frontier::close`]
    /// has been called.
    pub async fn take(&self) -> Option<Address> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().await;
                if let Some(addr) = inner.pending.pop_front() {
                    inner.in_flight += 1;
                    return Some(addr);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Called by a worker once it has finished a session and filed every
    /// `offer()` the session's discoveries produced.
    pub async fn mark_done(&self) {
        let mut inner = self.inner.lock().await;
        inner.in_flight = inner.in_flight.saturating_sub(1);
    }

    /// Refuses further `offer`s and drains current `pending` to readers;
    /// after that, `take` returns `None`.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    pub async fn is_quiescent(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.pending.is_empty() && inner.in_flight == 0
    }

    pub async fn stats(&self) -> FrontierStats {
        let inner = self.inner.lock().await;
        FrontierStats {
            seen: inner.seen.len(),
            pending: inner.pending.len(),
            in_flight: inner.in_flight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn addr(n: u8) -> Address {
        Address::ipv4(Ipv4Addr::new(n, n, n, n), 8333)
    }

    #[tokio::test]
    async fn offer_dedups() {
        let frontier = Frontier::new(DEFAULT_MAX_ADDRESS_AGE);
        assert!(frontier.offer(addr(1)).await);
        assert!(!frontier.offer(addr(1)).await);
        let stats = frontier.stats().await;
        assert_eq!(stats.seen, 1);
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn take_blocks_until_offer_then_returns() {
        let frontier = Arc::new(Frontier::new(DEFAULT_MAX_ADDRESS_AGE));
        let f2 = frontier.clone();
        let handle = tokio::spawn(async move { f2.take().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        frontier.offer(addr(2)).await;

        let result = handle.await.unwrap();
        assert_eq!(result, Some(addr(2)));
    }

    #[tokio::test]
    async fn close_drains_pending_then_returns_none() {
        let frontier = Frontier::new(DEFAULT_MAX_ADDRESS_AGE);
        frontier.offer(addr(3)).await;
        frontier.close().await;
        assert!(!frontier.offer(addr(4)).await);
        assert_eq!(frontier.take().await, Some(addr(3)));
        assert_eq!(frontier.take().await, None);
    }

    #[tokio::test]
    async fn quiescence_requires_empty_pending_and_no_in_flight() {
        let frontier = Frontier::new(DEFAULT_MAX_ADDRESS_AGE);
        assert!(frontier.is_quiescent().await);
        frontier.offer(addr(5)).await;
        assert!(!frontier.is_quiescent().await);
        let taken = frontier.take().await.unwrap();
        assert_eq!(taken, addr(5));
        assert!(!frontier.is_quiescent().await);
        frontier.mark_done().await;
        assert!(frontier.is_quiescent().await);
    }

    #[tokio::test]
    async fn stale_address_is_seen_but_not_pending() {
        let frontier = Frontier::new(Duration::from_secs(60));
        let recorded = frontier.offer_with_age(addr(6), 1).await;
        assert!(!recorded);
        let stats = frontier.stats().await;
        assert_eq!(stats.seen, 1);
        assert_eq!(stats.pending, 0);
    }
}
