//! Connection-count and per-connection rate enforcement (`spec.md` §4.1
//! "Enforcement limits").
//!
//! Global and per-app connection counts are read straight off
//! [`pushi_broker::Broker`]'s connection registry; only the per-IP count
//! needs state of its own here, since the broker has no notion of remote
//! address.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use dashmap::DashMap;
use governor::{Quota, RateLimiter};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use pushi_common::config::LimitsConfig;

#[derive(Default)]
pub struct IpConnectionCounter {
    counts: DashMap<IpAddr, usize>,
}

impl IpConnectionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments and returns the new count for `ip`.
    pub fn acquire(&self, ip: IpAddr) -> usize {
        let mut entry = self.counts.entry(ip).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn release(&self, ip: IpAddr) {
        if let Some(mut entry) = self.counts.get_mut(&ip) {
            *entry = entry.saturating_sub(1);
            if *entry == 0 {
                drop(entry);
                self.counts.remove(&ip);
            }
        }
    }

    pub fn count(&self, ip: IpAddr) -> usize {
        self.counts.get(&ip).map(|e| *e).unwrap_or(0)
    }
}

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-connection sliding-window approximation: `N messages / W seconds`
/// (`spec.md` §4.1), realized as a token bucket refilling at `N/W` per
/// second with burst `N` — the idiomatic `governor` mapping of a fixed
/// window onto a leaky bucket.
pub struct MessageRateLimiter {
    inner: DirectRateLimiter,
}

impl MessageRateLimiter {
    pub fn new(messages: u32, window_secs: u64) -> Self {
        let messages = NonZeroU32::new(messages.max(1)).expect("non-zero after max(1)");
        let period = std::time::Duration::from_secs(window_secs.max(1)) / messages.get();
        let quota = Quota::with_period(period)
            .expect("non-zero period")
            .allow_burst(messages);
        Self {
            inner: RateLimiter::direct(quota),
        }
    }

    pub fn check(&self) -> bool {
        self.inner.check().is_ok()
    }
}

/// Bundles the stateful limiters a `pushi-ws` listener shares across every
/// connection it accepts.
pub struct Limiters {
    pub ip_counts: IpConnectionCounter,
}

impl Limiters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ip_counts: IpConnectionCounter::new(),
        })
    }
}

pub fn new_message_rate_limiter(limits: &LimitsConfig) -> MessageRateLimiter {
    MessageRateLimiter::new(limits.rate_limit_messages, limits.rate_limit_window_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_counter_tracks_acquire_and_release() {
        let counter = IpConnectionCounter::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(counter.acquire(ip), 1);
        assert_eq!(counter.acquire(ip), 2);
        counter.release(ip);
        assert_eq!(counter.count(ip), 1);
        counter.release(ip);
        assert_eq!(counter.count(ip), 0);
    }

    #[test]
    fn message_rate_limiter_allows_burst_then_rejects() {
        let limiter = MessageRateLimiter::new(3, 10);
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(!limiter.check());
    }
}
