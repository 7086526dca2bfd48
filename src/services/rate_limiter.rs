// src/services/rate_limiter.rs

//! Per-source token bucket throttle.
//!
//! Each source gets a bucket of `capacity` tokens refilled continuously at
//! `capacity / window`. A caller that finds a token consumes it and proceeds;
//! otherwise it joins a FIFO queue that is drained on a fixed polling
//! interval as tokens become available.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::models::{RateLimitConfig, RateLimitDefaults, SourceConfig};

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

/// A single token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    poll_interval: Duration,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(limit: RateLimitConfig, poll_interval: Duration) -> Self {
        let capacity = f64::from(limit.capacity.max(1));
        let window = limit.window().as_secs_f64().max(f64::EPSILON);
        Self {
            capacity,
            refill_per_sec: capacity / window,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Refill by elapsed time, capped at capacity.
    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// Refill, then take a token if `ticket` may proceed.
    ///
    /// The whole step runs under one lock so concurrent callers never
    /// observe a half-applied refill.
    fn try_take(&self, state: &mut BucketState, ticket: Option<u64>) -> bool {
        self.refill(state);
        let at_head = match ticket {
            Some(t) => state.waiters.front() == Some(&t),
            None => state.waiters.is_empty(),
        };
        if at_head && state.tokens >= 1.0 {
            state.tokens -= 1.0;
            if ticket.is_some() {
                state.waiters.pop_front();
            }
            true
        } else {
            false
        }
    }

    /// Wait for and consume one token.
    pub async fn acquire(&self) {
        let ticket = {
            let mut state = self.lock();
            if self.try_take(&mut state, None) {
                return;
            }
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.waiters.push_back(ticket);
            ticket
        };

        let mut waiter = Waiter {
            bucket: self,
            ticket,
            served: false,
        };
        loop {
            tokio::time::sleep(self.poll_interval).await;
            let mut state = self.lock();
            if self.try_take(&mut state, Some(ticket)) {
                waiter.served = true;
                return;
            }
        }
    }

    /// Tokens currently available, after refilling.
    pub fn available(&self) -> f64 {
        let mut state = self.lock();
        self.refill(&mut state);
        state.tokens
    }

    /// Callers queued behind an empty bucket.
    pub fn queued(&self) -> usize {
        self.lock().waiters.len()
    }
}

/// Removes an abandoned ticket so a cancelled caller cannot block the queue.
struct Waiter<'a> {
    bucket: &'a TokenBucket,
    ticket: u64,
    served: bool,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if !self.served {
            let mut state = self.bucket.lock();
            state.waiters.retain(|t| *t != self.ticket);
        }
    }
}

/// Buckets keyed by source id, created on first use.
#[derive(Debug)]
pub struct RateLimiter {
    defaults: RateLimitDefaults,
    buckets: Mutex<HashMap<String, Arc<TokenBucket>>>,
}

impl RateLimiter {
    pub fn new(defaults: RateLimitDefaults) -> Self {
        Self {
            defaults,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// The bucket for a source.
    pub fn bucket(&self, source: &SourceConfig) -> Arc<TokenBucket> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = buckets.entry(source.id.clone()).or_insert_with(|| {
            let limit = source.rate_limit.unwrap_or(RateLimitConfig {
                capacity: self.defaults.default_capacity,
                window_secs: self.defaults.default_window_secs,
            });
            Arc::new(TokenBucket::new(
                limit,
                Duration::from_millis(self.defaults.poll_interval_ms),
            ))
        });
        Arc::clone(bucket)
    }

    /// Wait for a token for the given source.
    pub async fn acquire(&self, source: &SourceConfig) {
        let bucket = self.bucket(source);
        log::debug!(
            "Rate limiter: {} ({:.1} tokens, {} queued)",
            source.id,
            bucket.available(),
            bucket.queued()
        );
        bucket.acquire().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(capacity: u32, window_secs: u64) -> RateLimitConfig {
        RateLimitConfig {
            capacity,
            window_secs,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_up_to_capacity_is_immediate() {
        let bucket = TokenBucket::new(limit(3, 3), Duration::from_millis(100));
        let start = Instant::now();
        for _ in 0..3 {
            bucket.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(bucket.available() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extra_caller_waits_for_refill() {
        // capacity 2 per 2s: one token per second
        let bucket = Arc::new(TokenBucket::new(limit(2, 2), Duration::from_millis(100)));
        let start = Instant::now();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                tokio::spawn(async move {
                    bucket.acquire().await;
                    start.elapsed()
                })
            })
            .collect();

        let mut elapsed = Vec::new();
        for handle in handles {
            elapsed.push(handle.await.unwrap());
        }
        elapsed.sort();

        assert_eq!(elapsed[0], Duration::ZERO);
        assert_eq!(elapsed[1], Duration::ZERO);
        assert!(elapsed[2] >= Duration::from_secs(1));
        assert!(elapsed[2] < Duration::from_millis(1300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_are_served_fifo() {
        let bucket = Arc::new(TokenBucket::new(limit(1, 1), Duration::from_millis(50)));
        bucket.acquire().await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let bucket = Arc::clone(&bucket);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                bucket.acquire().await;
                order.lock().unwrap().push(i);
            }));
            // Enqueue deterministically in spawn order
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_releases_queue_slot() {
        let bucket = Arc::new(TokenBucket::new(limit(1, 10), Duration::from_millis(50)));
        bucket.acquire().await;

        let pending = tokio::time::timeout(Duration::from_millis(200), bucket.acquire()).await;
        assert!(pending.is_err());
        assert_eq!(bucket.queued(), 0);
    }

    #[test]
    fn test_limiter_uses_source_override() {
        let limiter = RateLimiter::new(RateLimitDefaults::default());
        let source: SourceConfig = toml::from_str(
            r#"
            id = "slow"
            name = "Slow County"
            base_url = "https://slow.example.gov"
            rate_limit = { capacity = 1, window_secs = 30 }
            "#,
        )
        .unwrap();

        let a = limiter.bucket(&source);
        let b = limiter.bucket(&source);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
