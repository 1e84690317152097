// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Progressive slowdown.
//!
//! Keeps its own fixed-window counter per key and policy. Past
//! `delay_after` requests each extra request adds `delay_increment_ms`,
//! capped at `max_delay_ms`. The delay is advisory: the composer sleeps
//! for it before the quota check.

use crate::error::StoreError;
use crate::key::RateLimitKey;
use crate::policy::SlowdownPolicy;
use crate::store::KeyValueStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Delay for the `count`-th request in a window.
pub fn delay_for_count(count: u64, policy: &SlowdownPolicy) -> Duration {
    if count <= policy.delay_after {
        return Duration::ZERO;
    }
    let over = count - policy.delay_after;
    let ms = over
        .saturating_mul(policy.delay_increment_ms)
        .min(policy.max_delay_ms);
    Duration::from_millis(ms)
}

pub struct SlowdownCalculator {
    store: Arc<dyn KeyValueStore>,
}

impl SlowdownCalculator {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Count this request and return how long to hold it.
    pub async fn delay_for(
        &self,
        key: &RateLimitKey,
        policy: &SlowdownPolicy,
    ) -> Result<Duration, StoreError> {
        let counter = self
            .store
            .increment(&counter_key(key, &policy.name), policy.window())
            .await?;
        let delay = delay_for_count(counter.count, policy);
        if !delay.is_zero() {
            debug!(
                key = %key,
                policy = %policy.name,
                count = counter.count,
                delay_ms = delay.as_millis() as u64,
                "Slowing down request"
            );
        }
        Ok(delay)
    }

    /// Un-count a request that ended in failure, when the policy excludes
    /// failures. Returns whether anything was refunded.
    pub async fn refund(
        &self,
        key: &RateLimitKey,
        policy: &SlowdownPolicy,
    ) -> Result<bool, StoreError> {
        if policy.count_failed_requests {
            return Ok(false);
        }
        self.store.decrement(&counter_key(key, &policy.name)).await?;
        Ok(true)
    }
}

fn counter_key(key: &RateLimitKey, policy: &str) -> String {
    format!("sd:{}:{}", policy, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;

    fn policy(count_failed_requests: bool) -> SlowdownPolicy {
        SlowdownPolicy {
            name: "auth".to_string(),
            window_secs: 900,
            delay_after: 2,
            delay_increment_ms: 1000,
            max_delay_ms: 5000,
            count_failed_requests,
        }
    }

    #[test]
    fn test_linear_ramp_with_cap() {
        let policy = policy(true);
        let delays: Vec<u64> = (1..=10)
            .map(|n| delay_for_count(n, &policy).as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![0, 0, 1000, 2000, 3000, 4000, 5000, 5000, 5000, 5000]
        );
    }

    #[tokio::test]
    async fn test_delay_escalates_per_key() {
        let clock = Arc::new(ManualClock::default());
        let calc = SlowdownCalculator::new(Arc::new(InMemoryStore::new(clock.clone())));
        let policy = policy(true);
        let key = RateLimitKey::ip("10.1.1.1");

        let mut last = Duration::ZERO;
        for _ in 0..8 {
            let delay = calc.delay_for(&key, &policy).await.unwrap();
            assert!(delay >= last);
            assert!(delay <= Duration::from_millis(5000));
            last = delay;
        }
        assert_eq!(last, Duration::from_millis(5000));

        let other = RateLimitKey::ip("10.1.1.2");
        assert_eq!(calc.delay_for(&other, &policy).await.unwrap(), Duration::ZERO);

        clock.advance(policy.window());
        assert_eq!(calc.delay_for(&key, &policy).await.unwrap(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_refund_only_when_failures_excluded() {
        let clock = Arc::new(ManualClock::default());
        let calc = SlowdownCalculator::new(Arc::new(InMemoryStore::new(clock)));
        let key = RateLimitKey::ip("10.1.1.3");

        let counting = policy(true);
        assert!(!calc.refund(&key, &counting).await.unwrap());

        let mut lenient = policy(false);
        lenient.name = "general".to_string();
        for _ in 0..3 {
            calc.delay_for(&key, &lenient).await.unwrap();
        }
        assert!(calc.refund(&key, &lenient).await.unwrap());
        // Back to 2 counted, so the next one is the 3rd
        assert_eq!(
            calc.delay_for(&key, &lenient).await.unwrap(),
            Duration::from_millis(1000)
        );
    }
}
