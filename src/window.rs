// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Fixed-window quota engine.
//!
//! One counter per (key, policy). The window opens on the first request
//! and resets once `window_start + window` has passed. A burst at the
//! boundary can see up to twice the quota; callers that need smoother
//! limiting layer a slowdown policy on top.

use crate::error::StoreError;
use crate::key::RateLimitKey;
use crate::policy::RateLimitPolicy;
use crate::request::RequestInfo;
use crate::store::KeyValueStore;
use std::sync::Arc;
use tracing::debug;

/// Result of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub admitted: bool,
    /// Quota of the policy
    pub limit: u64,
    /// Requests left in the window after this one
    pub remaining: u64,
    /// Window end (Unix ms)
    pub reset_at: u64,
    /// The request matched the policy's exemption and was not counted
    pub exempt: bool,
}

pub struct WindowCounter {
    store: Arc<dyn KeyValueStore>,
}

impl WindowCounter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Count `request` against `policy` for `key`.
    pub async fn admit(
        &self,
        key: &RateLimitKey,
        policy: &RateLimitPolicy,
        request: &RequestInfo,
    ) -> Result<Admission, StoreError> {
        if policy.exemption.applies(request) {
            return Ok(Admission {
                admitted: true,
                limit: policy.max_requests,
                remaining: policy.max_requests,
                reset_at: 0,
                exempt: true,
            });
        }

        let counter = self
            .store
            .increment(&counter_key(key, &policy.name), policy.window())
            .await?;
        let admitted = counter.count <= policy.max_requests;

        debug!(
            key = %key,
            policy = %policy.name,
            count = counter.count,
            max = policy.max_requests,
            admitted,
            "Quota check"
        );

        Ok(Admission {
            admitted,
            limit: policy.max_requests,
            remaining: policy.max_requests.saturating_sub(counter.count),
            reset_at: counter.reset_at,
            exempt: false,
        })
    }
}

fn counter_key(key: &RateLimitKey, policy: &str) -> String {
    format!("rl:{}:{}", policy, key)
}
