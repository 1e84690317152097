// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Brute-force login guard.
//!
//! Tracks failed logins on two independent axes:
//!
//! - per client IP (default 5 failures in 15 min → 15 min block), which
//!   stops one host from credential-stuffing many accounts;
//! - per account (default 3 failures in 15 min → 30 min lock), which stops
//!   an attacker rotating IPs against one account.
//!
//! Each axis is a small state machine: Unlocked → Locked → Unlocked, where
//! the way back is only the passage of time. A success is recorded but
//! neither clears earlier failures nor lifts a lock.

use crate::clock::{duration_ms, secs_until, Clock};
use crate::config::LoginConfig;
use crate::error::StoreError;
use crate::key::normalize_account;
use crate::store::{get_json, set_json, KeyValueStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One login attempt. Appended, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub timestamp: u64,
    /// The other axis' key (the account for IP records and vice versa)
    pub associated_key: Option<String>,
    pub succeeded: bool,
}

/// An active lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub key: String,
    pub unlock_at: u64,
}

impl LockEntry {
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        secs_until(self.unlock_at, now_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Ip,
    Account,
}

impl Axis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Account => "account",
        }
    }
}

/// Locks applied by a single `record_attempt`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub ip_locked: Option<LockEntry>,
    pub account_locked: Option<LockEntry>,
}

pub struct LoginAttemptTracker {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: LoginConfig,
    // Serialises the read-append-write on attempt lists
    write_lock: Mutex<()>,
}

struct AxisLimits {
    max_failures: u32,
    window: Duration,
    lock: Duration,
}

impl LoginAttemptTracker {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, config: LoginConfig) -> Self {
        Self {
            store,
            clock,
            config,
            write_lock: Mutex::new(()),
        }
    }

    fn limits(&self, axis: Axis) -> AxisLimits {
        match axis {
            Axis::Ip => AxisLimits {
                max_failures: self.config.ip_max_failures,
                window: self.config.ip_window(),
                lock: self.config.ip_lock(),
            },
            Axis::Account => AxisLimits {
                max_failures: self.config.account_max_failures,
                window: self.config.account_window(),
                lock: self.config.account_lock(),
            },
        }
    }

    /// Record a login attempt and lock whichever axis crossed its threshold.
    pub async fn record_attempt(
        &self,
        ip: &str,
        account: Option<&str>,
        succeeded: bool,
    ) -> Result<AttemptOutcome, StoreError> {
        let account = account.and_then(normalize_account);
        let _guard = self.write_lock.lock().await;
        let now = self.clock.now_ms();
        let mut outcome = AttemptOutcome::default();

        let ip_record = AttemptRecord {
            timestamp: now,
            associated_key: account.clone(),
            succeeded,
        };
        let ip_failures = self.append(Axis::Ip, ip, ip_record, now).await?;
        if !succeeded {
            outcome.ip_locked = self.maybe_lock(Axis::Ip, ip, ip_failures, now).await?;
        }

        if let Some(account) = account.as_deref() {
            let account_record = AttemptRecord {
                timestamp: now,
                associated_key: Some(ip.to_string()),
                succeeded,
            };
            let failures = self
                .append(Axis::Account, account, account_record, now)
                .await?;
            if !succeeded {
                outcome.account_locked =
                    self.maybe_lock(Axis::Account, account, failures, now).await?;
            }
        }

        debug!(
            ip,
            account = ?account,
            succeeded,
            ip_failures,
            "Recorded login attempt"
        );
        Ok(outcome)
    }

    /// Active IP lock, if any.
    pub async fn ip_lock(&self, ip: &str) -> Result<Option<LockEntry>, StoreError> {
        self.active_lock(Axis::Ip, ip).await
    }

    /// Active account lock, if any.
    pub async fn account_lock(&self, account: &str) -> Result<Option<LockEntry>, StoreError> {
        match normalize_account(account) {
            Some(account) => self.active_lock(Axis::Account, &account).await,
            None => Ok(None),
        }
    }

    pub async fn is_ip_blocked(&self, ip: &str) -> Result<bool, StoreError> {
        Ok(self.ip_lock(ip).await?.is_some())
    }

    pub async fn is_account_blocked(&self, account: &str) -> Result<bool, StoreError> {
        Ok(self.account_lock(account).await?.is_some())
    }

    /// Failures this IP may still make before it is blocked.
    pub async fn remaining_attempts(&self, ip: &str) -> Result<u32, StoreError> {
        if self.is_ip_blocked(ip).await? {
            return Ok(0);
        }
        let limits = self.limits(Axis::Ip);
        let now = self.clock.now_ms();
        let failures = self
            .attempts(Axis::Ip, ip)
            .await?
            .iter()
            .filter(|r| !r.succeeded && in_window(r, now, limits.window))
            .count() as u32;
        Ok(limits.max_failures.saturating_sub(failures))
    }

    async fn attempts(&self, axis: Axis, key: &str) -> Result<Vec<AttemptRecord>, StoreError> {
        Ok(get_json(self.store.as_ref(), &attempts_key(axis, key))
            .await?
            .unwrap_or_default())
    }

    /// Append and prune; returns failures in the trailing window.
    async fn append(
        &self,
        axis: Axis,
        key: &str,
        record: AttemptRecord,
        now: u64,
    ) -> Result<u32, StoreError> {
        let limits = self.limits(axis);
        let mut records = self.attempts(axis, key).await?;
        records.retain(|r| in_window(r, now, limits.window));
        records.push(record);

        let failures = records.iter().filter(|r| !r.succeeded).count() as u32;
        set_json(
            self.store.as_ref(),
            &attempts_key(axis, key),
            &records,
            limits.window,
        )
        .await?;
        Ok(failures)
    }

    async fn maybe_lock(
        &self,
        axis: Axis,
        key: &str,
        failures: u32,
        now: u64,
    ) -> Result<Option<LockEntry>, StoreError> {
        let limits = self.limits(axis);
        if failures < limits.max_failures {
            return Ok(None);
        }
        // An active lock is never extended
        if self.active_lock(axis, key).await?.is_some() {
            return Ok(None);
        }

        let entry = LockEntry {
            key: key.to_string(),
            unlock_at: now.saturating_add(duration_ms(limits.lock)),
        };
        set_json(self.store.as_ref(), &lock_key(axis, key), &entry, limits.lock).await?;
        warn!(
            axis = axis.as_str(),
            key,
            failures,
            lock_secs = limits.lock.as_secs(),
            "Locked after repeated login failures"
        );
        Ok(Some(entry))
    }

    async fn active_lock(&self, axis: Axis, key: &str) -> Result<Option<LockEntry>, StoreError> {
        let lock_key = lock_key(axis, key);
        let entry: Option<LockEntry> = get_json(self.store.as_ref(), &lock_key).await?;
        match entry {
            Some(entry) if self.clock.now_ms() < entry.unlock_at => Ok(Some(entry)),
            Some(_) => {
                // Store TTL and our clock disagree; drop the stale lock now
                self.store.delete(&lock_key).await?;
                debug!(axis = axis.as_str(), key, "Lock expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

fn in_window(record: &AttemptRecord, now: u64, window: Duration) -> bool {
    record.timestamp.saturating_add(duration_ms(window)) > now
}

fn attempts_key(axis: Axis, key: &str) -> String {
    format!("login:attempts:{}:{}", axis.as_str(), key)
}

fn lock_key(axis: Axis, key: &str) -> String {
    format!("login:lock:{}:{}", axis.as_str(), key)
}
