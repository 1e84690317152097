// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Hourly usage aggregates and threshold alerting.

use crate::clock::Clock;
use crate::config::AlertConfig;
use crate::events::{SecurityEvent, SecurityEventSink, SecurityEventType, Severity};
use crate::key::RateLimitKey;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, warn};

const HOUR_MS: u64 = 3_600_000;
/// Buckets older than this many hours are dropped by `sweep`.
pub const RETENTION_HOURS: u64 = 24;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCounts {
    pub request_count: u64,
    pub rejected_count: u64,
    pub failed_login_count: u64,
}

impl UsageCounts {
    fn add(&mut self, other: &UsageCounts) {
        self.request_count += other.request_count;
        self.rejected_count += other.rejected_count;
        self.failed_login_count += other.failed_login_count;
    }
}

#[derive(Debug, Default)]
struct Bucket {
    counts: UsageCounts,
    clients: HashSet<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointUsage {
    pub endpoint: String,
    #[serde(flatten)]
    pub counts: UsageCounts,
    pub unique_clients: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourUsage {
    pub hour_index: u64,
    pub hour_start: DateTime<Utc>,
    #[serde(flatten)]
    pub totals: UsageCounts,
    pub endpoints: Vec<EndpointUsage>,
}

/// Point-in-time copy of the aggregates, newest hour first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub generated_at: DateTime<Utc>,
    pub current_hour: u64,
    pub last_24h: UsageCounts,
    pub hours: Vec<HourUsage>,
}

impl UsageSnapshot {
    /// Totals for the hour the snapshot was taken in.
    pub fn current(&self) -> UsageCounts {
        self.hours
            .iter()
            .find(|h| h.hour_index == self.current_hour)
            .map(|h| h.totals)
            .unwrap_or_default()
    }
}

pub struct UsageStatsTracker {
    buckets: RwLock<HashMap<(u64, String), Bucket>>,
    // (hour, alert type) pairs already reported
    alerted: Mutex<HashSet<(u64, SecurityEventType)>>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn SecurityEventSink>,
    alerts: AlertConfig,
}

impl UsageStatsTracker {
    pub fn new(clock: Arc<dyn Clock>, sink: Arc<dyn SecurityEventSink>, alerts: AlertConfig) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            alerted: Mutex::new(HashSet::new()),
            clock,
            sink,
            alerts,
        }
    }

    fn current_hour(&self) -> u64 {
        self.clock.now_ms() / HOUR_MS
    }

    /// Count one evaluated request.
    pub async fn record(&self, key: &RateLimitKey, endpoint: &str, was_rejected: bool) {
        let hour = self.current_hour();
        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry((hour, endpoint.to_string())).or_default();
        bucket.counts.request_count += 1;
        if was_rejected {
            bucket.counts.rejected_count += 1;
        }
        if !bucket.clients.contains(&key.value) {
            bucket.clients.insert(key.value.clone());
        }
    }

    pub async fn record_failed_login(&self, endpoint: &str) {
        let hour = self.current_hour();
        let mut buckets = self.buckets.write().await;
        buckets
            .entry((hour, endpoint.to_string()))
            .or_default()
            .counts
            .failed_login_count += 1;
    }

    pub async fn snapshot(&self) -> UsageSnapshot {
        let now = self.clock.now_ms();
        let current_hour = now / HOUR_MS;
        let buckets = self.buckets.read().await;

        let mut hours: HashMap<u64, HourUsage> = HashMap::new();
        let mut last_24h = UsageCounts::default();
        for ((hour, endpoint), bucket) in buckets.iter() {
            if hour + RETENTION_HOURS <= current_hour {
                continue;
            }
            last_24h.add(&bucket.counts);
            let entry = hours.entry(*hour).or_insert_with(|| HourUsage {
                hour_index: *hour,
                hour_start: to_datetime(hour * HOUR_MS),
                totals: UsageCounts::default(),
                endpoints: Vec::new(),
            });
            entry.totals.add(&bucket.counts);
            entry.endpoints.push(EndpointUsage {
                endpoint: endpoint.clone(),
                counts: bucket.counts,
                unique_clients: bucket.clients.len(),
            });
        }

        let mut hours: Vec<HourUsage> = hours.into_values().collect();
        hours.sort_by(|a, b| b.hour_index.cmp(&a.hour_index));
        for hour in &mut hours {
            hour.endpoints
                .sort_by(|a, b| b.counts.request_count.cmp(&a.counts.request_count));
        }

        UsageSnapshot {
            generated_at: to_datetime(now),
            current_hour,
            last_24h,
            hours,
        }
    }

    /// Drop buckets older than the retention window. Returns how many went.
    pub async fn sweep(&self) -> usize {
        let current_hour = self.current_hour();
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|(hour, _), _| hour + RETENTION_HOURS > current_hour);
        let removed = before - buckets.len();
        self.alerted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|(hour, _)| hour + RETENTION_HOURS > current_hour);
        if removed > 0 {
            debug!(removed, "Swept usage buckets");
        }
        removed
    }

    /// Compare the current hour and the last completed one against the
    /// alert thresholds and emit one critical event per breach. Each hour
    /// and alert type is reported at most once. Returns the number of
    /// alerts raised by this call.
    pub fn check_alerts(&self, snapshot: &UsageSnapshot) -> usize {
        let now = snapshot.generated_at.timestamp_millis().max(0) as u64;
        let mut alerted = self
            .alerted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut raised = 0;

        // The sweep runs hourly from process start, so the hour that just
        // ended has to be checked as well as the one in progress
        let recent = snapshot
            .hours
            .iter()
            .filter(|h| h.hour_index + 1 >= snapshot.current_hour);

        for hour in recent {
            let checks = [
                (
                    SecurityEventType::FailedLoginThreshold,
                    hour.totals.failed_login_count,
                    self.alerts.failed_logins_per_hour,
                    "failed logins",
                ),
                (
                    SecurityEventType::RejectionThreshold,
                    hour.totals.rejected_count,
                    self.alerts.rejections_per_hour,
                    "rejected requests",
                ),
            ];

            for (event_type, observed, threshold, what) in checks {
                if observed <= threshold || !alerted.insert((hour.hour_index, event_type)) {
                    continue;
                }
                warn!(
                    alert = event_type.as_str(),
                    hour_start = %hour.hour_start.to_rfc3339(),
                    observed,
                    threshold,
                    "Alert threshold exceeded"
                );
                self.sink.emit(
                    SecurityEvent::new(event_type, Severity::Critical, "*", "*", now).with_detail(
                        format!(
                            "{} {} in the hour from {} (threshold {})",
                            observed,
                            what,
                            hour.hour_start.to_rfc3339(),
                            threshold
                        ),
                    ),
                );
                raised += 1;
            }
        }
        raised
    }
}

fn to_datetime(ms: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms as i64).unwrap_or_else(Utc::now)
}
