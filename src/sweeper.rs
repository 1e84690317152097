// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Background cleanup.
//!
//! One task for every table: stale store entries, old usage buckets, and
//! the hourly alert check. Only entries past their retention horizon are
//! removed, so it runs safely alongside live traffic.

use crate::config::SweepConfig;
use crate::guard::AbuseGuard;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub store_entries: usize,
    pub usage_buckets: usize,
    pub alerts: usize,
}

/// Run one cleanup pass.
pub async fn sweep_once(guard: &AbuseGuard, retention: Duration) -> SweepReport {
    let store_entries = guard.store().sweep(retention).await;
    let usage_buckets = guard.stats().sweep().await;

    let snapshot = guard.stats().snapshot().await;
    let alerts = guard.stats().check_alerts(&snapshot);
    for _ in 0..alerts {
        guard.metrics().alert_raised();
    }

    SweepReport {
        store_entries,
        usage_buckets,
        alerts,
    }
}

/// Handle to the running cleanup task.
pub struct Sweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    pub fn start(guard: Arc<AbuseGuard>, config: SweepConfig) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let period = config.interval();
        let retention = config.retention();

        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = sweep_once(&guard, retention).await;
                        debug!(
                            store_entries = report.store_entries,
                            usage_buckets = report.usage_buckets,
                            alerts = report.alerts,
                            "Sweep complete"
                        );
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Sweeper stopped");
        });

        info!(
            interval_secs = period.as_secs(),
            retention_secs = retention.as_secs(),
            "Sweeper started"
        );
        Self { shutdown, handle }
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(self) {
        // Err only means the task already exited
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            warn!(error = %err, "Sweeper task ended abnormally");
        }
    }
}
