// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus metrics for the guard.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

pub struct GuardMetrics {
    registry: Registry,
    requests: IntCounterVec,
    rejections: IntCounterVec,
    lock_transitions: IntCounterVec,
    alerts: IntCounter,
    slowdown_delay: Histogram,
}

impl GuardMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("guard_requests_total", "Requests evaluated by the guard"),
            &["outcome"],
        )?;
        let rejections = IntCounterVec::new(
            Opts::new("guard_rejections_total", "Rejected requests by code"),
            &["code"],
        )?;
        let lock_transitions = IntCounterVec::new(
            Opts::new("guard_lock_transitions_total", "Brute-force locks applied"),
            &["axis"],
        )?;
        let alerts = IntCounter::new("guard_alerts_total", "Alert thresholds breached")?;
        let slowdown_delay = Histogram::with_opts(
            HistogramOpts::new(
                "guard_slowdown_delay_seconds",
                "Artificial delay imposed on slowed-down requests",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0]),
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(rejections.clone()))?;
        registry.register(Box::new(lock_transitions.clone()))?;
        registry.register(Box::new(alerts.clone()))?;
        registry.register(Box::new(slowdown_delay.clone()))?;

        Ok(Self {
            registry,
            requests,
            rejections,
            lock_transitions,
            alerts,
            slowdown_delay,
        })
    }

    pub fn admitted(&self) {
        self.requests.with_label_values(&["admitted"]).inc();
    }

    pub fn rejected(&self, code: &str) {
        self.requests.with_label_values(&["rejected"]).inc();
        self.rejections.with_label_values(&[code]).inc();
    }

    pub fn failed_open(&self) {
        self.requests.with_label_values(&["failed_open"]).inc();
    }

    pub fn lock_applied(&self, axis: &str) {
        self.lock_transitions.with_label_values(&[axis]).inc();
    }

    pub fn alert_raised(&self) {
        self.alerts.inc();
    }

    pub fn delayed(&self, delay: Duration) {
        self.slowdown_delay.observe(delay.as_secs_f64());
    }

    pub fn rejection_count(&self, code: &str) -> u64 {
        self.rejections.with_label_values(&[code]).get()
    }

    /// Text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_counters() {
        let metrics = GuardMetrics::new().unwrap();
        metrics.admitted();
        metrics.rejected("IP_BLOCKED");
        metrics.lock_applied("ip");
        metrics.delayed(Duration::from_millis(1500));

        assert_eq!(metrics.rejection_count("IP_BLOCKED"), 1);
        let text = metrics.encode().unwrap();
        assert!(text.contains("guard_requests_total{outcome=\"admitted\"} 1"));
        assert!(text.contains("guard_lock_transitions_total{axis=\"ip\"} 1"));
        assert!(text.contains("guard_slowdown_delay_seconds_count 1"));
    }
}
