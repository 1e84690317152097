// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Metrics collection for attack simulation results.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Collects metrics during attack simulation.
#[derive(Debug, Default)]
pub struct AttackMetrics {
    /// Start time of the attack
    start_time: Option<Instant>,
    /// End time of the attack
    end_time: Option<Instant>,
    /// Count of requests by outcome
    outcomes: HashMap<Outcome, usize>,
    /// Count of requests by IP
    requests_per_ip: HashMap<String, usize>,
    /// Count of requests by account
    requests_per_account: HashMap<String, usize>,
    /// Guard latency samples (microseconds, wall clock)
    latencies: Vec<u64>,
    /// Slowdown imposed on admitted requests
    total_delay: Duration,
}

/// Possible outcomes for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Allowed,
    RateLimited,
    AuthRateLimited,
    BurstBlocked,
    IpBlocked,
    AccountLocked,
    InternalError,
}

impl Outcome {
    pub fn from_code(code: &str) -> Self {
        match code {
            "RATE_LIMIT_EXCEEDED" => Self::RateLimited,
            "AUTH_RATE_LIMIT_EXCEEDED" => Self::AuthRateLimited,
            "BURST_LIMIT_EXCEEDED" => Self::BurstBlocked,
            "IP_BLOCKED" => Self::IpBlocked,
            "ACCOUNT_LOCKED" => Self::AccountLocked,
            _ => Self::InternalError,
        }
    }
}

impl AttackMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of an attack.
    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Mark the end of an attack.
    pub fn finish(&mut self) {
        self.end_time = Some(Instant::now());
    }

    /// Record a request outcome.
    pub fn record(&mut self, outcome: Outcome, ip: &str, account: Option<&str>, latency: Duration) {
        *self.outcomes.entry(outcome).or_insert(0) += 1;
        *self.requests_per_ip.entry(ip.to_string()).or_insert(0) += 1;
        if let Some(a) = account {
            *self.requests_per_account.entry(a.to_string()).or_insert(0) += 1;
        }
        self.latencies.push(latency.as_micros() as u64);
    }

    /// Record slowdown served to an admitted request.
    pub fn record_delay(&mut self, delay: Duration) {
        self.total_delay += delay;
    }

    /// Get total request count.
    pub fn total_requests(&self) -> usize {
        self.outcomes.values().sum()
    }

    /// Get count for a specific outcome.
    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    /// Get duration of the attack.
    pub fn duration(&self) -> Duration {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Get block rate (ratio of blocked to total).
    pub fn block_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        let allowed = self.count(Outcome::Allowed);
        (total - allowed) as f64 / total as f64
    }

    /// Get median latency in microseconds.
    pub fn median_latency_us(&self) -> u64 {
        if self.latencies.is_empty() {
            return 0;
        }
        let mut sorted = self.latencies.clone();
        sorted.sort_unstable();
        sorted[sorted.len() / 2]
    }

    /// Get p99 latency in microseconds.
    pub fn p99_latency_us(&self) -> u64 {
        if self.latencies.is_empty() {
            return 0;
        }
        let mut sorted = self.latencies.clone();
        sorted.sort_unstable();
        let idx = (sorted.len() as f64 * 0.99) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    /// Get number of unique IPs that made requests.
    pub fn unique_ips(&self) -> usize {
        self.requests_per_ip.len()
    }

    /// Get number of unique accounts targeted.
    pub fn unique_accounts(&self) -> usize {
        self.requests_per_account.len()
    }

    /// Generate a summary report.
    pub fn report(&self) -> MetricsReport {
        MetricsReport {
            total_requests: self.total_requests(),
            allowed: self.count(Outcome::Allowed),
            rate_limited: self.count(Outcome::RateLimited),
            auth_rate_limited: self.count(Outcome::AuthRateLimited),
            burst_blocked: self.count(Outcome::BurstBlocked),
            ip_blocked: self.count(Outcome::IpBlocked),
            account_locked: self.count(Outcome::AccountLocked),
            internal_errors: self.count(Outcome::InternalError),
            duration_ms: self.duration().as_millis() as u64,
            total_delay_ms: self.total_delay.as_millis() as u64,
            block_rate: self.block_rate(),
            median_latency_us: self.median_latency_us(),
            p99_latency_us: self.p99_latency_us(),
            unique_ips: self.unique_ips(),
            unique_accounts: self.unique_accounts(),
        }
    }
}

/// Summary report of attack metrics.
#[derive(Debug, Clone)]
pub struct MetricsReport {
    pub total_requests: usize,
    pub allowed: usize,
    pub rate_limited: usize,
    pub auth_rate_limited: usize,
    pub burst_blocked: usize,
    pub ip_blocked: usize,
    pub account_locked: usize,
    pub internal_errors: usize,
    pub duration_ms: u64,
    pub total_delay_ms: u64,
    pub block_rate: f64,
    pub median_latency_us: u64,
    pub p99_latency_us: u64,
    pub unique_ips: usize,
    pub unique_accounts: usize,
}

impl std::fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Attack Metrics Report ===")?;
        writeln!(f, "Duration:          {} ms", self.duration_ms)?;
        writeln!(f, "Total Requests:    {}", self.total_requests)?;
        writeln!(f)?;
        writeln!(f, "--- Outcomes ---")?;
        writeln!(f, "Allowed:           {} ({:.1}%)",
            self.allowed,
            self.allowed as f64 / self.total_requests.max(1) as f64 * 100.0)?;
        writeln!(f, "Rate Limited:      {}", self.rate_limited)?;
        writeln!(f, "Auth Limited:      {}", self.auth_rate_limited)?;
        writeln!(f, "Burst Blocked:     {}", self.burst_blocked)?;
        writeln!(f, "IP Blocked:        {}", self.ip_blocked)?;
        writeln!(f, "Account Locked:    {}", self.account_locked)?;
        writeln!(f, "Internal Errors:   {}", self.internal_errors)?;
        writeln!(f, "Block Rate:        {:.1}%", self.block_rate * 100.0)?;
        writeln!(f, "Slowdown Served:   {} ms", self.total_delay_ms)?;
        writeln!(f)?;
        writeln!(f, "--- Latency ---")?;
        writeln!(f, "Median:            {} us", self.median_latency_us)?;
        writeln!(f, "P99:               {} us", self.p99_latency_us)?;
        writeln!(f)?;
        writeln!(f, "--- Distribution ---")?;
        writeln!(f, "Unique IPs:        {}", self.unique_ips)?;
        writeln!(f, "Unique Accounts:   {}", self.unique_accounts)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collection() {
        let mut metrics = AttackMetrics::new();
        metrics.start();

        metrics.record(Outcome::Allowed, "10.0.0.1", Some("a@example.com"), Duration::from_micros(100));
        metrics.record(Outcome::Allowed, "10.0.0.1", Some("b@example.com"), Duration::from_micros(150));
        metrics.record(Outcome::IpBlocked, "10.0.0.1", Some("c@example.com"), Duration::from_micros(50));

        metrics.finish();

        assert_eq!(metrics.total_requests(), 3);
        assert_eq!(metrics.count(Outcome::Allowed), 2);
        assert_eq!(metrics.count(Outcome::IpBlocked), 1);
        assert_eq!(metrics.unique_ips(), 1);
        assert_eq!(metrics.unique_accounts(), 3);
    }

    #[test]
    fn test_block_rate() {
        let mut metrics = AttackMetrics::new();
        for _ in 0..3 {
            metrics.record(Outcome::Allowed, "10.0.0.1", None, Duration::ZERO);
        }
        for _ in 0..7 {
            metrics.record(Outcome::RateLimited, "10.0.0.1", None, Duration::ZERO);
        }

        assert!((metrics.block_rate() - 0.7).abs() < 0.01);
    }

    #[test]
    fn test_outcome_from_code() {
        assert_eq!(Outcome::from_code("IP_BLOCKED"), Outcome::IpBlocked);
        assert_eq!(Outcome::from_code("BURST_LIMIT_EXCEEDED"), Outcome::BurstBlocked);
        assert_eq!(Outcome::from_code("INTERNAL_ERROR"), Outcome::InternalError);
    }
}
