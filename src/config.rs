// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the abuse guard.
//!
//! Values come from environment variables (optionally seeded from a
//! `.env` file) with defaults matching the production policy. Numeric
//! policy tuning beyond the environment switch goes in a JSON override
//! file named by `GUARD_POLICY_FILE`.
//!
//! - `BIND_ADDR`: server bind address (default: 0.0.0.0:8080)
//! - `APP_ENV` / `NODE_ENV`: `development` or `production` (default: production)
//! - `TRUST_PROXY`: honour `X-Forwarded-For` (default: false)
//! - `TRUSTED_IPS`: comma list of addresses that bypass the guard, matched
//!   against the TCP peer and never a forwarded hop
//! - `GUARD_POLICY_FILE`: JSON policy overrides
//! - `ALERT_FAILED_LOGINS_PER_HOUR`, `ALERT_REJECTIONS_PER_HOUR`: alert thresholds
//! - `SWEEP_INTERVAL_SECS`: cleanup interval (default: 3600)

use crate::error::ConfigError;
use crate::policy::{Environment, PolicyOverrides, PolicyRegistry};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the abuse guard service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Selects the policy catalogue thresholds
    #[serde(default = "default_environment")]
    pub environment: Environment,

    /// Honour `X-Forwarded-For` from a fronting proxy (default: false)
    #[serde(default)]
    pub trust_proxy: bool,

    /// Addresses that bypass the guard entirely
    #[serde(default)]
    pub trusted_ips: Vec<IpAddr>,

    /// Optional JSON policy override file
    #[serde(default)]
    pub policy_file: Option<String>,

    /// Brute-force thresholds
    #[serde(default)]
    pub login: LoginConfig,

    /// Alert thresholds
    #[serde(default)]
    pub alerts: AlertConfig,

    /// Background cleanup
    #[serde(default)]
    pub sweep: SweepConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Brute-force lockout thresholds, per axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginConfig {
    /// Failures from one IP before it is blocked (default: 5)
    #[serde(default = "default_ip_max_failures")]
    pub ip_max_failures: u32,

    /// Observation window for IP failures in seconds (default: 900)
    #[serde(default = "default_observation_secs")]
    pub ip_window_secs: u64,

    /// IP block duration in seconds (default: 900)
    #[serde(default = "default_ip_lock_secs")]
    pub ip_lock_secs: u64,

    /// Failures against one account before it is locked (default: 3)
    #[serde(default = "default_account_max_failures")]
    pub account_max_failures: u32,

    /// Observation window for account failures in seconds (default: 900)
    #[serde(default = "default_observation_secs")]
    pub account_window_secs: u64,

    /// Account lock duration in seconds (default: 1800)
    #[serde(default = "default_account_lock_secs")]
    pub account_lock_secs: u64,
}

/// Per-hour thresholds that raise a critical security event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_failed_logins_per_hour")]
    pub failed_logins_per_hour: u64,

    #[serde(default = "default_rejections_per_hour")]
    pub rejections_per_hour: u64,
}

/// Background cleanup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Interval between sweeps in seconds (default: 3600)
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,

    /// How long stale counters are kept in seconds (default: 86400)
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_environment() -> Environment {
    Environment::Production
}

fn default_ip_max_failures() -> u32 {
    5
}

fn default_account_max_failures() -> u32 {
    3
}

fn default_observation_secs() -> u64 {
    900 // 15 minutes
}

fn default_ip_lock_secs() -> u64 {
    900
}

fn default_account_lock_secs() -> u64 {
    1800
}

fn default_failed_logins_per_hour() -> u64 {
    50
}

fn default_rejections_per_hour() -> u64 {
    1000
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_retention_secs() -> u64 {
    24 * 3600
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            environment: default_environment(),
            trust_proxy: false,
            trusted_ips: Vec::new(),
            policy_file: None,
            login: LoginConfig::default(),
            alerts: AlertConfig::default(),
            sweep: SweepConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            ip_max_failures: default_ip_max_failures(),
            ip_window_secs: default_observation_secs(),
            ip_lock_secs: default_ip_lock_secs(),
            account_max_failures: default_account_max_failures(),
            account_window_secs: default_observation_secs(),
            account_lock_secs: default_account_lock_secs(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            failed_logins_per_hour: default_failed_logins_per_hour(),
            rejections_per_hour: default_rejections_per_hour(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
            retention_secs: default_retention_secs(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl LoginConfig {
    pub fn ip_window(&self) -> Duration {
        Duration::from_secs(self.ip_window_secs)
    }

    pub fn ip_lock(&self) -> Duration {
        Duration::from_secs(self.ip_lock_secs)
    }

    pub fn account_window(&self) -> Duration {
        Duration::from_secs(self.account_window_secs)
    }

    pub fn account_lock(&self) -> Duration {
        Duration::from_secs(self.account_lock_secs)
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(addr) = lookup("BIND_ADDR") {
            config.bind_addr = addr;
        }

        if let Some((var, value)) = lookup("APP_ENV")
            .map(|v| ("APP_ENV", v))
            .or_else(|| lookup("NODE_ENV").map(|v| ("NODE_ENV", v)))
        {
            config.environment =
                Environment::parse(&value).ok_or(ConfigError::InvalidEnv { var, value })?;
        }

        if let Some(value) = lookup("TRUST_PROXY") {
            config.trust_proxy = parse_bool("TRUST_PROXY", &value)?;
        }

        if let Some(value) = lookup("TRUSTED_IPS") {
            config.trusted_ips = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse().map_err(|_| ConfigError::InvalidEnv {
                        var: "TRUSTED_IPS",
                        value: s.to_string(),
                    })
                })
                .collect::<Result<_, _>>()?;
        }

        config.policy_file = lookup("GUARD_POLICY_FILE").filter(|p| !p.trim().is_empty());

        if let Some(v) = parse_var(&lookup, "ALERT_FAILED_LOGINS_PER_HOUR")? {
            config.alerts.failed_logins_per_hour = v;
        }
        if let Some(v) = parse_var(&lookup, "ALERT_REJECTIONS_PER_HOUR")? {
            config.alerts.rejections_per_hour = v;
        }
        if let Some(v) = parse_var(&lookup, "SWEEP_INTERVAL_SECS")? {
            if v == 0 {
                return Err(ConfigError::InvalidEnv {
                    var: "SWEEP_INTERVAL_SECS",
                    value: "0".to_string(),
                });
            }
            config.sweep.interval_secs = v;
        }

        Ok(config)
    }

    /// Build and validate the policy registry for this configuration.
    pub fn policy_registry(&self) -> Result<PolicyRegistry, ConfigError> {
        let mut registry = PolicyRegistry::for_environment(self.environment);
        if let Some(path) = &self.policy_file {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::PolicyFile {
                path: path.clone(),
                source,
            })?;
            let overrides: PolicyOverrides =
                serde_json::from_str(&raw).map_err(|source| ConfigError::PolicyFileFormat {
                    path: path.clone(),
                    source,
                })?;
            registry.apply_overrides(&overrides)?;
        }
        registry.validate()?;
        Ok(registry)
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
        }),
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        None => Ok(None),
    }
}
