// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for the abuse guard.
//!
//! Rejections (quota, burst, lockout) are not errors: they are returned as
//! [`crate::guard::Rejection`] values. The types here cover startup
//! configuration and internal failures during a check.

use thiserror::Error;

/// Invalid or inconsistent configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown rate limit policy: {0}")]
    UnknownRateLimitPolicy(String),

    #[error("Unknown slowdown policy: {0}")]
    UnknownSlowdownPolicy(String),

    #[error("Invalid policy {name}: {reason}")]
    InvalidPolicy { name: String, reason: String },

    #[error("Invalid route {route}: {reason}")]
    InvalidRoute { route: String, reason: String },

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("Failed to read policy file {path}: {source}")]
    PolicyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse policy file {path}: {source}")]
    PolicyFileFormat {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure of a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt value under {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Internal failure while evaluating a request.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Result of building or running the guard
pub type Result<T> = std::result::Result<T, GuardError>;
