// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Abuse Guard
//!
//! Abuse protection for a web application's HTTP surface:
//!
//! - Fixed-window quotas per client, with a short burst window on top
//! - Progressive slowdown before outright rejection
//! - Brute-force login lockout per IP and per account
//! - Hourly usage statistics with threshold alerts
//!
//! Clients are keyed by authenticated user, then claimed email, then IP.
//! All per-key state sits behind [`store::KeyValueStore`]; the bundled
//! store is in-process.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod handlers;
pub mod key;
pub mod login;
pub mod metrics;
pub mod middleware;
pub mod policy;
pub mod request;
pub mod routes;
pub mod slowdown;
pub mod stats;
pub mod store;
pub mod sweeper;
pub mod window;

pub use config::Config;
pub use error::{ConfigError, GuardError, StoreError};
pub use guard::{AbuseGuard, Outcome};
pub use middleware::guard_layer;
pub use request::{AuthenticatedUser, RequestInfo};
