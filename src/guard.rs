// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Policy composition.
//!
//! [`AbuseGuard::protect`] runs one request through a fixed pipeline and
//! returns an [`Outcome`]:
//!
//! 1. resolve the client key and the route's policy bundle
//! 2. trusted addresses and exempt routes pass straight through
//! 3. progressive slowdown (sleep, never reject)
//! 4. primary quota, then burst quota
//! 5. brute-force locks (IP first, then account) on auth routes
//! 6. usage statistics
//!
//! Storage failures in steps 3-5 reject authentication routes with
//! `INTERNAL_ERROR` and let everything else through.

use crate::clock::{secs_until, Clock, SystemClock};
use crate::config::Config;
use crate::error::{GuardError, StoreError};
use crate::events::{SecurityEvent, SecurityEventSink, SecurityEventType, Severity, TracingSink};
use crate::key::{KeyResolver, RateLimitKey};
use crate::login::{AttemptOutcome, Axis, LockEntry, LoginAttemptTracker};
use crate::metrics::GuardMetrics;
use crate::policy::{PolicyRegistry, RejectionCode, SlowdownPolicy};
use crate::request::RequestInfo;
use crate::routes::{PolicyBundle, RouteConfigResolver, RouteTable};
use crate::slowdown::SlowdownCalculator;
use crate::stats::UsageStatsTracker;
use crate::store::{InMemoryStore, KeyValueStore};
use crate::window::{Admission, WindowCounter};
use axum::http::StatusCode;
use serde::Serialize;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Retry hint when the guard itself failed.
const INTERNAL_RETRY_SECS: u64 = 60;

/// Values for the `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateHeaders {
    pub limit: u64,
    pub remaining: u64,
    /// Window end in Unix seconds
    pub reset: u64,
}

impl From<&Admission> for RateHeaders {
    fn from(admission: &Admission) -> Self {
        Self {
            limit: admission.limit,
            remaining: admission.remaining,
            reset: admission.reset_at.div_ceil(1000),
        }
    }
}

/// State carried from `protect` to `complete`.
#[derive(Debug, Clone)]
pub struct ResponseTicket {
    key: RateLimitKey,
    endpoint: String,
    slowdown: Option<Arc<SlowdownPolicy>>,
    login: Option<LoginAttempt>,
}

#[derive(Debug, Clone)]
struct LoginAttempt {
    ip: String,
    account: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Admitted {
    /// Headers of the primary quota, when one counted this request
    pub rate: Option<RateHeaders>,
    /// Slowdown already served
    pub delay: Duration,
    /// Hand back to [`AbuseGuard::complete`] once the response status is known
    pub ticket: Option<ResponseTicket>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: RejectionCode,
    pub message: String,
    pub retry_after_secs: u64,
    pub rate: Option<RateHeaders>,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self.code {
            RejectionCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Admit(Admitted),
    Reject(Rejection),
}

impl Outcome {
    fn pass() -> Self {
        Outcome::Admit(Admitted::default())
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Outcome::Admit(_))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Outcome::Reject(rejection) => Some(rejection),
            Outcome::Admit(_) => None,
        }
    }
}

/// Builds an [`AbuseGuard`] from [`Config`], with injectable collaborators.
pub struct GuardBuilder {
    config: Config,
    registry: Option<PolicyRegistry>,
    routes: RouteTable,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn KeyValueStore>>,
    sink: Arc<dyn SecurityEventSink>,
    metrics: Option<Arc<GuardMetrics>>,
}

impl GuardBuilder {
    pub fn registry(mut self, registry: PolicyRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn SecurityEventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn metrics(mut self, metrics: Arc<GuardMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Resolve every policy and route. Any unknown name fails here.
    pub fn build(self) -> crate::error::Result<AbuseGuard> {
        let registry = match self.registry {
            Some(registry) => registry,
            None => self.config.policy_registry()?,
        };
        registry.validate()?;
        let routes = RouteConfigResolver::new(&self.routes, &registry)?;

        let store: Arc<dyn KeyValueStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryStore::new(self.clock.clone())),
        };
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(GuardMetrics::new()?),
        };

        Ok(AbuseGuard {
            resolver: KeyResolver::new(self.config.trust_proxy),
            routes,
            window: WindowCounter::new(store.clone()),
            slowdown: SlowdownCalculator::new(store.clone()),
            tracker: LoginAttemptTracker::new(
                store.clone(),
                self.clock.clone(),
                self.config.login.clone(),
            ),
            stats: UsageStatsTracker::new(
                self.clock.clone(),
                self.sink.clone(),
                self.config.alerts.clone(),
            ),
            trusted_ips: self.config.trusted_ips.iter().copied().collect(),
            store,
            clock: self.clock,
            sink: self.sink,
            metrics,
        })
    }
}

/// The abuse-protection pipeline.
pub struct AbuseGuard {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    resolver: KeyResolver,
    routes: RouteConfigResolver,
    window: WindowCounter,
    slowdown: SlowdownCalculator,
    tracker: LoginAttemptTracker,
    stats: UsageStatsTracker,
    sink: Arc<dyn SecurityEventSink>,
    metrics: Arc<GuardMetrics>,
    trusted_ips: HashSet<IpAddr>,
}

impl AbuseGuard {
    /// Builder with the system clock, an in-memory store, the standard
    /// route table and events written to tracing.
    pub fn builder(config: &Config) -> GuardBuilder {
        GuardBuilder {
            config: config.clone(),
            registry: None,
            routes: RouteTable::standard(),
            clock: Arc::new(SystemClock),
            store: None,
            sink: Arc::new(TracingSink),
            metrics: None,
        }
    }

    pub fn from_config(config: &Config) -> crate::error::Result<Self> {
        Self::builder(config).build()
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn routes(&self) -> &RouteConfigResolver {
        &self.routes
    }

    pub fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }

    pub fn tracker(&self) -> &LoginAttemptTracker {
        &self.tracker
    }

    pub fn stats(&self) -> &UsageStatsTracker {
        &self.stats
    }

    pub fn metrics(&self) -> &GuardMetrics {
        &self.metrics
    }

    /// Evaluate a request.
    pub async fn protect(&self, request: &RequestInfo) -> Outcome {
        let Some(bundle) = self.routes.resolve(&request.path) else {
            return Outcome::pass();
        };

        // Matched on the socket peer only; a forwarded hop is client-supplied
        if let Some(addr) = request.peer {
            if self.trusted_ips.contains(&addr) {
                debug!(ip = %addr, path = %request.path, "Trusted address, skipping guard");
                return Outcome::pass();
            }
        }

        if bundle.exempt {
            return Outcome::pass();
        }

        let key = self.resolver.resolve_key(request);
        let (outcome, failed) = match self.evaluate(request, bundle, &key).await {
            Ok(outcome) => (outcome, false),
            Err(err) => (self.on_failure(request, bundle, &key, err), true),
        };

        match &outcome {
            Outcome::Admit(_) => {
                if !failed {
                    self.metrics.admitted();
                }
                self.stats.record(&key, &bundle.route, false).await;
            }
            Outcome::Reject(rejection) => {
                self.stats.record(&key, &bundle.route, true).await;
                self.report_rejection(request, &key, rejection);
            }
        }
        outcome
    }

    async fn evaluate(
        &self,
        request: &RequestInfo,
        bundle: &PolicyBundle,
        key: &RateLimitKey,
    ) -> Result<Outcome, GuardError> {
        let mut delay = Duration::ZERO;
        if let Some(policy) = &bundle.slowdown {
            // Counted before sleeping, so a dropped request never counts twice
            delay = self.slowdown.delay_for(key, policy).await?;
            if !delay.is_zero() {
                self.metrics.delayed(delay);
                tokio::time::sleep(delay).await;
            }
        }

        let mut rate = None;
        for policy in [&bundle.primary, &bundle.burst].into_iter().flatten() {
            let admission = self.window.admit(key, policy, request).await?;
            if admission.exempt {
                continue;
            }
            let headers = RateHeaders::from(&admission);
            if rate.is_none() {
                rate = Some(headers);
            }
            if !admission.admitted {
                let now = self.clock.now_ms();
                let retry_after_secs = policy
                    .retry_after_secs
                    .unwrap_or_else(|| secs_until(admission.reset_at, now).max(1));
                return Ok(Outcome::Reject(Rejection {
                    code: policy.code,
                    message: policy.message.clone(),
                    retry_after_secs,
                    rate: Some(headers),
                }));
            }
        }

        if bundle.auth {
            if let Some(rejection) = self.check_locks(request).await? {
                return Ok(Outcome::Reject(Rejection { rate, ..rejection }));
            }
        }

        let slowdown = bundle
            .slowdown
            .clone()
            .filter(|policy| !policy.count_failed_requests);
        let login = bundle.login.then(|| LoginAttempt {
            ip: self.resolver.client_ip(request),
            account: request.email.clone(),
        });
        let ticket = (slowdown.is_some() || login.is_some()).then(|| ResponseTicket {
            key: key.clone(),
            endpoint: bundle.route.clone(),
            slowdown,
            login,
        });

        Ok(Outcome::Admit(Admitted {
            rate,
            delay,
            ticket,
        }))
    }

    async fn check_locks(&self, request: &RequestInfo) -> Result<Option<Rejection>, StoreError> {
        let now = self.clock.now_ms();
        let ip = self.resolver.client_ip(request);
        if let Some(lock) = self.tracker.ip_lock(&ip).await? {
            return Ok(Some(Rejection {
                code: RejectionCode::IpBlocked,
                message: "Too many failed login attempts from this address, please try again later."
                    .to_string(),
                retry_after_secs: lock.retry_after_secs(now),
                rate: None,
            }));
        }

        if let Some(account) = request.email.as_deref() {
            if let Some(lock) = self.tracker.account_lock(account).await? {
                return Ok(Some(Rejection {
                    code: RejectionCode::AccountLocked,
                    message: "This account is temporarily locked, please try again later."
                        .to_string(),
                    retry_after_secs: lock.retry_after_secs(now),
                    rate: None,
                }));
            }
        }
        Ok(None)
    }

    fn on_failure(
        &self,
        request: &RequestInfo,
        bundle: &PolicyBundle,
        key: &RateLimitKey,
        err: GuardError,
    ) -> Outcome {
        self.sink.emit(
            SecurityEvent::new(
                SecurityEventType::GuardFailure,
                Severity::High,
                key.to_string(),
                request.path.as_str(),
                self.clock.now_ms(),
            )
            .with_detail(err.to_string()),
        );

        if bundle.auth {
            error!(
                key = %key,
                path = %request.path,
                error = %err,
                "Guard check failed on authentication route, rejecting"
            );
            Outcome::Reject(Rejection {
                code: RejectionCode::InternalError,
                message: "The service is temporarily unavailable, please try again later."
                    .to_string(),
                retry_after_secs: INTERNAL_RETRY_SECS,
                rate: None,
            })
        } else {
            error!(
                key = %key,
                path = %request.path,
                error = %err,
                "Guard check failed, letting request through"
            );
            self.metrics.failed_open();
            Outcome::pass()
        }
    }

    fn report_rejection(&self, request: &RequestInfo, key: &RateLimitKey, rejection: &Rejection) {
        let severity = match rejection.code {
            RejectionCode::RateLimitExceeded | RejectionCode::BurstLimitExceeded => Severity::Medium,
            _ => Severity::High,
        };
        info!(
            key = %key,
            path = %request.path,
            code = %rejection.code,
            retry_after_secs = rejection.retry_after_secs,
            "Request rejected"
        );
        self.metrics.rejected(rejection.code.as_str());
        // Internal failures already produced a GUARD_FAILURE event
        if rejection.code != RejectionCode::InternalError {
            self.sink.emit(SecurityEvent::new(
                rejection.code.into(),
                severity,
                key.to_string(),
                request.path.as_str(),
                self.clock.now_ms(),
            ));
        }
    }

    /// Settle an admitted request once the handler produced `status`.
    ///
    /// Failed responses are refunded from slowdown policies that exclude
    /// failures. On login routes 2xx counts as a successful login and
    /// 401/403 as a failed one; other statuses are not login outcomes.
    pub async fn complete(&self, ticket: ResponseTicket, status: StatusCode) {
        let failed = status.is_client_error() || status.is_server_error();

        if let Some(policy) = ticket.slowdown.as_deref() {
            if failed {
                if let Err(err) = self.slowdown.refund(&ticket.key, policy).await {
                    warn!(key = %ticket.key, error = %err, "Failed to refund slowdown count");
                }
            }
        }

        let Some(login) = ticket.login else {
            return;
        };
        let succeeded = match status {
            s if s.is_success() => true,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => false,
            _ => return,
        };
        if let Err(err) = self
            .record_login(&login.ip, login.account.as_deref(), succeeded, &ticket.endpoint)
            .await
        {
            error!(ip = %login.ip, error = %err, "Failed to record login attempt");
        }
    }

    /// Feed a login outcome to the brute-force tracker.
    pub async fn record_login(
        &self,
        ip: &str,
        account: Option<&str>,
        succeeded: bool,
        endpoint: &str,
    ) -> Result<AttemptOutcome, StoreError> {
        if !succeeded {
            self.stats.record_failed_login(endpoint).await;
        }
        let outcome = self.tracker.record_attempt(ip, account, succeeded).await?;
        if let Some(lock) = &outcome.ip_locked {
            self.report_lock(Axis::Ip, lock, endpoint);
        }
        if let Some(lock) = &outcome.account_locked {
            self.report_lock(Axis::Account, lock, endpoint);
        }
        Ok(outcome)
    }

    fn report_lock(&self, axis: Axis, lock: &LockEntry, endpoint: &str) {
        let event_type = match axis {
            Axis::Ip => SecurityEventType::IpBlocked,
            Axis::Account => SecurityEventType::AccountLocked,
        };
        let now = self.clock.now_ms();
        self.metrics.lock_applied(axis.as_str());
        self.sink.emit(
            SecurityEvent::new(event_type, Severity::High, lock.key.as_str(), endpoint, now)
                .with_detail(format!("locked for {}s", lock.retry_after_secs(now))),
        );
    }
}
