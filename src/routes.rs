// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Route to policy mapping.
//!
//! Lookup order: exact path, then the longest matching prefix, then the
//! catch-all bundle for anything under `/api`, else no policy at all.
//! Prefixes are sorted once at construction.

use crate::error::ConfigError;
use crate::policy::{
    PolicyRegistry, RateLimitPolicy, SlowdownPolicy, ADMIN, API, AUTH_SLOWDOWN, AUTH_STRICT,
    BURST, CONTACT, GENERAL, GENERAL_SLOWDOWN, UPLOAD,
};
use std::sync::Arc;

const API_PREFIX: &str = "/api";

/// Policy names for a route, as configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleSpec {
    pub primary: Option<String>,
    pub burst: Option<String>,
    pub slowdown: Option<String>,
    /// Authentication route: brute-force check and fail-closed
    pub auth: bool,
    /// Login route: outcomes feed the brute-force tracker
    pub login: bool,
    /// Bypass the guard entirely
    pub exempt: bool,
}

impl BundleSpec {
    pub fn limit(primary: &str) -> Self {
        Self {
            primary: Some(primary.to_string()),
            ..Default::default()
        }
    }

    pub fn exempt() -> Self {
        Self {
            exempt: true,
            ..Default::default()
        }
    }

    pub fn with_burst(mut self, burst: &str) -> Self {
        self.burst = Some(burst.to_string());
        self
    }

    pub fn with_slowdown(mut self, slowdown: &str) -> Self {
        self.slowdown = Some(slowdown.to_string());
        self
    }

    pub fn auth(mut self) -> Self {
        self.auth = true;
        self
    }

    pub fn login(mut self) -> Self {
        self.auth = true;
        self.login = true;
        self
    }
}

/// Route table before policy names are resolved.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    exact: Vec<(String, BundleSpec)>,
    prefixes: Vec<(String, BundleSpec)>,
    api_default: Option<BundleSpec>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exact(mut self, path: &str, spec: BundleSpec) -> Self {
        self.exact.push((path.to_string(), spec));
        self
    }

    pub fn prefix(mut self, prefix: &str, spec: BundleSpec) -> Self {
        self.prefixes.push((prefix.to_string(), spec));
        self
    }

    pub fn api_default(mut self, spec: BundleSpec) -> Self {
        self.api_default = Some(spec);
        self
    }

    /// The application's standard routes.
    pub fn standard() -> Self {
        let auth = || {
            BundleSpec::limit(AUTH_STRICT)
                .with_slowdown(AUTH_SLOWDOWN)
                .auth()
        };

        Self::new()
            .exact("/api/auth/login", auth().login())
            .exact("/api/auth/register", auth())
            .exact("/api/auth/forgot-password", auth())
            .exact("/api/auth/reset-password", auth())
            .exact("/health", BundleSpec::exempt())
            .exact("/healthz", BundleSpec::exempt())
            .exact("/api/health", BundleSpec::exempt())
            .exact("/api/contact", BundleSpec::limit(CONTACT).with_burst(BURST))
            .exact("/stats", BundleSpec::limit(GENERAL))
            .prefix("/api/auth/", BundleSpec::limit(API).with_burst(BURST).auth())
            .prefix("/api/admin/", BundleSpec::limit(ADMIN).with_burst(BURST))
            .prefix("/api/files/upload", BundleSpec::limit(UPLOAD).with_burst(BURST))
            .prefix("/api/upload", BundleSpec::limit(UPLOAD).with_burst(BURST))
            .prefix("/static/", BundleSpec::exempt())
            .prefix("/assets/", BundleSpec::exempt())
            .prefix(
                "/admin",
                BundleSpec::limit(GENERAL).with_slowdown(GENERAL_SLOWDOWN),
            )
            .api_default(
                BundleSpec::limit(API)
                    .with_burst(BURST)
                    .with_slowdown(GENERAL_SLOWDOWN),
            )
    }
}

/// Resolved policies for a route.
#[derive(Debug, Clone)]
pub struct PolicyBundle {
    /// The exact path or prefix that selected this bundle
    pub route: String,
    pub primary: Option<Arc<RateLimitPolicy>>,
    pub burst: Option<Arc<RateLimitPolicy>>,
    pub slowdown: Option<Arc<SlowdownPolicy>>,
    pub auth: bool,
    pub login: bool,
    pub exempt: bool,
}

impl PolicyBundle {
    fn resolve(route: &str, spec: &BundleSpec, registry: &PolicyRegistry) -> Result<Self, ConfigError> {
        let rate_limit = |name: &Option<String>| {
            name.as_deref()
                .map(|n| registry.rate_limit(n))
                .transpose()
        };
        Ok(Self {
            route: route.to_string(),
            primary: rate_limit(&spec.primary)?,
            burst: rate_limit(&spec.burst)?,
            slowdown: spec
                .slowdown
                .as_deref()
                .map(|n| registry.slowdown(n))
                .transpose()?,
            auth: spec.auth,
            login: spec.login,
            exempt: spec.exempt,
        })
    }
}

pub struct RouteConfigResolver {
    exact: std::collections::HashMap<String, PolicyBundle>,
    // Sorted by descending prefix length
    prefixes: Vec<(String, PolicyBundle)>,
    api_default: Option<PolicyBundle>,
}

impl RouteConfigResolver {
    /// Resolve every policy name against `registry`. Unknown names fail here,
    /// not at first use.
    pub fn new(table: &RouteTable, registry: &PolicyRegistry) -> Result<Self, ConfigError> {
        let mut exact = std::collections::HashMap::new();
        for (path, spec) in &table.exact {
            check_route(path)?;
            exact.insert(
                normalize_path(path).to_string(),
                PolicyBundle::resolve(path, spec, registry)?,
            );
        }

        let mut prefixes = Vec::with_capacity(table.prefixes.len());
        for (prefix, spec) in &table.prefixes {
            check_route(prefix)?;
            prefixes.push((prefix.clone(), PolicyBundle::resolve(prefix, spec, registry)?));
        }
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let api_default = table
            .api_default
            .as_ref()
            .map(|spec| PolicyBundle::resolve(API_PREFIX, spec, registry))
            .transpose()?;

        Ok(Self {
            exact,
            prefixes,
            api_default,
        })
    }

    /// Bundle for `path`, or `None` for pass-through.
    pub fn resolve(&self, path: &str) -> Option<&PolicyBundle> {
        let path = normalize_path(path);
        if let Some(bundle) = self.exact.get(path) {
            return Some(bundle);
        }
        if let Some((_, bundle)) = self
            .prefixes
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
        {
            return Some(bundle);
        }
        if path.starts_with(API_PREFIX) {
            return self.api_default.as_ref();
        }
        None
    }
}

fn check_route(route: &str) -> Result<(), ConfigError> {
    if !route.starts_with('/') {
        return Err(ConfigError::InvalidRoute {
            route: route.to_string(),
            reason: "must start with '/'".to_string(),
        });
    }
    Ok(())
}

fn normalize_path(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}
